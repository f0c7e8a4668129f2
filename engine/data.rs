//! # Dataset Loading
//!
//! The dataset is the single mutable artifact of a run: one row per age, one
//! column per (type, from-state, to-state) probability, plus whatever other
//! columns the upstream estimation step exported. It is read once, before the
//! batch starts, and written once by the result writer.
//!
//! - Lazy Validation: columns are validated when a matrix asks for them, so a
//!   malformed column only fails the slices that need it.
//! - Passthrough: columns this tool does not understand are carried to the
//!   output untouched.

use crate::matrix::MalformedInputError;
use dashmap::DashMap;
use polars::prelude::*;
use std::fs::File;
use std::path::Path;
use thiserror::Error;

/// The age column exported by the estimation step.
pub const DEFAULT_AGE_COLUMN: &str = "agev";

/// Errors that prevent the dataset from being loaded at all.
#[derive(Error, Debug)]
pub enum DataError {
    #[error("Error from the underlying Polars DataFrame library: {0}")]
    PolarsError(#[from] PolarsError),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("The input table '{0}' contains no data rows.")]
    Empty(String),
    #[error(
        "The age column '{0}' could not be read as numbers. It must be numeric with no missing values."
    )]
    AgeColumnInvalid(String),
}

/// An ordered table of transition probabilities, one row per age.
#[derive(Debug, Clone)]
pub struct Dataset {
    frame: DataFrame,
    ages: Vec<f64>,
    /// Float views of the columns read so far; each column is cast once.
    numeric: DashMap<String, Result<Float64Chunked, MalformedInputError>>,
}

impl Dataset {
    /// Reads a delimited text file with a header row.
    pub fn load(path: &Path, delimiter: u8, age_column: &str) -> Result<Self, DataError> {
        log::info!("Loading transition table from '{}'", path.display());

        let frame = CsvReader::new(File::open(path)?)
            .with_options(
                CsvReadOptions::default()
                    .with_has_header(true)
                    .with_parse_options(CsvParseOptions::default().with_separator(delimiter)),
            )
            .finish()?;

        if frame.height() == 0 {
            return Err(DataError::Empty(path.display().to_string()));
        }

        let dataset = Self::from_frame(frame, age_column)?;
        log::info!(
            "Loaded {} age rows and {} columns",
            dataset.height(),
            dataset.frame.width()
        );
        Ok(dataset)
    }

    /// Wraps an in-memory frame. When the age column is absent, ages fall
    /// back to row positions.
    pub fn from_frame(frame: DataFrame, age_column: &str) -> Result<Self, DataError> {
        let ages = match frame.column(age_column) {
            Ok(column) => {
                let casted = column
                    .cast(&DataType::Float64)
                    .map_err(|_| DataError::AgeColumnInvalid(age_column.to_string()))?;
                let values = casted.f64()?;
                if values.null_count() > 0 {
                    return Err(DataError::AgeColumnInvalid(age_column.to_string()));
                }
                values.into_iter().flatten().collect()
            }
            Err(_) => {
                log::warn!(
                    "Age column '{age_column}' not found; ages are reported as row positions."
                );
                (0..frame.height()).map(|row| row as f64).collect()
            }
        };

        Ok(Self {
            frame,
            ages,
            numeric: DashMap::new(),
        })
    }

    pub fn height(&self) -> usize {
        self.frame.height()
    }

    /// Age values, one per row, in table order.
    pub fn ages(&self) -> &[f64] {
        &self.ages
    }

    pub fn age(&self, row: usize) -> Option<f64> {
        self.ages.get(row).copied()
    }

    pub fn frame(&self) -> &DataFrame {
        &self.frame
    }

    pub(crate) fn frame_mut(&mut self) -> &mut DataFrame {
        self.numeric.clear();
        &mut self.frame
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.frame.column(name).is_ok()
    }

    /// Reads one numeric cell. The value must be present and finite.
    pub fn value(&self, name: &str, row: usize) -> Result<f64, MalformedInputError> {
        let values = self.numeric_column(name)?;

        if row >= self.frame.height() {
            return Err(MalformedInputError::RowOutOfRange {
                row,
                height: self.frame.height(),
            });
        }

        match values.get(row) {
            None => Err(MalformedInputError::MissingValue {
                column: name.to_string(),
                row,
            }),
            Some(value) if !value.is_finite() => Err(MalformedInputError::NonFinite {
                column: name.to_string(),
                row,
            }),
            Some(value) => Ok(value),
        }
    }

    fn numeric_column(&self, name: &str) -> Result<Float64Chunked, MalformedInputError> {
        if let Some(cached) = self.numeric.get(name) {
            return cached.clone();
        }
        self.numeric
            .entry(name.to_string())
            .or_insert_with(|| self.cast_column(name))
            .clone()
    }

    fn cast_column(&self, name: &str) -> Result<Float64Chunked, MalformedInputError> {
        let column = self
            .frame
            .column(name)
            .map_err(|_| MalformedInputError::ColumnNotFound(name.to_string()))?;

        let wrong_type = || MalformedInputError::ColumnWrongType {
            column: name.to_string(),
            found: format!("{:?}", column.dtype()),
        };

        let casted = column.cast(&DataType::Float64).map_err(|_| wrong_type())?;
        // A lossy cast from text turns unparsable cells into nulls.
        if casted.null_count() != column.null_count() {
            return Err(wrong_type());
        }
        casted.f64().cloned().map_err(|_| wrong_type())
    }
}
