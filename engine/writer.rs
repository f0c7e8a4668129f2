//! Write-back of adjusted matrices into the table, plus the per-slice report.

use crate::batch::{BatchReport, SliceKey};
use crate::data::Dataset;
use crate::schema::ColumnSchema;
use polars::prelude::*;
use serde::Serialize;
use std::fs::{self, File};
use std::path::Path;
use thiserror::Error;

/// Value held by adjusted cells that the batch never populates: the whole
/// death row, and live rows of ages outside the requested grid.
pub const UNPOPULATED_DEFAULT: f64 = 0.0;

#[derive(Error, Debug)]
pub enum WriteError {
    #[error("Error from the underlying Polars DataFrame library: {0}")]
    PolarsError(#[from] PolarsError),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to write the slice report: {0}")]
    CsvError(#[from] csv::Error),
}

/// One line of the slice report.
#[derive(Debug, Serialize)]
struct ReportRow {
    age_index: usize,
    age: Option<f64>,
    type_label: String,
    status: &'static str,
    method: Option<String>,
    projection_l1: Option<f64>,
    imaginary_residual: Option<f64>,
    reconstruction_error: Option<f64>,
    message: String,
}

pub struct ResultWriter {
    schema: ColumnSchema,
}

impl ResultWriter {
    pub fn new(schema: ColumnSchema) -> Self {
        Self { schema }
    }

    /// Adds every declared `_adj` column for `types`.
    ///
    /// Live rows of rooted slices receive the adjusted probabilities and live
    /// rows of failed slices are null. Death-row columns are declared but
    /// keep [`UNPOPULATED_DEFAULT`]; the death row is never written back.
    pub fn augment(
        &self,
        dataset: &mut Dataset,
        types: &[String],
        report: &BatchReport,
    ) -> Result<(), WriteError> {
        let height = dataset.height();
        let live_states = self.schema.live_states();

        for type_label in types {
            let keys: Vec<SliceKey> = (0..height)
                .map(|row| SliceKey::new(row, type_label))
                .collect();

            for from in 0..self.schema.states() {
                for to in 0..self.schema.states() {
                    let values: Vec<Option<f64>> = keys
                        .iter()
                        .map(|key| {
                            if from >= live_states {
                                return Some(UNPOPULATED_DEFAULT);
                            }
                            match report.adjusted.get(key) {
                                Some(outcome) => Some(outcome.matrix.get(from, to)),
                                None if report.failures.contains_key(key) => None,
                                None => Some(UNPOPULATED_DEFAULT),
                            }
                        })
                        .collect();

                    let name = self.schema.column_name(type_label, from, to, true);
                    dataset
                        .frame_mut()
                        .with_column(Column::new(name.into(), values))?;
                }
            }
        }

        log::info!(
            "Added {} adjusted columns",
            types.len() * self.schema.states() * self.schema.states()
        );
        Ok(())
    }

    /// Persists the (augmented) table as delimited text.
    pub fn write_table(
        &self,
        dataset: &mut Dataset,
        path: &Path,
        delimiter: u8,
    ) -> Result<(), WriteError> {
        create_parent_dir(path)?;
        let mut file = File::create(path)?;
        CsvWriter::new(&mut file)
            .include_header(true)
            .with_separator(delimiter)
            .finish(dataset.frame_mut())?;
        log::info!("Wrote adjusted table to '{}'", path.display());
        Ok(())
    }

    /// Writes one CSV line per slice: successes, warnings and failures.
    pub fn write_report(
        &self,
        report: &BatchReport,
        dataset: &Dataset,
        path: &Path,
    ) -> Result<(), WriteError> {
        create_parent_dir(path)?;
        let mut rows: Vec<(&SliceKey, ReportRow)> = Vec::with_capacity(report.total());

        for (key, outcome) in &report.adjusted {
            let messages: Vec<String> = outcome.flags.iter().map(|flag| flag.to_string()).collect();
            rows.push((
                key,
                ReportRow {
                    age_index: key.age_index,
                    age: dataset.age(key.age_index),
                    type_label: key.type_label.clone(),
                    status: if messages.is_empty() { "ok" } else { "warning" },
                    method: Some(outcome.method.to_string()),
                    projection_l1: Some(outcome.projection_l1),
                    imaginary_residual: Some(outcome.imaginary_residual),
                    reconstruction_error: outcome.reconstruction_error,
                    message: messages.join("; "),
                },
            ));
        }
        for (key, error) in &report.failures {
            rows.push((
                key,
                ReportRow {
                    age_index: key.age_index,
                    age: dataset.age(key.age_index),
                    type_label: key.type_label.clone(),
                    status: "failed",
                    method: None,
                    projection_l1: None,
                    imaginary_residual: None,
                    reconstruction_error: None,
                    message: format!("{}: {error}", error.kind()),
                },
            ));
        }
        rows.sort_by(|a, b| a.0.cmp(b.0));

        let mut writer = csv::Writer::from_path(path)?;
        for (_, row) in rows {
            writer.serialize(row)?;
        }
        writer.flush()?;
        log::info!("Wrote slice report to '{}'", path.display());
        Ok(())
    }
}

fn create_parent_dir(path: &Path) -> std::io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => fs::create_dir_all(parent),
        _ => Ok(()),
    }
}
