//! Assembly of per-slice transition matrices.

use crate::data::Dataset;
use crate::schema::ColumnSchema;
use ndarray::{Array2, ArrayView2};
use thiserror::Error;

/// Rows must sum to one within this tolerance unless configured otherwise.
pub const DEFAULT_ROW_SUM_TOLERANCE: f64 = 1e-6;

/// The input for one slice cannot be turned into a transition matrix.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MalformedInputError {
    #[error(
        "The required column '{0}' was not found in the input table. Please check spelling and case."
    )]
    ColumnNotFound(String),
    #[error("Age row {row} is out of range; the input table has {height} rows.")]
    RowOutOfRange { row: usize, height: usize },
    #[error("Column '{column}' could not be read as numbers (found type: {found}).")]
    ColumnWrongType { column: String, found: String },
    #[error("Column '{column}' has a missing value at age row {row}.")]
    MissingValue { column: String, row: usize },
    #[error("Column '{column}' has a non-finite value (NaN or Infinity) at age row {row}.")]
    NonFinite { column: String, row: usize },
    #[error("Transition {} -> {} has value {value}, which is not a probability in [0, 1].", .from + 1, .to + 1)]
    NotAProbability { from: usize, to: usize, value: f64 },
    #[error("Transitions out of state {} sum to {sum}, not 1 (tolerance {tolerance}).", .state + 1)]
    RowSum {
        state: usize,
        sum: f64,
        tolerance: f64,
    },
    #[error("Expected a {expected}x{expected} matrix, found {rows}x{cols}.")]
    Shape {
        expected: usize,
        rows: usize,
        cols: usize,
    },
}

/// A square row-stochastic matrix whose last state is absorbing.
///
/// Values are only reachable through constructors that check the invariants,
/// so holding a `TransitionMatrix` means holding a valid one.
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionMatrix {
    values: Array2<f64>,
}

/// The 1-year-equivalent matrix produced by the root engine. It carries the
/// same invariants as its input.
pub type AdjustedMatrix = TransitionMatrix;

impl TransitionMatrix {
    /// Wraps values that the caller has already projected onto the valid set.
    pub(crate) fn from_projected(values: Array2<f64>) -> Self {
        Self { values }
    }

    pub fn values(&self) -> ArrayView2<'_, f64> {
        self.values.view()
    }

    pub fn into_inner(self) -> Array2<f64> {
        self.values
    }

    pub fn states(&self) -> usize {
        self.values.nrows()
    }

    pub fn death_index(&self) -> usize {
        self.values.nrows() - 1
    }

    pub fn get(&self, from: usize, to: usize) -> f64 {
        self.values[[from, to]]
    }
}

/// Builds transition matrices from the dataset, one slice at a time.
#[derive(Debug, Clone)]
pub struct MatrixBuilder {
    schema: ColumnSchema,
    row_sum_tolerance: f64,
}

impl MatrixBuilder {
    pub fn new(schema: ColumnSchema, row_sum_tolerance: f64) -> Self {
        Self {
            schema,
            row_sum_tolerance,
        }
    }

    pub fn schema(&self) -> &ColumnSchema {
        &self.schema
    }

    /// Reads the live rows of `type_label` at `age_index` and closes the
    /// matrix with the absorbing death row.
    pub fn build(
        &self,
        dataset: &Dataset,
        age_index: usize,
        type_label: &str,
    ) -> Result<TransitionMatrix, MalformedInputError> {
        let states = self.schema.states();
        let mut values = Array2::<f64>::zeros((states, states));
        for from in 0..self.schema.live_states() {
            for to in 0..states {
                let column = self.schema.column_name(type_label, from, to, false);
                values[[from, to]] = dataset.value(&column, age_index)?;
            }
        }
        self.close(values)
    }

    /// Validates an in-memory matrix. Whatever the last row holds is replaced
    /// by the absorbing unit vector.
    pub fn from_rows(&self, values: Array2<f64>) -> Result<TransitionMatrix, MalformedInputError> {
        let states = self.schema.states();
        if values.nrows() != states || values.ncols() != states {
            return Err(MalformedInputError::Shape {
                expected: states,
                rows: values.nrows(),
                cols: values.ncols(),
            });
        }
        self.close(values)
    }

    fn close(&self, mut values: Array2<f64>) -> Result<TransitionMatrix, MalformedInputError> {
        let death = self.schema.death_index();
        values.row_mut(death).fill(0.0);
        values[[death, death]] = 1.0;

        for (from, row) in values.rows().into_iter().enumerate().take(death) {
            for (to, &value) in row.iter().enumerate() {
                if !(0.0..=1.0).contains(&value) {
                    return Err(MalformedInputError::NotAProbability { from, to, value });
                }
            }
            let sum = row.sum();
            if (sum - 1.0).abs() > self.row_sum_tolerance {
                return Err(MalformedInputError::RowSum {
                    state: from,
                    sum,
                    tolerance: self.row_sum_tolerance,
                });
            }
        }

        Ok(TransitionMatrix { values })
    }
}
