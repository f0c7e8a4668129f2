//! Builders for synthetic transition tables shared by the unit tests.

use crate::data::{DEFAULT_AGE_COLUMN, Dataset};
use crate::schema::ColumnSchema;
use ndarray::{Array2, array};
use polars::prelude::{Column, DataFrame};

/// The five-state banded matrix with a 0.2 mortality from the sickest state.
pub fn banded() -> Array2<f64> {
    array![
        [0.8, 0.2, 0.0, 0.0, 0.0, 0.0],
        [0.1, 0.7, 0.2, 0.0, 0.0, 0.0],
        [0.0, 0.1, 0.7, 0.2, 0.0, 0.0],
        [0.0, 0.0, 0.1, 0.7, 0.2, 0.0],
        [0.0, 0.0, 0.0, 0.1, 0.7, 0.2],
        [0.0, 0.0, 0.0, 0.0, 0.0, 1.0],
    ]
}

/// A banded matrix whose health decays with `shift`, so every age differs.
pub fn aged(shift: f64) -> Array2<f64> {
    let mut matrix = banded();
    for state in 0..5 {
        let moved = shift.min(matrix[[state, state]] - 0.1);
        matrix[[state, state]] -= moved;
        matrix[[state, 5]] += moved;
    }
    matrix
}

/// Builds a frame with an age column and the live-row columns of every
/// `(type, matrices)` entry; `matrices[i]` belongs to `ages[i]`.
pub fn transition_frame(
    schema: &ColumnSchema,
    ages: &[f64],
    slices: &[(&str, Vec<Array2<f64>>)],
) -> DataFrame {
    let mut columns = vec![Column::new(DEFAULT_AGE_COLUMN.into(), ages.to_vec())];
    for (type_label, matrices) in slices {
        assert_eq!(matrices.len(), ages.len());
        for from in 0..schema.live_states() {
            for to in 0..schema.states() {
                let values: Vec<f64> = matrices.iter().map(|m| m[[from, to]]).collect();
                let name = schema.column_name(type_label, from, to, false);
                columns.push(Column::new(name.into(), values));
            }
        }
    }
    DataFrame::new(columns).expect("consistent column lengths")
}

pub fn transition_dataset(
    schema: &ColumnSchema,
    ages: &[f64],
    slices: &[(&str, Vec<Array2<f64>>)],
) -> Dataset {
    Dataset::from_frame(transition_frame(schema, ages, slices), DEFAULT_AGE_COLUMN)
        .expect("fixture ages are numeric")
}
