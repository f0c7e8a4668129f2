//! # Batch Orchestration
//!
//! A run evaluates the root engine on every (age, type) slice of the table.
//! Slices are unrelated estimation problems: each one only reads the shared
//! dataset and owns its own output slot, so they run on a rayon worker pool
//! with no coordination beyond a concurrent map keyed by slice identity.
//!
//! A slice that cannot be built or rooted is recorded against its key and
//! the batch moves on. Whether any failure makes the run unacceptable is the
//! caller's decision.

use crate::data::Dataset;
use crate::matrix::{MalformedInputError, MatrixBuilder};
use crate::progress::BatchProgressObserver;
use crate::root::{RootError, RootOutcome, StochasticRootEngine};
use dashmap::DashMap;
use itertools::iproduct;
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Ages given in the configuration match table ages within this distance.
const AGE_MATCH_TOLERANCE: f64 = 1e-9;

/// One coordinate of the batch grid.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SliceKey {
    /// Row of the dataset.
    pub age_index: usize,
    pub type_label: String,
}

impl SliceKey {
    pub fn new(age_index: usize, type_label: &str) -> Self {
        Self {
            age_index,
            type_label: type_label.to_string(),
        }
    }
}

impl fmt::Display for SliceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "age row {} / type '{}'", self.age_index, self.type_label)
    }
}

/// Why one slice produced no adjusted matrix.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SliceError {
    #[error("Malformed input: {0}")]
    MalformedInput(#[from] MalformedInputError),
    #[error(transparent)]
    Root(#[from] RootError),
}

impl SliceError {
    /// Short machine-friendly category used in reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MalformedInput(_) => "malformed-input",
            Self::Root(RootError::InvalidExponent(_)) => "invalid-exponent",
            Self::Root(RootError::NonConvergentDecomposition { .. }) => "non-convergent",
        }
    }
}

/// Problems with the requested grid itself.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GridError {
    #[error("Age {0} was requested but does not appear in the age column.")]
    UnknownAge(f64),
    #[error("No demographic types were requested.")]
    NoTypes,
}

/// Per-slice outcomes of a batch, ordered by key.
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub adjusted: BTreeMap<SliceKey, RootOutcome>,
    pub failures: BTreeMap<SliceKey, SliceError>,
}

impl BatchReport {
    pub fn total(&self) -> usize {
        self.adjusted.len() + self.failures.len()
    }

    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// `(succeeded, failed)` slice counts per age row.
    pub fn age_summary(&self) -> BTreeMap<usize, (usize, usize)> {
        let mut summary: BTreeMap<usize, (usize, usize)> = BTreeMap::new();
        for key in self.adjusted.keys() {
            summary.entry(key.age_index).or_default().0 += 1;
        }
        for key in self.failures.keys() {
            summary.entry(key.age_index).or_default().1 += 1;
        }
        summary
    }

    /// Successful slices that carry at least one quality flag.
    pub fn flagged(&self) -> impl Iterator<Item = (&SliceKey, &RootOutcome)> {
        self.adjusted
            .iter()
            .filter(|(_, outcome)| !outcome.flags.is_empty())
    }
}

pub struct BatchProcessor {
    builder: MatrixBuilder,
    engine: StochasticRootEngine,
    exponent: f64,
    threads: usize,
}

impl BatchProcessor {
    pub fn new(builder: MatrixBuilder, engine: StochasticRootEngine, exponent: f64) -> Self {
        Self {
            builder,
            engine,
            exponent,
            threads: num_cpus::get(),
        }
    }

    /// Caps the worker pool. Zero means one worker per logical CPU.
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = if threads == 0 { num_cpus::get() } else { threads };
        self
    }

    pub fn exponent(&self) -> f64 {
        self.exponent
    }

    /// Every (age, type) pair, ages in table order. With `ages`, only rows
    /// whose age value is listed take part.
    pub fn grid(
        dataset: &Dataset,
        types: &[String],
        ages: Option<&[f64]>,
    ) -> Result<Vec<SliceKey>, GridError> {
        if types.is_empty() {
            return Err(GridError::NoTypes);
        }

        let rows: Vec<usize> = match ages {
            None => (0..dataset.height()).collect(),
            Some(requested) => {
                let mut rows = Vec::with_capacity(requested.len());
                for &age in requested {
                    let row = dataset
                        .ages()
                        .iter()
                        .position(|&value| (value - age).abs() <= AGE_MATCH_TOLERANCE)
                        .ok_or(GridError::UnknownAge(age))?;
                    rows.push(row);
                }
                rows.sort_unstable();
                rows.dedup();
                rows
            }
        };

        Ok(iproduct!(rows, types)
            .map(|(row, type_label)| SliceKey::new(row, type_label))
            .collect())
    }

    /// Builds and roots a single slice.
    pub fn process_slice(
        &self,
        dataset: &Dataset,
        key: &SliceKey,
    ) -> Result<RootOutcome, SliceError> {
        let matrix = self
            .builder
            .build(dataset, key.age_index, &key.type_label)?;
        let outcome = self.engine.compute_root(&matrix, self.exponent)?;
        log::debug!("{key}: rooted via {}", outcome.method);
        Ok(outcome)
    }

    pub fn run(
        &self,
        dataset: &Dataset,
        keys: &[SliceKey],
        observer: &dyn BatchProgressObserver,
    ) -> BatchReport {
        log::info!(
            "Rooting {} slices with exponent {} on {} worker(s)",
            keys.len(),
            self.exponent,
            self.threads
        );

        let results: DashMap<SliceKey, Result<RootOutcome, SliceError>> =
            DashMap::with_capacity(keys.len());
        observer.on_start(keys.len());

        let work = || {
            keys.par_iter().for_each(|key| {
                let outcome = self.process_slice(dataset, key);
                observer.on_slice_done(key, outcome.is_ok());
                results.insert(key.clone(), outcome);
            })
        };
        match rayon::ThreadPoolBuilder::new()
            .num_threads(self.threads)
            .build()
        {
            Ok(pool) => pool.install(work),
            Err(e) => {
                log::warn!("Could not build a dedicated worker pool ({e}); using the global pool.");
                work()
            }
        }
        observer.on_finish();

        let mut report = BatchReport::default();
        for (key, result) in results {
            match result {
                Ok(outcome) => {
                    report.adjusted.insert(key, outcome);
                }
                Err(error) => {
                    report.failures.insert(key, error);
                }
            }
        }

        for (age_index, (succeeded, failed)) in report.age_summary() {
            let age = dataset.age(age_index).unwrap_or(age_index as f64);
            log::info!("Age {age}: {succeeded} slice(s) rooted, {failed} failed");
        }
        for (key, error) in &report.failures {
            log::warn!("{key} failed: {error}");
        }
        for (key, outcome) in report.flagged() {
            for flag in &outcome.flags {
                log::warn!("{key}: {flag}");
            }
        }
        log::info!(
            "Batch finished: {} succeeded, {} failed",
            report.adjusted.len(),
            report.failures.len()
        );

        report
    }
}
