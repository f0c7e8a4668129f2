//! # Run Configuration
//!
//! A run is described by a TOML file. Besides the numerical parameters it
//! lists named deployments, each a pair of directories on some machine. The
//! command line picks a deployment by name and the configuration resolves it
//! into explicit input, output and report paths; nothing below this layer
//! looks at the environment or the host it runs on.
//!
//! ```toml
//! exponent = 0.5
//! types = ["a", "f", "m", "b0", "b1", "s0", "s1"]
//! input_file = "MEPS_HRS_1992-2017_Age_All_Dead_OLogit.csv"
//! output_file = "MEPS_HRS_1992-2017_Age_All_Dead_OLogit_Adj.csv"
//!
//! [deployments.workstation]
//! data_dir = "/data/HealthMarkov/Stata/Output"
//! output_dir = "/data/HealthMarkov/Stata/Output"
//! ```

use crate::data::DEFAULT_AGE_COLUMN;
use crate::matrix::{DEFAULT_ROW_SUM_TOLERANCE, MatrixBuilder};
use crate::root::{RootOptions, StochasticRootEngine};
use crate::schema::{ColumnSchema, DEFAULT_SOURCE_TAG, DEFAULT_STATES};
use ahash::AHashSet;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read or write configuration file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML configuration file: {0}")]
    TomlParseError(#[from] toml::de::Error),
    #[error("Failed to serialize configuration to TOML format: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),
    #[error("Deployment '{name}' is not defined. Available deployments: {available:?}")]
    UnknownDeployment {
        name: String,
        available: Vec<String>,
    },
    #[error(
        "Several deployments are defined ({0:?}); choose one explicitly or pass explicit paths."
    )]
    AmbiguousDeployment(Vec<String>),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Directory layout of one machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deployment {
    pub data_dir: PathBuf,
    pub output_dir: PathBuf,
}

/// Input, output and report locations for one run.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedPaths {
    pub input: PathBuf,
    pub output: PathBuf,
    pub report: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    /// Fraction of the estimation interval covered by one adjusted step.
    pub exponent: f64,
    /// Matrix dimension; the last state is death.
    pub states: usize,
    pub source_tag: String,
    /// Demographic type labels, in output order.
    pub types: Vec<String>,
    pub age_column: String,
    /// Restricts the batch to these age values; all rows when absent.
    pub ages: Option<Vec<f64>>,
    pub delimiter: char,
    pub row_sum_tolerance: f64,
    /// Worker threads; zero means one per logical CPU.
    pub threads: usize,
    pub root: RootOptions,
    pub input_file: String,
    pub output_file: String,
    pub report_file: Option<String>,
    pub deployments: BTreeMap<String, Deployment>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            exponent: 0.5,
            states: DEFAULT_STATES,
            source_tag: DEFAULT_SOURCE_TAG.to_string(),
            types: ["a", "f", "m", "b0", "b1", "s0", "s1"]
                .iter()
                .map(|label| label.to_string())
                .collect(),
            age_column: DEFAULT_AGE_COLUMN.to_string(),
            ages: None,
            delimiter: ',',
            row_sum_tolerance: DEFAULT_ROW_SUM_TOLERANCE,
            threads: 0,
            root: RootOptions::default(),
            input_file: "MEPS_HRS_1992-2017_Age_All_Dead_OLogit.csv".to_string(),
            output_file: "MEPS_HRS_1992-2017_Age_All_Dead_OLogit_Adj.csv".to_string(),
            report_file: None,
            deployments: BTreeMap::new(),
        }
    }
}

impl RunConfig {
    /// Loads and validates a configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let toml_string = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&toml_string)?;
        config.validate()?;
        Ok(config)
    }

    /// Saves the configuration in a human-readable TOML format.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let toml_string = toml::to_string_pretty(self)?;
        let mut file = BufWriter::new(fs::File::create(path)?);
        file.write_all(toml_string.as_bytes())?;
        file.flush()?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |message: String| Err(ConfigError::Invalid(message));

        if !self.exponent.is_finite() || self.exponent <= 0.0 || self.exponent > 1.0 {
            return invalid(format!("exponent {} must lie in (0, 1]", self.exponent));
        }
        if self.states < 2 {
            return invalid(format!(
                "states = {} leaves no live state besides death",
                self.states
            ));
        }
        if self.types.is_empty() {
            return invalid("at least one type label is required".to_string());
        }
        let mut seen: AHashSet<&str> = AHashSet::new();
        for label in &self.types {
            if label.is_empty() || !seen.insert(label.as_str()) {
                return invalid(format!("type label '{label}' is empty or repeated"));
            }
        }
        if !self.delimiter.is_ascii() {
            return invalid(format!("delimiter '{}' must be ASCII", self.delimiter));
        }
        if !(self.row_sum_tolerance > 0.0) {
            return invalid("row_sum_tolerance must be positive".to_string());
        }
        if self.root.square_root_tolerance <= 0.0 || self.root.max_condition <= 1.0 {
            return invalid(
                "square_root_tolerance must be positive and max_condition above 1".to_string(),
            );
        }
        if !(self.root.defective_condition >= 1.0) {
            return invalid("defective_condition must be at least 1".to_string());
        }
        Ok(())
    }

    /// Resolves paths for `deployment`. Without a name, a single defined
    /// deployment is used; with none defined, file names are taken as given.
    pub fn resolve_paths(&self, deployment: Option<&str>) -> Result<ResolvedPaths, ConfigError> {
        let chosen = match deployment {
            Some(name) => Some(self.deployments.get(name).ok_or_else(|| {
                ConfigError::UnknownDeployment {
                    name: name.to_string(),
                    available: self.deployments.keys().cloned().collect(),
                }
            })?),
            None if self.deployments.len() > 1 => {
                return Err(ConfigError::AmbiguousDeployment(
                    self.deployments.keys().cloned().collect(),
                ));
            }
            None => self.deployments.values().next(),
        };

        let (input, output) = match chosen {
            Some(layout) => (
                layout.data_dir.join(&self.input_file),
                layout.output_dir.join(&self.output_file),
            ),
            None => (
                PathBuf::from(&self.input_file),
                PathBuf::from(&self.output_file),
            ),
        };
        let report = self.report_path_for(&output);

        Ok(ResolvedPaths {
            input,
            output,
            report,
        })
    }

    /// Where the slice report for `output` goes: `report_file` next to the
    /// output table when configured, `<stem>_report.csv` otherwise.
    pub fn report_path_for(&self, output: &Path) -> PathBuf {
        match &self.report_file {
            Some(name) => output
                .parent()
                .map(|dir| dir.join(name))
                .unwrap_or_else(|| PathBuf::from(name)),
            None => default_report_path(output),
        }
    }

    pub fn delimiter_byte(&self) -> u8 {
        self.delimiter as u8
    }

    pub fn schema(&self) -> ColumnSchema {
        ColumnSchema::new(self.states, &self.source_tag)
    }

    pub fn matrix_builder(&self) -> MatrixBuilder {
        MatrixBuilder::new(self.schema(), self.row_sum_tolerance)
    }

    pub fn engine(&self) -> StochasticRootEngine {
        StochasticRootEngine::new(self.root)
    }
}

/// `dir/table.csv` reports to `dir/table_report.csv`.
pub fn default_report_path(output: &Path) -> PathBuf {
    let stem = output
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "stochroot".to_string());
    output.with_file_name(format!("{stem}_report.csv"))
}
