//! # Column Naming Convention
//!
//! The tabular input stores one transition probability per column. A column
//! name encodes the demographic type, the source state and the destination
//! state, e.g. `f_hrs_3_to_pr4` is the female probability of moving from
//! health state 3 to health state 4. Adjusted (stochastic-root) values live
//! in a parallel column carrying an `_adj` suffix.
//!
//! States are 1-based in column names and 0-based everywhere else. This
//! module is the only place that knows about the translation, so the engine
//! can work purely on indexed matrices.

use std::fmt;

/// The number of states in the motivating model: five live health states plus death.
pub const DEFAULT_STATES: usize = 6;

/// The survey tag embedded in every probability column name.
pub const DEFAULT_SOURCE_TAG: &str = "hrs";

const ADJUSTED_SUFFIX: &str = "_adj";
const DESTINATION_MARKER: &str = "_to_pr";

/// A probability column decoded into its coordinates.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProbabilityColumn {
    pub type_label: String,
    /// 0-based source state.
    pub from_state: usize,
    /// 0-based destination state.
    pub to_state: usize,
    pub adjusted: bool,
}

/// Bidirectional mapping between matrix coordinates and column names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSchema {
    states: usize,
    source_tag: String,
}

impl Default for ColumnSchema {
    fn default() -> Self {
        Self::new(DEFAULT_STATES, DEFAULT_SOURCE_TAG)
    }
}

impl ColumnSchema {
    pub fn new(states: usize, source_tag: &str) -> Self {
        Self {
            states,
            source_tag: source_tag.to_string(),
        }
    }

    /// Matrix dimension, including the absorbing state.
    pub fn states(&self) -> usize {
        self.states
    }

    /// Index of the absorbing death state. It is always the last state.
    pub fn death_index(&self) -> usize {
        self.states - 1
    }

    /// Number of rows the input table is expected to supply per type.
    pub fn live_states(&self) -> usize {
        self.states - 1
    }

    /// Builds the column name for a 0-based `(from, to)` transition.
    pub fn column_name(
        &self,
        type_label: &str,
        from_state: usize,
        to_state: usize,
        adjusted: bool,
    ) -> String {
        let suffix = if adjusted { ADJUSTED_SUFFIX } else { "" };
        format!(
            "{type_label}_{}_{}{DESTINATION_MARKER}{}{suffix}",
            self.source_tag,
            from_state + 1,
            to_state + 1
        )
    }

    /// Decodes a column name. Returns `None` for anything that is not a
    /// probability column of this schema, including out-of-range states.
    pub fn parse(&self, name: &str) -> Option<ProbabilityColumn> {
        let (body, adjusted) = match name.strip_suffix(ADJUSTED_SUFFIX) {
            Some(body) => (body, true),
            None => (name, false),
        };

        let marker = format!("_{}_", self.source_tag);
        let split_at = body.rfind(&marker)?;
        let type_label = &body[..split_at];
        if type_label.is_empty() {
            return None;
        }

        let (from_text, to_text) = body[split_at + marker.len()..].split_once(DESTINATION_MARKER)?;
        let from_state = self.parse_state(from_text)?;
        let to_state = self.parse_state(to_text)?;

        Some(ProbabilityColumn {
            type_label: type_label.to_string(),
            from_state,
            to_state,
            adjusted,
        })
    }

    fn parse_state(&self, text: &str) -> Option<usize> {
        if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let one_based: usize = text.parse().ok()?;
        (1..=self.states).contains(&one_based).then(|| one_based - 1)
    }

    /// Input columns required to assemble the live rows of one type, in
    /// row-major order.
    pub fn input_columns(&self, type_label: &str) -> Vec<String> {
        (0..self.live_states())
            .flat_map(|from| (0..self.states).map(move |to| (from, to)))
            .map(|(from, to)| self.column_name(type_label, from, to, false))
            .collect()
    }

    /// Every adjusted column declared for one type, death row included, in
    /// row-major order.
    pub fn adjusted_columns(&self, type_label: &str) -> Vec<String> {
        (0..self.states)
            .flat_map(|from| (0..self.states).map(move |to| (from, to)))
            .map(|(from, to)| self.column_name(type_label, from, to, true))
            .collect()
    }
}

impl fmt::Display for ProbabilityColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} -> {}{}",
            self.type_label,
            self.from_state + 1,
            self.to_state + 1,
            if self.adjusted { " (adjusted)" } else { "" }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_use_one_based_states() {
        let schema = ColumnSchema::default();
        assert_eq!(schema.column_name("a", 0, 1, false), "a_hrs_1_to_pr2");
        assert_eq!(schema.column_name("s1", 5, 5, true), "s1_hrs_6_to_pr6_adj");
    }

    #[test]
    fn parse_inverts_column_name_for_every_cell() {
        let schema = ColumnSchema::default();
        for type_label in ["a", "b0", "non_smoker"] {
            for from in 0..schema.states() {
                for to in 0..schema.states() {
                    for adjusted in [false, true] {
                        let name = schema.column_name(type_label, from, to, adjusted);
                        let parsed = schema.parse(&name).expect("column should parse");
                        assert_eq!(parsed.type_label, type_label);
                        assert_eq!(parsed.from_state, from);
                        assert_eq!(parsed.to_state, to);
                        assert_eq!(parsed.adjusted, adjusted);
                    }
                }
            }
        }
    }

    #[test]
    fn parse_rejects_foreign_and_out_of_range_columns() {
        let schema = ColumnSchema::default();
        assert!(schema.parse("agev").is_none());
        assert!(schema.parse("a_hrs_7_to_pr1").is_none());
        assert!(schema.parse("a_hrs_0_to_pr1").is_none());
        assert!(schema.parse("a_hrs_1_to_prx").is_none());
        assert!(schema.parse("_hrs_1_to_pr1").is_none());
        assert!(schema.parse("a_meps_1_to_pr1").is_none());
    }

    #[test]
    fn input_columns_skip_the_death_row() {
        let schema = ColumnSchema::default();
        let columns = schema.input_columns("m");
        assert_eq!(columns.len(), 5 * 6);
        assert_eq!(columns.first().map(String::as_str), Some("m_hrs_1_to_pr1"));
        assert_eq!(columns.last().map(String::as_str), Some("m_hrs_5_to_pr6"));

        let adjusted = schema.adjusted_columns("m");
        assert_eq!(adjusted.len(), 6 * 6);
        assert_eq!(
            adjusted.last().map(String::as_str),
            Some("m_hrs_6_to_pr6_adj")
        );
    }
}
