use approx::assert_abs_diff_eq;
use ndarray::{Array2, array};
use std::fs;
use std::path::Path;
use tempfile::tempdir;

use stochroot::batch::{BatchProcessor, SliceError, SliceKey};
use stochroot::config::RunConfig;
use stochroot::data::Dataset;
use stochroot::linalg::integer_power;
use stochroot::matrix::MalformedInputError;
use stochroot::progress::NoopBatchProgress;
use stochroot::schema::ColumnSchema;
use stochroot::writer::{ResultWriter, UNPOPULATED_DEFAULT};

fn healthy() -> Array2<f64> {
    array![
        [0.8, 0.2, 0.0, 0.0, 0.0, 0.0],
        [0.1, 0.7, 0.2, 0.0, 0.0, 0.0],
        [0.0, 0.1, 0.7, 0.2, 0.0, 0.0],
        [0.0, 0.0, 0.1, 0.7, 0.2, 0.0],
        [0.0, 0.0, 0.0, 0.1, 0.7, 0.2],
        [0.0, 0.0, 0.0, 0.0, 0.0, 1.0],
    ]
}

fn frail() -> Array2<f64> {
    array![
        [0.70, 0.20, 0.05, 0.00, 0.00, 0.05],
        [0.10, 0.60, 0.20, 0.05, 0.00, 0.05],
        [0.00, 0.10, 0.60, 0.20, 0.00, 0.10],
        [0.00, 0.00, 0.10, 0.60, 0.20, 0.10],
        [0.00, 0.00, 0.00, 0.10, 0.60, 0.30],
        [0.00, 0.00, 0.00, 0.00, 0.00, 1.00],
    ]
}

/// Writes a table with one row per age; only live rows are stored, as in
/// the estimation output the tool consumes.
fn write_input(
    path: &Path,
    schema: &ColumnSchema,
    delimiter: char,
    ages: &[f64],
    slices: &[(&str, Vec<Array2<f64>>)],
) {
    let mut header = vec!["agev".to_string()];
    for (type_label, _) in slices {
        header.extend(schema.input_columns(type_label));
    }
    let mut lines = vec![header.join(&delimiter.to_string())];

    for (row, age) in ages.iter().enumerate() {
        let mut cells = vec![age.to_string()];
        for (_, matrices) in slices {
            for from in 0..schema.live_states() {
                for to in 0..schema.states() {
                    cells.push(matrices[row][[from, to]].to_string());
                }
            }
        }
        lines.push(cells.join(&delimiter.to_string()));
    }
    fs::write(path, lines.join("\n") + "\n").expect("write input table");
}

fn config_for(types: &[&str]) -> RunConfig {
    RunConfig {
        types: types.iter().map(|label| label.to_string()).collect(),
        threads: 2,
        ..RunConfig::default()
    }
}

#[test]
fn adjusted_table_holds_valid_annual_matrices() {
    let tmp = tempdir().expect("temporary directory");
    let input = tmp.path().join("transitions.csv");
    let output = tmp.path().join("out").join("transitions_adj.csv");
    let report_path = tmp.path().join("out").join("transitions_adj_report.csv");

    let config = config_for(&["a", "f"]);
    let schema = config.schema();
    let mut broken = frail();
    broken.row_mut(0).assign(&array![0.5, 0.6, 0.0, 0.0, 0.0, 0.0]);
    write_input(
        &input,
        &schema,
        ',',
        &[50.0, 52.0],
        &[("a", vec![healthy(), broken]), ("f", vec![frail(), healthy()])],
    );

    let mut dataset = Dataset::load(&input, config.delimiter_byte(), &config.age_column).unwrap();
    let keys = BatchProcessor::grid(&dataset, &config.types, None).unwrap();
    assert_eq!(keys.len(), 4);
    let report = BatchProcessor::new(config.matrix_builder(), config.engine(), config.exponent)
        .with_threads(config.threads)
        .run(&dataset, &keys, &NoopBatchProgress);

    assert_eq!(report.adjusted.len(), 3);
    let failed = SliceKey::new(1, "a");
    assert!(matches!(
        report.failures[&failed],
        SliceError::MalformedInput(MalformedInputError::RowSum { state: 0, .. })
    ));

    let writer = ResultWriter::new(schema.clone());
    writer.augment(&mut dataset, &config.types, &report).unwrap();
    writer.write_table(&mut dataset, &output, b',').unwrap();
    writer.write_report(&report, &dataset, &report_path).unwrap();

    let reloaded = Dataset::load(&output, b',', "agev").unwrap();
    assert_eq!(reloaded.frame().width(), 1 + 2 * 30 + 2 * 36);
    assert_eq!(reloaded.ages(), &[50.0, 52.0]);

    for (key, outcome) in &report.adjusted {
        for from in 0..schema.live_states() {
            let mut row_sum = 0.0;
            for to in 0..schema.states() {
                let name = schema.column_name(&key.type_label, from, to, true);
                let value = reloaded.value(&name, key.age_index).unwrap();
                assert!((0.0..=1.0).contains(&value), "{name} = {value}");
                row_sum += value;
            }
            assert_abs_diff_eq!(row_sum, 1.0, epsilon = 1e-9);
        }
        if key.age_index == 0 {
            let squared = integer_power(&outcome.matrix.values().to_owned(), 2);
            let original = if key.type_label == "a" { healthy() } else { frail() };
            let worst = squared
                .iter()
                .zip(original.iter())
                .fold(0.0f64, |acc, (a, b)| acc.max((a - b).abs()));
            assert!(worst < 0.05, "{key}: R^2 misses M by {worst}");
        }
    }

    for row in 0..2 {
        for to in 0..schema.states() {
            let death = schema.column_name("f", schema.death_index(), to, true);
            assert_eq!(reloaded.value(&death, row).unwrap(), UNPOPULATED_DEFAULT);
        }
    }
    let unrooted = schema.column_name("a", 0, 0, true);
    assert!(matches!(
        reloaded.value(&unrooted, 1),
        Err(MalformedInputError::MissingValue { .. })
    ));
    let original_cell = schema.column_name("a", 0, 1, false);
    assert_abs_diff_eq!(reloaded.value(&original_cell, 1).unwrap(), 0.6, epsilon = 1e-12);

    let mut reader = csv::Reader::from_path(&report_path).unwrap();
    let statuses: Vec<String> = reader
        .records()
        .map(|record| record.unwrap()[3].to_string())
        .collect();
    assert_eq!(statuses, vec!["ok", "ok", "failed", "ok"]);
}

#[test]
fn age_filter_and_delimiter_follow_the_configuration() {
    let tmp = tempdir().expect("temporary directory");
    let input = tmp.path().join("transitions.tsv");
    let output = tmp.path().join("transitions_adj.tsv");

    let config = RunConfig {
        delimiter: '\t',
        ages: Some(vec![54.0]),
        ..config_for(&["m"])
    };
    let schema = config.schema();
    write_input(
        &input,
        &schema,
        '\t',
        &[50.0, 52.0, 54.0],
        &[("m", vec![healthy(), frail(), frail()])],
    );

    let mut dataset = Dataset::load(&input, config.delimiter_byte(), &config.age_column).unwrap();
    let keys = BatchProcessor::grid(&dataset, &config.types, config.ages.as_deref()).unwrap();
    assert_eq!(keys, vec![SliceKey::new(2, "m")]);

    let report = BatchProcessor::new(config.matrix_builder(), config.engine(), config.exponent)
        .run(&dataset, &keys, &NoopBatchProgress);
    assert!(report.is_complete());

    let writer = ResultWriter::new(schema.clone());
    writer.augment(&mut dataset, &config.types, &report).unwrap();
    writer
        .write_table(&mut dataset, &output, config.delimiter_byte())
        .unwrap();

    let text = fs::read_to_string(&output).unwrap();
    let header = text.lines().next().unwrap();
    assert!(header.starts_with("agev\t"));
    assert!(header.contains("m_hrs_3_to_pr4_adj"));

    let reloaded = Dataset::load(&output, b'\t', "agev").unwrap();
    let name = schema.column_name("m", 2, 2, true);
    assert_eq!(reloaded.value(&name, 0).unwrap(), UNPOPULATED_DEFAULT);
    let rooted = reloaded.value(&name, 2).unwrap();
    assert!(rooted > frail()[[2, 2]], "one year keeps more mass on the diagonal");
}
