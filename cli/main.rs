#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]

use clap::{Args, CommandFactory, Parser, Subcommand};
use ndarray::ArrayView2;
use std::error::Error;
use std::path::PathBuf;
use std::process;
use std::time::Instant;

use stochroot::batch::BatchProcessor;
use stochroot::config::{ResolvedPaths, RunConfig};
use stochroot::data::Dataset;
use stochroot::progress::{BatchProgressObserver, ConsoleBatchProgress, NoopBatchProgress};
use stochroot::writer::ResultWriter;

type CliResult = Result<(), Box<dyn Error>>;

#[derive(Args)]
pub struct AdjustArgs {
    /// Run configuration (.toml); built-in defaults are used when omitted
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Named deployment in the configuration that selects data and output directories
    #[arg(long, value_name = "NAME")]
    pub deployment: Option<String>,

    /// Input table, overriding the configured location
    #[arg(long, value_name = "PATH")]
    pub input: Option<PathBuf>,

    /// Output table, overriding the configured location
    #[arg(long, value_name = "PATH")]
    pub output: Option<PathBuf>,

    /// Slice report, overriding the configured location
    #[arg(long, value_name = "PATH")]
    pub report: Option<PathBuf>,

    /// Fractional power; 0.5 turns 2-year transitions into 1-year transitions
    #[arg(long)]
    pub exponent: Option<f64>,

    /// Number of worker threads (0 = one per logical CPU)
    #[arg(long)]
    pub threads: Option<usize>,

    /// Exit with an error status when any slice fails
    #[arg(long)]
    pub strict: bool,

    /// Hide the progress bar
    #[arg(long)]
    pub no_progress: bool,
}

#[derive(Args)]
pub struct InspectArgs {
    /// Run configuration (.toml); built-in defaults are used when omitted
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Named deployment in the configuration
    #[arg(long, value_name = "NAME")]
    pub deployment: Option<String>,

    /// Input table, overriding the configured location
    #[arg(long, value_name = "PATH")]
    pub input: Option<PathBuf>,

    /// Fractional power applied to the matrix
    #[arg(long)]
    pub exponent: Option<f64>,

    /// Table row of the slice (0-based)
    #[arg(long, default_value = "0")]
    pub age_index: usize,

    /// Demographic type label of the slice
    #[arg(long = "type", value_name = "LABEL")]
    pub type_label: String,
}

#[derive(Args)]
pub struct InitArgs {
    /// Where to write the template configuration
    #[arg(value_name = "PATH")]
    pub path: PathBuf,

    /// Overwrite an existing file
    #[arg(long)]
    pub force: bool,
}

#[derive(Parser)]
#[command(
    name = "stochroot",
    version,
    about = "Stochastic roots of Markov health-state transition matrices",
    long_about = "Converts multi-year Markov transition matrices into shorter-interval \
                  equivalents for every age and demographic type of a table."
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Root every slice of a table and write the adjusted columns
    #[command(about = "Adjust a transition table (outputs: table with _adj columns, slice report)")]
    Adjust(AdjustArgs),

    /// Show one slice before and after adjustment
    #[command(about = "Print the original and adjusted matrix of one slice")]
    Inspect(InspectArgs),

    /// Write a template configuration
    #[command(about = "Write a template run configuration (.toml)")]
    Init(InitArgs),
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let Cli { command } = cli;

    let result = match command {
        Some(Commands::Adjust(args)) => adjust(args),
        Some(Commands::Inspect(args)) => inspect(args),
        Some(Commands::Init(args)) => init(args),
        None => {
            Cli::command().print_help().expect("print help");
            println!();
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn load_config(
    path: Option<&PathBuf>,
    exponent: Option<f64>,
    threads: Option<usize>,
) -> Result<RunConfig, Box<dyn Error>> {
    let mut config = match path {
        Some(path) => {
            println!("Loading configuration from: {}", path.display());
            RunConfig::load(path)?
        }
        None => RunConfig::default(),
    };
    if let Some(exponent) = exponent {
        config.exponent = exponent;
    }
    if let Some(threads) = threads {
        config.threads = threads;
    }
    config.validate()?;
    Ok(config)
}

fn resolve_paths(
    config: &RunConfig,
    deployment: Option<&str>,
    input: Option<PathBuf>,
    output: Option<PathBuf>,
    report: Option<PathBuf>,
) -> Result<ResolvedPaths, Box<dyn Error>> {
    let mut paths = match (&input, &output) {
        (Some(input), Some(output)) if deployment.is_none() => ResolvedPaths {
            input: input.clone(),
            output: output.clone(),
            report: config.report_path_for(output),
        },
        _ => config.resolve_paths(deployment)?,
    };
    if let Some(input) = input {
        paths.input = input;
    }
    if let Some(output) = output {
        paths.report = config.report_path_for(&output);
        paths.output = output;
    }
    if let Some(report) = report {
        paths.report = report;
    }
    Ok(paths)
}

pub fn adjust(args: AdjustArgs) -> CliResult {
    let start_time = Instant::now();
    let config = load_config(args.config.as_ref(), args.exponent, args.threads)?;
    let paths = resolve_paths(
        &config,
        args.deployment.as_deref(),
        args.input,
        args.output,
        args.report,
    )?;

    println!("> Input table:  {}", paths.input.display());
    println!("> Output table: {}", paths.output.display());

    let mut dataset = Dataset::load(&paths.input, config.delimiter_byte(), &config.age_column)?;
    let keys = BatchProcessor::grid(&dataset, &config.types, config.ages.as_deref())?;
    let processor = BatchProcessor::new(config.matrix_builder(), config.engine(), config.exponent)
        .with_threads(config.threads);

    let observer: Box<dyn BatchProgressObserver> = if args.no_progress {
        Box::new(NoopBatchProgress)
    } else {
        Box::new(ConsoleBatchProgress::new())
    };
    let report = processor.run(&dataset, &keys, observer.as_ref());

    let writer = ResultWriter::new(config.schema());
    writer.augment(&mut dataset, &config.types, &report)?;
    writer.write_table(&mut dataset, &paths.output, config.delimiter_byte())?;
    writer.write_report(&report, &dataset, &paths.report)?;

    println!(
        "Adjusted {} of {} slices in {:.2?} ({} with quality warnings).",
        report.adjusted.len(),
        report.total(),
        start_time.elapsed(),
        report.flagged().count()
    );
    if !report.failures.is_empty() {
        println!("Failed slices:");
        for (key, error) in &report.failures {
            let age = dataset
                .age(key.age_index)
                .map(|age| format!("{age}"))
                .unwrap_or_else(|| "?".to_string());
            println!("  - age {age} ({key}): {error}");
        }
    }
    println!("Slice report written to {}", paths.report.display());

    if args.strict && !report.is_complete() {
        return Err(format!("{} slice(s) failed", report.failures.len()).into());
    }
    Ok(())
}

pub fn inspect(args: InspectArgs) -> CliResult {
    let config = load_config(args.config.as_ref(), args.exponent, None)?;
    let input = match args.input {
        Some(input) => input,
        None => config.resolve_paths(args.deployment.as_deref())?.input,
    };

    let dataset = Dataset::load(&input, config.delimiter_byte(), &config.age_column)?;
    let matrix = config
        .matrix_builder()
        .build(&dataset, args.age_index, &args.type_label)?;
    let outcome = config.engine().compute_root(&matrix, config.exponent)?;

    let age = dataset.age(args.age_index).unwrap_or(f64::NAN);
    println!("Slice: age {age}, type '{}'", args.type_label);
    println!("\nOriginal matrix:\n{}", format_matrix(matrix.values()));
    println!(
        "Adjusted matrix (exponent {}):\n{}",
        config.exponent,
        format_matrix(outcome.matrix.values())
    );
    println!("Method:              {}", outcome.method);
    println!("Projection L1:       {:.3e}", outcome.projection_l1);
    println!("Imaginary residual:  {:.3e}", outcome.imaginary_residual);
    if let Some(error) = outcome.reconstruction_error {
        println!("Reconstruction error: {error:.3e}");
    }
    for flag in &outcome.flags {
        println!("Warning: {flag}");
    }
    Ok(())
}

pub fn init(args: InitArgs) -> CliResult {
    if args.path.exists() && !args.force {
        return Err(format!(
            "'{}' already exists; pass --force to overwrite it",
            args.path.display()
        )
        .into());
    }
    RunConfig::default().save(&args.path)?;
    println!("Template configuration written to {}", args.path.display());
    Ok(())
}

fn format_matrix(values: ArrayView2<'_, f64>) -> String {
    values
        .rows()
        .into_iter()
        .map(|row| {
            row.iter()
                .map(|value| format!("{value:>9.6}"))
                .collect::<Vec<_>>()
                .join(" ")
        })
        .collect::<Vec<_>>()
        .join("\n")
}
