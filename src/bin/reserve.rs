//! Reserve CLI - Command-line interface for Reserve Flux
//!
//! Commands:
//! - compute: Run the engine over a JSON run document
//! - validate: Report what the input adapter makes of a document
//! - defaults: Print the default parameters and baselines

use clap::{Parser, Subcommand, ValueEnum};
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use reserve_flux::adapter::{AdapterReport, EpochAdapter};
use reserve_flux::config::{BehaviorBaselineConfig, RunConfig, ThreeKernelConfig};
use reserve_flux::encoder::ReportEncoder;
use reserve_flux::pipeline::{compute_series, RunInput};
use reserve_flux::types::ReserveResult;
use reserve_flux::{default_baselines, default_params, ComputeError, PRODUCER_NAME, RESERVE_VERSION};

/// Reserve - continuous 0-100 physiological reserve from wearable epochs
#[derive(Parser)]
#[command(name = "reserve")]
#[command(author = "Synheart AI Inc")]
#[command(version = RESERVE_VERSION)]
#[command(about = "Compute a body-battery style reserve series", long_about = None)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug); RUST_LOG takes precedence
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the engine over a JSON run document
    Compute {
        /// Input file path (use - for stdin)
        #[arg(short, long, default_value = "-")]
        input: PathBuf,

        /// Output file path (use - for stdout)
        #[arg(short, long, default_value = "-")]
        output: PathBuf,

        /// Output format
        #[arg(long, default_value = "json")]
        format: OutputFormat,

        /// Wrap the result in a report envelope with producer metadata
        #[arg(long)]
        report: bool,

        /// Nominal epoch length in minutes
        #[arg(long)]
        epoch_minutes: Option<f64>,

        /// Starting reserve (0-100)
        #[arg(long)]
        initial_bb: Option<f64>,

        /// Enable the three-kernel hybrid
        #[arg(long)]
        three_kernel: bool,

        /// Forecast tail length in hours (implies --three-kernel)
        #[arg(long)]
        forecast_hours: Option<f64>,

        /// Enable the behavioral baseline with this window length in days
        #[arg(long)]
        behavior_days: Option<f64>,
    },

    /// Report what the input adapter makes of a document
    Validate {
        /// Input file path (use - for stdin)
        #[arg(short, long, default_value = "-")]
        input: PathBuf,

        /// Output validation report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the default parameters and baselines
    Defaults,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Compact JSON
    Json,
    /// Pretty-printed JSON
    JsonPretty,
    /// Newline-delimited JSON (one series row per line)
    Ndjson,
    /// Human-readable summary
    Summary,
}

/// Command-line overrides applied on top of the document
struct Overrides {
    epoch_minutes: Option<f64>,
    initial_bb: Option<f64>,
    three_kernel: bool,
    forecast_hours: Option<f64>,
    behavior_days: Option<f64>,
}

impl Overrides {
    fn apply(self, config: &mut RunConfig) {
        if let Some(minutes) = self.epoch_minutes {
            config.params.epoch_minutes = minutes;
        }
        if let Some(bb) = self.initial_bb {
            config.params.initial_bb = bb;
        }
        if self.three_kernel || self.forecast_hours.is_some() {
            let tk = config.three_kernel.get_or_insert_with(ThreeKernelConfig::default);
            tk.enabled = true;
            if let Some(hours) = self.forecast_hours {
                tk.forecast_hours = hours;
            }
        }
        if let Some(days) = self.behavior_days {
            let bb = config
                .behavior_baseline
                .get_or_insert_with(BehaviorBaselineConfig::default);
            bb.enabled = true;
            bb.days = days;
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e)).unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(io::stderr))
        .init();
}

fn run(cli: Cli) -> Result<(), ReserveCliError> {
    match cli.command {
        Commands::Compute {
            input,
            output,
            format,
            report,
            epoch_minutes,
            initial_bb,
            three_kernel,
            forecast_hours,
            behavior_days,
        } => {
            let overrides = Overrides {
                epoch_minutes,
                initial_bb,
                three_kernel,
                forecast_hours,
                behavior_days,
            };
            cmd_compute(&input, &output, format, report, overrides)
        }

        Commands::Validate { input, json } => cmd_validate(&input, json),

        Commands::Defaults => cmd_defaults(),
    }
}

fn read_input(input: &Path) -> Result<String, ReserveCliError> {
    if input.to_string_lossy() == "-" {
        if atty::is(atty::Stream::Stdin) {
            return Err(ReserveCliError::NoInput);
        }
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        Ok(buffer)
    } else {
        Ok(fs::read_to_string(input)?)
    }
}

fn cmd_compute(
    input: &Path,
    output: &Path,
    format: OutputFormat,
    report: bool,
    overrides: Overrides,
) -> Result<(), ReserveCliError> {
    let input_data = read_input(input)?;
    let value: serde_json::Value = serde_json::from_str(&input_data)?;
    let (RunInput { epochs, mut config }, adapter_report) = EpochAdapter::run_from_value(&value)?;

    if epochs.is_empty() {
        return Err(ReserveCliError::NoEpochs);
    }
    info!(
        records = adapter_report.records,
        skipped = adapter_report.skipped_records,
        "Input resolved"
    );

    overrides.apply(&mut config);
    let result = compute_series(RunInput { epochs, config });

    let output_data = format_output(&result, &format, report)?;
    if output.to_string_lossy() == "-" {
        print!("{}", output_data);
    } else {
        fs::write(output, output_data)?;
    }

    Ok(())
}

fn format_output(result: &ReserveResult, format: &OutputFormat, report: bool) -> Result<String, ReserveCliError> {
    let encoder = ReportEncoder::new();
    let output = match format {
        OutputFormat::Json if report => format!("{}\n", serde_json::to_string(&encoder.encode(result))?),
        OutputFormat::Json => format!("{}\n", serde_json::to_string(result)?),
        OutputFormat::JsonPretty if report => format!("{}\n", encoder.encode_to_json(result)?),
        OutputFormat::JsonPretty => format!("{}\n", serde_json::to_string_pretty(result)?),
        OutputFormat::Ndjson => {
            let mut lines = String::new();
            for row in &result.series {
                lines.push_str(&serde_json::to_string(row)?);
                lines.push('\n');
            }
            lines
        }
        OutputFormat::Summary => format_summary(result),
    };
    Ok(output)
}

fn fmt_opt(value: Option<f64>) -> String {
    value.map(|v| format!("{v:.1}")).unwrap_or_else(|| "-".to_string())
}

fn format_summary(result: &ReserveResult) -> String {
    let s = &result.summary;
    let mut out = String::new();
    out.push_str("Reserve Summary\n");
    out.push_str("===============\n");
    out.push_str(&format!("Epochs:          {}\n", result.series.len()));
    out.push_str(&format!("Start / end:     {} -> {}\n", fmt_opt(s.start_bb), fmt_opt(s.end_bb)));
    out.push_str(&format!("Range:           {} .. {}\n", fmt_opt(s.min_bb), fmt_opt(s.max_bb)));
    out.push_str(&format!("Total charge:    {:.1}\n", s.total_charge));
    out.push_str(&format!("Total drain:     {:.1}\n", s.total_drain));
    out.push_str(&format!("Avg confidence:  {:.2}\n", s.avg_confidence));
    out.push_str(&format!("Sleep charge:    {}\n", fmt_opt(s.sleep_charge)));
    out.push_str(&format!("Morning reserve: {}\n", fmt_opt(s.morning_bb)));
    out.push_str(&format!("Readiness:       {}\n", fmt_opt(s.readiness)));
    if let Some(main) = &s.main_sleep {
        out.push_str(&format!(
            "Main sleep:      epochs {}..{} ({:.0} min asleep)\n",
            main.start_index, main.end_index, main.sleep_minutes
        ));
    }
    if let Some(tk) = &result.three_kernel {
        out.push_str(&format!(
            "Three-kernel:    {:?}, {} samples, {} forecast rows\n",
            tk.model, tk.train_samples, tk.forecast_rows
        ));
    }
    if let Some(bb) = &result.behavior_baseline {
        out.push_str(&format!(
            "Behavior:        ready={} ({} sleep, {} workout samples)\n",
            bb.ready, bb.sleep_samples, bb.workout_samples
        ));
    }
    out
}

fn cmd_validate(input: &Path, json: bool) -> Result<(), ReserveCliError> {
    let input_data = read_input(input)?;
    let value: serde_json::Value = serde_json::from_str(&input_data)?;
    let (run, adapter_report) = EpochAdapter::run_from_value(&value)?;

    let report = ValidationReport::new(adapter_report, &run);

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Validation Report");
        println!("=================");
        println!("Records:            {}", report.adapter.records);
        println!("Usable epochs:      {}", report.epochs);
        println!("Skipped records:    {}", report.adapter.skipped_records);
        println!("Missing timestamps: {}", report.adapter.missing_timestamps);
        println!("Ignored contexts:   {}", report.adapter.ignored_contexts);
        println!("Sorted input:       {}", report.sorted);

        if !report.adapter.channel_counts.is_empty() {
            println!("\nChannels:");
            for (channel, count) in &report.adapter.channel_counts {
                println!("  - {}: {}", channel, count);
            }
        }
    }

    if report.epochs == 0 {
        Err(ReserveCliError::NoEpochs)
    } else if report.adapter.skipped_records > 0 {
        Err(ReserveCliError::ValidationFailed(report.adapter.skipped_records))
    } else {
        Ok(())
    }
}

fn cmd_defaults() -> Result<(), ReserveCliError> {
    let defaults = Defaults {
        producer: PRODUCER_NAME.to_string(),
        version: RESERVE_VERSION.to_string(),
        params: serde_json::to_value(default_params())?,
        baselines: serde_json::to_value(default_baselines())?,
        behavior_baseline: serde_json::to_value(BehaviorBaselineConfig::default())?,
        three_kernel: serde_json::to_value(ThreeKernelConfig::default())?,
    };
    println!("{}", serde_json::to_string_pretty(&defaults)?);
    Ok(())
}

// Error types

#[derive(Debug)]
enum ReserveCliError {
    Io(io::Error),
    Compute(ComputeError),
    Json(serde_json::Error),
    NoInput,
    NoEpochs,
    ValidationFailed(usize),
}

impl From<io::Error> for ReserveCliError {
    fn from(e: io::Error) -> Self {
        ReserveCliError::Io(e)
    }
}

impl From<ComputeError> for ReserveCliError {
    fn from(e: ComputeError) -> Self {
        ReserveCliError::Compute(e)
    }
}

impl From<serde_json::Error> for ReserveCliError {
    fn from(e: serde_json::Error) -> Self {
        ReserveCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<ReserveCliError> for CliError {
    fn from(e: ReserveCliError) -> Self {
        match e {
            ReserveCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            ReserveCliError::Compute(e) => CliError {
                code: "INPUT_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Expected an object with an 'epochs' array, or a bare array of epochs".to_string()),
            },
            ReserveCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            ReserveCliError::NoInput => CliError {
                code: "NO_INPUT".to_string(),
                message: "stdin is a terminal and no input file was given".to_string(),
                hint: Some("Pass --input <file> or pipe a document into stdin".to_string()),
            },
            ReserveCliError::NoEpochs => CliError {
                code: "NO_EPOCHS".to_string(),
                message: "No epochs found in input".to_string(),
                hint: Some("Ensure the 'epochs' array is not empty".to_string()),
            },
            ReserveCliError::ValidationFailed(count) => CliError {
                code: "VALIDATION_FAILED".to_string(),
                message: format!("{} records could not be read as epochs", count),
                hint: Some("Every entry of 'epochs' must be a JSON object".to_string()),
            },
        }
    }
}

// Report types

#[derive(serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct ValidationReport {
    #[serde(flatten)]
    adapter: AdapterReport,
    epochs: usize,
    /// Whether timestamps were already non-decreasing
    sorted: bool,
    first_timestamp_ms: Option<i64>,
    last_timestamp_ms: Option<i64>,
    baselines_supplied: bool,
    behavior_baseline: bool,
    three_kernel: bool,
}

impl ValidationReport {
    fn new(adapter: AdapterReport, run: &RunInput) -> Self {
        let timestamps: Vec<i64> = run.epochs.iter().filter_map(|e| e.timestamp_ms).collect();
        Self {
            adapter,
            epochs: run.epochs.len(),
            sorted: timestamps.windows(2).all(|w| w[0] <= w[1]),
            first_timestamp_ms: timestamps.iter().min().copied(),
            last_timestamp_ms: timestamps.iter().max().copied(),
            baselines_supplied: run.config.baselines.is_some(),
            behavior_baseline: run.config.behavior_baseline.as_ref().is_some_and(|c| c.enabled),
            three_kernel: run.config.three_kernel.as_ref().is_some_and(|c| c.enabled),
        }
    }
}

#[derive(serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct Defaults {
    producer: String,
    version: String,
    params: serde_json::Value,
    baselines: serde_json::Value,
    behavior_baseline: serde_json::Value,
    three_kernel: serde_json::Value,
}
