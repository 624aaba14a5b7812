//! `tabctl convert`: tabular input → JSON or NDJSON documents.

use super::{load_shape, open_source, VALIDATION_EXIT};
use anyhow::Context as _;
use indicatif::{ProgressBar, ProgressStyle};
use mapping::TransformRegistry;
use pipeline::{Pipeline, PipelineError, PipelineOptions};
use std::path::PathBuf;
use std::process::ExitCode;
use validation::ValidationMode;

#[derive(Debug, clap::Args)]
pub struct ConvertArgs {
    /// Shape name to convert against
    #[arg(short, long)]
    shape: String,

    /// Input file (csv, tsv, ndjson, jsonl)
    #[arg(short, long)]
    input: PathBuf,

    /// Output file; '-' writes NDJSON to stdout
    #[arg(short, long)]
    output: PathBuf,

    /// Output framing; inferred from the output extension when omitted
    #[arg(long, value_enum)]
    format: Option<OutputFormat>,

    /// Workbook sheet number (workbook inputs only)
    #[arg(long)]
    sheet: Option<u32>,

    /// Run pre-build validation on every record
    #[arg(long)]
    validate: bool,

    /// Also round-trip built documents through the SHACL validator
    #[arg(long)]
    shacl: bool,

    /// Failure routing: report dead-letters and continues, strict aborts
    #[arg(long, value_enum, default_value_t = Mode::Report)]
    mode: Mode,

    /// Pretty-print JSON array output
    #[arg(long, conflicts_with = "compact")]
    pretty: bool,

    /// Compact output (the default)
    #[arg(long)]
    compact: bool,

    /// Write failed records to this NDJSON dead-letter file
    #[arg(long)]
    dead_letter: Option<PathBuf>,

    /// Directory holding shape folders
    #[arg(long, default_value = "shapes")]
    shapes_dir: PathBuf,
}

#[derive(Debug, Copy, Clone, PartialEq, clap::ValueEnum)]
enum OutputFormat {
    Json,
    Ndjson,
}

#[derive(Debug, Copy, Clone, PartialEq, clap::ValueEnum)]
enum Mode {
    Report,
    Strict,
}

pub fn run(args: ConvertArgs) -> anyhow::Result<ExitCode> {
    let definition = load_shape(&args.shapes_dir, &args.shape)?;
    let source = open_source(&args.input, args.sheet)?;

    let format = args.format.unwrap_or_else(|| {
        match args.output.extension().and_then(|e| e.to_str()) {
            Some("json") => OutputFormat::Json,
            _ => OutputFormat::Ndjson,
        }
    });
    let options = PipelineOptions {
        validate: args.validate,
        shacl: args.shacl,
        validation_mode: match args.mode {
            Mode::Report => ValidationMode::Report,
            Mode::Strict => ValidationMode::Strict,
        },
        dead_letter_path: args.dead_letter.clone(),
        pretty: args.pretty && !args.compact,
        ..Default::default()
    };
    let mut pipeline = Pipeline::new(
        definition,
        source,
        TransformRegistry::with_builtins(),
        options,
    )?;

    if atty::is(atty::Stream::Stderr) {
        let bar = ProgressBar::new_spinner().with_style(
            ProgressStyle::with_template("{spinner} {pos} records {msg}")
                .expect("static progress template"),
        );
        pipeline.set_progress(Box::new(move |processed, total| {
            if let Some(total) = total {
                bar.set_length(total);
            }
            bar.set_position(processed);
        }));
    }

    let to_stdout = args.output.as_os_str() == "-";
    let outcome = if to_stdout {
        let stdout = std::io::stdout();
        let mut lock = stdout.lock();
        pipeline.write_ndjson(&mut lock)
    } else {
        match format {
            OutputFormat::Json => pipeline.to_json(&args.output),
            OutputFormat::Ndjson => pipeline.to_ndjson(&args.output),
        }
    };

    match outcome {
        Ok(result) => {
            eprintln!(
                "{} in, {} out, {} failed, {} filtered in {:.2}s ({:.0} rec/s)",
                result.records_in,
                result.records_out,
                result.records_failed,
                result.records_filtered,
                result.elapsed_seconds,
                result.records_per_second,
            );
            if let Some(path) = &result.dead_letter_path {
                eprintln!("dead letters: {}", path.display());
            }
            Ok(ExitCode::SUCCESS)
        }
        Err(PipelineError::Record(error)) => {
            eprintln!("validation failed: {error}");
            Ok(ExitCode::from(VALIDATION_EXIT))
        }
        Err(PipelineError::Validation(error)) => {
            eprintln!("validation failed: {error}");
            Ok(ExitCode::from(VALIDATION_EXIT))
        }
        Err(error) => Err(error).context("conversion failed"),
    }
}
