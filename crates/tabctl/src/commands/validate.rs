//! `tabctl validate`: check a source against a shape, no output documents.

use super::{load_shape, open_source, VALIDATION_EXIT};
use mapping::TransformRegistry;
use pipeline::{Pipeline, PipelineError, PipelineOptions};
use std::path::PathBuf;
use std::process::ExitCode;
use validation::{Severity, ValidationMode};

#[derive(Debug, clap::Args)]
pub struct ValidateArgs {
    /// Shape name to validate against
    #[arg(short, long)]
    shape: String,

    /// Input file (csv, tsv, ndjson, jsonl)
    #[arg(short, long)]
    input: PathBuf,

    /// strict stops at the first error, report accumulates, sample checks a
    /// seeded fraction
    #[arg(long, value_enum, default_value_t = Mode::Report)]
    mode: Mode,

    /// Also run the full-SHACL round trip on built documents
    #[arg(long)]
    shacl: bool,

    /// Fraction of records checked in sample mode
    #[arg(long, default_value_t = 0.1)]
    sample_rate: f64,

    /// RNG seed for sample mode
    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Directory holding shape folders
    #[arg(long, default_value = "shapes")]
    shapes_dir: PathBuf,
}

#[derive(Debug, Copy, Clone, PartialEq, clap::ValueEnum)]
enum Mode {
    Strict,
    Report,
    Sample,
}

pub fn run(args: ValidateArgs) -> anyhow::Result<ExitCode> {
    let definition = load_shape(&args.shapes_dir, &args.shape)?;
    let source = open_source(&args.input, None)?;
    let mut pipeline = Pipeline::new(
        definition,
        source,
        TransformRegistry::with_builtins(),
        PipelineOptions::default(),
    )?;

    let mode = match args.mode {
        Mode::Strict => ValidationMode::Strict,
        Mode::Report => ValidationMode::Report,
        Mode::Sample => ValidationMode::Sample {
            rate: args.sample_rate,
            seed: args.seed,
        },
    };

    let report = match pipeline.validate(mode, args.shacl) {
        Ok(report) => report,
        Err(PipelineError::Validation(error)) => {
            eprintln!("{error}");
            return Ok(ExitCode::from(VALIDATION_EXIT));
        }
        Err(error) => return Err(error.into()),
    };

    for issue in &report.issues {
        let record = issue.record_id.as_deref().unwrap_or("-");
        println!(
            "{}\t{}\t{}\t{}\t{}",
            severity_label(issue.severity),
            record,
            issue.field_path,
            issue.kind,
            issue.message
        );
    }
    eprintln!(
        "{} error(s), {} warning(s) across {} issue(s)",
        report.errors,
        report.warnings,
        report.issues.len()
    );

    if report.conforms() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::from(VALIDATION_EXIT))
    }
}

fn severity_label(severity: Severity) -> &'static str {
    match severity {
        Severity::Error => "ERROR",
        Severity::Warning => "WARN",
    }
}
