//! `tabctl benchmark`: mapper + builder throughput for one shape, using a
//! synthetic record derived from the mapping.

use super::load_shape;
use document::DocumentBuilder;
use mapping::{Datatype, FieldMapper, RawRecord, TransformRegistry};
use serde_json::Value;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, clap::Args)]
pub struct BenchmarkArgs {
    /// Shape name to benchmark
    #[arg(short, long)]
    shape: String,

    /// Number of records to push through map + build
    #[arg(short = 'n', long, default_value_t = 100_000)]
    records: u64,

    /// Directory holding shape folders
    #[arg(long, default_value = "shapes")]
    shapes_dir: PathBuf,
}

pub fn run(args: BenchmarkArgs) -> anyhow::Result<ExitCode> {
    let definition = load_shape(&args.shapes_dir, &args.shape)?;
    let transforms = Arc::new(TransformRegistry::with_builtins());
    let mapper = FieldMapper::new(definition.mapping.clone(), transforms.clone())?;
    let builder = DocumentBuilder::new(
        &definition.mapping,
        Some(&definition.context),
        &transforms,
    )?;

    let record = synthetic_record(&definition.mapping);
    // One warm-up pass surfaces configuration problems before timing.
    let mapped = mapper.map(&record)?;
    builder.build(&mapped)?;

    let start = Instant::now();
    for _ in 0..args.records {
        let mapped = mapper.map(&record)?;
        std::hint::black_box(builder.build(&mapped)?);
    }
    let elapsed = start.elapsed();

    let per_record_us = elapsed.as_secs_f64() * 1e6 / args.records as f64;
    let per_second = args.records as f64 / elapsed.as_secs_f64();
    println!(
        "{} records in {:.3}s — {:.2} µs/record, {:.0} records/s",
        args.records,
        elapsed.as_secs_f64(),
        per_record_us,
        per_second
    );
    Ok(ExitCode::SUCCESS)
}

/// Builds one plausible record for the mapping: every sourced field gets a
/// value of its declared datatype, the identifier column gets digits.
fn synthetic_record(config: &mapping::MappingConfig) -> RawRecord {
    let mut record = RawRecord::new();
    record.insert(
        config.id_source.clone(),
        Value::String("989897099".to_string()),
    );
    for plan in config.properties.values() {
        for rule in plan.fields.values() {
            let Some(source) = rule.source.as_ref().filter(|s| !s.is_empty()) else {
                continue;
            };
            let value = match rule.datatype {
                Datatype::Date => "2000-01-15",
                Datatype::DateTime => "2000-01-15T12:00:00",
                Datatype::Integer => "42",
                Datatype::Boolean => "true",
                Datatype::Decimal => "3.5",
                _ => "Sample",
            };
            record
                .entry(source.clone())
                .or_insert_with(|| Value::String(value.to_string()));
        }
    }
    record
}
