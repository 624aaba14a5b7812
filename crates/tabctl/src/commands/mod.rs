pub mod benchmark;
pub mod convert;
pub mod generate_mapping;
pub mod introspect;
pub mod list_shapes;
pub mod validate;

use anyhow::{bail, Context as _};
use shapes::{ShapeDefinition, ShapeRegistry};
use sources::{CsvSource, NdjsonSource, SourceAdapter};
use std::path::Path;
use std::sync::Arc;

/// Exit code for validation failures, distinct from operational failures.
pub const VALIDATION_EXIT: u8 = 2;

pub fn load_shape(shapes_dir: &Path, name: &str) -> anyhow::Result<Arc<ShapeDefinition>> {
    let mut registry = ShapeRegistry::new();
    registry.add_search_path(shapes_dir);
    registry
        .load(name)
        .with_context(|| format!("loading shape '{name}' from {}", shapes_dir.display()))
}

/// Picks a source adapter from the input file extension.
pub fn open_source(input: &Path, sheet: Option<u32>) -> anyhow::Result<Box<dyn SourceAdapter>> {
    let extension = input
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();
    if sheet.is_some() && !matches!(extension.as_str(), "xlsx" | "xls") {
        tracing::warn!("--sheet only applies to workbook inputs; ignoring");
    }
    match extension.as_str() {
        "csv" => Ok(Box::new(CsvSource::new(input))),
        "tsv" => Ok(Box::new(CsvSource::new(input).with_delimiter(b'\t'))),
        "ndjson" | "jsonl" => Ok(Box::new(NdjsonSource::new(input))),
        "xlsx" | "xls" => bail!(
            "workbook input '{}' requires exporting to CSV first; this build reads csv, tsv, ndjson, and jsonl",
            input.display()
        ),
        other => bail!(
            "cannot infer a reader for '.{other}' input '{}'; supported extensions: csv, tsv, ndjson, jsonl",
            input.display()
        ),
    }
}
