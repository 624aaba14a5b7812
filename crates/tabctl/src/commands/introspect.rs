//! `tabctl introspect`: print the node-shape tree of a SHACL file.

use serde_json::json;
use shapes::{parse_shacl, NodeShapeInfo, ShapeIndex};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, clap::Args)]
pub struct IntrospectArgs {
    /// SHACL Turtle file to introspect
    #[arg(long)]
    shacl: PathBuf,

    /// Emit the tree as JSON instead of text
    #[arg(long)]
    json: bool,
}

pub fn run(args: IntrospectArgs) -> anyhow::Result<ExitCode> {
    let text = std::fs::read_to_string(&args.shacl)?;
    let name = args
        .shacl
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("shacl");
    let index = parse_shacl(name, &text)?;

    if args.json {
        let shapes: Vec<_> = index.shapes.values().map(shape_json).collect();
        println!("{}", serde_json::to_string_pretty(&json!({ "shapes": shapes }))?);
    } else {
        for root in index.roots() {
            print_shape(&index, root, 0);
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn shape_json(shape: &NodeShapeInfo) -> serde_json::Value {
    json!({
        "name": shape.name,
        "target_class": shape.target_class,
        "closed": shape.closed,
        "properties": shape.properties.iter().map(|p| json!({
            "path": p.path,
            "name": p.name,
            "datatype": p.datatype,
            "min_count": p.min_count,
            "max_count": p.max_count,
            "allowed_values": p.allowed_values,
            "node_shape": p.node_shape,
            "node_class": p.node_class,
        })).collect::<Vec<_>>(),
    })
}

fn print_shape(index: &ShapeIndex, shape: &NodeShapeInfo, depth: usize) {
    let indent = "  ".repeat(depth);
    println!(
        "{indent}{} (class {}{})",
        shape.name,
        shape.class_name(),
        if shape.closed { ", closed" } else { "" }
    );
    for property in &shape.properties {
        let cardinality = match (property.min_count, property.max_count) {
            (Some(min), Some(max)) => format!("[{min}..{max}]"),
            (Some(min), None) => format!("[{min}..*]"),
            (None, Some(max)) => format!("[0..{max}]"),
            (None, None) => "[0..*]".to_string(),
        };
        let mut notes = Vec::new();
        if let Some(datatype) = &property.datatype {
            notes.push(local(datatype).to_string());
        }
        if !property.allowed_values.is_empty() {
            notes.push(format!("in: {} value(s)", property.allowed_values.len()));
        }
        println!(
            "{indent}  {} {}{}",
            property.name,
            cardinality,
            if notes.is_empty() {
                String::new()
            } else {
                format!(" ({})", notes.join(", "))
            }
        );
        if let Some(child) = property.node_shape.as_deref().and_then(|n| index.shapes.get(n)) {
            print_shape(index, child, depth + 2);
        }
    }
}

fn local(iri: &str) -> &str {
    iri.rsplit_once('#')
        .or_else(|| iri.rsplit_once('/'))
        .map(|(_, name)| name)
        .unwrap_or(iri)
}
