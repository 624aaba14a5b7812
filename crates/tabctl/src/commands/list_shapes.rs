//! `tabctl list-shapes`: discoverable shape folders.

use shapes::ShapeRegistry;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, clap::Args)]
pub struct ListShapesArgs {
    /// Directory holding shape folders
    #[arg(long, default_value = "shapes")]
    shapes_dir: PathBuf,
}

pub fn run(args: ListShapesArgs) -> anyhow::Result<ExitCode> {
    let mut registry = ShapeRegistry::new();
    registry.add_search_path(&args.shapes_dir);
    let names = registry.list();
    if names.is_empty() {
        eprintln!("no shapes under {}", args.shapes_dir.display());
    }
    for name in names {
        println!("{name}");
    }
    Ok(ExitCode::SUCCESS)
}
