//! `tabctl generate-mapping`: skeleton mapping config from a SHACL file.

use anyhow::bail;
use shapes::{generate_mapping, parse_shacl, Context, TemplateOptions};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, clap::Args)]
pub struct GenerateMappingArgs {
    /// SHACL Turtle file to generate from
    #[arg(long)]
    shacl: PathBuf,

    /// Output file; stdout when omitted
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Root node shape; defaults to the single unreferenced shape
    #[arg(long)]
    shape: Option<String>,

    /// `@context` URL to embed in the mapping
    #[arg(long)]
    context_url: Option<String>,

    /// Local context file used to compact property IRIs into terms
    #[arg(long)]
    context_file: Option<PathBuf>,

    /// Base URI for emitted `@id`s
    #[arg(long)]
    base_uri: Option<String>,
}

pub fn run(args: GenerateMappingArgs) -> anyhow::Result<ExitCode> {
    let text = std::fs::read_to_string(&args.shacl)?;
    let name = args
        .shacl
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("shacl");
    let index = parse_shacl(name, &text)?;

    let root = match &args.shape {
        Some(shape) => shape.clone(),
        None => {
            let roots = index.roots();
            match roots.as_slice() {
                [only] => only.name.clone(),
                [] => bail!("the SHACL graph has no root shapes"),
                many => bail!(
                    "the SHACL graph has {} root shapes; pick one with --shape: {}",
                    many.len(),
                    many.iter().map(|s| s.name.as_str()).collect::<Vec<_>>().join(", ")
                ),
            }
        }
    };

    let context = match &args.context_file {
        Some(path) => Some(Context::load(name, path)?),
        None => None,
    };
    let options = TemplateOptions {
        context_url: args.context_url.clone(),
        context_file: args
            .context_file
            .as_ref()
            .map(|p| p.display().to_string()),
        base_uri: args.base_uri.clone(),
    };

    let template = generate_mapping(&index, &root, context.as_ref(), &options)?;
    let yaml = serde_yaml::to_string(&template)?;
    match &args.output {
        Some(path) => std::fs::write(path, yaml)?,
        None => print!("{yaml}"),
    }
    Ok(ExitCode::SUCCESS)
}
