//! tabctl — convert tabular education records to shape-conformant JSON-LD.

mod commands;
mod logging;

use clap::Parser;
use std::process::ExitCode;

/// tabctl converts tabular education records into JSON-LD documents that
/// conform to SHACL shape definitions.
#[derive(Debug, Parser)]
#[command(name = "tabctl", version, author)]
struct Tabctl {
    #[command(flatten)]
    log: logging::LogArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, clap::Subcommand)]
#[command(rename_all = "kebab-case")]
enum Command {
    /// Convert a tabular source into JSON-LD documents
    Convert(commands::convert::ConvertArgs),
    /// Validate a tabular source against a shape without emitting output
    Validate(commands::validate::ValidateArgs),
    /// Print the node-shape tree of a SHACL file
    Introspect(commands::introspect::IntrospectArgs),
    /// Generate a skeleton mapping config from a SHACL file
    GenerateMapping(commands::generate_mapping::GenerateMappingArgs),
    /// List shapes discoverable under the shapes directory
    ListShapes(commands::list_shapes::ListShapesArgs),
    /// Measure mapper and builder throughput for a shape
    Benchmark(commands::benchmark::BenchmarkArgs),
}

fn main() -> ExitCode {
    let args = Tabctl::parse();
    logging::init_logging(&args.log);

    let outcome = match args.command {
        Command::Convert(args) => commands::convert::run(args),
        Command::Validate(args) => commands::validate::run(args),
        Command::Introspect(args) => commands::introspect::run(args),
        Command::GenerateMapping(args) => commands::generate_mapping::run(args),
        Command::ListShapes(args) => commands::list_shapes::run(args),
        Command::Benchmark(args) => commands::benchmark::run(args),
    };

    match outcome {
        Ok(code) => code,
        Err(error) => {
            tracing::error!(error = ?error, "command failed");
            eprintln!("error: {error:#}");
            ExitCode::FAILURE
        }
    }
}
