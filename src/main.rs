use anyhow::Result;
use clap::Parser;
use std::{path::PathBuf, process::ExitCode};
use tracing::debug;
use tracing_subscriber::EnvFilter;
use wasmdis::{DecodeOptions, Module, text};

/// Decode a WebAssembly binary and print its contents.
#[derive(Debug, Parser)]
#[command(name = "wasmdis", version, about)]
struct Args {
    /// Path to the .wasm file
    file: PathBuf,

    /// Accept known sections in any order
    #[arg(long)]
    lenient_order: bool,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<()> {
    let options = DecodeOptions {
        strict_section_order: !args.lenient_order,
    };
    let module = Module::from_file_with(&args.file, &options)?;
    debug!(
        functions = module.functions().len(),
        exports = module.exports().len(),
        "decoded {}",
        args.file.display()
    );
    print!("{}", text::render(&module));
    Ok(())
}
