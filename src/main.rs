use clap::{ArgAction, Parser};
use mfa_extract::extract::{ExtractError, ExtractOptions, Extractor};
use mfa_extract::logging::init_logging;
use mfa_extract::magic::MagicRegistry;
use mfa_extract::sink::{DirSink, MemorySink};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "mfa-extract", about = "Extract firmware images from FW Manager installer blobs")]
struct Cli {
    /// Path to the binary file to extract data from
    #[arg(short, long)]
    file: PathBuf,
    /// Directory to save the extracted files
    #[arg(short, long)]
    output: PathBuf,
    /// Verbose output (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
    /// Dump the raw member and its sections when a container yields no firmware
    #[arg(long)]
    dump_unrecognized: bool,
    /// Do not write manifest.json
    #[arg(long)]
    no_manifest: bool,
    /// Run the pipeline in memory and list what would be written
    #[arg(long)]
    dry_run: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(RunError::Extract(ExtractError::NoCandidateSucceeded { .. })) => {
            println!("No firmware extracted");
            ExitCode::FAILURE
        }
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

// ── helpers ──────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
enum RunError {
    #[error("cannot read {}: {source}", .path.display())]
    Input { path: PathBuf, source: std::io::Error },
    #[error("cannot create {}: {source}", .path.display())]
    Output { path: PathBuf, source: std::io::Error },
    #[error(transparent)]
    Extract(#[from] ExtractError),
}

fn run(cli: &Cli) -> Result<(), RunError> {
    let blob = std::fs::read(&cli.file)
        .map_err(|source| RunError::Input { path: cli.file.clone(), source })?;
    tracing::debug!(len = blob.len(), "input loaded");

    let registry = MagicRegistry::builtin();
    let options  = ExtractOptions {
        dump_unrecognized: cli.dump_unrecognized,
        write_manifest:    !cli.no_manifest,
        ..ExtractOptions::default()
    };
    let extractor = Extractor::new(&registry, &options);

    if cli.dry_run {
        let mut sink = MemorySink::new();
        let report = extractor.extract(&blob, &mut sink)?;
        println!("{}", report.summary());
        for (name, data) in &sink.files {
            println!("  would write  {:<40} {:>12}", name, data.len());
        }
        return Ok(());
    }

    let mut sink = DirSink::create(&cli.output)
        .map_err(|source| RunError::Output { path: cli.output.clone(), source })?;
    let report = extractor.extract(&blob, &mut sink)?;
    println!("{}", report.summary());
    for image in &report.images {
        println!("  extracted  {:<32} {:>12}  {}", image.file_name, image.size, &image.blake3[..16]);
    }
    for name in &report.artifacts {
        println!("  saved      {name}");
    }
    println!("Output: {}", sink.root().display());
    Ok(())
}
