use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::info;

use signal_relay::secrets;

#[derive(Debug, Parser)]
#[command(author, version, about = "Scan files for leaked credentials before committing")]
struct Args {
    /// Files to scan, e.g. the output of `git diff --cached --name-only`
    #[arg(required = true)]
    files: Vec<PathBuf>,
}

fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let mut total = 0;
    for file in &args.files {
        for finding in secrets::scan_file(file) {
            total += 1;
            println!(
                "{}:{} {} {}",
                file.display(),
                finding.line,
                finding.kind,
                finding.preview
            );
        }
    }

    if total > 0 {
        eprintln!("{total} possible secret(s) found; move them to the environment or an ignored file");
        return Ok(ExitCode::FAILURE);
    }
    info!(files = args.files.len(), "no secrets found");
    Ok(ExitCode::SUCCESS)
}
