use colored::Colorize;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use vm_batch_provisioner::cli;

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    match cli::run().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {:#}", "✗".red(), e);
            ExitCode::FAILURE
        }
    }
}
