//! placejoin CLI entrypoint

use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use placejoin::cli::{exit_code, stage_error, Cli};

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    // Parse and execute CLI
    let cli = Cli::parse();
    match cli.execute().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            if let Some(stage) = stage_error(&error).and_then(|e| e.stage()) {
                tracing::error!(stage, "Pipeline stopped");
            }
            eprintln!("Error: {:#}", error);
            ExitCode::from(exit_code(&error))
        }
    }
}
