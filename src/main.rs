use build_publisher::cli::{run, Cli};
use build_publisher::PublishError;
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Load environment
    dotenvy::dotenv().ok();

    // Logs go to stderr; stdout carries the run report.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();
    tracing::info!("CLI application startup: tracing initialised, environment loaded");

    let cli = Cli::parse();
    tracing::info!("CLI arguments parsed, invoking run");
    match run(cli).await {
        Ok(()) => {
            tracing::info!("CLI completed successfully");
            std::process::exit(0);
        }
        Err(e) => {
            let code = e
                .downcast_ref::<PublishError>()
                .map(PublishError::exit_code)
                .unwrap_or(1);
            tracing::error!(error = %e, code, "CLI exited with error");
            eprintln!("[ERROR] {e:#}");
            std::process::exit(code);
        }
    }
}
