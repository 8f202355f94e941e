use step_aggregator::cli::{self, Command};
use step_providers::config::Config;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // `STEP_FUSION_LOG_LEVEL`, then `RUST_LOG`, default `info`.
    let log_env = cli::log_filter(|k| std::env::var(k).ok());
    let env_filter = cli::env_filter(&log_env);
    tracing_subscriber::fmt()
        .compact()
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_target(false)
        .with_env_filter(env_filter)
        .init();
    tracing::debug!("step-fusion: log filter: {}", log_env);

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = match Command::parse(&args) {
        Ok(command) => command,
        Err(e) => {
            eprintln!("{e:#}");
            std::process::exit(2);
        }
    };

    let config = Config::from_env()?;
    if !config.has_store_credentials() {
        tracing::info!("step-fusion: health store credentials not set; store disabled");
    }
    let aggregator = cli::build_aggregator(&config)?;

    if let Err(e) = aggregator.request_permissions().await {
        tracing::warn!("step-fusion: {}", e);
    }

    match command.run(&aggregator).await {
        Ok(value) => {
            println!("{}", serde_json::to_string_pretty(&value)?);
            Ok(())
        }
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    }
}
