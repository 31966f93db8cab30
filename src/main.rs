use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use sparkmon::app::{App, AppError};
use sparkmon::config::{ConfigLoader, DEFAULT_FILE_NAME};

/// Samples system and network metrics and prints periodic summaries
#[derive(Parser, Debug)]
#[command(name = "sparkmon", version, about)]
struct Cli {
    /// Configuration file (created with defaults if missing)
    #[arg(short = 'f', long = "config", default_value = DEFAULT_FILE_NAME)]
    config: PathBuf,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Seconds between summary reports
    #[arg(long, default_value_t = 10, value_parser = clap::value_parser!(u64).range(1..))]
    report_interval: u64,
}

fn init_tracing(debug: bool) {
    let default = if debug { "sparkmon=debug" } else { "sparkmon=info" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default.into()))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}

/// Flag set once SIGINT or SIGTERM arrives.
fn install_stop_handler() -> Arc<AtomicBool> {
    let stop = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&stop);
    if let Err(e) = ctrlc::set_handler(move || {
        tracing::info!("received shutdown signal");
        flag.store(true, Ordering::Release);
    }) {
        tracing::warn!("failed to set Ctrl-C handler: {}", e);
    }
    stop
}

fn run(cli: &Cli) -> Result<(), AppError> {
    let config = ConfigLoader::new(&cli.config).load()?;

    let stop = install_stop_handler();
    let mut app = App::new(&config, Duration::from_secs(cli.report_interval))?;
    app.run(&stop)
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.debug);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "sparkmon starting");

    if let Err(e) = run(&cli) {
        tracing::error!("{}", e);
        std::process::exit(1);
    }
}
