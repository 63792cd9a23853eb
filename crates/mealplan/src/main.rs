//! Meal reminder daemon.
//!
//! Loads reminder definitions from a JSON file, schedules them, and delivers
//! notifications until interrupted.

use std::path::PathBuf;

use clap::Parser;
use miette::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod daemon;

#[derive(Parser)]
#[command(name = "mealplan")]
#[command(about = "Meal reminder scheduling daemon", long_about = None)]
struct Cli {
    /// Path to a JSON file with reminder definitions
    #[arg(long, env = "MEALPLAN_REMINDERS")]
    reminders: PathBuf,

    /// Bound on waiting for in-flight notifications at shutdown, in seconds
    #[arg(long, default_value = "30")]
    drain_timeout: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "mealplan=info,mealplan_scheduler=info".to_string()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    daemon::run(&cli.reminders, cli.drain_timeout).await
}
