//! Daemon wiring: scheduler construction, reminder loading, shutdown.

use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use miette::Result;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{info, warn};

use mealplan_scheduler::{Notification, Notifier, Repeat, Scheduler};

/// One reminder definition from the input file.
#[derive(Debug, Deserialize)]
struct ReminderSpec {
    owner_id: String,
    /// `YYYY-MM-DDTHH:MM:SS` for one-time reminders, `HH[:MM[:SS]]` for daily.
    time: String,
    #[serde(default = "default_repeat")]
    repeated: Repeat,
    contact: String,
    #[serde(default)]
    payload: Map<String, Value>,
}

fn default_repeat() -> Repeat {
    Repeat::None
}

/// Run the daemon until a shutdown signal arrives.
pub async fn run(reminders_path: &Path, drain_timeout_secs: u64) -> Result<()> {
    let raw = tokio::fs::read_to_string(reminders_path)
        .await
        .map_err(|e| miette::miette!("failed to read {}: {}", reminders_path.display(), e))?;
    let specs: Vec<ReminderSpec> = serde_json::from_str(&raw)
        .map_err(|e| miette::miette!("failed to parse {}: {}", reminders_path.display(), e))?;

    let scheduler = Scheduler::with_drain_timeout(
        log_notifier(),
        Duration::from_secs(drain_timeout_secs),
    );
    scheduler.start().await;

    let mut scheduled = 0usize;
    for spec in specs {
        match scheduler
            .add_event(
                &spec.owner_id,
                &spec.time,
                spec.repeated,
                &spec.contact,
                spec.payload,
            )
            .await
        {
            Ok((event_id, next_run)) => {
                info!(%event_id, owner_id = %spec.owner_id, %next_run, "reminder scheduled");
                scheduled += 1;
            }
            Err(e) => {
                warn!(owner_id = %spec.owner_id, time = %spec.time, error = %e, "skipping reminder");
            }
        }
    }
    info!(count = scheduled, "daemon ready");

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("received shutdown signal"),
        Err(e) => warn!(error = %e, "failed to listen for shutdown signal, shutting down"),
    }
    scheduler.shutdown().await;

    Ok(())
}

/// Notifier that reports the reminder through the log.
///
/// Real delivery (SMTP, push, webhook) slots in behind the same signature.
fn log_notifier() -> Notifier {
    Arc::new(|n: Notification| {
        Box::pin(async move {
            info!(
                event_id = %n.event_id,
                owner_id = %n.owner_id,
                contact = %n.contact,
                payload = ?n.payload,
                "reminder due"
            );
            Ok(())
        }) as Pin<Box<dyn Future<Output = Result<(), String>> + Send>>
    })
}
