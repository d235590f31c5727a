use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use uuid::Uuid;

use tether_reconcile::cleanup;
use tether_reconcile::memory::{MemoryServer, MemoryUploader};
use tether_reconcile::{
    AttemptOutcome, ReconcileConfig, ReconcileLogger, Reconciler, SubmissionCoordinator, ThreadStore,
    TracingLogger,
};
use tether_types::models::{Attachment, AttachmentKind, Draft, EntryKind};

/// Reads a probability from the environment, defaulting when unset or bad.
fn env_rate(key: &str, default: f64) -> f64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<f64>().ok())
        .filter(|r| (0.0..=1.0).contains(r))
        .unwrap_or(default)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tether_sim=debug,tether_reconcile=debug".into()),
        )
        .init();

    // Config
    let config = ReconcileConfig::from_env();
    let send_failure_rate = env_rate("TETHER_SIM_SEND_FAILURE_RATE", 0.25);
    let upload_failure_rate = env_rate("TETHER_SIM_UPLOAD_FAILURE_RATE", 0.25);
    let max_retries: u32 = std::env::var("TETHER_SIM_MAX_RETRIES")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(3);
    info!(?config, send_failure_rate, upload_failure_rate, "Starting simulated conversation");

    let me = Uuid::new_v4();
    let friend = Uuid::new_v4();
    let logger: Arc<dyn ReconcileLogger> = Arc::new(TracingLogger);

    let store = ThreadStore::new("sim-conversation");
    let server = Arc::new(MemoryServer::new().with_failure_rate(send_failure_rate));
    let uploader = Arc::new(MemoryUploader::default().with_failure_rate(upload_failure_rate));

    let coordinator = SubmissionCoordinator::new(
        store.clone(),
        me,
        EntryKind::Message,
        server.clone(),
        uploader,
        logger.clone(),
    );
    let reconciler = Arc::new(Reconciler::new(store.clone(), &config, logger.clone()));

    // Background stale prune and refetch
    tokio::spawn(cleanup::run_prune_loop(
        store.clone(),
        logger.clone(),
        config.stale_after,
        config.prune_interval,
    ));
    tokio::spawn(cleanup::run_refresh_loop(
        server.clone(),
        reconciler.clone(),
        Duration::from_millis(250),
    ));

    // Stand-in for the UI: every store event as JSON
    let mut events = store.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(json) => debug!(entry_id = ?event.entry_id(), "render {}", json),
                    Err(e) => warn!("Unserializable event: {}", e),
                },
                Err(RecvError::Lagged(n)) => warn!("UI fell behind by {} events", n),
                Err(RecvError::Closed) => break,
            }
        }
    });

    server.push_foreign(friend, "are you coming tonight?").await;

    let drafts = vec![
        Draft::text("yes!"),
        Draft::text("  see you   at 8 "),
        Draft::text("").with_attachment(Attachment::new("file:///tmp/selfie.jpg", AttachmentKind::Image)),
        Draft::text("bringing snacks")
            .with_attachment(Attachment::new("file:///tmp/list.pdf", AttachmentKind::Document)),
        Draft::text("   "),
    ];

    let scenario = async {
        let mut submitted = Vec::new();
        for draft in drafts {
            match coordinator.submit(draft).await {
                Some(submission) => submitted.push(submission),
                None => info!("Nothing to send, skipped"),
            }
        }

        for submission in submitted {
            let id = submission.id.clone();
            let mut outcome = submission.wait().await;
            let mut retries = 0;
            while matches!(outcome, AttemptOutcome::Failed(_)) && retries < max_retries {
                retries += 1;
                match coordinator.retry(&id).await {
                    Some(retry) => outcome = retry.wait().await,
                    None => break,
                }
            }
            info!(entry_id = %id, ?outcome, retries, "Settled");
        }

        // Give the refresh loop a couple of ticks
        tokio::time::sleep(Duration::from_millis(600)).await;
    };

    tokio::select! {
        _ = scenario => {}
        _ = tokio::signal::ctrl_c() => info!("Received Ctrl+C, shutting down..."),
    }

    let leftovers = store.snapshot().await;
    let in_flight = leftovers.iter().filter(|e| e.state.is_in_flight()).count();
    info!(
        "{} confirmed on server, {} still pending locally ({} in flight)",
        server.confirmed().await.len(),
        leftovers.len(),
        in_flight
    );
    for entry in &leftovers {
        println!("{}", serde_json::to_string_pretty(entry)?);
    }

    store.close().await;
    Ok(())
}
