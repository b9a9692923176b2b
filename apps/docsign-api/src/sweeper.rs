//! Background poll and expiry loops

use chrono::Utc;
use docsign_core::SignatureService;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

pub fn spawn_poll_loop(service: Arc<SignatureService>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // the first tick completes immediately
        ticker.tick().await;
        info!(interval_secs = every.as_secs(), "Poll loop started");
        loop {
            ticker.tick().await;
            if let Err(err) = service.poll_sweep().await {
                error!(error = %err, "Poll sweep failed");
            }
        }
    })
}

pub fn spawn_expiry_loop(service: Arc<SignatureService>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(interval_secs = every.as_secs(), "Expiry loop started");
        loop {
            ticker.tick().await;
            match service.expire_overdue(Utc::now().date_naive()).await {
                Ok(expired) if !expired.is_empty() => {
                    info!(count = expired.len(), "Expired overdue requests")
                }
                Ok(_) => {}
                Err(err) => error!(error = %err, "Expiry sweep failed"),
            }
        }
    })
}
