use crate::services::idempotency::IdempotencyKeystore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::interval;
use tracing::{debug, info};

/// Periodically purges expired idempotency cache entries.
///
/// Best-effort memory-bound cleanup; the database read-through applies the
/// same retention window, so a missed sweep never affects correctness.
pub struct IdempotencySweeper {
    keystore: Arc<IdempotencyKeystore>,
    sweep_interval: Duration,
}

impl IdempotencySweeper {
    pub fn new(keystore: Arc<IdempotencyKeystore>, sweep_interval: Duration) -> Self {
        Self {
            keystore,
            sweep_interval,
        }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.sweep_interval);
        info!(
            interval_secs = self.sweep_interval.as_secs(),
            "Idempotency sweeper started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let removed = self.keystore.sweep_expired().await;
                    if removed > 0 {
                        debug!(removed = removed, "swept expired idempotency entries");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Idempotency sweeper shutting down");
                        break;
                    }
                }
            }
        }
    }
}
