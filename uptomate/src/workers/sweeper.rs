//! Sweeper worker dropping expired tasks from the queue

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info};

use crate::tasks::TaskQueue;

/// Sweeper worker options
#[derive(Debug, Clone)]
pub struct Options {
    /// Time between two sweeps
    pub interval: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60 * 10),
        }
    }
}

/// Run the sweeper worker until `shutdown_signal` resolves
pub async fn run<S, F>(
    options: &Options,
    queue: &TaskQueue,
    sleep_fn: S,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) where
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    info!("Sweeper worker starting...");

    loop {
        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Sweeper worker shutting down...");
                return;
            }
            _ = sleep_fn(options.interval) => {}
        }

        let purged = queue.purge_expired(Utc::now());
        debug!("Sweep done, {} purged, {} retained", purged, queue.len());
    }
}
