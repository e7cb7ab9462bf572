//! Background sweeper that bounds visitor registry memory.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::registry::VisitorRegistry;
use crate::error::{Result, TurnstileError};

/// Periodically clears the whole visitor registry.
///
/// The task is owned by this handle: [`Sweeper::stop`] signals it and waits
/// for it to exit, and dropping the handle aborts it.
pub struct Sweeper {
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Sweeper {
    /// Spawn the sweeper on the current Tokio runtime.
    ///
    /// The first sweep happens one full `interval` after start. A zero
    /// interval is rejected.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn start(registry: Arc<VisitorRegistry>, interval: Duration) -> Result<Self> {
        if interval.is_zero() {
            return Err(TurnstileError::Config(
                "sweep interval must be greater than zero".to_string(),
            ));
        }

        let (shutdown, mut shutdown_rx) = oneshot::channel();

        info!(interval_secs = interval.as_secs(), "Starting visitor sweeper");

        let handle = tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = ticker.tick() => {
                        let evicted = registry.reset_all();
                        info!(evicted = evicted, "Swept visitor registry");
                    }
                }
            }

            debug!("Visitor sweeper stopped");
        });

        Ok(Self {
            shutdown: Some(shutdown),
            handle: Some(handle),
        })
    }

    /// Stop the sweeper and wait for its task to finish.
    pub async fn stop(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }

        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                warn!(error = %e, "Visitor sweeper task ended abnormally");
            }
        }
    }

    /// Whether the sweeper task has exited.
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }
}

impl Drop for Sweeper {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
