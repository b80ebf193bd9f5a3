//! Background health monitor.
//!
//! Ticks the session periodically: a health check while Live, a bounded
//! re-probe of the host otherwise. Request paths never probe, so a Simulated
//! or Degraded bridge does no network I/O on behalf of callers.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use super::session::Session;

/// Lower bound on the tick period.
const MIN_TICK: Duration = Duration::from_millis(100);

/// Handle to the running monitor task.
#[derive(Debug)]
pub struct HealthMonitor {
    stop_tx: Option<oneshot::Sender<()>>,
    join_handle: Option<JoinHandle<()>>,
}

impl HealthMonitor {
    /// Spawns the monitor on the current runtime.
    #[must_use]
    pub fn spawn(session: Arc<Session>) -> Self {
        let settings = session.settings();
        let reprobe = settings.mode_policy().reprobe_interval;
        let period = settings
            .health_check_interval()
            .map_or(reprobe, |health| health.min(reprobe))
            .max(MIN_TICK);

        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let join_handle = tokio::spawn(async move {
            tracing::debug!(period_ms = period.as_millis(), "Health monitor started");
            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    () = tokio::time::sleep(period) => session.tick().await,
                }
            }
            tracing::debug!("Health monitor stopped");
        });

        Self {
            stop_tx: Some(stop_tx),
            join_handle: Some(join_handle),
        }
    }

    /// Signals the monitor to stop and waits for the current tick to finish.
    pub async fn stop(mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(join_handle) = self.join_handle.take() {
            if let Err(e) = join_handle.await {
                tracing::warn!(error = %e, "Health monitor task failed");
            }
        }
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(join_handle) = self.join_handle.take() {
            join_handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::Mode;
    use crate::config::Config;

    #[tokio::test]
    async fn stops_cleanly() {
        let mut config = Config::default();
        config.bridge.force_simulation = true;
        let session = Arc::new(Session::new(&config));
        session.start().await;

        let monitor = HealthMonitor::spawn(Arc::clone(&session));
        tokio::time::sleep(Duration::from_millis(20)).await;
        monitor.stop().await;
        assert_eq!(session.mode(), Mode::Simulated);
    }
}
