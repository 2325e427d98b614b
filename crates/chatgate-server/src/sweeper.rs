use std::sync::Arc;
use std::time::Duration;

use chatgate_core::now_millis;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::registry::{EvictReason, Registry};

/// Periodically evicts sessions with no traffic for longer than the timeout.
pub struct Sweeper {
    registry: Arc<Registry>,
    timeout: Duration,
    interval: Duration,
}

impl Sweeper {
    pub fn new(registry: Arc<Registry>, timeout: Duration, interval: Duration) -> Self {
        Self {
            registry,
            timeout,
            interval,
        }
    }

    /// One pass as of `now_ms`. Returns the number of sessions evicted.
    pub fn sweep_at(&self, now_ms: u64) -> usize {
        let mut evicted = 0;
        for session in self.registry.snapshot() {
            if session.is_idle(now_ms, self.timeout)
                && self.registry.evict(&session, EvictReason::Idle)
            {
                evicted += 1;
            }
        }
        evicted
    }

    pub fn sweep(&self) -> usize {
        self.sweep_at(now_millis())
    }

    /// Run until `shutdown` fires.
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            // first tick completes immediately
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let evicted = self.sweep();
                        if evicted > 0 {
                            info!(evicted, live = self.registry.len(), "liveness sweep");
                        }
                    }
                }
            }
            debug!("sweeper stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Session;
    use chatgate_telemetry::MetricsRecorder;

    const TIMEOUT: Duration = Duration::from_secs(360);

    fn setup() -> (Arc<Registry>, Arc<MetricsRecorder>) {
        let metrics = Arc::new(MetricsRecorder::new());
        (Arc::new(Registry::new(Arc::clone(&metrics))), metrics)
    }

    fn register(
        registry: &Registry,
        metrics: &Arc<MetricsRecorder>,
    ) -> (Arc<Session>, tokio::sync::mpsc::Receiver<String>) {
        let (s, rx) = Session::new("a", None, None, 4, Arc::clone(metrics));
        registry.register(&s);
        (s, rx)
    }

    #[test]
    fn evicts_only_past_threshold() {
        let (registry, metrics) = setup();
        let (stale, _stale_rx) = register(&registry, &metrics);
        let (fresh, _fresh_rx) = register(&registry, &metrics);
        fresh.touch_at(fresh.last_activity() + 100_000);
        let sweeper = Sweeper::new(Arc::clone(&registry), TIMEOUT, Duration::from_secs(30));
        let timeout_ms = TIMEOUT.as_millis() as u64;

        assert_eq!(sweeper.sweep_at(stale.last_activity() + timeout_ms + 1), 1);
        assert!(stale.is_closed());
        assert!(!fresh.is_closed());

        // exactly at the threshold the session survives
        assert_eq!(sweeper.sweep_at(fresh.last_activity() + timeout_ms), 0);
        assert!(registry.get(fresh.id()).is_some());

        // one millisecond later it is gone
        assert_eq!(sweeper.sweep_at(fresh.last_activity() + timeout_ms + 1), 1);
        assert!(fresh.is_closed());
        assert!(registry.is_empty());
    }

    #[test]
    fn idle_eviction_is_counted() {
        let (registry, metrics) = setup();
        let (s, _rx) = register(&registry, &metrics);
        let sweeper = Sweeper::new(Arc::clone(&registry), TIMEOUT, Duration::from_secs(30));
        let later = s.last_activity() + TIMEOUT.as_millis() as u64 + 1;
        assert_eq!(sweeper.sweep_at(later), 1);
        assert_eq!(sweeper.sweep_at(later), 0);
        assert_eq!(
            metrics.counter_get(
                crate::metric_names::SESSIONS_EVICTED_TOTAL,
                &[("reason", "idle")]
            ),
            1
        );
    }

    #[tokio::test(start_paused = true)]
    async fn spawned_sweeper_stops_on_shutdown() {
        let (registry, _) = setup();
        let shutdown = CancellationToken::new();
        let handle = Sweeper::new(registry, TIMEOUT, Duration::from_secs(30)).spawn(shutdown.clone());
        tokio::time::advance(Duration::from_secs(61)).await;
        shutdown.cancel();
        handle.await.unwrap();
    }
}
