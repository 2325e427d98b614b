//! Live set of sessions plus the identity index, under a single lock.

use std::collections::HashMap;
use std::sync::Arc;

use chatgate_core::SessionId;
use chatgate_telemetry::MetricsRecorder;
use parking_lot::RwLock;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};

use crate::metric_names;
use crate::session::Session;

/// Why a session was forcibly removed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EvictReason {
    /// No traffic within the heartbeat timeout.
    Idle,
    /// Outbound queue full during a broadcast.
    Backpressure,
    Shutdown,
}

impl EvictReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Backpressure => "backpressure",
            Self::Shutdown => "shutdown",
        }
    }
}

/// Outcome of one broadcast.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub evicted: usize,
    /// Sessions already shutting down.
    pub skipped: usize,
}

#[derive(Default)]
struct Inner {
    sessions: HashMap<SessionId, Arc<Session>>,
    identities: HashMap<String, Arc<Session>>,
}

impl Inner {
    /// Drop `identity`'s mapping only if it points at `session`.
    fn release_identity(&mut self, identity: &str, session: &Arc<Session>) {
        if self
            .identities
            .get(identity)
            .is_some_and(|current| Arc::ptr_eq(current, session))
        {
            self.identities.remove(identity);
        }
    }
}

/// Registry of live sessions. Holds `Arc<Session>` handles only; sockets
/// belong to the sessions' own loops.
pub struct Registry {
    inner: RwLock<Inner>,
    metrics: Arc<MetricsRecorder>,
}

impl Registry {
    pub fn new(metrics: Arc<MetricsRecorder>) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            metrics,
        }
    }

    /// Add a session. An identity it carries supersedes any earlier holder in
    /// the index; the earlier session stays live until its own loops end.
    pub fn register(&self, session: &Arc<Session>) {
        let superseded = {
            let mut inner = self.inner.write();
            inner
                .sessions
                .insert(session.id().clone(), Arc::clone(session));
            let superseded = session
                .identity()
                .and_then(|id| inner.identities.insert(id, Arc::clone(session)));
            self.metrics.gauge_set(
                metric_names::SESSIONS_ACTIVE,
                &[],
                inner.sessions.len() as i64,
            );
            superseded
        };
        self.metrics
            .counter_inc(metric_names::SESSIONS_REGISTERED_TOTAL, &[], 1);
        if let Some(prev) = superseded.filter(|prev| !Arc::ptr_eq(prev, session)) {
            info!(
                session_id = %session.id(),
                superseded = %prev.id(),
                identity = ?session.identity(),
                "identity moved to new session"
            );
        }
    }

    /// Remove this exact session. A stale handle whose id or identity now
    /// belongs to another instance leaves that instance alone. Returns whether
    /// the live set changed.
    pub fn unregister(&self, session: &Arc<Session>) -> bool {
        let mut inner = self.inner.write();
        let removed = match inner.sessions.get(session.id()) {
            Some(current) if Arc::ptr_eq(current, session) => {
                inner.sessions.remove(session.id());
                true
            }
            _ => false,
        };
        if let Some(identity) = session.identity() {
            inner.release_identity(&identity, session);
        }
        if removed {
            self.metrics.gauge_set(
                metric_names::SESSIONS_ACTIVE,
                &[],
                inner.sessions.len() as i64,
            );
        }
        removed
    }

    /// Set or replace a session's identity (last bind wins). Returns the
    /// session that previously held `identity`, if it was a different one.
    pub fn bind_identity(
        &self,
        session: &Arc<Session>,
        identity: impl Into<String>,
    ) -> Option<Arc<Session>> {
        let identity = identity.into();
        let mut inner = self.inner.write();
        if let Some(old) = session.set_identity(Some(identity.clone())) {
            inner.release_identity(&old, session);
        }
        // A closed session is not re-indexed.
        if !inner.sessions.contains_key(session.id()) {
            return None;
        }
        inner
            .identities
            .insert(identity, Arc::clone(session))
            .filter(|prev| !Arc::ptr_eq(prev, session))
    }

    pub fn lookup(&self, identity: &str) -> Option<Arc<Session>> {
        self.inner.read().identities.get(identity).cloned()
    }

    pub fn get(&self, id: &SessionId) -> Option<Arc<Session>> {
        self.inner.read().sessions.get(id).cloned()
    }

    /// Directed send. False when nobody holds `identity` or the payload was dropped.
    pub fn send_to(&self, identity: &str, payload: impl Into<String>) -> bool {
        match self.lookup(identity) {
            Some(session) => session.send_msg(payload),
            None => {
                debug!(identity, "send_to: identity not connected");
                false
            }
        }
    }

    /// Copy of the live set, taken under the read lock and iterated after it
    /// is released.
    pub fn snapshot(&self) -> Vec<Arc<Session>> {
        self.inner.read().sessions.values().cloned().collect()
    }

    /// Enqueue `payload` on every live session without blocking. A session
    /// whose queue is full loses this payload and is evicted.
    pub fn broadcast(&self, payload: &str) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        for session in self.snapshot() {
            match session.try_enqueue(payload.to_string()) {
                Ok(()) => report.delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!(
                        session_id = %session.id(),
                        addr = %session.addr(),
                        "broadcast: outbound queue full"
                    );
                    self.metrics
                        .counter_inc(metric_names::BROADCAST_DROPPED_TOTAL, &[], 1);
                    self.evict(&session, EvictReason::Backpressure);
                    report.evicted += 1;
                }
                Err(TrySendError::Closed(_)) => report.skipped += 1,
            }
        }
        report
    }

    /// Shared forced-removal path: unregister, then close the session exactly
    /// once (its write loop owns the socket close).
    pub fn evict(&self, session: &Arc<Session>, reason: EvictReason) -> bool {
        let removed = self.unregister(session);
        session.close();
        if removed {
            self.metrics.counter_inc(
                metric_names::SESSIONS_EVICTED_TOTAL,
                &[("reason", reason.as_str())],
                1,
            );
            info!(
                session_id = %session.id(),
                addr = %session.addr(),
                reason = reason.as_str(),
                "session evicted"
            );
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.inner.read().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn identity_count(&self) -> usize {
        self.inner.read().identities.len()
    }

    pub fn identities(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inner.read().identities.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Close every live session and clear both indexes. Returns how many
    /// sessions were closed.
    pub fn drain(&self) -> usize {
        let sessions: Vec<Arc<Session>> = {
            let mut inner = self.inner.write();
            inner.identities.clear();
            let drained = inner.sessions.drain().map(|(_, s)| s).collect();
            self.metrics.gauge_set(metric_names::SESSIONS_ACTIVE, &[], 0);
            drained
        };
        for session in &sessions {
            session.close();
        }
        if !sessions.is_empty() {
            info!(count = sessions.len(), "drained sessions");
        }
        sessions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn setup() -> (Registry, Arc<MetricsRecorder>) {
        let metrics = Arc::new(MetricsRecorder::new());
        (Registry::new(Arc::clone(&metrics)), metrics)
    }

    fn session(
        registry: &Registry,
        identity: Option<&str>,
        queue: usize,
    ) -> (Arc<Session>, mpsc::Receiver<String>) {
        Session::new(
            "127.0.0.1:1",
            None,
            identity.map(str::to_string),
            queue,
            Arc::clone(&registry.metrics),
        )
    }

    #[test]
    fn register_and_unregister() {
        let (registry, metrics) = setup();
        let (a, _ra) = session(&registry, Some("u1"), 4);
        let (b, _rb) = session(&registry, None, 4);
        registry.register(&a);
        registry.register(&b);
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.identity_count(), 1);
        assert_eq!(metrics.gauge_get(metric_names::SESSIONS_ACTIVE, &[]), 2);

        assert!(registry.unregister(&a));
        assert!(!registry.unregister(&a));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.identity_count(), 0);
        assert_eq!(metrics.gauge_get(metric_names::SESSIONS_ACTIVE, &[]), 1);
    }

    #[test]
    fn identity_supersession() {
        let (registry, _) = setup();
        let (s1, _r1) = session(&registry, Some("alice"), 4);
        let (s2, _r2) = session(&registry, Some("alice"), 4);
        registry.register(&s1);
        registry.register(&s2);

        // both live, index points at the newest
        assert_eq!(registry.len(), 2);
        assert!(Arc::ptr_eq(&registry.lookup("alice").unwrap(), &s2));

        // the superseded session leaving does not disturb the mapping
        registry.unregister(&s1);
        assert!(Arc::ptr_eq(&registry.lookup("alice").unwrap(), &s2));

        registry.unregister(&s2);
        assert!(registry.lookup("alice").is_none());
    }

    #[test]
    fn bind_identity_moves_mapping() {
        let (registry, _) = setup();
        let (s, _r) = session(&registry, Some("old"), 4);
        registry.register(&s);
        assert!(registry.bind_identity(&s, "new").is_none());
        assert!(registry.lookup("old").is_none());
        assert!(Arc::ptr_eq(&registry.lookup("new").unwrap(), &s));
        assert_eq!(s.identity().as_deref(), Some("new"));
    }

    #[test]
    fn bind_identity_last_wins() {
        let (registry, _) = setup();
        let (s1, _r1) = session(&registry, None, 4);
        let (s2, _r2) = session(&registry, None, 4);
        registry.register(&s1);
        registry.register(&s2);
        registry.bind_identity(&s1, "bob");
        let prev = registry.bind_identity(&s2, "bob").unwrap();
        assert!(Arc::ptr_eq(&prev, &s1));
        assert!(Arc::ptr_eq(&registry.lookup("bob").unwrap(), &s2));
    }

    #[test]
    fn bind_on_unregistered_session_is_not_indexed() {
        let (registry, _) = setup();
        let (s, _r) = session(&registry, None, 4);
        assert!(registry.bind_identity(&s, "ghost").is_none());
        assert!(registry.lookup("ghost").is_none());
    }

    #[test]
    fn send_to_missing_identity_is_noop() {
        let (registry, _) = setup();
        assert!(!registry.send_to("nobody", "hi"));
        let (s, mut r) = session(&registry, Some("carol"), 4);
        registry.register(&s);
        assert!(registry.send_to("carol", "hi"));
        assert_eq!(r.try_recv().unwrap(), "hi");
    }

    #[test]
    fn broadcast_evicts_saturated_session_only() {
        let (registry, metrics) = setup();
        let (fast, mut fast_rx) = session(&registry, None, 4);
        let (slow, _slow_rx) = session(&registry, Some("slow"), 1);
        registry.register(&fast);
        registry.register(&slow);
        assert!(slow.send_msg("filler"));

        let report = registry.broadcast("news");
        assert_eq!(report.delivered, 1);
        assert_eq!(report.evicted, 1);
        assert_eq!(fast_rx.try_recv().unwrap(), "news");
        assert!(slow.is_closed());
        assert!(!fast.is_closed());
        assert_eq!(registry.len(), 1);
        assert!(registry.lookup("slow").is_none());
        assert_eq!(metrics.counter_get(metric_names::BROADCAST_DROPPED_TOTAL, &[]), 1);
        assert_eq!(
            metrics.counter_get(metric_names::SESSIONS_EVICTED_TOTAL, &[("reason", "backpressure")]),
            1
        );

        // later broadcasts keep reaching the healthy session
        let report = registry.broadcast("more");
        assert_eq!(report.delivered, 1);
        assert_eq!(fast_rx.try_recv().unwrap(), "more");
    }

    #[test]
    fn broadcast_skips_closed_queues() {
        let (registry, _) = setup();
        let (s, rx) = session(&registry, None, 4);
        registry.register(&s);
        drop(rx);
        let report = registry.broadcast("x");
        assert_eq!(report.skipped, 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn snapshot_is_detached() {
        let (registry, _) = setup();
        let (s, _r) = session(&registry, None, 4);
        registry.register(&s);
        let snap = registry.snapshot();
        registry.unregister(&s);
        assert_eq!(snap.len(), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn drain_closes_everything() {
        let (registry, metrics) = setup();
        let (a, _ra) = session(&registry, Some("a"), 4);
        let (b, _rb) = session(&registry, None, 4);
        registry.register(&a);
        registry.register(&b);
        assert_eq!(registry.drain(), 2);
        assert!(a.is_closed() && b.is_closed());
        assert!(registry.is_empty());
        assert_eq!(registry.identity_count(), 0);
        assert_eq!(metrics.gauge_get(metric_names::SESSIONS_ACTIVE, &[]), 0);
    }

    #[test]
    fn concurrent_register_unregister_stays_consistent() {
        let (registry, _) = setup();
        let registry = Arc::new(registry);
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    for i in 0..200 {
                        let identity = format!("user-{}", (t * 200 + i) % 16);
                        let (s, _r) = Session::new(
                            "x",
                            None,
                            Some(identity),
                            1,
                            Arc::clone(&registry.metrics),
                        );
                        registry.register(&s);
                        registry.unregister(&s);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert!(registry.is_empty());
        assert_eq!(registry.identity_count(), 0);
    }
}
