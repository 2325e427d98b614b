//! Metric names recorded by the server.

pub const SESSIONS_ACTIVE: &str = "sessions_active";
pub const SESSIONS_REGISTERED_TOTAL: &str = "sessions_registered_total";
pub const SESSIONS_EVICTED_TOTAL: &str = "sessions_evicted_total";
pub const BROADCAST_DROPPED_TOTAL: &str = "broadcast_dropped_total";
pub const MESSAGES_DROPPED_TOTAL: &str = "messages_dropped_total";
pub const HANDLER_PANICS_TOTAL: &str = "handler_panics_total";
pub const FRAMES_DISPATCHED_TOTAL: &str = "frames_dispatched_total";
pub const RELAY_COMPLETED_TOTAL: &str = "relay_completed_total";
pub const RELAY_FAILED_TOTAL: &str = "relay_failed_total";
pub const RELAY_CANCELLED_TOTAL: &str = "relay_cancelled_total";
