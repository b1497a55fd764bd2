use std::time::Duration;

/// Tuning knobs for one synchronization engine.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Delay before reconnecting after an abnormal closure.
    pub reconnect_delay: Duration,
    /// When set, the reconnect delay doubles on consecutive failures up to
    /// this bound. `None` keeps the delay fixed.
    pub reconnect_max_delay: Option<Duration>,
    /// Interval between heartbeat pings while a channel is open.
    pub heartbeat_interval: Duration,
    /// How long a typing flag survives without a refreshing event.
    pub typing_ttl: Duration,
    /// `limit` sent with `notifications_sync` resync requests.
    pub resync_limit: u32,
    /// Capacity of the broadcast event bus.
    pub event_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            reconnect_delay: Duration::from_secs(3),
            reconnect_max_delay: None,
            heartbeat_interval: Duration::from_secs(30),
            typing_ttl: Duration::from_secs(3),
            resync_limit: 50,
            event_capacity: 1024,
        }
    }
}
