use std::time::Duration;

/// Configuration for a periodic, lock-coordinated retention sweep across a
/// fixed set of declared streams.
#[derive(Debug, Clone)]
pub struct SweeperConfig {
    pub redis_url: String,

    /// Redis key the distributed lock is acquired on. Shared by every
    /// sweeper instance watching the same stream set.
    pub lock_key: String,

    /// How long an acquired lock is held before it expires on its own, in
    /// case the holding instance crashes mid-sweep.
    pub lock_ttl: Duration,

    /// How often a sweep is attempted.
    pub sweep_interval: Duration,

    /// The streams this sweeper is responsible for trimming.
    pub streams: Vec<String>,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://127.0.0.1:6379".to_string(),
            lock_key: "nbus:retention:lock".to_string(),
            lock_ttl: Duration::from_secs(60),
            sweep_interval: Duration::from_secs(5 * 60),
            streams: Vec::new(),
        }
    }
}
