use std::time::Duration;

/// Every tunable knob for the durable streaming transport: storage,
/// performance, and resilience settings, plus the shared consumer group
/// name.
#[derive(Debug, Clone)]
pub struct RedisTransportConfig {
    pub url: String,

    // -- Storage --
    pub default_stream_name: String,
    pub message_ttl: Duration,
    pub stream_ttl: Duration,
    pub max_stream_length: u64,
    pub use_approximate_trimming: bool,

    // -- Performance --
    pub xreadgroup_block: Duration,
    pub initialization_timeout: Duration,
    pub batch_size: u32,

    // -- Resilience --
    pub error_recovery_delay: Duration,
    pub retry_delay: Duration,
    pub max_init_retries: u32,

    /// Consumer group name shared by every instance of this process kind;
    /// each instance gets its own consumer name within the group.
    pub consumer_group: String,
}

impl Default for RedisTransportConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            default_stream_name: "notifications:stream:default".to_string(),
            message_ttl: Duration::from_secs(60 * 60),
            stream_ttl: Duration::from_secs(24 * 60 * 60),
            max_stream_length: 10_000,
            use_approximate_trimming: false,
            xreadgroup_block: Duration::from_millis(5_000),
            initialization_timeout: Duration::from_millis(30_000),
            batch_size: 64,
            error_recovery_delay: Duration::from_millis(3_000),
            retry_delay: Duration::from_millis(5_000),
            max_init_retries: 5,
            consumer_group: "nbus".to_string(),
        }
    }
}
