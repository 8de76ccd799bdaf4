use std::time::Duration;

/// Health of a transport's backing connection, as reported by `ping`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Threshold above which a live connection is reported degraded rather than
/// healthy ("degraded if ping > 1000ms").
pub const DEGRADED_LATENCY: Duration = Duration::from_millis(1_000);

impl HealthStatus {
    pub fn from_ping(latency: Duration) -> Self {
        if latency > DEGRADED_LATENCY {
            Self::Degraded
        } else {
            Self::Healthy
        }
    }
}
