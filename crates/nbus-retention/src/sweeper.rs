use std::sync::Arc;

use nbus_core::Transport;
use tokio_util::sync::CancellationToken;

use crate::config::SweeperConfig;
use crate::error::RetentionError;
use crate::lock::DistributedLock;

/// Outcome of one sweep attempt.
#[derive(Debug, Clone, Default)]
pub struct SweepReport {
    /// `false` when another instance already held the lock; the sweep was
    /// skipped entirely, not an error.
    pub lock_acquired: bool,
    pub streams_swept: usize,
    pub entries_trimmed: u64,
}

/// Periodic, lock-coordinated retention sweep (ambient operational
/// machinery carried alongside the durable transport): ensures every
/// declared stream's consumer-group bookkeeping and TTL are current, then
/// trims it to its configured `MAXLEN`. Distinct from the durable
/// transport's own per-publish `MAXLEN` trim — this sweep also catches
/// streams that saw no recent publish, and enforces `StreamTTL` directly.
pub struct Sweeper {
    transport: Arc<dyn Transport>,
    config: SweeperConfig,
}

impl Sweeper {
    pub fn new(transport: Arc<dyn Transport>, config: SweeperConfig) -> Self {
        Self { transport, config }
    }

    /// Attempt one sweep. Returns a report with `lock_acquired: false` (not
    /// an error) if another instance currently holds the lock.
    pub async fn run_once(&self) -> Result<SweepReport, RetentionError> {
        let lock = DistributedLock::new(&self.config.redis_url, self.config.lock_key.clone(), self.config.lock_ttl).await?;

        if !lock.acquire().await? {
            tracing::debug!(lock_key = %self.config.lock_key, "retention sweep skipped, lock held elsewhere");
            return Ok(SweepReport {
                lock_acquired: false,
                ..Default::default()
            });
        }

        let mut report = SweepReport {
            lock_acquired: true,
            ..Default::default()
        };

        for stream in &self.config.streams {
            if let Err(e) = self.transport.ensure_stream(stream).await {
                tracing::warn!(stream = %stream, "retention sweep failed to ensure stream: {e}");
                continue;
            }
            match self.transport.trim_stream(stream).await {
                Ok(removed) => {
                    report.streams_swept += 1;
                    report.entries_trimmed += removed;
                }
                Err(e) => tracing::warn!(stream = %stream, "retention sweep failed to trim stream: {e}"),
            }
        }

        if let Err(e) = lock.release().await {
            tracing::warn!("failed to release retention lock: {e}");
        }

        Ok(report)
    }

    /// Run `run_once` on `config.sweep_interval` until `cancel` fires.
    /// Errors from a single sweep are logged and don't stop the loop — a
    /// transient Redis hiccup shouldn't permanently disable retention.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.sweep_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.run_once().await {
                        Ok(report) if report.lock_acquired => {
                            tracing::debug!(
                                streams = report.streams_swept,
                                trimmed = report.entries_trimmed,
                                "retention sweep completed"
                            );
                        }
                        Ok(_) => {}
                        Err(e) => tracing::warn!("retention sweep failed: {e}"),
                    }
                }
                () = cancel.cancelled() => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sweep_report_default_reflects_no_streams_swept() {
        let report = SweepReport::default();
        assert!(!report.lock_acquired);
        assert_eq!(report.streams_swept, 0);
        assert_eq!(report.entries_trimmed, 0);
    }
}
