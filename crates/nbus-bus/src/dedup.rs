use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

/// Bounded dedup cache: `notificationId -> sentinel` with sliding TTL
/// eviction and a hard size cap. When the cap is hit, the oldest
/// `compaction_percentage` fraction of entries is dropped to make room.
pub struct DedupCache {
    state: Mutex<State>,
    config: DedupCacheConfig,
}

struct State {
    last_seen: HashMap<String, Instant>,
    /// Insertion order, oldest first; used for both TTL scanning and
    /// size-based compaction without scanning the whole map. Each entry
    /// carries the timestamp it was inserted with, so a reinsertion of an
    /// id that previously expired leaves its old queue entry behind as a
    /// stale duplicate — recognizable because it no longer matches
    /// `last_seen`, and skipped rather than acted on wherever it surfaces.
    order: VecDeque<(String, Instant)>,
}

/// Every dedup-related knob, collapsed into a single options struct (see
/// DESIGN.md for the open-question resolution — the source's two
/// dedup-cache constructor overloads collapse to one).
#[derive(Debug, Clone, Copy)]
pub struct DedupCacheConfig {
    pub ttl: Duration,
    pub max_size: usize,
    pub compaction_percentage: f64,
    pub scan_interval: Duration,
}

impl Default for DedupCacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(10 * 60),
            max_size: 10_000,
            compaction_percentage: 0.25,
            scan_interval: Duration::from_secs(60),
        }
    }
}

impl DedupCache {
    pub fn new(config: DedupCacheConfig) -> Self {
        Self {
            state: Mutex::new(State {
                last_seen: HashMap::new(),
                order: VecDeque::new(),
            }),
            config,
        }
    }

    /// Atomic check-and-insert: returns `true` if `id` was not present (and
    /// has now been recorded, so the entity should pass downstream), `false`
    /// if `id` was already present within its TTL window (drop it). The
    /// window is sliding: a duplicate hit refreshes `id`'s timestamp so a
    /// steady stream of repeats keeps it alive indefinitely, rather than
    /// expiring a fixed `ttl` after the first sighting.
    pub fn check_and_insert(&self, id: &str) -> bool {
        let now = Instant::now();
        let mut state = self.state.lock().unwrap();

        if let Some(seen_at) = state.last_seen.get(id)
            && now.duration_since(*seen_at) < self.config.ttl
        {
            state.last_seen.insert(id.to_string(), now);
            state.order.push_back((id.to_string(), now));
            return false;
        }

        if state.last_seen.len() >= self.config.max_size {
            compact(&mut state, self.config.compaction_percentage);
        }

        state.last_seen.insert(id.to_string(), now);
        state.order.push_back((id.to_string(), now));
        true
    }

    fn scan_expired(&self) {
        let now = Instant::now();
        let mut state = self.state.lock().unwrap();
        while let Some((front_id, front_seen_at)) = state.order.front().cloned() {
            match state.last_seen.get(&front_id) {
                Some(seen_at) if *seen_at == front_seen_at => {
                    if now.duration_since(*seen_at) < self.config.ttl {
                        break;
                    }
                    state.order.pop_front();
                    state.last_seen.remove(&front_id);
                }
                // Stale duplicate left by a reinsert after expiry, or
                // already removed by a prior compaction; drop and move on.
                _ => {
                    state.order.pop_front();
                }
            }
        }
    }

    /// Spawn the background TTL scanner; stops when `cancel` fires.
    pub fn spawn_scanner(self: std::sync::Arc<Self>, cancel: CancellationToken) {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = tokio::time::sleep(self.config.scan_interval) => self.scan_expired(),
                    () = cancel.cancelled() => break,
                }
            }
        });
    }
}

/// Drop the oldest `percentage` fraction of entries (at least one), in
/// insertion order. `order` and `last_seen` may have already diverged via
/// `scan_expired` or a reinsert-after-expiry; entries that no longer match
/// `last_seen`'s recorded timestamp are stale duplicates and are skipped
/// without counting toward the target.
fn compact(state: &mut State, percentage: f64) {
    let target = ((state.last_seen.len() as f64 * percentage).ceil() as usize).max(1);
    let mut removed = 0;
    while removed < target
        && let Some((id, seen_at)) = state.order.pop_front()
    {
        if state.last_seen.get(&id) == Some(&seen_at) {
            state.last_seen.remove(&id);
            removed += 1;
        }
    }
}
