use uuid::Uuid;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Mutex;

// ============================================================================
// Snapshot Strategies
// ============================================================================
//
// A strategy decides, on every write, whether the aggregate's state should
// be snapshotted. Called on the hot path after each append, so decisions
// must be cheap: a map lookup and an integer or clock comparison.
//
// ============================================================================

pub trait SnapshotStrategy: Send + Sync {
    fn should_snapshot(&self, aggregate_id: Uuid, current_version: i64) -> bool;
}

/// Snapshot every `threshold` events.
///
/// Fires when `current_version` is a multiple of the threshold, or when a
/// threshold boundary was crossed since the last decision for that
/// aggregate (batch appends can jump past an exact multiple).
pub struct EventCountStrategy {
    threshold: i64,
    last_seen: Mutex<HashMap<Uuid, i64>>,
}

impl EventCountStrategy {
    pub fn new(threshold: i64) -> Self {
        assert!(threshold > 0, "snapshot threshold must be positive");
        Self {
            threshold,
            last_seen: Mutex::new(HashMap::new()),
        }
    }
}

impl SnapshotStrategy for EventCountStrategy {
    fn should_snapshot(&self, aggregate_id: Uuid, current_version: i64) -> bool {
        let mut last_seen = self.last_seen.lock().expect("strategy lock poisoned");
        let last = last_seen.insert(aggregate_id, current_version).unwrap_or(0);
        current_version / self.threshold > last / self.threshold
    }
}

/// Snapshot when more than `max_age` has elapsed since the last snapshot
/// decision for the aggregate. The clock starts at the first observation.
pub struct TimeBasedStrategy {
    max_age: Duration,
    last_decision: Mutex<HashMap<Uuid, DateTime<Utc>>>,
}

impl TimeBasedStrategy {
    pub fn new(max_age: std::time::Duration) -> Self {
        Self {
            max_age: Duration::from_std(max_age).unwrap_or(Duration::MAX),
            last_decision: Mutex::new(HashMap::new()),
        }
    }
}

impl SnapshotStrategy for TimeBasedStrategy {
    fn should_snapshot(&self, aggregate_id: Uuid, _current_version: i64) -> bool {
        let now = Utc::now();
        let mut last_decision = self.last_decision.lock().expect("strategy lock poisoned");

        match last_decision.get(&aggregate_id) {
            Some(last) if now - *last > self.max_age => {
                last_decision.insert(aggregate_id, now);
                true
            }
            Some(_) => false,
            None => {
                last_decision.insert(aggregate_id, now);
                false
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
