//! Temporal store for time-series and TTL facts
//!
//! In-process, memory-bounded buffers backing the windowed functions
//! (`recent_avg`, `sustained_above`, ...) callable from rule conditions.
//! Sample buffers are bounded both by a retention horizon and by a per-key
//! count cap. The store is the only shared mutable resource in the engine:
//! `record` takes the write lock, window queries take the read lock, so
//! sample ordering within a key stays serialized while readers proceed
//! concurrently.
//!
//! Every query takes an explicit `now`: the executor freezes wall time at
//! the start of each `reason` call so all temporal functions within one
//! evaluation observe the same instant.

use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;
use symbolica_types::Value;

/// Default retention horizon for time-series samples
const DEFAULT_RETENTION_SECS: i64 = 3600;
/// Default per-key sample cap
const DEFAULT_MAX_SAMPLES_PER_KEY: usize = 10_000;

/// Single time-series data point
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    /// When the sample was observed
    pub at: DateTime<Utc>,
    /// Observed numeric value
    pub value: f64,
}

/// Comparison direction for sustained-condition checks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SustainedCmp {
    /// Every sample must be strictly above the threshold
    Above,
    /// Every sample must be strictly below the threshold
    Below,
}

/// Configuration for the temporal store
#[derive(Debug, Clone)]
pub struct TemporalConfig {
    /// Samples older than this horizon are evicted
    pub retention: Duration,
    /// Maximum samples retained per key
    pub max_samples_per_key: usize,
}

impl Default for TemporalConfig {
    fn default() -> Self {
        Self {
            retention: Duration::seconds(DEFAULT_RETENTION_SECS),
            max_samples_per_key: DEFAULT_MAX_SAMPLES_PER_KEY,
        }
    }
}

#[derive(Debug, Default)]
struct TemporalState {
    series: HashMap<String, VecDeque<Sample>>,
    ttl_facts: HashMap<String, (Value, DateTime<Utc>)>,
}

/// Storage statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TemporalStats {
    /// Number of distinct time-series keys
    pub series_keys: usize,
    /// Total samples across all keys
    pub total_samples: usize,
    /// Number of TTL facts currently stored (including expired, pre-purge)
    pub ttl_facts: usize,
}

/// Keyed in-memory temporal storage
#[derive(Debug, Default)]
pub struct TemporalStore {
    config: TemporalConfig,
    state: RwLock<TemporalState>,
}

impl TemporalStore {
    /// Create a store with default bounds
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(TemporalConfig::default())
    }

    /// Create a store with explicit bounds
    #[must_use]
    pub fn with_config(config: TemporalConfig) -> Self {
        Self {
            config,
            state: RwLock::new(TemporalState::default()),
        }
    }

    /// Append a sample for `key`, evicting samples past the retention
    /// horizon or beyond the per-key cap
    pub fn record(&self, key: &str, value: f64, at: DateTime<Utc>) {
        let mut state = self.state.write().unwrap();
        let samples = state.series.entry(key.to_string()).or_default();

        // Keep the buffer time-ordered even for late arrivals
        if samples.back().is_some_and(|last| last.at > at) {
            let idx = samples.partition_point(|s| s.at <= at);
            samples.insert(idx, Sample { at, value });
        } else {
            samples.push_back(Sample { at, value });
        }

        let newest = samples.back().map(|s| s.at).unwrap_or(at);
        let horizon = newest - self.config.retention;
        while samples.front().is_some_and(|s| s.at < horizon) {
            samples.pop_front();
        }
        while samples.len() > self.config.max_samples_per_key {
            samples.pop_front();
        }
    }

    /// Samples for `key` with `timestamp >= now - window`
    fn window(&self, key: &str, window: Duration, now: DateTime<Utc>) -> Vec<Sample> {
        let cutoff = now - window;
        let state = self.state.read().unwrap();
        state
            .series
            .get(key)
            .map(|samples| samples.iter().filter(|s| s.at >= cutoff && s.at <= now).copied().collect())
            .unwrap_or_default()
    }

    /// Arithmetic mean over the window; `None` when the window is empty
    #[must_use]
    pub fn avg_in_window(&self, key: &str, window: Duration, now: DateTime<Utc>) -> Option<f64> {
        let samples = self.window(key, window, now);
        if samples.is_empty() {
            return None;
        }
        #[allow(clippy::cast_precision_loss)]
        let count = samples.len() as f64;
        Some(samples.iter().map(|s| s.value).sum::<f64>() / count)
    }

    /// Maximum over the window; `None` when the window is empty
    #[must_use]
    pub fn max_in_window(&self, key: &str, window: Duration, now: DateTime<Utc>) -> Option<f64> {
        self.window(key, window, now)
            .iter()
            .map(|s| s.value)
            .fold(None, |acc, v| Some(acc.map_or(v, |a: f64| a.max(v))))
    }

    /// Minimum over the window; `None` when the window is empty
    #[must_use]
    pub fn min_in_window(&self, key: &str, window: Duration, now: DateTime<Utc>) -> Option<f64> {
        self.window(key, window, now)
            .iter()
            .map(|s| s.value)
            .fold(None, |acc, v| Some(acc.map_or(v, |a: f64| a.min(v))))
    }

    /// Sample count over the window; `None` when the window is empty so
    /// callers can tell "no data" apart from "data equals zero"
    #[must_use]
    pub fn count_in_window(&self, key: &str, window: Duration, now: DateTime<Utc>) -> Option<i64> {
        let samples = self.window(key, window, now);
        if samples.is_empty() {
            None
        } else {
            Some(samples.len() as i64)
        }
    }

    /// True iff the window is non-empty, every sample satisfies the
    /// comparison, and the earliest sample is at or before `now - window`
    /// (the data actually spans the requested duration)
    #[must_use]
    pub fn sustained(
        &self,
        key: &str,
        threshold: f64,
        window: Duration,
        cmp: SustainedCmp,
        now: DateTime<Utc>,
    ) -> bool {
        let samples = self.window(key, window, now);
        let Some(first) = samples.first() else {
            return false;
        };
        if first.at > now - window {
            return false;
        }
        samples.iter().all(|s| match cmp {
            SustainedCmp::Above => s.value > threshold,
            SustainedCmp::Below => s.value < threshold,
        })
    }

    /// Store a fact with an explicit expiration
    pub fn set_ttl_fact(&self, key: &str, value: Value, ttl: Duration, now: DateTime<Utc>) {
        let mut state = self.state.write().unwrap();
        state.ttl_facts.insert(key.to_string(), (value, now + ttl));
    }

    /// Read a TTL fact; `None` once expired
    #[must_use]
    pub fn ttl_fact(&self, key: &str, now: DateTime<Utc>) -> Option<Value> {
        let state = self.state.read().unwrap();
        state.ttl_facts.get(key).and_then(|(value, expires_at)| {
            if now > *expires_at {
                None
            } else {
                Some(value.clone())
            }
        })
    }

    /// Whether a live TTL fact exists for `key`
    #[must_use]
    pub fn has_ttl_fact(&self, key: &str, now: DateTime<Utc>) -> bool {
        self.ttl_fact(key, now).is_some()
    }

    /// Drop expired TTL facts and empty series; returns removed TTL count
    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let mut state = self.state.write().unwrap();
        let before = state.ttl_facts.len();
        state.ttl_facts.retain(|_, (_, expires_at)| now <= *expires_at);
        let removed = before - state.ttl_facts.len();
        state.series.retain(|_, samples| !samples.is_empty());
        removed
    }

    /// Storage statistics
    #[must_use]
    pub fn stats(&self) -> TemporalStats {
        let state = self.state.read().unwrap();
        TemporalStats {
            series_keys: state.series.len(),
            total_samples: state.series.values().map(VecDeque::len).sum(),
            ttl_facts: state.ttl_facts.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn base_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_window_aggregates() {
        let store = TemporalStore::new();
        let t0 = base_time();

        for i in 0..5 {
            store.record("cpu", 80.0 + f64::from(i), t0 + Duration::seconds(i64::from(i) * 10));
        }
        let now = t0 + Duration::seconds(40);

        assert_eq!(store.count_in_window("cpu", Duration::seconds(60), now), Some(5));
        assert_eq!(store.avg_in_window("cpu", Duration::seconds(60), now), Some(82.0));
        assert_eq!(store.max_in_window("cpu", Duration::seconds(60), now), Some(84.0));
        assert_eq!(store.min_in_window("cpu", Duration::seconds(60), now), Some(80.0));

        // Narrow window only sees the last two samples
        assert_eq!(store.count_in_window("cpu", Duration::seconds(10), now), Some(2));
    }

    #[test]
    fn test_empty_window_is_none_not_zero() {
        let store = TemporalStore::new();
        let now = base_time();

        assert_eq!(store.avg_in_window("missing", Duration::seconds(60), now), None);
        assert_eq!(store.count_in_window("missing", Duration::seconds(60), now), None);

        // Data exists but outside the window
        store.record("cpu", 50.0, now - Duration::seconds(300));
        assert_eq!(store.avg_in_window("cpu", Duration::seconds(60), now), None);
    }

    #[test]
    fn test_sustained_requires_full_span() {
        let store = TemporalStore::new();
        let t0 = base_time();

        // 20 samples of 95, 30s apart, spanning 570s
        for i in 0..20 {
            store.record("cpu", 95.0, t0 + Duration::seconds(i * 30));
        }
        let now = t0 + Duration::seconds(600);

        assert!(store.sustained("cpu", 90.0, Duration::seconds(600), SustainedCmp::Above, now));
        assert!(!store.sustained("cpu", 96.0, Duration::seconds(600), SustainedCmp::Above, now));
        assert!(store.sustained("cpu", 96.0, Duration::seconds(600), SustainedCmp::Below, now));

        // Data covering only half the window does not count as sustained
        assert!(!store.sustained(
            "cpu",
            90.0,
            Duration::seconds(1800),
            SustainedCmp::Above,
            now
        ));
    }

    #[test]
    fn test_sustained_empty_window_is_false() {
        let store = TemporalStore::new();
        assert!(!store.sustained(
            "nothing",
            0.0,
            Duration::seconds(60),
            SustainedCmp::Above,
            base_time()
        ));
    }

    #[test]
    fn test_retention_eviction() {
        let store = TemporalStore::with_config(TemporalConfig {
            retention: Duration::seconds(100),
            max_samples_per_key: 10_000,
        });
        let t0 = base_time();

        store.record("m", 1.0, t0);
        store.record("m", 2.0, t0 + Duration::seconds(200));

        // The first sample fell past the horizon when the second arrived
        let now = t0 + Duration::seconds(200);
        assert_eq!(store.count_in_window("m", Duration::seconds(1000), now), Some(1));
    }

    #[test]
    fn test_count_cap_eviction() {
        let store = TemporalStore::with_config(TemporalConfig {
            retention: Duration::seconds(86_400),
            max_samples_per_key: 3,
        });
        let t0 = base_time();

        for i in 0..5 {
            store.record("m", f64::from(i), t0 + Duration::seconds(i64::from(i)));
        }
        let now = t0 + Duration::seconds(10);
        assert_eq!(store.count_in_window("m", Duration::seconds(3600), now), Some(3));
        assert_eq!(store.min_in_window("m", Duration::seconds(3600), now), Some(2.0));
    }

    #[test]
    fn test_out_of_order_samples_stay_sorted() {
        let store = TemporalStore::new();
        let t0 = base_time();

        store.record("m", 2.0, t0 + Duration::seconds(20));
        store.record("m", 1.0, t0 + Duration::seconds(10));

        let now = t0 + Duration::seconds(30);
        // min over the narrow window proves the late sample landed in order
        assert_eq!(store.count_in_window("m", Duration::seconds(15), now), Some(1));
        assert_eq!(store.min_in_window("m", Duration::seconds(25), now), Some(1.0));
    }

    #[test]
    fn test_ttl_facts_expire() {
        let store = TemporalStore::new();
        let t0 = base_time();

        store.set_ttl_fact("session", Value::String("abc".into()), Duration::seconds(60), t0);
        assert_eq!(
            store.ttl_fact("session", t0 + Duration::seconds(30)),
            Some(Value::String("abc".into()))
        );
        assert!(store.has_ttl_fact("session", t0 + Duration::seconds(60)));
        assert_eq!(store.ttl_fact("session", t0 + Duration::seconds(61)), None);
        assert!(!store.has_ttl_fact("session", t0 + Duration::seconds(61)));

        assert_eq!(store.purge_expired(t0 + Duration::seconds(61)), 1);
        assert_eq!(store.stats().ttl_facts, 0);
    }
}
