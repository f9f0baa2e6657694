//! The in-process TTL cache (C5, first half). Last-writer-wins, never authoritative (spec.md §5).

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use regex::Regex;

/// `get/set/delete/exists/mget/mset/mdel/keys/expire/ttl/stats/clear/health/close` (spec.md §4.5).
pub struct Cache {
    inner: Mutex<Inner>,
    default_ttl: Duration,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<String, Entry>,
    hits: u64,
    misses: u64,
    closed: bool,
}

struct Entry {
    value: serde_json::Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.map_or(false, |exp| now >= exp)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub live_keys: u64,
}

impl CacheStats {
    /// Zero when there have been no requests at all (spec.md §4.5 "stats()").
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

impl Cache {
    pub fn new(default_ttl: Duration) -> Self {
        Self { inner: Mutex::new(Inner::default()), default_ttl }
    }

    fn sweep_locked(inner: &mut Inner, now: Instant) {
        inner.entries.retain(|_, entry| !entry.is_expired(now));
    }

    #[tracing::instrument(skip_all, level = "trace", fields(key))]
    pub fn get(&self, key: &str) -> Option<serde_json::Value> {
        let mut inner = self.inner.lock().unwrap();
        let now = Instant::now();

        // Lazy expiry on read: an expired entry is treated as absent and removed.
        let expired = inner.entries.get(key).map_or(false, |e| e.is_expired(now));
        if expired {
            inner.entries.remove(key);
        }

        match inner.entries.get(key) {
            Some(entry) => {
                let value = entry.value.clone();
                inner.hits += 1;
                Some(value)
            }
            None => {
                inner.misses += 1;
                None
            }
        }
    }

    /// `ttl` of `Some(Duration::ZERO)` means "no expiry"; `None` uses the configured default.
    #[tracing::instrument(skip_all, level = "trace")]
    pub fn set(&self, key: impl Into<String>, value: serde_json::Value, ttl: Option<Duration>) {
        let mut inner = self.inner.lock().unwrap();
        let ttl = ttl.unwrap_or(self.default_ttl);
        let expires_at = if ttl.is_zero() { None } else { Some(Instant::now() + ttl) };
        inner.entries.insert(key.into(), Entry { value, expires_at });
    }

    #[tracing::instrument(skip_all, level = "trace", fields(key))]
    pub fn delete(&self, key: &str) -> bool {
        self.inner.lock().unwrap().entries.remove(key).is_some()
    }

    pub fn exists(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn mget(&self, keys: &[String]) -> Vec<Option<serde_json::Value>> {
        keys.iter().map(|k| self.get(k)).collect()
    }

    pub fn mset(&self, entries: Vec<(String, serde_json::Value, Option<Duration>)>) {
        for (key, value, ttl) in entries {
            self.set(key, value, ttl);
        }
    }

    pub fn mdel(&self, keys: &[String]) -> u64 {
        keys.iter().filter(|k| self.delete(k)).count() as u64
    }

    /// Glob (`*` wildcard) match over the live key set, compiled to a regex (spec.md §4.5 "keys()").
    pub fn keys(&self, pattern: &str) -> Vec<String> {
        let mut inner = self.inner.lock().unwrap();
        Self::sweep_locked(&mut inner, Instant::now());

        let regex_source = format!("^{}$", regex::escape(pattern).replace("\\*", ".*"));
        let regex = Regex::new(&regex_source).expect("glob pattern always compiles to a valid regex");

        inner.entries.keys().filter(|k| regex.is_match(k)).cloned().collect()
    }

    pub fn expire(&self, key: &str, ttl: Duration) -> bool {
        let mut inner = self.inner.lock().unwrap();
        match inner.entries.get_mut(key) {
            Some(entry) => {
                entry.expires_at = if ttl.is_zero() { None } else { Some(Instant::now() + ttl) };
                true
            }
            None => false,
        }
    }

    /// `-2` if absent, `-1` if present with no expiry, else seconds remaining, rounded up, never negative.
    pub fn ttl(&self, key: &str) -> i64 {
        let mut inner = self.inner.lock().unwrap();
        let now = Instant::now();

        let expired = inner.entries.get(key).map_or(false, |e| e.is_expired(now));
        if expired {
            inner.entries.remove(key);
            return -2;
        }

        match inner.entries.get(key) {
            None => -2,
            Some(Entry { expires_at: None, .. }) => -1,
            Some(Entry { expires_at: Some(exp), .. }) => {
                let remaining = exp.saturating_duration_since(now);
                let seconds = remaining.as_secs_f64().ceil() as i64;
                seconds.max(0)
            }
        }
    }

    pub fn stats(&self) -> CacheStats {
        let mut inner = self.inner.lock().unwrap();
        Self::sweep_locked(&mut inner, Instant::now());
        CacheStats { hits: inner.hits, misses: inner.misses, live_keys: inner.entries.len() as u64 }
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.entries.clear();
        inner.hits = 0;
        inner.misses = 0;
    }

    /// `false` once [`Self::close`] has been called, or degraded if poisoned;
    /// a failing cache degrades the service, it doesn't take it down
    /// (spec.md §5 "Failure isolation").
    pub fn health(&self) -> bool {
        match self.inner.lock() {
            Ok(inner) => !inner.closed,
            Err(_) => false,
        }
    }

    pub fn close(&self) {
        self.inner.lock().unwrap().closed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ttl_is_within_one_second_of_what_was_set() {
        let cache = Cache::new(Duration::from_secs(60));
        cache.set("k", json!("v"), Some(Duration::from_secs(5)));
        let ttl = cache.ttl("k");
        assert!((4..=5).contains(&ttl), "ttl was {ttl}");
    }

    #[test]
    fn zero_ttl_means_no_expiry() {
        let cache = Cache::new(Duration::from_secs(60));
        cache.set("k", json!("v"), Some(Duration::ZERO));
        assert_eq!(cache.ttl("k"), -1);
    }

    #[test]
    fn expired_entries_return_null_and_ttl_negative_two() {
        let cache = Cache::new(Duration::from_secs(60));
        cache.set("k", json!("v"), Some(Duration::from_millis(1)));
        std::thread::sleep(Duration::from_millis(20));

        assert_eq!(cache.get("k"), None);
        assert_eq!(cache.ttl("k"), -2);
    }

    #[test]
    fn stats_track_hits_and_misses() {
        let cache = Cache::new(Duration::from_secs(60));
        cache.set("k", json!("v"), Some(Duration::from_millis(1)));
        assert_eq!(cache.get("k"), Some(json!("v")));
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(cache.get("k"), None);

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hit_rate(), 0.5);
    }

    #[test]
    fn hit_rate_is_zero_with_no_requests() {
        let cache = Cache::new(Duration::from_secs(60));
        assert_eq!(cache.stats().hit_rate(), 0.0);
    }

    #[test]
    fn keys_glob_matches_prefix_wildcard() {
        let cache = Cache::new(Duration::from_secs(60));
        cache.set("policy:org:1", json!("a"), None);
        cache.set("policy:org:2", json!("b"), None);
        cache.set("session:1", json!("c"), None);

        let mut matched = cache.keys("policy:org:*");
        matched.sort();
        assert_eq!(matched, vec!["policy:org:1".to_string(), "policy:org:2".to_string()]);
    }

    #[test]
    fn absent_key_ttl_is_negative_two() {
        let cache = Cache::new(Duration::from_secs(60));
        assert_eq!(cache.ttl("missing"), -2);
    }
}
