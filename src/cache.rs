//! TTL + LRU response cache
//!
//! Keys are namespaced as `tool:project:argshash` so invalidation after a
//! write is a scan over one project's namespace instead of a substring match
//! across unrelated entries. Expiry is checked lazily on access; there is no
//! background sweep.

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, VecDeque};
use std::hash::{Hash, Hasher};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::Value;

struct CacheEntry<V> {
    value: V,
    stored_at: Instant,
    access_count: u64,
}

/// Cache counters, snapshot via [`ResponseCache::stats`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub size: usize,
    pub evictions: u64,
}

/// Bounded key/value cache where re-insertion order defines recency.
///
/// `get` treats entries older than the TTL as absent and removes them; a live
/// hit moves the entry to the most-recently-used position. Inserting a new
/// key at capacity evicts the single least-recently-used entry.
pub struct ResponseCache<V> {
    max_size: usize,
    ttl: Duration,
    entries: HashMap<String, CacheEntry<V>>,
    // Front is least recently used, back is most recently used.
    recency: VecDeque<String>,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl<V: Clone> ResponseCache<V> {
    pub fn new(max_size: usize, ttl: Duration) -> Self {
        Self {
            max_size,
            ttl,
            entries: HashMap::new(),
            recency: VecDeque::new(),
            hits: 0,
            misses: 0,
            evictions: 0,
        }
    }

    pub fn get(&mut self, key: &str) -> Option<V> {
        match self.entries.get_mut(key) {
            None => {
                self.misses += 1;
                None
            }
            Some(entry) if entry.stored_at.elapsed() > self.ttl => {
                self.remove(key);
                self.misses += 1;
                None
            }
            Some(entry) => {
                entry.access_count += 1;
                let value = entry.value.clone();
                self.hits += 1;
                self.touch(key);
                Some(value)
            }
        }
    }

    pub fn set(&mut self, key: impl Into<String>, value: V) {
        if self.max_size == 0 {
            return;
        }
        let key = key.into();
        let is_new = !self.entries.contains_key(&key);

        if is_new && self.entries.len() >= self.max_size {
            if let Some(oldest) = self.recency.pop_front() {
                self.entries.remove(&oldest);
                self.evictions += 1;
            }
        }

        self.entries.insert(
            key.clone(),
            CacheEntry {
                value,
                stored_at: Instant::now(),
                access_count: 0,
            },
        );
        if !is_new {
            self.recency.retain(|k| k != &key);
        }
        self.recency.push_back(key);
    }

    /// Existence probe. Removes a genuinely expired entry so `size` stays
    /// accurate but touches neither the hit/miss counters nor recency.
    pub fn has(&mut self, key: &str) -> bool {
        match self.entries.get(key) {
            None => false,
            Some(entry) if entry.stored_at.elapsed() > self.ttl => {
                self.remove(key);
                false
            }
            Some(_) => true,
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.recency.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits,
            misses: self.misses,
            size: self.entries.len(),
            evictions: self.evictions,
        }
    }

    /// Hit rate as a percentage; 0 when no lookups have happened.
    pub fn hit_rate(&self) -> f64 {
        let lookups = self.hits + self.misses;
        if lookups == 0 {
            return 0.0;
        }
        self.hits as f64 / lookups as f64 * 100.0
    }

    /// Remove every entry belonging to the given project namespace.
    /// Returns how many entries were dropped.
    pub fn invalidate_project(&mut self, project: &str) -> usize {
        let doomed: Vec<String> = self
            .entries
            .keys()
            .filter(|key| key_project(key) == Some(project))
            .cloned()
            .collect();
        for key in &doomed {
            self.remove(key);
        }
        doomed.len()
    }

    fn remove(&mut self, key: &str) {
        self.entries.remove(key);
        self.recency.retain(|k| k != key);
    }

    fn touch(&mut self, key: &str) {
        self.recency.retain(|k| k != key);
        self.recency.push_back(key.to_string());
    }
}

/// Build a namespaced cache key: `tool:project:argshash`.
///
/// The args hash is taken over the canonical JSON serialization, so two
/// logically equal argument objects produce the same key.
pub fn make_key(tool: &str, project: &str, args: &Value) -> String {
    let serialized = args.to_string();
    let mut hasher = DefaultHasher::new();
    serialized.hash(&mut hasher);
    format!("{}:{}:{:x}", tool, project, hasher.finish())
}

// The project segment sits between the first and last colon; tools and
// hashes never contain one, project names might.
fn key_project(key: &str) -> Option<&str> {
    let first = key.find(':')?;
    let last = key.rfind(':')?;
    if last <= first {
        return None;
    }
    Some(&key[first + 1..last])
}
