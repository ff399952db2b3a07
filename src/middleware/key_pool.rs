// API key pool with limit tracking and rotation
//
// Tracks per-key usage and quota state and selects the key the next
// attempt should use.

use parking_lot::Mutex;
use rand::seq::SliceRandom;
use serde::Serialize;
use tracing::{debug, info, warn};

/// How the pool picks the next key after the active one is limited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationPolicy {
    /// Circular scan from the position after the current key, skipping
    /// limited keys. The default: predictable and cheap.
    RoundRobin,
    /// Among non-limited keys, the one with the fewest errors (usage count
    /// breaks ties, remaining ties broken randomly). Avoids herding onto
    /// one key early in a run.
    LeastUsed,
}

impl RotationPolicy {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "round-robin" | "round_robin" => Some(Self::RoundRobin),
            "least-used" | "least_used" => Some(Self::LeastUsed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
struct Key {
    key: String,
    usage_count: u64,
    error_count: u64,
    limited: bool,
}

impl Key {
    fn new(key: String) -> Self {
        Self {
            key,
            usage_count: 0,
            error_count: 0,
            limited: false,
        }
    }
}

/// Per-key counters exposed through the health endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct KeyStats {
    pub index: usize,
    pub usage_count: u64,
    pub error_count: u64,
    pub limited: bool,
}

/// Pool of API keys shared by all attempts of a scan run.
///
/// A single mutex guards selection state so check-then-mark sequences are
/// atomic: two concurrent callers can never both conclude the pool is
/// exhausted while a reset was freeing keys in between.
pub struct KeyPool {
    inner: Mutex<PoolInner>,
    policy: RotationPolicy,
}

struct PoolInner {
    keys: Vec<Key>,
    current: usize,
}

impl KeyPool {
    pub fn new(keys: Vec<String>, policy: RotationPolicy) -> Self {
        Self {
            inner: Mutex::new(PoolInner {
                keys: keys.into_iter().map(Key::new).collect(),
                current: 0,
            }),
            policy,
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The key the next attempt should use; stable until rotated.
    pub fn current(&self) -> Option<(usize, String)> {
        let inner = self.inner.lock();
        inner
            .keys
            .get(inner.current)
            .map(|k| (inner.current, k.key.clone()))
    }

    /// Selects the next usable key, or `None` when every key is limited.
    pub fn next(&self) -> Option<(usize, String)> {
        let mut inner = self.inner.lock();
        let selected = match self.policy {
            RotationPolicy::RoundRobin => {
                let len = inner.keys.len();
                (1..=len)
                    .map(|offset| (inner.current + offset) % len)
                    .find(|&idx| !inner.keys[idx].limited)
            }
            RotationPolicy::LeastUsed => {
                let candidates: Vec<usize> = inner
                    .keys
                    .iter()
                    .enumerate()
                    .filter(|(_, k)| !k.limited)
                    .map(|(idx, _)| idx)
                    .collect();
                let best = candidates
                    .iter()
                    .map(|&idx| (inner.keys[idx].error_count, inner.keys[idx].usage_count))
                    .min();
                best.and_then(|score| {
                    let tied: Vec<usize> = candidates
                        .into_iter()
                        .filter(|&idx| {
                            (inner.keys[idx].error_count, inner.keys[idx].usage_count) == score
                        })
                        .collect();
                    tied.choose(&mut rand::thread_rng()).copied()
                })
            }
        };

        match selected {
            Some(idx) => {
                inner.current = idx;
                debug!(
                    "Using API key {}/{}",
                    idx + 1,
                    inner.keys.len()
                );
                Some((idx, inner.keys[idx].key.clone()))
            }
            None => {
                warn!("No API keys available (all limited)");
                None
            }
        }
    }

    /// Flags a key as quota-limited. Idempotent.
    pub fn mark_limited(&self, index: usize) {
        let mut inner = self.inner.lock();
        if let Some(key) = inner.keys.get_mut(index) {
            if !key.limited {
                key.limited = true;
                warn!("API key {} marked as limited", index + 1);
            }
        }
    }

    /// Clears every limited flag and rewinds selection to the first key.
    /// Used only after a full-pool exhaustion.
    pub fn reset_all(&self) {
        let mut inner = self.inner.lock();
        for key in inner.keys.iter_mut() {
            key.limited = false;
        }
        inner.current = 0;
        info!("All API key limit flags reset");
    }

    /// Rewinds the pool to a clean ledger at the start of a scan run.
    pub fn reset_counters(&self) {
        let mut inner = self.inner.lock();
        for key in inner.keys.iter_mut() {
            key.usage_count = 0;
            key.error_count = 0;
            key.limited = false;
        }
        inner.current = 0;
    }

    pub fn record_usage(&self, index: usize) {
        let mut inner = self.inner.lock();
        if let Some(key) = inner.keys.get_mut(index) {
            key.usage_count += 1;
        }
    }

    pub fn record_error(&self, index: usize) {
        let mut inner = self.inner.lock();
        if let Some(key) = inner.keys.get_mut(index) {
            key.error_count += 1;
        }
    }

    pub fn stats(&self) -> Vec<KeyStats> {
        let inner = self.inner.lock();
        inner
            .keys
            .iter()
            .enumerate()
            .map(|(index, k)| KeyStats {
                index,
                usage_count: k.usage_count,
                error_count: k.error_count,
                limited: k.limited,
            })
            .collect()
    }
}
