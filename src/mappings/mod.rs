//! Per-category mapping stores.
//!
//! A [`MappingStore`] owns every real → synthetic pair of one category for
//! the lifetime of a run. New synthetic values come from a category
//! [`Generator`]; the store guarantees the mapping stays functional and
//! injective, and that a synthetic value is never mapped again.

pub mod hostname;
pub mod ip;
pub mod mac;
pub mod persist;
pub mod word;

pub use hostname::HostnameGenerator;
pub use ip::IpGenerator;
pub use mac::MacGenerator;
pub use persist::MappingSet;
pub use word::WordGenerator;

use crate::error::{CleanerError, Result};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Mutex, MutexGuard};
use tracing::trace;

/// Candidates tried before a store gives up on producing a fresh value.
const MAX_GENERATION_ATTEMPTS: u32 = 64;

/// Token categories, each with its own store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Hostname,
    Ip,
    Mac,
    Keyword,
    Username,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::Hostname,
        Category::Ip,
        Category::Mac,
        Category::Keyword,
        Category::Username,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Hostname => "hostname",
            Category::Ip => "ip",
            Category::Mac => "mac",
            Category::Keyword => "keyword",
            Category::Username => "username",
        }
    }

    /// Key of this category inside a persisted mapping file.
    pub fn map_key(&self) -> &'static str {
        match self {
            Category::Hostname => "hostname_map",
            Category::Ip => "ip_map",
            Category::Mac => "mac_map",
            Category::Keyword => "keyword_map",
            Category::Username => "username_map",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Category specific synthetic value generation.
///
/// All methods run with the owning store locked, so implementations may keep
/// plain mutable counters.
pub trait Generator: Send {
    /// Values returned unchanged and never recorded.
    fn ignore(&self, _item: &str) -> bool {
        false
    }

    /// Canonical lookup key for a raw token.
    fn normalize(&self, item: &str) -> String {
        item.to_string()
    }

    /// Produce a candidate for `key`. `attempt` counts previous candidates
    /// rejected as already in use. `None` means the value space is exhausted.
    fn generate(&mut self, key: &str, attempt: u32) -> Option<String>;

    /// Record a pair loaded from a persisted mapping so later candidates
    /// never repeat it.
    fn observe(&mut self, _key: &str, _synthetic: &str) {}

    /// Whether a persisted pair is well formed for this category.
    fn accepts(&self, _key: &str, _synthetic: &str) -> bool {
        true
    }

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

struct StoreInner {
    forward: BTreeMap<String, String>,
    reverse: HashMap<String, String>,
    generator: Box<dyn Generator>,
}

/// Thread-safe bidirectional table for one category.
pub struct MappingStore {
    category: Category,
    inner: Mutex<StoreInner>,
}

impl fmt::Debug for MappingStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MappingStore")
            .field("category", &self.category)
            .field("entries", &self.len())
            .finish()
    }
}

impl MappingStore {
    pub fn new(category: Category, generator: Box<dyn Generator>) -> Self {
        Self {
            category,
            inner: Mutex::new(StoreInner {
                forward: BTreeMap::new(),
                reverse: HashMap::new(),
                generator,
            }),
        }
    }

    pub fn category(&self) -> Category {
        self.category
    }

    fn lock(&self) -> MutexGuard<'_, StoreInner> {
        // A panic while holding the lock cannot leave the maps half-updated:
        // both are written after the candidate is final.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Return the synthetic value for `real`, creating one if needed.
    ///
    /// Ignored values and values that are already synthetic come back
    /// unchanged. Check and insert happen under one lock.
    pub fn get_or_create(&self, real: &str) -> Result<String> {
        let mut inner = self.lock();
        if inner.generator.ignore(real) {
            return Ok(real.to_string());
        }
        let key = inner.generator.normalize(real);
        if let Some(existing) = inner.forward.get(&key) {
            return Ok(existing.clone());
        }
        if inner.reverse.contains_key(&key) {
            return Ok(real.to_string());
        }

        for attempt in 0..MAX_GENERATION_ATTEMPTS {
            let candidate = match inner.generator.generate(&key, attempt) {
                Some(c) => c,
                None => break,
            };
            if candidate == key
                || inner.reverse.contains_key(&candidate)
                || inner.forward.contains_key(&candidate)
            {
                trace!(category = %self.category, attempt, "Synthetic candidate already in use");
                continue;
            }
            inner.reverse.insert(candidate.clone(), key.clone());
            inner.forward.insert(key, candidate.clone());
            return Ok(candidate);
        }

        Err(CleanerError::MappingExhausted {
            category: self.category.to_string(),
        })
    }

    /// Look up an existing mapping without creating one.
    pub fn get(&self, real: &str) -> Option<String> {
        let inner = self.lock();
        let key = inner.generator.normalize(real);
        inner.forward.get(&key).cloned()
    }

    /// True if `value` was produced by this store.
    pub fn is_synthetic(&self, value: &str) -> bool {
        let inner = self.lock();
        if inner.reverse.contains_key(value) {
            return true;
        }
        let key = inner.generator.normalize(value);
        inner.reverse.contains_key(&key)
    }

    /// Insert a pair coming from a persisted mapping file.
    pub fn insert_known(&self, real: &str, synthetic: &str) -> Result<()> {
        let mut inner = self.lock();
        let reject = |reason: &str| CleanerError::MappingLoad {
            category: self.category.to_string(),
            real: real.to_string(),
            reason: reason.to_string(),
        };

        if real.is_empty() || synthetic.is_empty() {
            return Err(reject("empty value"));
        }
        let key = inner.generator.normalize(real);
        if !inner.generator.accepts(&key, synthetic) {
            return Err(reject("malformed synthetic value"));
        }
        match inner.forward.get(&key) {
            Some(existing) if existing == synthetic => return Ok(()),
            Some(_) => return Err(reject("conflicts with an existing mapping")),
            None => {}
        }
        if inner.reverse.contains_key(synthetic) || inner.forward.contains_key(synthetic) {
            return Err(reject("synthetic value already assigned"));
        }

        inner.generator.observe(&key, synthetic);
        inner.reverse.insert(synthetic.to_string(), key.clone());
        inner.forward.insert(key, synthetic.to_string());
        Ok(())
    }

    /// Snapshot of every pair, ordered by real value.
    pub fn entries(&self) -> BTreeMap<String, String> {
        self.lock().forward.clone()
    }

    /// Snapshot of the real values, longest first.
    pub fn real_values(&self) -> Vec<String> {
        let mut values: Vec<String> = self.lock().forward.keys().cloned().collect();
        values.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        values
    }

    pub fn len(&self) -> usize {
        self.lock().forward.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run `f` against the concrete generator, if it is a `G`.
    pub fn with_generator<G: Generator + 'static, R>(&self, f: impl FnOnce(&mut G) -> R) -> Option<R> {
        let mut inner = self.lock();
        inner.generator.as_any_mut().downcast_mut::<G>().map(f)
    }
}
