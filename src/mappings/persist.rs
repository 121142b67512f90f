//! The set of stores shared by one run and its on-disk form.
//!
//! A mapping file is one JSON object per category:
//!
//! ```json
//! {
//!   "hostname_map": { "host1.example.com": "obfuscatedhost0.obfuscateddomain0.com" },
//!   "ip_map": { "192.168.1.5": "100.0.0.1" }
//! }
//! ```
//!
//! Loading skips bad records one at a time.

use super::{Category, HostnameGenerator, IpGenerator, MacGenerator, MappingStore, WordGenerator};
use crate::error::{CleanerError, Result};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Outcome of loading a mapping file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadSummary {
    pub loaded: usize,
    pub skipped: usize,
}

/// One store per category, shared by every archive of a run.
#[derive(Debug, Clone)]
pub struct MappingSet {
    pub hostname: Arc<MappingStore>,
    pub ip: Arc<MappingStore>,
    pub mac: Arc<MappingStore>,
    pub keyword: Arc<MappingStore>,
    pub username: Arc<MappingStore>,
}

impl Default for MappingSet {
    fn default() -> Self {
        Self::new::<&str>(&[])
    }
}

impl MappingSet {
    pub fn new<S: AsRef<str>>(domains: &[S]) -> Self {
        Self {
            hostname: Arc::new(MappingStore::new(
                Category::Hostname,
                Box::new(HostnameGenerator::new(domains)),
            )),
            ip: Arc::new(MappingStore::new(Category::Ip, Box::new(IpGenerator::new()))),
            mac: Arc::new(MappingStore::new(Category::Mac, Box::new(MacGenerator::new()))),
            keyword: Arc::new(MappingStore::new(
                Category::Keyword,
                Box::new(WordGenerator::keyword()),
            )),
            username: Arc::new(MappingStore::new(
                Category::Username,
                Box::new(WordGenerator::username()),
            )),
        }
    }

    pub fn store(&self, category: Category) -> &Arc<MappingStore> {
        match category {
            Category::Hostname => &self.hostname,
            Category::Ip => &self.ip,
            Category::Mac => &self.mac,
            Category::Keyword => &self.keyword,
            Category::Username => &self.username,
        }
    }

    /// Seed the stores from a JSON document.
    ///
    /// Only a document that is not a JSON object fails; every bad record is
    /// logged and skipped.
    pub fn load_json(&self, json: &str) -> Result<LoadSummary> {
        let root: Value = serde_json::from_str(json)?;
        let Value::Object(root) = root else {
            return Err(CleanerError::InvalidConfig(
                "mapping file must contain a JSON object".to_string(),
            ));
        };

        let mut summary = LoadSummary::default();
        for category in Category::ALL {
            let Some(section) = root.get(category.map_key()) else {
                continue;
            };
            let Value::Object(section) = section else {
                warn!(category = %category, "Mapping section is not an object, skipping");
                summary.skipped += 1;
                continue;
            };
            let store = self.store(category);
            for (real, value) in section {
                let outcome = match value.as_str() {
                    Some(synthetic) => store.insert_known(real, synthetic),
                    None => Err(CleanerError::MappingLoad {
                        category: category.to_string(),
                        real: real.clone(),
                        reason: "value is not a string".to_string(),
                    }),
                };
                match outcome {
                    Ok(()) => summary.loaded += 1,
                    Err(e) => {
                        warn!(error = %e, "Skipping mapping record");
                        summary.skipped += 1;
                    }
                }
            }
        }
        for key in root.keys() {
            if !Category::ALL.iter().any(|c| c.map_key() == key) {
                debug!(key = %key, "Ignoring unknown mapping section");
            }
        }
        Ok(summary)
    }

    /// Seed the stores from a mapping file. A missing file is not an error.
    pub fn load_file<P: AsRef<Path>>(&self, path: P) -> Result<LoadSummary> {
        let path = path.as_ref();
        if !path.exists() {
            debug!(path = %path.display(), "No mapping file to load");
            return Ok(LoadSummary::default());
        }
        let data = std::fs::read_to_string(path)?;
        let summary = self.load_json(&data)?;
        info!(
            path = %path.display(),
            loaded = summary.loaded,
            skipped = summary.skipped,
            "Loaded mapping file"
        );
        Ok(summary)
    }

    /// All pairs keyed by map-file section.
    pub fn to_map(&self) -> BTreeMap<&'static str, BTreeMap<String, String>> {
        Category::ALL
            .iter()
            .map(|c| (c.map_key(), self.store(*c).entries()))
            .collect()
    }

    pub fn to_json(&self) -> Result<String> {
        let mut root = Map::new();
        for (key, entries) in self.to_map() {
            let section: Map<String, Value> = entries
                .into_iter()
                .map(|(k, v)| (k, Value::String(v)))
                .collect();
            root.insert(key.to_string(), Value::Object(section));
        }
        Ok(serde_json::to_string_pretty(&Value::Object(root))?)
    }

    /// Write every mapping to `path`, replacing it atomically.
    pub fn write_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(self.to_json()?.as_bytes())?;
        tmp.write_all(b"\n")?;
        tmp.persist(path).map_err(|e| CleanerError::Io(e.error))?;
        info!(path = %path.display(), "Wrote mapping file");
        Ok(())
    }
}
