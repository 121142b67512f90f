//! Configuration for a cleaning run.
//!
//! One master [`CleanerConfig`] groups the settings for archive handling,
//! parsers, mapping persistence, and execution. Every section has sensible
//! defaults so a partial JSON document is enough.

use crate::archive::CompressionMethod;
use crate::error::{CleanerError, Result};
use crate::parsers::ParserKind;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Master configuration for the cleaner.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CleanerConfig {
    /// Archive extraction and repacking.
    pub archive: ArchiveConfig,
    /// Parser selection and user supplied values.
    pub parsers: ParserConfig,
    /// Persisted mapping file handling.
    pub mapping: MappingConfig,
    /// Parallelism, timeouts, and privilege.
    pub execution: ExecutionConfig,
}

impl CleanerConfig {
    /// Load a configuration from a JSON file.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = std::fs::read_to_string(path.as_ref())?;
        let config: CleanerConfig = serde_json::from_str(&data)?;
        config.validate()?;
        Ok(config)
    }

    /// Check values that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.archive.compression_threads == 0 {
            return Err(CleanerError::InvalidConfig(
                "archive.compression_threads must be at least 1".to_string(),
            ));
        }
        if self.execution.archive_timeout_secs == 0 {
            return Err(CleanerError::InvalidConfig(
                "execution.archive_timeout_secs must be at least 1".to_string(),
            ));
        }
        for pattern in &self.archive.extra_skip_patterns {
            Regex::new(pattern).map_err(|e| CleanerError::InvalidPattern {
                pattern: pattern.clone(),
                message: e.to_string(),
            })?;
        }
        if self.mapping.write_map_file && self.mapping.map_file.is_none() {
            return Err(CleanerError::InvalidConfig(
                "mapping.write_map_file requires mapping.map_file".to_string(),
            ));
        }
        Ok(())
    }

    /// Scratch directory of the run.
    pub fn scratch_dir(&self) -> PathBuf {
        self.execution
            .scratch_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }

    /// True when the parser of this kind should run.
    pub fn parser_enabled(&self, kind: ParserKind) -> bool {
        !self.parsers.disabled.contains(&kind)
    }
}

/// Archive extraction and repacking configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ArchiveConfig {
    /// Worker threads for xz compression.
    pub compression_threads: u32,
    /// Method used to repack a build directory that had no compression.
    pub default_compression: CompressionMethod,
    /// Write a `<archive>.sha256` file next to each final archive.
    pub write_checksums: bool,
    /// Additional skip-list regexes, anchored at the start of the relative name.
    pub extra_skip_patterns: Vec<String>,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            compression_threads: 4,
            default_compression: CompressionMethod::Gzip,
            write_checksums: true,
            extra_skip_patterns: Vec::new(),
        }
    }
}

/// Parser configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ParserConfig {
    /// Domains whose hostnames are obfuscated.
    pub domains: Vec<String>,
    /// Literal keywords to obfuscate.
    pub keywords: Vec<String>,
    /// Usernames to obfuscate in addition to those found in lastlog output.
    pub usernames: Vec<String>,
    /// Parsers to leave out of the run.
    pub disabled: Vec<ParserKind>,
}

/// Mapping persistence configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MappingConfig {
    /// Mapping file loaded before the run, if it exists.
    pub map_file: Option<PathBuf>,
    /// Write every mapping back to `map_file` after the run.
    pub write_map_file: bool,
}

/// Execution configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Archives processed concurrently (0 = rayon default).
    pub jobs: usize,
    /// Upper bound for the isolated extraction of one archive.
    pub archive_timeout_secs: u64,
    /// Running with full filesystem privilege; skips the permission pass.
    pub privileged: bool,
    /// Working directory for extraction and output; the system temp
    /// directory when unset.
    pub scratch_dir: Option<PathBuf>,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            jobs: 0,
            archive_timeout_secs: crate::timeout::DEFAULT_TIMEOUT_SECONDS,
            privileged: false,
            scratch_dir: None,
        }
    }
}
