//! One diagnostic bundle being cleaned.
//!
//! An [`ObfuscationArchive`] is either a compressed tarball that is unpacked
//! into a scratch directory, or an already expanded build directory that is
//! cleaned in place. Its lifecycle is
//! `Unextracted → Extracted → Compressed`; the top directory may be renamed
//! once while extracted.

pub mod compress;
pub mod detect;
pub mod extract;

use crate::error::{CleanerError, Result};
use crate::timeout::{run_isolated, TimeoutConfig, DEFAULT_TIMEOUT_SECONDS};
use detect::SourceFormat;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Paths never worth scanning, matched at the start of the relative name.
const SKIP_LIST: [&str; 7] = [
    "sosreport-",
    "sos_logs/",
    "sos_reports/",
    "sys/firmware",
    "sys/fs",
    "sys/kernel/debug",
    "sys/module",
];

/// File names that cannot be scrubbed reliably.
static OBVIOUS_REMOVES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:\.(?:gz|xz|bz2|bzip2|txz|tgz|zst|bin|journal)|\.tar(?:\..*)?|~)$")
        .expect("valid removal regex")
});

/// Bytes read by the text probe; one UTF-8 character at most.
const TEXT_PROBE_LEN: u64 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionMethod {
    Gzip,
    Xz,
}

impl CompressionMethod {
    pub fn extension(&self) -> &'static str {
        match self {
            CompressionMethod::Gzip => "gz",
            CompressionMethod::Xz => "xz",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveState {
    Unextracted,
    Extracted { renamed: bool },
    Compressed,
}

/// Knobs an archive takes from the run configuration.
#[derive(Debug, Clone)]
pub struct ArchiveOptions {
    /// Skip the owner permission pass after extraction.
    pub privileged: bool,
    pub timeout_secs: u64,
    pub compression_threads: u32,
    /// Extra skip-list patterns, anchored at the start of the name.
    pub extra_skip_patterns: Vec<Regex>,
}

impl Default for ArchiveOptions {
    fn default() -> Self {
        Self {
            privileged: false,
            timeout_secs: DEFAULT_TIMEOUT_SECONDS,
            compression_threads: 4,
            extra_skip_patterns: Vec::new(),
        }
    }
}

impl ArchiveOptions {
    pub fn from_config(config: &crate::config::CleanerConfig) -> Result<Self> {
        let extra_skip_patterns = config
            .archive
            .extra_skip_patterns
            .iter()
            .map(|p| {
                Regex::new(&format!("^(?:{p})")).map_err(|e| CleanerError::InvalidPattern {
                    pattern: p.clone(),
                    message: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            privileged: config.execution.privileged,
            timeout_secs: config.execution.archive_timeout_secs,
            compression_threads: config.archive.compression_threads,
            extra_skip_patterns,
        })
    }
}

/// Name of an archive as derived from its path: everything before `.tar`.
pub fn archive_name_of(path: &Path) -> String {
    let base = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned());
    match base.find(".tar") {
        Some(idx) if idx > 0 => base[..idx].to_string(),
        _ => base,
    }
}

#[derive(Debug)]
pub struct ObfuscationArchive {
    archive_path: PathBuf,
    scratch_dir: PathBuf,
    archive_name: String,
    format: SourceFormat,
    options: ArchiveOptions,
    state: ArchiveState,
    extracted_path: Option<PathBuf>,
    final_archive_path: Option<PathBuf>,
    final_checksum: Option<String>,
    file_sub_list: Vec<String>,
    total_sub_count: usize,
    removed_file_count: usize,
    warnings: Vec<String>,
}

impl ObfuscationArchive {
    pub fn new(
        archive_path: impl Into<PathBuf>,
        scratch_dir: impl Into<PathBuf>,
        options: ArchiveOptions,
    ) -> Self {
        let archive_path = archive_path.into();
        let format = detect::detect_path(&archive_path);
        let archive_name = archive_name_of(&archive_path);
        info!(archive = %archive_name, path = %archive_path.display(), "Loaded archive");
        Self {
            archive_path,
            scratch_dir: scratch_dir.into(),
            archive_name,
            format,
            options,
            state: ArchiveState::Unextracted,
            extracted_path: None,
            final_archive_path: None,
            final_checksum: None,
            file_sub_list: Vec::new(),
            total_sub_count: 0,
            removed_file_count: 0,
            warnings: Vec::new(),
        }
    }

    pub fn archive_path(&self) -> &Path {
        &self.archive_path
    }

    pub fn archive_name(&self) -> &str {
        &self.archive_name
    }

    pub fn state(&self) -> ArchiveState {
        self.state
    }

    pub fn is_tarball(&self) -> bool {
        self.format.is_tarball()
    }

    pub fn extracted_path(&self) -> Option<&Path> {
        self.extracted_path.as_deref()
    }

    pub fn final_archive_path(&self) -> Option<&Path> {
        self.final_archive_path.as_deref()
    }

    pub fn final_checksum(&self) -> Option<&str> {
        self.final_checksum.as_deref()
    }

    pub fn total_sub_count(&self) -> usize {
        self.total_sub_count
    }

    pub fn removed_file_count(&self) -> usize {
        self.removed_file_count
    }

    /// Files that had at least one substitution.
    pub fn file_sub_list(&self) -> &[String] {
        &self.file_sub_list
    }

    /// Advisories raised while processing, such as a failed cleanup.
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    fn root(&self) -> Result<&Path> {
        match (self.state, self.extracted_path.as_deref()) {
            (ArchiveState::Extracted { .. }, Some(root)) => Ok(root),
            _ => Err(CleanerError::InvalidState(format!(
                "{} is not extracted",
                self.archive_name
            ))),
        }
    }

    /// Unpack a tarball in an isolated worker, or adopt a build directory.
    pub fn extract(&mut self) -> Result<()> {
        if self.state != ArchiveState::Unextracted {
            return Err(CleanerError::InvalidState(format!(
                "{} was already extracted",
                self.archive_name
            )));
        }

        let root = if self.format.is_tarball() {
            info!(archive = %self.archive_name, "Extracting...");
            let source = self.archive_path.clone();
            let format = self.format;
            let dest = self.scratch_dir.join("cleaner");
            let fallback = self.archive_name.clone();
            let panic_path = source.clone();
            run_isolated(
                TimeoutConfig::new(self.options.timeout_secs, format!("extract {fallback}")),
                move |cancelled| extract::unpack_tarball(&source, format, &dest, &fallback, cancelled),
                move |message| CleanerError::Extraction {
                    path: panic_path,
                    message,
                },
            )?
        } else if self.archive_path.is_dir() {
            self.archive_path.clone()
        } else {
            let message = match self.format {
                SourceFormat::Unsupported(kind) => format!("unsupported compression: {kind}"),
                _ => "not a tar archive or directory".to_string(),
            };
            return Err(CleanerError::Extraction {
                path: self.archive_path.clone(),
                message,
            });
        };

        if let Some(name) = root.file_name() {
            self.archive_name = name.to_string_lossy().into_owned();
        }
        if !self.options.privileged {
            let adjusted = extract::grant_owner_access(&root);
            debug!(archive = %self.archive_name, adjusted, "Verified permissions of archive contents");
        }
        debug!(archive = %self.archive_name, path = %root.display(), "Extracted path");
        self.extracted_path = Some(root);
        self.state = ArchiveState::Extracted { renamed: false };
        Ok(())
    }

    /// Rename the extracted root to `new_name`. Allowed once.
    pub fn rename_top_dir(&mut self, new_name: &str) -> Result<()> {
        let root = self.root()?.to_path_buf();
        if self.state == (ArchiveState::Extracted { renamed: true }) {
            return Err(CleanerError::InvalidState(format!(
                "{} was already renamed",
                self.archive_name
            )));
        }
        if new_name.is_empty() || new_name.contains('/') {
            return Err(CleanerError::InvalidState(format!(
                "invalid top directory name '{new_name}'"
            )));
        }
        let target = root.with_file_name(new_name);
        if target != root {
            if fs::symlink_metadata(&target).is_ok() {
                return Err(CleanerError::InvalidState(format!(
                    "{} already exists",
                    target.display()
                )));
            }
            fs::rename(&root, &target)?;
        }
        debug!(from = %self.archive_name, to = %new_name, "Renamed top directory");
        self.archive_name = new_name.to_string();
        self.extracted_path = Some(target);
        self.state = ArchiveState::Extracted { renamed: true };
        Ok(())
    }

    /// Compression of the source, from its file name. `None` for a build
    /// directory.
    pub fn get_compression(&self) -> Option<CompressionMethod> {
        if !self.format.is_tarball() {
            return None;
        }
        if self.archive_path.to_string_lossy().ends_with("xz") {
            Some(CompressionMethod::Xz)
        } else {
            Some(CompressionMethod::Gzip)
        }
    }

    fn relative(root: &Path, path: &Path) -> Option<String> {
        let rel = path.strip_prefix(root).ok()?;
        let parts: Vec<String> = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        Some(if parts.is_empty() {
            ".".to_string()
        } else {
            parts.join("/")
        })
    }

    /// Every file, file symlink and directory symlink, walked afresh.
    pub fn get_file_list(&self) -> Result<Vec<String>> {
        let root = self.root()?;
        let mut files = Vec::new();
        for entry in WalkDir::new(root).follow_links(false).min_depth(1).sort_by_file_name() {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    debug!(error = %e, "Skipping unreadable entry");
                    continue;
                }
            };
            if entry.file_type().is_dir() {
                continue;
            }
            if let Some(rel) = Self::relative(root, entry.path()) {
                files.push(rel);
            }
        }
        Ok(files)
    }

    /// Every directory including the root (`.`), walked afresh.
    pub fn get_directory_list(&self) -> Result<Vec<String>> {
        let root = self.root()?;
        let mut dirs = Vec::new();
        for entry in WalkDir::new(root).follow_links(false).sort_by_file_name() {
            let Ok(entry) = entry else {
                continue;
            };
            if entry.file_type().is_dir() {
                if let Some(rel) = Self::relative(root, entry.path()) {
                    dirs.push(rel);
                }
            }
        }
        Ok(dirs)
    }

    /// Absolute path of `name` below the extracted root, if it exists.
    /// Broken symlinks exist.
    pub fn get_file_path(&self, name: &str) -> Option<PathBuf> {
        let root = self.root().ok()?;
        let path = root.join(name.trim_start_matches('/'));
        fs::symlink_metadata(&path).ok().map(|_| path)
    }

    pub fn should_skip_file(&self, name: &str) -> bool {
        let Some(path) = self.get_file_path(name) else {
            return true;
        };
        let Ok(meta) = fs::symlink_metadata(&path) else {
            return true;
        };
        if !(meta.is_file() || meta.file_type().is_symlink()) {
            return true;
        }
        let name = name.trim_start_matches('/');
        SKIP_LIST.iter().any(|s| name.starts_with(s))
            || self.options.extra_skip_patterns.iter().any(|re| re.is_match(name))
    }

    pub fn should_remove_file(&self, name: &str) -> bool {
        if OBVIOUS_REMOVES.is_match(name) {
            return true;
        }
        match self.get_file_path(name).and_then(|p| fs::metadata(p).ok()) {
            Some(meta) if meta.is_file() => self.file_is_binary(name),
            // directory symlinks and anything unreadable stay
            _ => false,
        }
    }

    /// Text probe on the first character. Content past it is not checked.
    pub fn file_is_binary(&self, name: &str) -> bool {
        let Some(path) = self.get_file_path(name) else {
            return false;
        };
        let Ok(file) = File::open(&path) else {
            return false;
        };
        let mut head = Vec::with_capacity(TEXT_PROBE_LEN as usize);
        if file.take(TEXT_PROBE_LEN).read_to_end(&mut head).is_err() {
            return false;
        }
        match std::str::from_utf8(&head) {
            Ok(_) => false,
            // a valid first character followed by a cut sequence is still text
            Err(e) => e.valid_up_to() == 0,
        }
    }

    /// Delete `name` and count it. Missing files are ignored.
    pub fn remove_file(&mut self, name: &str) -> Result<()> {
        let Some(path) = self.get_file_path(name) else {
            return Ok(());
        };
        info!(archive = %self.archive_name, file = %name, "Removing binary file from archive");
        match fs::remove_file(&path) {
            Ok(()) => {
                self.removed_file_count += 1;
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn update_sub_count(&mut self, name: &str, count: usize) {
        self.file_sub_list.push(name.to_string());
        self.total_sub_count += count;
    }

    /// Pack the extracted tree, checksum it and drop the working copy.
    ///
    /// Returns the path of the new archive.
    pub fn compress(&mut self, method: Option<CompressionMethod>) -> Result<PathBuf> {
        let root = self.root()?.to_path_buf();
        let output = compress::output_path(&root, method);
        compress::build_archive(
            &output,
            &root,
            &self.archive_name,
            method,
            self.options.compression_threads,
        )?;
        let checksum = compress::sha256_file(&output).map_err(|e| CleanerError::Recompression {
            path: output.clone(),
            message: e.to_string(),
        })?;
        debug!(archive = %self.archive_name, output = %output.display(), "Compressed");

        self.final_archive_path = Some(output.clone());
        self.final_checksum = Some(checksum);
        self.state = ArchiveState::Compressed;

        if let Err(e) = compress::remove_tree(&root) {
            warn!(archive = %self.archive_name, error = %e, "Failed to remove temporary extraction directory");
            self.warnings.push(e.to_string());
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_dir() -> (tempfile::TempDir, ObfuscationArchive) {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("sosreport-host1-2024");
        fs::create_dir_all(root.join("etc")).unwrap();
        fs::create_dir_all(root.join("sys/kernel/debug")).unwrap();
        fs::write(root.join("etc/hosts"), "192.168.1.5 host1\n").unwrap();
        fs::write(root.join("sys/kernel/debug/x"), "x").unwrap();
        fs::write(root.join("core.1234.bin"), "not opened").unwrap();
        fs::write(root.join("blob"), [0xC3u8, 0x28, 0x00, 0x01]).unwrap();
        let archive = ObfuscationArchive::new(&root, dir.path(), ArchiveOptions::default());
        (dir, archive)
    }

    #[test]
    fn test_archive_name_of() {
        assert_eq!(archive_name_of(Path::new("/a/host1.tar.xz")), "host1");
        assert_eq!(archive_name_of(Path::new("/a/sosreport-x.tar")), "sosreport-x");
        assert_eq!(archive_name_of(Path::new("/a/builddir")), "builddir");
    }

    #[test]
    fn test_operations_require_extraction() {
        let (_dir, mut archive) = build_dir();
        assert!(matches!(archive.get_file_list(), Err(CleanerError::InvalidState(_))));
        assert!(archive.rename_top_dir("x").is_err());
        assert!(archive.compress(None).is_err());
        assert!(archive.get_file_path("etc/hosts").is_none());
    }

    #[test]
    fn test_build_directory_used_in_place() {
        let (dir, mut archive) = build_dir();
        archive.extract().unwrap();
        assert!(!archive.is_tarball());
        assert_eq!(archive.get_compression(), None);
        assert_eq!(
            archive.extracted_path().unwrap(),
            dir.path().join("sosreport-host1-2024")
        );
        assert!(archive.extract().is_err());
    }

    #[test]
    fn test_lists_are_relative_and_fresh() {
        let (_dir, mut archive) = build_dir();
        archive.extract().unwrap();
        let files = archive.get_file_list().unwrap();
        assert!(files.contains(&"etc/hosts".to_string()));
        assert!(files.contains(&"sys/kernel/debug/x".to_string()));
        let dirs = archive.get_directory_list().unwrap();
        assert_eq!(dirs[0], ".");
        assert!(dirs.contains(&"sys/kernel".to_string()));

        archive.remove_file("etc/hosts").unwrap();
        assert!(!archive.get_file_list().unwrap().contains(&"etc/hosts".to_string()));
        assert_eq!(archive.removed_file_count(), 1);
        // second removal is a no-op
        archive.remove_file("etc/hosts").unwrap();
        assert_eq!(archive.removed_file_count(), 1);
    }

    #[test]
    fn test_skip_and_remove_rules() {
        let (_dir, mut archive) = build_dir();
        archive.extract().unwrap();
        assert!(archive.should_skip_file("sys/kernel/debug/x"));
        assert!(archive.should_skip_file("does/not/exist"));
        assert!(archive.should_skip_file("etc"));
        assert!(!archive.should_skip_file("etc/hosts"));

        for name in ["var/log/foo.journal", "a.tar.gz", "x.tgz", "notes~", "core.1234.bin"] {
            assert!(archive.should_remove_file(name), "{name}");
        }
        assert!(archive.should_remove_file("blob"));
        assert!(!archive.should_remove_file("etc/hosts"));
    }

    #[test]
    fn test_binary_probe() {
        let (_dir, mut archive) = build_dir();
        archive.extract().unwrap();
        let root = archive.extracted_path().unwrap().to_path_buf();
        fs::write(root.join("empty"), b"").unwrap();
        fs::write(root.join("utf8"), "é and more").unwrap();
        fs::write(root.join("late-binary"), b"ok\xff\xfe").unwrap();
        assert!(archive.file_is_binary("blob"));
        assert!(!archive.file_is_binary("empty"));
        assert!(!archive.file_is_binary("utf8"));
        // only the start of the file is probed
        assert!(!archive.file_is_binary("late-binary"));
    }

    #[test]
    fn test_rename_once() {
        let (dir, mut archive) = build_dir();
        archive.extract().unwrap();
        archive.rename_top_dir("sosreport-obfuscatedhost0-2024").unwrap();
        assert_eq!(archive.archive_name(), "sosreport-obfuscatedhost0-2024");
        assert!(dir.path().join("sosreport-obfuscatedhost0-2024/etc/hosts").exists());
        assert!(archive.rename_top_dir("again").is_err());
    }

    #[test]
    fn test_counters_are_per_instance() {
        let (_d1, mut a) = build_dir();
        let (_d2, b) = build_dir();
        a.update_sub_count("etc/hosts", 3);
        assert_eq!(a.total_sub_count(), 3);
        assert_eq!(b.total_sub_count(), 0);
        assert_eq!(a.file_sub_list(), ["etc/hosts".to_string()]);
    }
}
