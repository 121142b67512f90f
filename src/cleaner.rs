//! Run orchestration.
//!
//! A run has two phases. First every archive is extracted and its
//! preparation files are fed to the parsers, one archive at a time, so that
//! hostnames and usernames found in any archive are known before scanning
//! starts. Then the archives are scanned, repacked and checksummed in
//! parallel; the mapping stores are the only state they share.

use crate::archive::compress::{remove_tree, write_checksum_file};
use crate::archive::{ArchiveOptions, ObfuscationArchive};
use crate::config::CleanerConfig;
use crate::error::{CleanerError, Result};
use crate::mappings::MappingSet;
use crate::parsers::{build_parsers, Parser};
use chrono::{DateTime, Utc};
use encoding_rs::WINDOWS_1252;
use rayon::prelude::*;
use serde::Serialize;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Result of one archive that was cleaned end to end.
#[derive(Debug, Clone, Serialize)]
pub struct ArchiveReport {
    pub source: PathBuf,
    pub archive_name: String,
    pub final_path: PathBuf,
    pub checksum: String,
    pub checksum_file: Option<PathBuf>,
    pub total_sub_count: usize,
    pub removed_file_count: usize,
    pub files_changed: usize,
    pub warnings: Vec<String>,
}

/// An archive that produced no output.
#[derive(Debug, Clone, Serialize)]
pub struct ArchiveFailure {
    pub source: PathBuf,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CleanerRun {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub completed: Vec<ArchiveReport>,
    pub failed: Vec<ArchiveFailure>,
    pub map_file: Option<PathBuf>,
    pub warnings: Vec<String>,
}

impl CleanerRun {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct Cleaner {
    config: CleanerConfig,
    mappings: MappingSet,
    parsers: Vec<Box<dyn Parser>>,
    options: ArchiveOptions,
}

impl Cleaner {
    /// Build the stores and parsers. An existing mapping file is loaded
    /// first; a file that cannot be read is logged and ignored.
    pub fn new(config: CleanerConfig) -> Result<Self> {
        config.validate()?;
        let mappings = MappingSet::new(&config.parsers.domains);
        if let Some(map_file) = &config.mapping.map_file {
            if let Err(e) = mappings.load_file(map_file) {
                warn!(path = %map_file.display(), error = %e, "Could not load mapping file");
            }
        }
        let parsers = build_parsers(&mappings, &config)?;
        let options = ArchiveOptions::from_config(&config)?;
        info!(
            parsers = parsers.len(),
            domains = config.parsers.domains.len(),
            "Cleaner ready"
        );
        Ok(Self {
            config,
            mappings,
            parsers,
            options,
        })
    }

    pub fn config(&self) -> &CleanerConfig {
        &self.config
    }

    pub fn mappings(&self) -> &MappingSet {
        &self.mappings
    }

    pub fn parsers(&self) -> &[Box<dyn Parser>] {
        &self.parsers
    }

    /// Run every parser over one line, in order.
    pub fn obfuscate_line(&self, line: &str) -> Result<(String, usize)> {
        let mut line = line.to_string();
        let mut count = 0;
        for parser in &self.parsers {
            let (next, n) = parser.parse_line(&line)?;
            line = next;
            count += n;
        }
        Ok((line, count))
    }

    /// Feed an extracted archive's preparation files to the parsers.
    pub fn prepare_archive(&self, archive: &ObfuscationArchive) -> Result<usize> {
        let mut found = 0;
        for parser in &self.parsers {
            for prep in parser.prep_files() {
                let Some(path) = archive.get_file_path(prep) else {
                    continue;
                };
                let content = match fs::read(&path) {
                    Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                    Err(e) => {
                        debug!(file = %prep, error = %e, "Unreadable preparation file");
                        continue;
                    }
                };
                let n = parser.prepare(&content)?;
                debug!(parser = parser.name(), file = %prep, count = n, "Prepared");
                found += n;
            }
        }
        Ok(found)
    }

    /// Rewrite one file in place. The file is only replaced when something
    /// changed; bytes outside the scrubbed tokens are kept as they were.
    pub fn obfuscate_file(&self, path: &Path) -> Result<usize> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        let permissions = file.metadata()?.permissions();
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;

        let mut reader = BufReader::new(file);
        let mut raw = Vec::new();
        let mut count = 0;
        loop {
            raw.clear();
            if reader.read_until(b'\n', &mut raw)? == 0 {
                break;
            }
            let body_len = raw
                .strip_suffix(b"\r\n")
                .or_else(|| raw.strip_suffix(b"\n"))
                .map_or(raw.len(), <[u8]>::len);
            let (body, ending) = raw.split_at(body_len);
            match std::str::from_utf8(body) {
                Ok(text) => {
                    let (out, n) = self.obfuscate_line(text)?;
                    count += n;
                    tmp.write_all(out.as_bytes())?;
                }
                Err(_) => {
                    let n = self.obfuscate_legacy_line(body, &mut tmp)?;
                    count += n;
                }
            }
            tmp.write_all(ending)?;
        }

        if count > 0 {
            tmp.flush()?;
            fs::set_permissions(tmp.path(), permissions)?;
            tmp.persist(path).map_err(|e| CleanerError::Io(e.error))?;
        }
        Ok(count)
    }

    /// Scrub a line that is not UTF-8 by reading it as windows-1252, which
    /// maps every byte. Stray bytes are written back as they were.
    fn obfuscate_legacy_line(&self, body: &[u8], out: &mut impl Write) -> Result<usize> {
        let text = WINDOWS_1252.decode_without_bom_handling(body).0;
        let (scrubbed, count) = self.obfuscate_line(&text)?;
        if count == 0 {
            out.write_all(body)?;
            return Ok(0);
        }
        let (encoded, _, unmappable) = WINDOWS_1252.encode(&scrubbed);
        if unmappable {
            out.write_all(scrubbed.as_bytes())?;
        } else {
            out.write_all(&encoded)?;
        }
        Ok(count)
    }

    /// Pass a symlink's target through the parsers, recreating the link
    /// when the target text changes.
    #[cfg(unix)]
    fn obfuscate_symlink(&self, path: &Path) -> Result<usize> {
        let target = match fs::read_link(path) {
            Ok(t) => t,
            Err(_) => return Ok(0),
        };
        let Some(text) = target.to_str() else {
            return Ok(0);
        };
        let (new_target, count) = self.obfuscate_line(text)?;
        if count == 0 || new_target == text {
            return Ok(0);
        }
        fs::remove_file(path)?;
        std::os::unix::fs::symlink(&new_target, path)?;
        debug!(link = %path.display(), "Rewrote symlink target");
        Ok(count)
    }

    #[cfg(not(unix))]
    fn obfuscate_symlink(&self, _path: &Path) -> Result<usize> {
        Ok(0)
    }

    /// Scan, repack and checksum one extracted archive.
    pub fn obfuscate_archive(&self, archive: &mut ObfuscationArchive) -> Result<ArchiveReport> {
        let span = crate::archive_span!(archive.archive_name());
        let _guard = span.enter();

        for name in archive.get_file_list()? {
            if archive.should_skip_file(&name) {
                debug!(file = %name, "Skipping");
                continue;
            }
            if archive.should_remove_file(&name) {
                archive.remove_file(&name)?;
                continue;
            }
            let Some(path) = archive.get_file_path(&name) else {
                continue;
            };
            let is_link = fs::symlink_metadata(&path)
                .map(|m| m.file_type().is_symlink())
                .unwrap_or(false);
            let count = if is_link {
                self.obfuscate_symlink(&path)?
            } else {
                self.obfuscate_file(&path)?
            };
            if count > 0 {
                debug!(file = %name, count, "Obfuscated");
                archive.update_sub_count(&name, count);
            }
        }

        let (new_name, renamed) = self.obfuscate_line(archive.archive_name())?;
        if renamed > 0 && new_name != archive.archive_name() {
            archive.rename_top_dir(&new_name)?;
        }

        let method = archive
            .get_compression()
            .or(Some(self.config.archive.default_compression));
        let final_path = archive.compress(method)?;
        let checksum = archive.final_checksum().unwrap_or_default().to_string();

        let mut warnings = archive.warnings().to_vec();
        let checksum_file = if self.config.archive.write_checksums {
            match write_checksum_file(&final_path, &checksum) {
                Ok(p) => Some(p),
                Err(e) => {
                    warn!(error = %e, "Could not write checksum file");
                    warnings.push(e.to_string());
                    None
                }
            }
        } else {
            None
        };

        info!(
            total_sub_count = archive.total_sub_count(),
            removed_file_count = archive.removed_file_count(),
            final_path = %final_path.display(),
            "Archive obfuscated"
        );
        Ok(ArchiveReport {
            source: archive.archive_path().to_path_buf(),
            archive_name: archive.archive_name().to_string(),
            final_path,
            checksum,
            checksum_file,
            total_sub_count: archive.total_sub_count(),
            removed_file_count: archive.removed_file_count(),
            files_changed: archive.file_sub_list().len(),
            warnings,
        })
    }

    fn fail(source: &Path, error: &CleanerError) -> ArchiveFailure {
        warn!(source = %source.display(), error = %error, "Archive failed");
        ArchiveFailure {
            source: source.to_path_buf(),
            error: error.to_string(),
        }
    }

    /// Clean every archive in `paths`.
    pub fn execute<P: AsRef<Path>>(&self, paths: &[P]) -> CleanerRun {
        let started_at = Utc::now();
        let scratch = self.config.scratch_dir();
        let mut failed = Vec::new();
        let mut ready = Vec::new();

        for path in paths {
            let path = path.as_ref();
            let mut archive = ObfuscationArchive::new(path, &scratch, self.options.clone());
            let prepared = archive
                .extract()
                .and_then(|()| self.prepare_archive(&archive));
            match prepared {
                Ok(_) => ready.push(archive),
                Err(e) => {
                    failed.push(Self::fail(path, &e));
                    if archive.is_tarball() {
                        if let Some(root) = archive.extracted_path() {
                            let _ = remove_tree(root);
                        }
                    }
                }
            }
        }

        let run_one = |mut archive: ObfuscationArchive| {
            self.obfuscate_archive(&mut archive).map_err(|e| {
                if archive.is_tarball() {
                    if let Some(root) = archive.extracted_path() {
                        let _ = remove_tree(root);
                    }
                }
                Self::fail(archive.archive_path(), &e)
            })
        };
        let outcomes: Vec<std::result::Result<ArchiveReport, ArchiveFailure>> =
            match rayon::ThreadPoolBuilder::new()
                .num_threads(self.config.execution.jobs)
                .thread_name(|i| format!("diagscrub-{i}"))
                .build()
            {
                Ok(pool) => pool.install(|| ready.into_par_iter().map(run_one).collect()),
                Err(e) => {
                    warn!(error = %e, "Could not build worker pool, running sequentially");
                    ready.into_iter().map(run_one).collect()
                }
            };

        let mut completed = Vec::new();
        for outcome in outcomes {
            match outcome {
                Ok(report) => completed.push(report),
                Err(failure) => failed.push(failure),
            }
        }

        let mut warnings = Vec::new();
        let mut map_file = None;
        if self.config.mapping.write_map_file {
            if let Some(path) = &self.config.mapping.map_file {
                match self.mappings.write_file(path) {
                    Ok(()) => map_file = Some(path.clone()),
                    Err(e) => {
                        let e = crate::log_error!(e, "write mapping file");
                        warnings.push(e.to_string());
                    }
                }
            }
        }

        info!(
            completed = completed.len(),
            failed = failed.len(),
            "Cleaning run finished"
        );
        CleanerRun {
            started_at,
            finished_at: Utc::now(),
            completed,
            failed,
            map_file,
            warnings,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cleaner(domains: &[&str]) -> Cleaner {
        let mut config = CleanerConfig::default();
        config.parsers.domains = domains.iter().map(|d| d.to_string()).collect();
        Cleaner::new(config).unwrap()
    }

    #[test]
    fn test_obfuscate_line_runs_all_parsers() {
        let c = cleaner(&["example.com"]);
        let (line, count) = c
            .obfuscate_line("192.168.1.5 host1.example.com 52:54:00:12:34:56")
            .unwrap();
        assert_eq!(
            line,
            "100.0.0.1 obfuscatedhost0.obfuscateddomain0.com 53:4f:53:00:00:01"
        );
        assert_eq!(count, 3);
    }

    #[test]
    fn test_tokens_next_to_paths_and_suffixes() {
        let c = cleaner(&["example.com"]);
        let (line, count) = c
            .obfuscate_line("/var/log/httpd/www.example.com-access.log")
            .unwrap();
        assert_eq!(line, "/var/log/httpd/obfuscatedhost0.obfuscateddomain0.com-access.log");
        assert_eq!(count, 1);

        let (line, count) = c.obfuscate_line("GET http://10.1.2.3/2019/index.html").unwrap();
        assert_eq!(line, "GET http://100.0.0.1/2019/index.html");
        assert_eq!(count, 1);
    }

    #[test]
    fn test_obfuscate_file_keeps_line_endings_and_mode() {
        let c = cleaner(&[]);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ifcfg");
        fs::write(&path, b"IPADDR=10.0.0.4\r\nNAME=eth0\n\xff\xfe 10.0.0.4\nlast 10.0.0.4").unwrap();
        let count = c.obfuscate_file(&path).unwrap();
        assert_eq!(count, 3);
        let body = fs::read(&path).unwrap();
        assert_eq!(
            body,
            b"IPADDR=100.0.0.1\r\nNAME=eth0\n\xff\xfe 100.0.0.1\nlast 100.0.0.1".to_vec()
        );
    }

    #[test]
    fn test_latin1_line_is_scrubbed_and_keeps_its_bytes() {
        let c = cleaner(&["example.com"]);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secure");
        fs::write(
            &path,
            b"caf\xe9 login from 192.168.1.5 (db.example.com)\nok 192.168.1.5\n\x90 idle\n",
        )
        .unwrap();
        let count = c.obfuscate_file(&path).unwrap();
        assert_eq!(count, 3);
        assert_eq!(
            fs::read(&path).unwrap(),
            b"caf\xe9 login from 100.0.0.1 (obfuscatedhost0.obfuscateddomain0.com)\nok 100.0.0.1\n\x90 idle\n"
                .to_vec()
        );
    }

    #[test]
    fn test_unchanged_file_is_not_rewritten() {
        let c = cleaner(&[]);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plain");
        fs::write(&path, "nothing here\n").unwrap();
        let before = fs::metadata(&path).unwrap().modified().unwrap();
        assert_eq!(c.obfuscate_file(&path).unwrap(), 0);
        assert_eq!(fs::metadata(&path).unwrap().modified().unwrap(), before);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_vanished_file_is_skipped() {
        let c = cleaner(&[]);
        assert_eq!(c.obfuscate_file(Path::new("/nonexistent/diagscrub/f")).unwrap(), 0);
    }

    #[test]
    fn test_unreadable_map_file_is_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let map = dir.path().join("map.json");
        fs::write(&map, "not json").unwrap();
        let mut config = CleanerConfig::default();
        config.mapping.map_file = Some(map);
        let c = Cleaner::new(config).unwrap();
        assert!(c.mappings().ip.is_empty());
    }
}
