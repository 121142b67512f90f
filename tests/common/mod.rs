//! Common test utilities and helpers.
//!
//! Fixture archives are built on the fly inside a temporary directory so the
//! tests never depend on files checked into the repository.

use diagscrub::{CleanerConfig, CompressionMethod};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use xz2::read::XzDecoder;
use xz2::write::XzEncoder;

/// Build `<dir>/<name>.tar[.gz|.xz]` whose entries all live under `name/`.
pub fn build_tarball(
    dir: &Path,
    name: &str,
    method: Option<CompressionMethod>,
    files: &[(&str, &[u8])],
) -> PathBuf {
    let mut builder = tar::Builder::new(Vec::new());
    for (path, body) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(body.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, format!("{name}/{path}"), *body)
            .unwrap();
    }
    let tar_bytes = builder.into_inner().unwrap();

    let (file_name, bytes) = match method {
        None => (format!("{name}.tar"), tar_bytes),
        Some(CompressionMethod::Gzip) => {
            let mut enc = GzEncoder::new(Vec::new(), Compression::default());
            enc.write_all(&tar_bytes).unwrap();
            (format!("{name}.tar.gz"), enc.finish().unwrap())
        }
        Some(CompressionMethod::Xz) => {
            let mut enc = XzEncoder::new(Vec::new(), 6);
            enc.write_all(&tar_bytes).unwrap();
            (format!("{name}.tar.xz"), enc.finish().unwrap())
        }
    };
    let path = dir.join(file_name);
    std::fs::write(&path, bytes).unwrap();
    path
}

/// Read every regular file of a produced archive into memory, keyed by its
/// path inside the archive.
pub fn read_archive(path: &Path) -> BTreeMap<String, Vec<u8>> {
    let file = File::open(path).unwrap();
    let name = path.to_string_lossy();
    let reader: Box<dyn Read> = if name.ends_with(".xz") {
        Box::new(XzDecoder::new(file))
    } else if name.ends_with(".gz") {
        Box::new(GzDecoder::new(file))
    } else {
        Box::new(file)
    };
    let mut archive = tar::Archive::new(reader);
    let mut out = BTreeMap::new();
    for entry in archive.entries().unwrap() {
        let mut entry = entry.unwrap();
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let path = entry.path().unwrap().to_string_lossy().into_owned();
        let mut body = Vec::new();
        entry.read_to_end(&mut body).unwrap();
        out.insert(path, body);
    }
    out
}

/// Contents of the file at `inner` regardless of the top directory name.
pub fn file_in(contents: &BTreeMap<String, Vec<u8>>, inner: &str) -> Option<String> {
    contents
        .iter()
        .find(|(path, _)| path.split_once('/').map(|(_, rest)| rest) == Some(inner))
        .map(|(_, body)| String::from_utf8_lossy(body).into_owned())
}

/// Configuration writing into `scratch`, with the given domains loaded.
pub fn test_config(scratch: &Path, domains: &[&str]) -> CleanerConfig {
    let mut config = CleanerConfig::default();
    config.execution.scratch_dir = Some(scratch.to_path_buf());
    config.execution.jobs = 2;
    config.archive.compression_threads = 1;
    config.parsers.domains = domains.iter().map(|d| d.to_string()).collect();
    config
}
