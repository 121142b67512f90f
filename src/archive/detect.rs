//! Source archive format detection.
//!
//! Magic checks on the first block of the file. Only formats we can unpack
//! are reported as tarballs; a bzip2 or zstd source is recognized so the
//! error can say what it is.

use std::fs::File;
use std::io::Read;
use std::path::Path;

const PROBE_LEN: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    Gzip,
    Xz,
    Tar,
    /// Compressed with something we cannot unpack
    Unsupported(&'static str),
    /// Not an archive at all
    Unknown,
}

impl SourceFormat {
    pub fn is_tarball(&self) -> bool {
        matches!(self, SourceFormat::Gzip | SourceFormat::Xz | SourceFormat::Tar)
    }
}

pub fn detect_bytes(data: &[u8]) -> SourceFormat {
    if data.len() >= 2 && data[0] == 0x1F && data[1] == 0x8B {
        return SourceFormat::Gzip;
    }
    if data.len() >= 6 && data[..6] == [0xFD, 0x37, 0x7A, 0x58, 0x5A, 0x00] {
        return SourceFormat::Xz;
    }
    // "ustar" at offset 257
    if data.len() > 262 && data[257..262] == *b"ustar" {
        return SourceFormat::Tar;
    }
    if data.len() >= 3 && &data[..3] == b"BZh" {
        return SourceFormat::Unsupported("bzip2");
    }
    if data.len() >= 4 && data[..4] == [0x28, 0xB5, 0x2F, 0xFD] {
        return SourceFormat::Unsupported("zstd");
    }
    SourceFormat::Unknown
}

/// Classify the file at `path`. Directories and unreadable paths are
/// `Unknown`.
pub fn detect_path(path: &Path) -> SourceFormat {
    if !path.is_file() {
        return SourceFormat::Unknown;
    }
    let Ok(file) = File::open(path) else {
        return SourceFormat::Unknown;
    };
    let mut buf = Vec::with_capacity(PROBE_LEN);
    if file.take(PROBE_LEN as u64).read_to_end(&mut buf).is_err() {
        return SourceFormat::Unknown;
    }
    detect_bytes(&buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_magic_numbers() {
        assert_eq!(detect_bytes(&[0x1F, 0x8B, 0x08, 0x00]), SourceFormat::Gzip);
        assert_eq!(
            detect_bytes(&[0xFD, 0x37, 0x7A, 0x58, 0x5A, 0x00, 0x00]),
            SourceFormat::Xz
        );
        assert_eq!(detect_bytes(b"BZh91AY"), SourceFormat::Unsupported("bzip2"));
        assert_eq!(detect_bytes(b"plain text"), SourceFormat::Unknown);

        let mut tar = vec![0u8; 512];
        tar[257..262].copy_from_slice(b"ustar");
        assert_eq!(detect_bytes(&tar), SourceFormat::Tar);
        assert!(SourceFormat::Tar.is_tarball());
        assert!(!SourceFormat::Unsupported("zstd").is_tarball());
    }

    #[test]
    fn test_directory_is_unknown() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(detect_path(dir.path()), SourceFormat::Unknown);
    }
}
