//! Archive lifecycle against real tarballs.

use crate::common::{build_tarball, file_in, read_archive};
use diagscrub::archive::ArchiveOptions;
use diagscrub::{ArchiveState, CleanerError, CompressionMethod, ObfuscationArchive};
use std::fs;

fn options() -> ArchiveOptions {
    ArchiveOptions {
        compression_threads: 1,
        ..ArchiveOptions::default()
    }
}

#[test]
fn test_extract_xz_tarball() {
    let dir = tempfile::tempdir().unwrap();
    let source = build_tarball(
        dir.path(),
        "host1",
        Some(CompressionMethod::Xz),
        &[("etc/hosts", b"192.168.1.5 host1.example.com\n")],
    );
    let scratch = dir.path().join("scratch");
    let mut archive = ObfuscationArchive::new(&source, &scratch, options());
    assert!(archive.is_tarball());
    assert_eq!(archive.get_compression(), Some(CompressionMethod::Xz));

    archive.extract().unwrap();
    assert_eq!(archive.state(), ArchiveState::Extracted { renamed: false });
    assert_eq!(archive.archive_name(), "host1");
    assert_eq!(
        archive.extracted_path().unwrap(),
        scratch.join("cleaner").join("host1")
    );
    assert_eq!(archive.get_file_list().unwrap(), vec!["etc/hosts".to_string()]);
}

#[test]
fn test_gzip_source_defaults_to_gzip() {
    let dir = tempfile::tempdir().unwrap();
    let source = build_tarball(dir.path(), "box", Some(CompressionMethod::Gzip), &[("a", b"a\n")]);
    let archive = ObfuscationArchive::new(&source, dir.path(), options());
    assert_eq!(archive.get_compression(), Some(CompressionMethod::Gzip));

    let plain = build_tarball(dir.path(), "flat", None, &[("a", b"a\n")]);
    let archive = ObfuscationArchive::new(&plain, dir.path(), options());
    assert_eq!(archive.get_compression(), Some(CompressionMethod::Gzip));
}

#[test]
fn test_corrupt_archive_fails_extraction() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("broken.tar.xz");
    let mut bytes = vec![0xFD, 0x37, 0x7A, 0x58, 0x5A, 0x00];
    bytes.extend_from_slice(&[0x42; 64]);
    fs::write(&source, bytes).unwrap();

    let mut archive = ObfuscationArchive::new(&source, dir.path(), options());
    let err = archive.extract().unwrap_err();
    assert!(matches!(err, CleanerError::Extraction { .. }), "{err}");
    assert_eq!(archive.state(), ArchiveState::Unextracted);
}

#[test]
fn test_plain_file_is_not_an_archive() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("notes.txt");
    fs::write(&source, "hello").unwrap();
    let mut archive = ObfuscationArchive::new(&source, dir.path(), options());
    assert!(matches!(archive.extract(), Err(CleanerError::Extraction { .. })));
}

#[test]
fn test_core_dump_removed_without_probe() {
    let dir = tempfile::tempdir().unwrap();
    let source = build_tarball(
        dir.path(),
        "sosreport-abc",
        Some(CompressionMethod::Gzip),
        &[
            ("var/crash/core.1234.bin", b"plain text is still removed"),
            ("var/log/journal/foo.journal", b"LPKSHHRH"),
            ("etc/motd", b"welcome\n"),
        ],
    );
    let mut archive = ObfuscationArchive::new(&source, dir.path().join("s"), options());
    archive.extract().unwrap();

    for name in archive.get_file_list().unwrap() {
        if archive.should_remove_file(&name) {
            archive.remove_file(&name).unwrap();
        }
    }
    assert_eq!(archive.removed_file_count(), 2);
    assert_eq!(archive.get_file_list().unwrap(), vec!["etc/motd".to_string()]);
}

#[cfg(unix)]
#[test]
fn test_compress_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let files: [(&str, &[u8]); 3] = [
        ("etc/hosts", b"127.0.0.1 localhost\n"),
        ("proc/cpuinfo", b"processor : 0\n"),
        ("sos_commands/host/hostname", b"host1.example.com\n"),
    ];
    for method in [Some(CompressionMethod::Xz), Some(CompressionMethod::Gzip), None] {
        let work = dir.path().join(format!("{method:?}"));
        fs::create_dir_all(&work).unwrap();
        let source = build_tarball(&work, "sosreport-rt", Some(CompressionMethod::Xz), &files);
        let mut archive = ObfuscationArchive::new(&source, work.join("scratch"), options());
        archive.extract().unwrap();
        let root = archive.extracted_path().unwrap().to_path_buf();
        std::os::unix::fs::symlink("../etc/hosts", root.join("proc/hosts-link")).unwrap();

        let output = archive.compress(method).unwrap();
        assert_eq!(archive.state(), ArchiveState::Compressed);
        assert_eq!(archive.final_archive_path(), Some(output.as_path()));
        assert_eq!(archive.final_checksum().unwrap().len(), 64);
        assert!(!root.exists(), "extracted tree is removed");

        let contents = read_archive(&output);
        assert_eq!(contents.len(), files.len());
        for (path, body) in files {
            assert_eq!(contents[&format!("sosreport-rt/{path}")], body.to_vec());
        }
        assert!(archive.extract().is_err());
    }
}

#[test]
fn test_renamed_tree_is_packed_under_new_name() {
    let dir = tempfile::tempdir().unwrap();
    let source = build_tarball(
        dir.path(),
        "sosreport-host1",
        Some(CompressionMethod::Gzip),
        &[("etc/hostname", b"obfuscatedhost0\n")],
    );
    let mut archive = ObfuscationArchive::new(&source, dir.path().join("scratch"), options());
    archive.extract().unwrap();
    archive.rename_top_dir("sosreport-obfuscatedhost0").unwrap();
    let output = archive.compress(Some(CompressionMethod::Gzip)).unwrap();
    assert!(output
        .to_string_lossy()
        .ends_with("sosreport-obfuscatedhost0-obfuscated.tar.gz"));

    let contents = read_archive(&output);
    assert!(contents.contains_key("sosreport-obfuscatedhost0/etc/hostname"));
    assert_eq!(file_in(&contents, "etc/hostname").unwrap(), "obfuscatedhost0\n");
}
