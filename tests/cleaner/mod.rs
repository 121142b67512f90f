//! End to end cleaning runs.

use crate::common::{build_tarball, file_in, read_archive, test_config};
use diagscrub::{Cleaner, CompressionMethod};
use std::fs;

#[test]
fn test_host1_scenario() {
    let dir = tempfile::tempdir().unwrap();
    let source = build_tarball(
        dir.path(),
        "host1",
        Some(CompressionMethod::Xz),
        &[
            ("etc/hosts", b"192.168.1.5 host1.example.com\n"),
            ("var/log/messages", b"connect from 192.168.1.5 port 22\n"),
        ],
    );
    let cleaner = Cleaner::new(test_config(&dir.path().join("scratch"), &["example.com"])).unwrap();
    let run = cleaner.execute(&[&source]);
    assert!(run.is_success(), "{:?}", run.failed);

    let report = &run.completed[0];
    assert_eq!(report.total_sub_count, 3);
    assert_eq!(report.files_changed, 2);
    assert!(report.final_path.to_string_lossy().ends_with("-obfuscated.tar.xz"));
    assert_eq!(
        fs::read_to_string(report.checksum_file.as_ref().unwrap()).unwrap(),
        format!(
            "{}  {}\n",
            report.checksum,
            report.final_path.file_name().unwrap().to_string_lossy()
        )
    );

    let contents = read_archive(&report.final_path);
    let hosts = file_in(&contents, "etc/hosts").unwrap();
    assert_eq!(hosts, "100.0.0.1 obfuscatedhost0.obfuscateddomain0.com\n");
    let messages = file_in(&contents, "var/log/messages").unwrap();
    assert_eq!(messages, "connect from 100.0.0.1 port 22\n");
}

#[test]
fn test_values_match_across_archives() {
    let dir = tempfile::tempdir().unwrap();
    let a = build_tarball(
        dir.path(),
        "sosreport-a",
        Some(CompressionMethod::Gzip),
        &[("etc/resolv.conf", b"nameserver 10.20.0.53\n")],
    );
    let b = build_tarball(
        dir.path(),
        "sosreport-b",
        Some(CompressionMethod::Xz),
        &[("etc/resolv.conf", b"nameserver 10.20.0.53\n"), ("etc/x", b"10.20.0.54\n")],
    );
    let cleaner = Cleaner::new(test_config(&dir.path().join("scratch"), &[])).unwrap();
    let run = cleaner.execute(&[a, b]);
    assert_eq!(run.completed.len(), 2);

    let bodies: Vec<String> = run
        .completed
        .iter()
        .map(|r| file_in(&read_archive(&r.final_path), "etc/resolv.conf").unwrap())
        .collect();
    assert_eq!(bodies[0], bodies[1]);
    assert!(!bodies[0].contains("10.20.0.53"));
    assert_eq!(cleaner.mappings().ip.len(), 2);
}

#[test]
fn test_prep_files_rename_top_directory() {
    let dir = tempfile::tempdir().unwrap();
    let source = build_tarball(
        dir.path(),
        "sosreport-web01-2024",
        Some(CompressionMethod::Xz),
        &[
            ("sos_commands/host/hostname", b"web01.lab.example.net\n"),
            ("etc/motd", b"Welcome to web01\n"),
            (
                "sos_commands/login/lastlog_-u_1000-60000",
                b"Username Port From Latest\nalice pts/0 10.1.1.1 today\n",
            ),
            ("var/log/secure", b"Accepted key for alice from 10.1.1.1\n"),
        ],
    );
    let cleaner = Cleaner::new(test_config(&dir.path().join("scratch"), &[])).unwrap();
    let run = cleaner.execute(&[&source]);
    assert!(run.is_success(), "{:?}", run.failed);
    let report = &run.completed[0];
    assert_eq!(report.archive_name, "sosreport-obfuscatedhost0-2024");

    let contents = read_archive(&report.final_path);
    assert!(contents.keys().all(|k| k.starts_with("sosreport-obfuscatedhost0-2024/")));
    assert_eq!(file_in(&contents, "etc/motd").unwrap(), "Welcome to obfuscatedhost0\n");
    let secure = file_in(&contents, "var/log/secure").unwrap();
    assert!(!secure.contains("alice"), "{secure}");
    assert!(!secure.contains("10.1.1.1"), "{secure}");
    let hostname = file_in(&contents, "sos_commands/host/hostname").unwrap();
    assert!(!hostname.contains("example.net"), "{hostname}");
}

#[test]
fn test_second_pass_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let map = dir.path().join("map.json");
    let source = build_tarball(
        dir.path(),
        "box",
        Some(CompressionMethod::Gzip),
        &[("etc/net", b"addr 10.0.0.9 mac 52:54:00:aa:bb:cc host db.example.com\n")],
    );

    let mut config = test_config(&dir.path().join("first"), &["example.com"]);
    config.mapping.map_file = Some(map.clone());
    config.mapping.write_map_file = true;
    let first = Cleaner::new(config.clone()).unwrap().execute(&[&source]);
    assert_eq!(first.completed[0].total_sub_count, 3);
    assert_eq!(first.map_file.as_deref(), Some(map.as_path()));

    // clean the obfuscated output again with the persisted mappings
    config.execution.scratch_dir = Some(dir.path().join("second"));
    let second = Cleaner::new(config).unwrap().execute(&[&first.completed[0].final_path]);
    assert!(second.is_success(), "{:?}", second.failed);
    assert_eq!(second.completed[0].total_sub_count, 0);
    let once = file_in(&read_archive(&first.completed[0].final_path), "etc/net");
    let twice = file_in(&read_archive(&second.completed[0].final_path), "etc/net");
    assert_eq!(once, twice);
}

#[test]
fn test_failed_archive_is_reported_and_others_complete() {
    let dir = tempfile::tempdir().unwrap();
    let good = build_tarball(dir.path(), "good", Some(CompressionMethod::Gzip), &[("a", b"10.9.9.9\n")]);
    let bad = dir.path().join("bad.tar.gz");
    fs::write(&bad, [0x1F, 0x8B, 0x08, 0x00, 0x00]).unwrap();
    let missing = dir.path().join("missing.tar.xz");

    let cleaner = Cleaner::new(test_config(&dir.path().join("scratch"), &[])).unwrap();
    let run = cleaner.execute(&[good, bad.clone(), missing.clone()]);
    assert_eq!(run.completed.len(), 1);
    assert_eq!(run.failed.len(), 2);
    let failed: Vec<_> = run.failed.iter().map(|f| f.source.clone()).collect();
    assert!(failed.contains(&bad));
    assert!(failed.contains(&missing));
    assert!(!run.is_success());
    assert!(run.finished_at >= run.started_at);
}

#[test]
fn test_binary_and_journal_files_are_dropped() {
    let dir = tempfile::tempdir().unwrap();
    let source = build_tarball(
        dir.path(),
        "sosreport-bin",
        Some(CompressionMethod::Gzip),
        &[
            ("var/crash/core.1234.bin", b"10.0.0.1"),
            ("var/log/journal/foo.journal", b"10.0.0.1"),
            ("lib/blob", &[0x80, 0x81, 0x00, 0x10]),
            ("etc/hosts", b"10.0.0.1 gw\n"),
        ],
    );
    let cleaner = Cleaner::new(test_config(&dir.path().join("scratch"), &[])).unwrap();
    let run = cleaner.execute(&[&source]);
    let report = &run.completed[0];
    assert_eq!(report.removed_file_count, 3);
    let contents = read_archive(&report.final_path);
    assert_eq!(contents.len(), 1);
    assert_eq!(file_in(&contents, "etc/hosts").unwrap(), "100.0.0.1 gw\n");
}

#[test]
fn test_disabled_parser_leaves_tokens() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(&dir.path().join("scratch"), &[]);
    config.parsers.disabled = vec![diagscrub::ParserKind::Ip];
    config.parsers.keywords = vec!["projectx".to_string()];
    let cleaner = Cleaner::new(config).unwrap();
    let (line, count) = cleaner.obfuscate_line("projectx at 10.0.0.1").unwrap();
    assert_eq!(line, "obfuscatedword0 at 10.0.0.1");
    assert_eq!(count, 1);
}
