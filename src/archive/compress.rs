//! Repacking of an obfuscated tree and removal of the working copy.

use super::CompressionMethod;
use crate::error::{CleanerError, Result};
use flate2::write::GzEncoder;
use flate2::Compression;
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;
use xz2::stream::MtStreamBuilder;
use xz2::write::XzEncoder;

pub const GZIP_LEVEL: u32 = 6;
pub const XZ_PRESET: u32 = 3;

/// Output path for a tree at `extracted`.
pub fn output_path(extracted: &Path, method: Option<CompressionMethod>) -> PathBuf {
    let mut name = extracted.as_os_str().to_os_string();
    name.push("-obfuscated.tar");
    if let Some(method) = method {
        name.push(".");
        name.push(method.extension());
    }
    PathBuf::from(name)
}

fn append_tree<W: Write>(writer: W, root: &Path, arcname: &str) -> io::Result<W> {
    let mut builder = tar::Builder::new(writer);
    builder.follow_symlinks(false);
    builder.append_dir_all(arcname, root)?;
    builder.into_inner()
}

fn write_tar(
    output: &Path,
    root: &Path,
    arcname: &str,
    method: Option<CompressionMethod>,
    threads: u32,
) -> io::Result<()> {
    let file = BufWriter::new(File::create(output)?);
    match method {
        None => {
            append_tree(file, root, arcname)?.flush()?;
        }
        Some(CompressionMethod::Gzip) => {
            let encoder = GzEncoder::new(file, Compression::new(GZIP_LEVEL));
            append_tree(encoder, root, arcname)?.finish()?.flush()?;
        }
        Some(CompressionMethod::Xz) => {
            let stream = MtStreamBuilder::new()
                .preset(XZ_PRESET)
                .threads(threads.max(1))
                .encoder()
                .map_err(io::Error::other)?;
            let encoder = XzEncoder::new_stream(file, stream);
            append_tree(encoder, root, arcname)?.finish()?.flush()?;
        }
    }
    Ok(())
}

/// Pack `root` as `arcname` into `output`. A failed build leaves no file
/// behind.
pub fn build_archive(
    output: &Path,
    root: &Path,
    arcname: &str,
    method: Option<CompressionMethod>,
    threads: u32,
) -> Result<()> {
    debug!(output = %output.display(), "Building tar file");
    if let Err(e) = write_tar(output, root, arcname, method, threads) {
        let _ = fs::remove_file(output);
        return Err(CleanerError::Recompression {
            path: output.to_path_buf(),
            message: e.to_string(),
        });
    }
    Ok(())
}

/// Hex encoded SHA-256 of a file.
pub fn sha256_file(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Write `<archive>.sha256` in `sha256sum` format and return its path.
pub fn write_checksum_file(archive: &Path, checksum: &str) -> Result<PathBuf> {
    let mut path = archive.as_os_str().to_os_string();
    path.push(".sha256");
    let path = PathBuf::from(path);
    let name = archive
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    fs::write(&path, format!("{checksum}  {name}\n"))?;
    Ok(path)
}

/// Delete a tree, retrying once after giving the owner write access.
pub fn remove_tree(root: &Path) -> Result<()> {
    match fs::remove_dir_all(root) {
        Ok(()) => return Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => debug!(error = %e, path = %root.display(), "Retrying removal with write access"),
    }
    make_writable(root);
    fs::remove_dir_all(root).map_err(|source| CleanerError::Cleanup {
        path: root.to_path_buf(),
        source,
    })
}

#[cfg(unix)]
fn make_writable(root: &Path) {
    use std::os::unix::fs::PermissionsExt;
    for entry in WalkDir::new(root).follow_links(false).into_iter().flatten() {
        if !entry.file_type().is_dir() {
            continue;
        }
        if let Ok(meta) = entry.metadata() {
            let mode = meta.permissions().mode() | 0o700;
            let _ = fs::set_permissions(entry.path(), fs::Permissions::from_mode(mode));
        }
    }
}

#[cfg(not(unix))]
fn make_writable(root: &Path) {
    for entry in WalkDir::new(root).follow_links(false).into_iter().flatten() {
        if let Ok(meta) = entry.metadata() {
            let mut perms = meta.permissions();
            perms.set_readonly(false);
            let _ = fs::set_permissions(entry.path(), perms);
        }
    }
}
