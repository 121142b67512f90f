//! Unpacking of source tarballs and the post-extraction permission pass.

use super::detect::SourceFormat;
use crate::error::{CleanerError, Result};
use flate2::read::GzDecoder;
use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, warn};
use walkdir::WalkDir;
use xz2::read::XzDecoder;

fn extraction_error(path: &Path, message: impl ToString) -> CleanerError {
    CleanerError::Extraction {
        path: path.to_path_buf(),
        message: message.to_string(),
    }
}

/// Unpack `source` below `dest_parent` and return the extracted root.
///
/// A tarball holding a single top-level directory extracts to that
/// directory. Anything else is gathered inside a directory named
/// `fallback_name`. Once `cancelled` is raised nothing is moved out of the
/// staging directory, and a root published concurrently is taken back.
pub fn unpack_tarball(
    source: &Path,
    format: SourceFormat,
    dest_parent: &Path,
    fallback_name: &str,
    cancelled: &AtomicBool,
) -> Result<PathBuf> {
    fs::create_dir_all(dest_parent).map_err(|e| extraction_error(source, e))?;
    let staging = tempfile::Builder::new()
        .prefix(".extract-")
        .tempdir_in(dest_parent)
        .map_err(|e| extraction_error(source, e))?;

    let file = BufReader::new(File::open(source).map_err(|e| extraction_error(source, e))?);
    let reader: Box<dyn Read> = match format {
        SourceFormat::Gzip => Box::new(GzDecoder::new(file)),
        SourceFormat::Xz => Box::new(XzDecoder::new(file)),
        SourceFormat::Tar => Box::new(file),
        SourceFormat::Unsupported(kind) => {
            return Err(extraction_error(source, format!("unsupported compression: {kind}")))
        }
        SourceFormat::Unknown => return Err(extraction_error(source, "not a tar archive")),
    };

    let mut archive = tar::Archive::new(reader);
    archive.set_preserve_mtime(true);
    archive.set_overwrite(true);
    archive
        .unpack(staging.path())
        .map_err(|e| extraction_error(source, e))?;

    let entries: Vec<fs::DirEntry> = fs::read_dir(staging.path())
        .map_err(|e| extraction_error(source, e))?
        .collect::<std::io::Result<_>>()
        .map_err(|e| extraction_error(source, e))?;

    if cancelled.load(Ordering::SeqCst) {
        return Err(abandoned(source));
    }

    let single_dir = match entries.as_slice() {
        [only] => only.file_type().map(|t| t.is_dir()).unwrap_or(false),
        _ => false,
    };

    let root = if single_dir {
        let top = &entries[0];
        let target = dest_parent.join(top.file_name());
        ensure_vacant(source, &target)?;
        fs::rename(top.path(), &target).map_err(|e| extraction_error(source, e))?;
        target
    } else {
        debug!(archive = %fallback_name, "Tarball has no single top directory, wrapping");
        let target = dest_parent.join(fallback_name);
        ensure_vacant(source, &target)?;
        fs::create_dir(&target).map_err(|e| extraction_error(source, e))?;
        for entry in &entries {
            fs::rename(entry.path(), target.join(entry.file_name()))
                .map_err(|e| extraction_error(source, e))?;
        }
        target
    };
    if cancelled.load(Ordering::SeqCst) {
        if let Err(e) = fs::remove_dir_all(&root) {
            warn!(path = %root.display(), error = %e, "Could not remove abandoned extraction");
        }
        return Err(abandoned(source));
    }
    Ok(root)
}

fn abandoned(source: &Path) -> CleanerError {
    debug!(source = %source.display(), "Extraction abandoned, discarding staged tree");
    extraction_error(source, "extraction abandoned after timeout")
}

fn ensure_vacant(source: &Path, target: &Path) -> Result<()> {
    if fs::symlink_metadata(target).is_ok() {
        return Err(extraction_error(
            source,
            format!("{} already exists", target.display()),
        ));
    }
    Ok(())
}

/// Give the owner read/write (and search on directories) everywhere below
/// `root`. Symlinks are never touched. Returns the number of entries changed.
#[cfg(unix)]
pub fn grant_owner_access(root: &Path) -> usize {
    use std::os::unix::fs::PermissionsExt;

    let mut adjusted = 0;
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| root.to_path_buf());
                if let Some(source) = e.into_io_error() {
                    let err = CleanerError::PermissionAdjust { path, source };
                    warn!(error = %err, "Skipping entry during permission pass");
                }
                continue;
            }
        };
        let file_type = entry.file_type();
        if file_type.is_symlink() {
            continue;
        }
        let wanted = if file_type.is_dir() { 0o700 } else { 0o600 };
        let Ok(meta) = entry.metadata() else {
            continue;
        };
        let mode = meta.permissions().mode();
        if mode & wanted == wanted {
            continue;
        }
        match fs::set_permissions(entry.path(), fs::Permissions::from_mode(mode | wanted)) {
            Ok(()) => adjusted += 1,
            Err(source) => {
                let err = CleanerError::PermissionAdjust {
                    path: entry.path().to_path_buf(),
                    source,
                };
                warn!(error = %err, "Skipping entry during permission pass");
            }
        }
    }
    adjusted
}

#[cfg(not(unix))]
pub fn grant_owner_access(_root: &Path) -> usize {
    0
}
