//! Wheel archive reading, staging and repackaging.

use std::fs::{self, File};
use std::io::{self, BufReader};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use tracing::{debug, info, Span};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::{RepairError, Result};
use crate::paths::relative_name;

/// Read-only access to a wheel's zip container.
#[derive(Debug)]
pub struct ArchiveInspector {
    log: Span,
}

impl ArchiveInspector {
    pub fn new(log: Span) -> Self {
        Self { log }
    }

    fn open(&self, wheel: &Path) -> Result<ZipArchive<BufReader<File>>> {
        let file = File::open(wheel).map_err(|e| RepairError::archive(wheel, e))?;
        ZipArchive::new(BufReader::new(file)).map_err(|e| RepairError::archive(wheel, e))
    }

    /// File entries of the archive, in archive order. Directory entries are skipped.
    pub fn list(&self, wheel: &Path) -> Result<Vec<String>> {
        let mut archive = self.open(wheel)?;
        let mut entries = Vec::with_capacity(archive.len());
        for index in 0..archive.len() {
            let entry = archive
                .by_index_raw(index)
                .map_err(|e| RepairError::archive(wheel, e))?;
            if !entry.is_dir() {
                entries.push(entry.name().to_string());
            }
        }
        debug!(parent: &self.log, wheel = %wheel.display(), entries = entries.len(), "listed archive");
        Ok(entries)
    }

    /// Unpack every entry under `dest`, restoring unix permissions.
    ///
    /// Staged copies are always owner-writable so they can be patched and
    /// rewritten. Entries whose names would escape `dest` are rejected.
    /// Any failure to stage an entry is an archive error.
    pub fn extract(&self, wheel: &Path, dest: &Path) -> Result<usize> {
        let mut archive = self.open(wheel)?;
        let mut files = 0;
        for index in 0..archive.len() {
            let mut entry = archive
                .by_index(index)
                .map_err(|e| RepairError::archive(wheel, e))?;
            let Some(relative) = entry.enclosed_name() else {
                return Err(RepairError::archive(
                    wheel,
                    format!("entry {:?} escapes the archive root", entry.name()),
                ));
            };
            let target = dest.join(relative);

            if entry.is_dir() {
                fs::create_dir_all(&target).map_err(|e| RepairError::archive(wheel, e))?;
                continue;
            }
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).map_err(|e| RepairError::archive(wheel, e))?;
            }
            let mut out = File::create(&target).map_err(|e| {
                RepairError::archive(wheel, format!("cannot stage {}: {e}", target.display()))
            })?;
            io::copy(&mut entry, &mut out).map_err(|e| RepairError::archive(wheel, e))?;
            if let Some(mode) = entry.unix_mode() {
                fs::set_permissions(&target, fs::Permissions::from_mode((mode & 0o7777) | 0o200))
                    .map_err(|e| RepairError::archive(wheel, e))?;
            }
            files += 1;
        }
        debug!(parent: &self.log, wheel = %wheel.display(), files, "extracted archive");
        Ok(files)
    }
}

/// Every regular file under `root` in deterministic (name-sorted) walk order,
/// paired with its `/`-separated relative name.
pub fn staged_files(root: &Path) -> Result<Vec<(PathBuf, String)>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(root).to_path_buf();
            RepairError::io(path, io::Error::other(e))
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        if let Some(name) = relative_name(root, entry.path()) {
            files.push((entry.into_path(), name));
        }
    }
    Ok(files)
}

/// Zip the staging tree into `output`.
///
/// The archive is written to a temporary file beside `output` and renamed
/// into place once complete.
pub fn repack(root: &Path, output: &Path, log: &Span) -> Result<usize> {
    let parent = output
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let temp = tempfile::Builder::new()
        .prefix(".wheel-repair-")
        .suffix(".whl.part")
        .tempfile_in(parent)
        .map_err(|e| RepairError::io(parent, e))?;

    let mut writer = ZipWriter::new(temp.as_file());
    let files = staged_files(root)?;
    for (path, name) in &files {
        let mode = fs::metadata(path)
            .map_err(|e| RepairError::io(path, e))?
            .permissions()
            .mode();
        let options = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .unix_permissions(mode & 0o7777);
        writer
            .start_file(name.as_str(), options)
            .map_err(|e| RepairError::io(output, io::Error::other(e)))?;
        let mut input = File::open(path).map_err(|e| RepairError::io(path, e))?;
        io::copy(&mut input, &mut writer).map_err(|e| RepairError::io(path, e))?;
        debug!(parent: log, "added {name}");
    }
    writer
        .finish()
        .map_err(|e| RepairError::io(output, io::Error::other(e)))?;

    temp.persist(output)
        .map_err(|e| RepairError::io(output, e.error))?;
    info!(parent: log, output = %output.display(), files = files.len(), "wrote repaired wheel");
    Ok(files.len())
}
