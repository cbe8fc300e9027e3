//! RECORD manifest regeneration and verification.
//!
//! Each line is `<path>,sha256=<urlsafe-base64-nopad digest>,<size>`; the
//! RECORD file lists itself as `<path>,,`. Paths containing `,` or `"` are
//! CSV-quoted, as installers read RECORD with a CSV reader.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use sha2::{Digest, Sha256};
use tracing::{debug, info, Span};

use crate::archive::staged_files;
use crate::error::{RepairError, Result};
use crate::paths::{find_dist_info_dirs, relative_name};

/// File name of the manifest inside the metadata directory.
pub const RECORD_FILE: &str = "RECORD";

/// One RECORD line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordEntry {
    pub path: String,
    /// `sha256=<digest>`; `None` for RECORD itself.
    pub hash: Option<String>,
    pub size: Option<u64>,
}

impl RecordEntry {
    #[must_use]
    pub fn to_line(&self) -> String {
        let hash = self.hash.as_deref().unwrap_or("");
        let size = self.size.map(|s| s.to_string()).unwrap_or_default();
        format!("{},{hash},{size}", quote_field(&self.path))
    }

    pub fn parse_line(line: &str) -> Result<Self> {
        let fields = split_fields(line)
            .ok_or_else(|| RepairError::Manifest(format!("malformed RECORD line {line:?}")))?;
        let [path, hash, size]: [String; 3] = fields
            .try_into()
            .map_err(|_| RepairError::Manifest(format!("RECORD line needs 3 fields: {line:?}")))?;
        let size = if size.is_empty() {
            None
        } else {
            Some(size.parse::<u64>().map_err(|e| {
                RepairError::Manifest(format!("bad size in RECORD line {line:?}: {e}"))
            })?)
        };
        Ok(Self {
            path,
            hash: (!hash.is_empty()).then_some(hash),
            size,
        })
    }
}

/// Rebuilds `<name>-<version>.dist-info/RECORD` from the staged tree.
#[derive(Debug)]
pub struct ManifestRebuilder {
    log: Span,
}

impl ManifestRebuilder {
    pub fn new(log: Span) -> Self {
        Self { log }
    }

    /// The single metadata directory under `root`.
    pub fn locate(&self, root: &Path) -> Result<PathBuf> {
        let mut dirs = find_dist_info_dirs(root).map_err(|e| {
            RepairError::Manifest(format!("cannot scan {}: {e}", root.display()))
        })?;
        match dirs.len() {
            1 => Ok(dirs.remove(0)),
            0 => Err(RepairError::Manifest(format!(
                "no *.dist-info directory found in {}",
                root.display()
            ))),
            n => Err(RepairError::Manifest(format!(
                "expected one *.dist-info directory, found {n}: {}",
                dirs.iter()
                    .filter_map(|d| d.file_name())
                    .map(|n| n.to_string_lossy())
                    .collect::<Vec<_>>()
                    .join(", ")
            ))),
        }
    }

    /// Replace RECORD with entries for exactly the files now staged.
    pub fn rebuild(&self, root: &Path) -> Result<Vec<RecordEntry>> {
        let dist_info = self.locate(root)?;
        let record_path = dist_info.join(RECORD_FILE);
        let record_name = relative_name(root, &record_path).ok_or_else(|| {
            RepairError::Manifest(format!("{} is outside the staging root", record_path.display()))
        })?;

        let mut entries = Vec::new();
        let mut listed_self = false;
        for (path, name) in staged_files(root)? {
            if name == record_name {
                listed_self = true;
                entries.push(RecordEntry {
                    path: name,
                    hash: None,
                    size: None,
                });
                continue;
            }
            let (hash, size) = file_digest(&path).map_err(|e| {
                RepairError::Manifest(format!("cannot hash {}: {e}", path.display()))
            })?;
            debug!(parent: &self.log, file = %name, size, "hashed");
            entries.push(RecordEntry {
                path: name,
                hash: Some(hash),
                size: Some(size),
            });
        }
        if !listed_self {
            entries.push(RecordEntry {
                path: record_name,
                hash: None,
                size: None,
            });
        }

        let mut text = String::new();
        for entry in &entries {
            text.push_str(&entry.to_line());
            text.push('\n');
        }
        fs::write(&record_path, text).map_err(|e| {
            RepairError::Manifest(format!("cannot write {}: {e}", record_path.display()))
        })?;
        info!(parent: &self.log, record = %record_path.display(), entries = entries.len(), "rebuilt RECORD");
        Ok(entries)
    }
}

/// `sha256=<digest>` and byte size of a file.
pub fn file_digest(path: &Path) -> io::Result<(String, u64)> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let size = io::copy(&mut file, &mut hasher)?;
    Ok((
        format!("sha256={}", URL_SAFE_NO_PAD.encode(hasher.finalize())),
        size,
    ))
}

/// Parse a RECORD file.
pub fn read_record(path: &Path) -> Result<Vec<RecordEntry>> {
    let text = fs::read_to_string(path).map_err(|e| RepairError::io(path, e))?;
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .map(RecordEntry::parse_line)
        .collect()
}

/// Recompute digests for every hashed RECORD entry under `root`.
///
/// Returns the paths whose digest or size no longer match, or that are missing.
pub fn verify_record(root: &Path, record: &[RecordEntry]) -> Result<Vec<String>> {
    let mut mismatched = Vec::new();
    for entry in record {
        let Some(expected) = &entry.hash else {
            continue;
        };
        let path = root.join(&entry.path);
        match file_digest(&path) {
            Ok((hash, size)) if &hash == expected && Some(size) == entry.size => {}
            Ok(_) => mismatched.push(entry.path.clone()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => mismatched.push(entry.path.clone()),
            Err(e) => return Err(RepairError::io(path, e)),
        }
    }
    Ok(mismatched)
}

fn quote_field(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

fn split_fields(line: &str) -> Option<Vec<String>> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut chars = line.chars().peekable();
    let mut quoted = false;
    while let Some(c) = chars.next() {
        match (quoted, c) {
            (true, '"') if chars.peek() == Some(&'"') => {
                chars.next();
                current.push('"');
            }
            (true, '"') => quoted = false,
            (false, '"') if current.is_empty() => quoted = true,
            (false, ',') => fields.push(std::mem::take(&mut current)),
            (_, other) => current.push(other),
        }
    }
    if quoted {
        return None;
    }
    fields.push(current);
    Some(fields)
}
