//! Path naming helpers for staged wheel contents.

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

/// Suffix of the wheel metadata directory (`<name>-<version>.dist-info`).
pub const DIST_INFO_SUFFIX: &str = ".dist-info";

/// Check whether a file name looks like a shared object.
///
/// Accepts `libfoo.so` as well as versioned names such as `libfoo.so.1`
/// and `libfoo.so.1.2.3`. A suffix after `.so.` must be digits and dots.
#[must_use]
pub fn is_shared_object(file_name: &str) -> bool {
    if file_name.ends_with(".so") {
        return true;
    }
    match file_name.rfind(".so.") {
        Some(idx) => {
            let version = &file_name[idx + 4..];
            !version.is_empty() && version.chars().all(|c| c.is_ascii_digit() || c == '.')
        }
        None => false,
    }
}

/// Base file name of a relative archive path (`pkg/lib/foo.so` -> `foo.so`).
#[must_use]
pub fn base_name(relative: &str) -> &str {
    relative.rsplit('/').next().unwrap_or(relative)
}

/// Express `path` relative to `root` using `/` separators, as archive names are.
///
/// Returns `None` if `path` is not under `root`.
#[must_use]
pub fn relative_name(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let mut parts = Vec::new();
    for component in rel.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
            _ => return None,
        }
    }
    if parts.is_empty() {
        return None;
    }
    Some(parts.join("/"))
}

/// Check a directory name against the `<name>-<version>.dist-info` pattern.
#[must_use]
pub fn is_dist_info_name(dir_name: &str) -> bool {
    let Some(stem) = dir_name.strip_suffix(DIST_INFO_SUFFIX) else {
        return false;
    };
    match stem.split_once('-') {
        Some((name, version)) => !name.is_empty() && !version.is_empty(),
        None => false,
    }
}

/// Find every metadata directory directly under the staging root.
///
/// The result is sorted; callers decide what zero or several matches mean.
#[must_use = "metadata directories should be checked"]
pub fn find_dist_info_dirs(root: &Path) -> io::Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    for entry in fs::read_dir(root)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        if is_dist_info_name(&entry.file_name().to_string_lossy()) {
            found.push(entry.path());
        }
    }
    found.sort();
    Ok(found)
}
