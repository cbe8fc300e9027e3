//! `patchelf` and `readelf` backed dynamic-section tools.
//!
//! Both tools read and rewrite ELF headers directly, so this works for
//! foreign-architecture wheels too: nothing here executes the binary.

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::patch::{DynamicDump, DynamicEditor};

/// Runs `patchelf` once per operation.
#[derive(Debug, Clone)]
pub struct Patchelf {
    program: PathBuf,
}

impl Default for Patchelf {
    fn default() -> Self {
        Self::new("patchelf")
    }
}

impl Patchelf {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn run(&self, args: &[&str], file: &Path) -> Result<String> {
        if !file.exists() {
            bail!("File does not exist: {}", file.display());
        }

        let output = Command::new(&self.program)
            .args(args)
            .arg(file)
            .output()
            .with_context(|| {
                format!(
                    "{} command not found - install patchelf",
                    self.program.display()
                )
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "patchelf {} failed on {}: {}",
                args.join(" "),
                file.display(),
                stderr.trim()
            );
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl DynamicEditor for Patchelf {
    fn set_rpath(&self, file: &Path, rpath: &str) -> Result<()> {
        self.run(&["--set-rpath", rpath], file).map(drop)
    }

    fn rpath(&self, file: &Path) -> Result<String> {
        let output = self.run(&["--print-rpath"], file)?;
        Ok(output.trim().to_string())
    }

    fn needed(&self, file: &Path) -> Result<Vec<String>> {
        let output = self.run(&["--print-needed"], file)?;
        Ok(parse_needed_output(&output))
    }

    fn replace_needed(&self, file: &Path, old: &str, new: &str) -> Result<()> {
        self.run(&["--replace-needed", old, new], file).map(drop)
    }

    fn remove_needed(&self, file: &Path, name: &str) -> Result<()> {
        self.run(&["--remove-needed", name], file).map(drop)
    }
}

/// Parse `patchelf --print-needed` output: one library name per line.
pub fn parse_needed_output(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Produces `readelf -d` dumps for diagnostics.
#[derive(Debug, Clone)]
pub struct Readelf {
    program: PathBuf,
}

impl Default for Readelf {
    fn default() -> Self {
        Self::new("readelf")
    }
}

impl Readelf {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl DynamicDump for Readelf {
    /// Returns an empty dump for files that are not dynamic ELF objects.
    fn dump(&self, file: &Path) -> Result<String> {
        if !file.exists() {
            bail!("File does not exist: {}", file.display());
        }

        let output = Command::new(&self.program)
            .args(["-d"])
            .arg(file)
            .output()
            .context("readelf command not found - install binutils")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if is_not_elf(&stderr) {
                return Ok(String::new());
            }
            bail!("readelf failed on {}: {}", file.display(), stderr.trim());
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

fn is_not_elf(stderr: &str) -> bool {
    stderr.contains("Not an ELF file")
        || stderr.contains("not a dynamic executable")
        || stderr.contains("File format not recognized")
}
