//! Shared fixtures: wheel builders and a fake dynamic-section editor.
//!
//! Fake shared objects are text files:
//!
//! ```text
//! FAKEELF
//! RPATH=$ORIGIN
//! NEEDED=libc.so.6
//! ```

#![allow(dead_code)]

use std::cell::RefCell;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use wheel_repair::{DynamicDump, DynamicEditor};
use zip::write::SimpleFileOptions;
use zip::{ZipArchive, ZipWriter};

const MAGIC: &str = "FAKEELF";

/// Text body of a fake shared object.
pub fn fake_elf(rpath: &str, needed: &[&str]) -> String {
    let mut text = format!("{MAGIC}\nRPATH={rpath}\n");
    for name in needed {
        text.push_str(&format!("NEEDED={name}\n"));
    }
    text
}

#[derive(Debug, Default, Clone, PartialEq)]
struct FakeSection {
    rpath: String,
    needed: Vec<String>,
}

impl FakeSection {
    fn load(file: &Path) -> Result<Self> {
        let text = fs::read_to_string(file)
            .with_context(|| format!("File does not exist: {}", file.display()))?;
        let mut lines = text.lines();
        if lines.next() != Some(MAGIC) {
            bail!("not an ELF file: {}", file.display());
        }
        let mut section = Self::default();
        for line in lines {
            if let Some(rpath) = line.strip_prefix("RPATH=") {
                section.rpath = rpath.to_string();
            } else if let Some(name) = line.strip_prefix("NEEDED=") {
                section.needed.push(name.to_string());
            }
        }
        Ok(section)
    }

    fn store(&self, file: &Path) -> Result<()> {
        let needed: Vec<&str> = self.needed.iter().map(String::as_str).collect();
        fs::write(file, fake_elf(&self.rpath, &needed))?;
        Ok(())
    }
}

/// Editor over fake shared objects; records every call by operation name.
#[derive(Debug, Default)]
pub struct FakeEditor {
    pub calls: RefCell<Vec<String>>,
    pub fail_on: Option<&'static str>,
}

impl FakeEditor {
    pub fn failing_on(operation: &'static str) -> Self {
        Self {
            fail_on: Some(operation),
            ..Self::default()
        }
    }

    fn record(&self, operation: &'static str, file: &Path) -> Result<()> {
        let name = file.file_name().unwrap_or_default().to_string_lossy();
        self.calls.borrow_mut().push(format!("{operation} {name}"));
        if self.fail_on == Some(operation) {
            bail!("patchelf {operation} failed on {}: simulated failure", file.display());
        }
        Ok(())
    }

    pub fn mutating_calls(&self) -> Vec<String> {
        self.calls
            .borrow()
            .iter()
            .filter(|c| !c.starts_with("print-"))
            .cloned()
            .collect()
    }
}

impl DynamicEditor for FakeEditor {
    fn set_rpath(&self, file: &Path, rpath: &str) -> Result<()> {
        self.record("set-rpath", file)?;
        let mut section = FakeSection::load(file)?;
        section.rpath = rpath.to_string();
        section.store(file)
    }

    fn rpath(&self, file: &Path) -> Result<String> {
        self.record("print-rpath", file)?;
        Ok(FakeSection::load(file)?.rpath)
    }

    fn needed(&self, file: &Path) -> Result<Vec<String>> {
        self.record("print-needed", file)?;
        Ok(FakeSection::load(file)?.needed)
    }

    fn replace_needed(&self, file: &Path, old: &str, new: &str) -> Result<()> {
        self.record("replace-needed", file)?;
        let mut section = FakeSection::load(file)?;
        for name in &mut section.needed {
            if name == old {
                *name = new.to_string();
            }
        }
        section.store(file)
    }

    fn remove_needed(&self, file: &Path, name: &str) -> Result<()> {
        self.record("remove-needed", file)?;
        let mut section = FakeSection::load(file)?;
        section.needed.retain(|n| n != name);
        section.store(file)
    }
}

/// Dump that echoes the fake section text.
pub struct FakeDump;

impl DynamicDump for FakeDump {
    fn dump(&self, file: &Path) -> Result<String> {
        Ok(fs::read_to_string(file)?)
    }
}

/// Read the search path of a fake shared object.
pub fn fake_rpath(file: &Path) -> String {
    FakeSection::load(file).unwrap().rpath
}

/// Read the declared dependencies of a fake shared object.
pub fn fake_needed(file: &Path) -> Vec<String> {
    FakeSection::load(file).unwrap().needed
}

/// Write a wheel containing `files` in the given order.
pub fn build_wheel(path: &Path, files: &[(&str, &str)]) {
    let file = File::create(path).unwrap();
    let mut zip = ZipWriter::new(file);
    for (name, content) in files {
        let mode = if name.ends_with(".so") || name.contains(".so.") {
            0o755
        } else {
            0o644
        };
        zip.start_file(*name, SimpleFileOptions::default().unix_permissions(mode))
            .unwrap();
        zip.write_all(content.as_bytes()).unwrap();
    }
    zip.finish().unwrap();
}

/// The scenario wheel: a native module that links a bundled libtorch.
pub fn torch_wheel(dir: &Path) -> PathBuf {
    let wheel = dir.join("pkg-1.0-cp310-cp310-manylinux_2_17_x86_64.whl");
    let native = fake_elf("", &["libtorch_cpu.so.2", "libgomp-a34b3233.so.1", "libc.so.6"]);
    let torch = fake_elf("$ORIGIN", &["libc.so.6"]);
    let helper = fake_elf("", &["libc.so.6"]);
    build_wheel(&wheel, &[
        ("pkg/__init__.py", "from ._native import *\n"),
        ("pkg/_native.so", native.as_str()),
        ("pkg/libtorch_cpu.so.2", torch.as_str()),
        ("pkg/helper.so", helper.as_str()),
        ("pkg-1.0.dist-info/METADATA", "Metadata-Version: 2.1\nName: pkg\nVersion: 1.0\n"),
        ("pkg-1.0.dist-info/WHEEL", "Wheel-Version: 1.0\nRoot-Is-Purelib: false\n"),
        (
            "pkg-1.0.dist-info/RECORD",
            "pkg/__init__.py,sha256=stale,1\npkg/libtorch_cpu.so.2,sha256=stale,2\npkg-1.0.dist-info/RECORD,,\n",
        ),
    ]);
    wheel
}

/// Read one entry of a wheel.
pub fn read_entry(wheel: &Path, name: &str) -> Vec<u8> {
    let mut archive = ZipArchive::new(File::open(wheel).unwrap()).unwrap();
    let mut entry = archive.by_name(name).unwrap();
    let mut data = Vec::new();
    entry.read_to_end(&mut data).unwrap();
    data
}

/// Names of entries left under a directory (non-recursive).
pub fn dir_entries(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}
