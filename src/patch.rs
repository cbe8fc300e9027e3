//! Dynamic-section patching of one shared object at a time.
//!
//! The patcher never touches ELF bytes itself. All edits go through a
//! [`DynamicEditor`], and diagnostics through a [`DynamicDump`]; see
//! [`crate::Patchelf`] and [`crate::Readelf`] for the tool-backed implementations.

use std::path::Path;

use anyhow::Result as ToolResult;
use tracing::{debug, info, warn, Span};

use crate::config::{SoConfig, SoConfigEntry};
use crate::error::{RepairError, Result};
use crate::paths::base_name;

/// Edits and queries on a binary's dynamic section.
///
/// Every call is blocking; edits to one file are issued strictly in sequence.
pub trait DynamicEditor {
    /// Replace the runtime library search path.
    fn set_rpath(&self, file: &Path, rpath: &str) -> ToolResult<()>;

    /// Current runtime library search path (empty if none).
    fn rpath(&self, file: &Path) -> ToolResult<String>;

    /// Declared dependency names, in dynamic-section order.
    fn needed(&self, file: &Path) -> ToolResult<Vec<String>>;

    /// Rename one declared dependency.
    fn replace_needed(&self, file: &Path, old: &str, new: &str) -> ToolResult<()>;

    /// Drop one declared dependency.
    fn remove_needed(&self, file: &Path, name: &str) -> ToolResult<()>;
}

/// Read-only textual dump of a binary's dynamic metadata.
pub trait DynamicDump {
    fn dump(&self, file: &Path) -> ToolResult<String>;
}

/// Search path and dependency names reported after patching.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DynamicState {
    pub rpath: String,
    pub needed: Vec<String>,
}

pub const OP_SET_RPATH: &str = "set-rpath";
pub const OP_PRINT_RPATH: &str = "print-rpath";
pub const OP_PRINT_NEEDED: &str = "print-needed";
pub const OP_REPLACE_NEEDED: &str = "replace-needed";
pub const OP_REMOVE_NEEDED: &str = "remove-needed";

/// Applies `so_configs` to shared objects.
pub struct ElfPatcher<'a, E: ?Sized, D: ?Sized> {
    configs: &'a [SoConfigEntry],
    editor: &'a E,
    dump: &'a D,
    log: Span,
}

impl<'a, E, D> ElfPatcher<'a, E, D>
where
    E: DynamicEditor + ?Sized,
    D: DynamicDump + ?Sized,
{
    pub fn new(configs: &'a [SoConfigEntry], editor: &'a E, dump: &'a D, log: Span) -> Self {
        Self {
            configs,
            editor,
            dump,
            log,
        }
    }

    /// Settings for a shared object, by base file name. First declared match wins.
    #[must_use]
    pub fn config_for(&self, file_name: &str) -> Option<&'a SoConfig> {
        let name = base_name(file_name);
        self.configs
            .iter()
            .find(|entry| entry.pattern.is_match(name))
            .map(|entry| &entry.config)
    }

    /// Patch `file` in place.
    ///
    /// Returns `Ok(true)` only if at least one edit was issued. With no
    /// matching configuration the editor is never invoked and the file is
    /// left byte-identical.
    pub fn patch(&self, file: &Path) -> Result<bool> {
        let name = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let Some(config) = self.config_for(&name) else {
            debug!(parent: &self.log, file = %file.display(), "no so_configs entry, skipping");
            return Ok(false);
        };

        let mut edited = false;
        if let Some(rpath) = &config.rpath {
            self.editor
                .set_rpath(file, rpath)
                .map_err(|e| RepairError::patch(file, OP_SET_RPATH, e))?;
            info!(parent: &self.log, file = %file.display(), rpath = %rpath, "set rpath");
            edited = true;
        }

        for rule in &config.replace {
            for old in self.current_needed(file)? {
                if !rule.pattern.matches(&old) {
                    continue;
                }
                let new = rule.pattern.rewrite(&old, &rule.replacement);
                self.editor
                    .replace_needed(file, &old, &new)
                    .map_err(|e| RepairError::patch(file, OP_REPLACE_NEEDED, e))?;
                info!(
                    parent: &self.log,
                    file = %file.display(),
                    rule = %rule.pattern,
                    "replaced {old} with {new}"
                );
                edited = true;
            }
        }

        if !config.remove_needed.is_empty() {
            let declared = self.current_needed(file)?;
            for name in &config.remove_needed {
                if !declared.contains(name) {
                    debug!(parent: &self.log, file = %file.display(), "{name} not declared, nothing to remove");
                    continue;
                }
                self.editor
                    .remove_needed(file, name)
                    .map_err(|e| RepairError::patch(file, OP_REMOVE_NEEDED, e))?;
                info!(parent: &self.log, file = %file.display(), "removed dependency {name}");
                edited = true;
            }
        }

        if !edited {
            debug!(parent: &self.log, file = %file.display(), "configuration changed nothing");
            return Ok(false);
        }
        self.log_state(file)?;
        Ok(true)
    }

    /// Read-only view of the search path and declared dependencies.
    pub fn report(&self, file: &Path) -> Result<DynamicState> {
        let rpath = self
            .editor
            .rpath(file)
            .map_err(|e| RepairError::patch(file, OP_PRINT_RPATH, e))?;
        let needed = self.current_needed(file)?;
        Ok(DynamicState { rpath, needed })
    }

    fn current_needed(&self, file: &Path) -> Result<Vec<String>> {
        self.editor
            .needed(file)
            .map_err(|e| RepairError::patch(file, OP_PRINT_NEEDED, e))
    }

    fn log_state(&self, file: &Path) -> Result<()> {
        let state = self.report(file)?;
        info!(
            parent: &self.log,
            file = %file.display(),
            rpath = %state.rpath,
            needed = ?state.needed,
            "dynamic state after patching"
        );
        // The dump is diagnostics only; a missing readelf must not fail the run.
        match self.dump.dump(file) {
            Ok(text) => debug!(parent: &self.log, file = %file.display(), "dynamic section:\n{text}"),
            Err(e) => warn!(parent: &self.log, file = %file.display(), "dynamic section dump unavailable: {e:#}"),
        }
        Ok(())
    }
}
