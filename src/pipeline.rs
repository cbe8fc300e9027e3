//! Extract → filter/patch → rebuild RECORD → repackage, as one run.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::{debug_span, error, info, warn, Span};

use crate::archive::{repack, staged_files, ArchiveInspector};
use crate::config::RepairConfig;
use crate::error::{RepairError, Result};
use crate::exclude::ExclusionMatcher;
use crate::manifest::ManifestRebuilder;
use crate::patch::{DynamicDump, DynamicEditor, ElfPatcher};
use crate::paths::{base_name, is_shared_object};

/// Where and how a run writes its result.
#[derive(Debug, Clone)]
pub struct RepairOptions {
    /// The repaired wheel is written to `<output_dir>/<original file name>`.
    pub output_dir: PathBuf,
    /// Report intended removals and patches without changing anything.
    pub dry_run: bool,
    /// Parent directory for the staging tree; the system temp dir if `None`.
    pub staging_parent: Option<PathBuf>,
}

impl RepairOptions {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            dry_run: false,
            staging_parent: None,
        }
    }

    #[must_use]
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    #[must_use]
    pub fn staging_parent(mut self, parent: impl Into<PathBuf>) -> Self {
        self.staging_parent = Some(parent.into());
        self
    }
}

/// Progress of a run; the last stage reached is reported on failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Init,
    Extracted,
    Filtered,
    ManifestRebuilt,
    Repackaged,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Init => "init",
            Self::Extracted => "extracted",
            Self::Filtered => "filtered",
            Self::ManifestRebuilt => "manifest-rebuilt",
            Self::Repackaged => "repackaged",
        };
        f.write_str(name)
    }
}

/// What a run removed and patched (or, in dry-run, would have).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepairOutcome {
    pub removed: Vec<String>,
    pub patched: Vec<String>,
    /// Location of the repaired wheel; `None` in dry-run.
    pub output: Option<PathBuf>,
    pub dry_run: bool,
}

/// Repairs wheels with one configuration and one set of ELF tools.
///
/// Runs are synchronous and single-threaded. Two runs over the same source
/// or output must not overlap; nothing here locks.
pub struct RepairPipeline<E, D> {
    config: RepairConfig,
    editor: E,
    dump: D,
    log: Span,
}

impl<E: DynamicEditor, D: DynamicDump> RepairPipeline<E, D> {
    pub fn new(config: RepairConfig, editor: E, dump: D, log: Span) -> Self {
        Self {
            config,
            editor,
            dump,
            log,
        }
    }

    pub fn editor(&self) -> &E {
        &self.editor
    }

    /// Repair `wheel` according to `options`.
    ///
    /// The staging tree is removed before this returns, on success and on
    /// failure alike. No output file exists unless every stage succeeded.
    pub fn run(&self, wheel: &Path, options: &RepairOptions) -> Result<RepairOutcome> {
        let mut stage = Stage::Init;
        let result = self.run_stages(wheel, options, &mut stage);
        match &result {
            Ok(outcome) if outcome.dry_run => info!(
                parent: &self.log,
                would_remove = outcome.removed.len(),
                would_patch = outcome.patched.len(),
                "dry run completed, no changes were made"
            ),
            Ok(outcome) => info!(
                parent: &self.log,
                removed = outcome.removed.len(),
                patched = outcome.patched.len(),
                output = ?outcome.output,
                "repair completed"
            ),
            Err(e) => error!(parent: &self.log, stage = %stage, "repair failed: {e}"),
        }
        result
    }

    fn run_stages(
        &self,
        wheel: &Path,
        options: &RepairOptions,
        stage: &mut Stage,
    ) -> Result<RepairOutcome> {
        let file_name = wheel
            .file_name()
            .ok_or_else(|| RepairError::archive(wheel, "path has no file name"))?;
        info!(parent: &self.log, wheel = %wheel.display(), dry_run = options.dry_run, "repairing wheel");

        let inspector = ArchiveInspector::new(debug_span!(parent: &self.log, "inspect"));
        let entries = inspector.list(wheel)?;
        let matcher =
            ExclusionMatcher::new(&self.config.exclude, debug_span!(parent: &self.log, "exclude"))?;
        let excluded = matcher.matches(&entries);

        let staging = self.create_staging(options)?;
        inspector.extract(wheel, staging.path())?;
        *stage = Stage::Extracted;

        let patcher = ElfPatcher::new(
            &self.config.so_configs,
            &self.editor,
            &self.dump,
            debug_span!(parent: &self.log, "patch"),
        );
        let mut outcome = RepairOutcome {
            dry_run: options.dry_run,
            ..RepairOutcome::default()
        };
        for (path, name) in staged_files(staging.path())? {
            if excluded.contains(&name) {
                if options.dry_run {
                    info!(parent: &self.log, "would remove {name}");
                } else {
                    fs::remove_file(&path).map_err(|e| RepairError::io(&path, e))?;
                    info!(parent: &self.log, "removed {name}");
                }
                outcome.removed.push(name);
            } else if is_shared_object(base_name(&name)) {
                if options.dry_run {
                    if patcher.config_for(&name).is_some() {
                        info!(parent: &self.log, "would patch {name}");
                        outcome.patched.push(name);
                    }
                } else if patcher.patch(&path)? {
                    outcome.patched.push(name);
                }
            }
        }
        *stage = Stage::Filtered;

        if options.dry_run {
            close_staging(staging, &self.log);
            return Ok(outcome);
        }

        ManifestRebuilder::new(debug_span!(parent: &self.log, "manifest")).rebuild(staging.path())?;
        *stage = Stage::ManifestRebuilt;

        fs::create_dir_all(&options.output_dir)
            .map_err(|e| RepairError::io(&options.output_dir, e))?;
        let output = options.output_dir.join(file_name);
        repack(staging.path(), &output, &self.log)?;
        *stage = Stage::Repackaged;

        close_staging(staging, &self.log);
        outcome.output = Some(output);
        Ok(outcome)
    }

    fn create_staging(&self, options: &RepairOptions) -> Result<TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("wheel-repair-");
        let staging = match &options.staging_parent {
            Some(parent) => builder.tempdir_in(parent).map_err(|e| RepairError::io(parent, e))?,
            None => builder
                .tempdir()
                .map_err(|e| RepairError::io(std::env::temp_dir(), e))?,
        };
        info!(parent: &self.log, staging = %staging.path().display(), "created staging directory");
        Ok(staging)
    }
}

// Error paths rely on TempDir's drop; here a failed removal is at least reported.
fn close_staging(staging: TempDir, log: &Span) {
    let path = staging.path().to_path_buf();
    if let Err(e) = staging.close() {
        warn!(parent: log, staging = %path.display(), "failed to remove staging directory: {e}");
    }
}
