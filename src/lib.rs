//! Post-build repair of native Python wheels.
//!
//! A repair run unpacks a wheel into a private staging directory, drops
//! bundled files selected by exclusion rules, patches the dynamic section
//! (RPATH and NEEDED entries) of the shared objects that remain, rewrites
//! `*.dist-info/RECORD`, and zips the result into the output directory.
//!
//! ELF edits go through the [`DynamicEditor`] trait. The shipped
//! implementation drives `patchelf`; diagnostics dumps use `readelf -d`.
//! Neither tool executes the binary, so foreign-architecture wheels work.

mod archive;
mod config;
mod error;
mod exclude;
mod manifest;
mod patch;
mod paths;
mod pipeline;
mod tools;

pub use archive::{repack, staged_files, ArchiveInspector};
pub use config::{ExclusionRule, NamePattern, RenameRule, RepairConfig, SoConfig, SoConfigEntry};
pub use error::{RepairError, Result};
pub use exclude::ExclusionMatcher;
pub use manifest::{file_digest, read_record, verify_record, ManifestRebuilder, RecordEntry, RECORD_FILE};
pub use patch::{
    DynamicDump, DynamicEditor, DynamicState, ElfPatcher, OP_PRINT_NEEDED, OP_PRINT_RPATH,
    OP_REMOVE_NEEDED, OP_REPLACE_NEEDED, OP_SET_RPATH,
};
pub use paths::{base_name, find_dist_info_dirs, is_dist_info_name, is_shared_object, relative_name};
pub use pipeline::{RepairOptions, RepairOutcome, RepairPipeline, Stage};
pub use tools::{parse_needed_output, Patchelf, Readelf};
