//! FOMOD conditional-installer support.
//!
//! FOMOD is an XML-driven installer format: `fomod/ModuleConfig.xml`
//! describes required files, wizard steps with option groups, and
//! flag-gated conditional installs. We never show the wizard; the
//! collection descriptor carries the author's selections and the executor
//! replays them.

pub mod encoding;
pub mod executor;
pub mod parser;

pub use executor::{run_fomod, FomodOutcome};
pub use parser::{parse_module_config, ModuleConfig};

use std::path::{Path, PathBuf};

use walkdir::WalkDir;

/// Locate `fomod/ModuleConfig.xml` (both names case-insensitive) under an
/// extracted archive.
///
/// Returns the config path and the data root (the parent of the `fomod`
/// folder), against which all install sources resolve.
pub fn find_module_config(archive_root: &Path) -> Option<(PathBuf, PathBuf)> {
    for entry in WalkDir::new(archive_root).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let name = path.file_name()?.to_string_lossy().to_lowercase();
        if name != "moduleconfig.xml" {
            continue;
        }

        let parent = path.parent()?;
        let parent_name = parent.file_name()?.to_string_lossy().to_lowercase();
        if parent_name == "fomod" {
            let data_root = parent.parent()?.to_path_buf();
            return Some((path.to_path_buf(), data_root));
        }
    }

    None
}

/// Whether the extracted tree carries a FOMOD installer.
pub fn has_fomod(archive_root: &Path) -> bool {
    find_module_config(archive_root).is_some()
}
