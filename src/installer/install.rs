//! Phase 2: the parallel install pool.
//!
//! Each task owns a unique destination folder and a unique scratch path
//! (the ordinal is baked into the scratch name), so workers never touch
//! the same directories. A task extracts its archive, normalises the
//! tree, then installs via FOMOD, the expected-paths fallback, or a
//! plain variant-selected copy, and finally flattens any Data/ level.
//! Failures are counted, never propagated across the pool; a failed
//! task's destination is left in place for inspection.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{Context, Result};
use rayon::prelude::*;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::archive::normalize::{
    fix_backslash_filenames, flatten_data_folder, merge_directories, select_variant_folder,
    unwrap_wrapper_folders,
};
use crate::archive::sevenzip::extract_archive;
use crate::collection::{ChoiceSet, FomodChoices};
use crate::fomod::{find_module_config, parse_module_config, run_fomod};
use crate::mo2::write_meta_ini;
use crate::progress;

/// One mod installation, self-contained.
#[derive(Debug)]
pub struct InstallTask {
    pub archive_path: PathBuf,
    pub dest_dir: PathBuf,
    /// Scratch root; the task extracts into `<scratch>/<folder>_<ordinal>`.
    pub scratch_base: PathBuf,
    pub folder_name: String,
    pub mod_name: String,
    pub mod_id: i64,
    pub choices: Option<FomodChoices>,
    pub expected_paths: Vec<String>,
    /// Position of this mod in the collection; also disambiguates the
    /// scratch path.
    pub ordinal: usize,
    pub total: usize,
}

/// Counters for the install phase.
#[derive(Debug, Default)]
pub struct InstallStats {
    pub installed: usize,
    pub failed: usize,
}

/// Copy files matching the descriptor's expected paths out of the
/// extracted tree. Paths match case-insensitively, first exactly, then by
/// suffix (FOMOD archives keep payload in option sub-folders). Returns
/// how many files were placed.
fn install_expected_paths(
    content_root: &Path,
    dest_dir: &Path,
    expected_paths: &[String],
) -> Result<usize> {
    fs::create_dir_all(dest_dir)?;

    let mut archive_files: HashMap<String, PathBuf> = HashMap::new();
    for entry in WalkDir::new(content_root).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(content_root)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .replace('\\', "/")
            .to_lowercase();
        archive_files.insert(rel, entry.path().to_path_buf());
    }

    let mut copied = 0usize;
    for expected in expected_paths {
        let wanted = expected.to_lowercase();

        let source = archive_files.get(&wanted).cloned().or_else(|| {
            archive_files
                .iter()
                .find(|(rel, _)| rel.ends_with(&wanted))
                .map(|(_, path)| path.clone())
        });

        let Some(source) = source else {
            debug!("Expected file not in archive: {}", expected);
            continue;
        };

        let dest = dest_dir.join(expected);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(&source, &dest)
            .with_context(|| format!("Failed to copy {}", source.display()))?;
        copied += 1;
    }

    Ok(copied)
}

/// Copy the whole (variant-selected) tree into the destination.
fn install_plain(content_root: &Path, dest_dir: &Path, mod_name: &str) -> Result<()> {
    let install_from = select_variant_folder(content_root, mod_name);
    fs::create_dir_all(dest_dir)?;
    merge_directories(&install_from, dest_dir)?;
    Ok(())
}

/// Install one mod from its archive. The caller owns progress reporting
/// and failure counting.
fn install_one(task: &InstallTask) -> Result<()> {
    let scratch = task
        .scratch_base
        .join(format!("{}_{}", task.folder_name, task.ordinal));

    if scratch.exists() {
        fs::remove_dir_all(&scratch)
            .with_context(|| format!("Failed to clear scratch {}", scratch.display()))?;
    }

    let outcome = (|| -> Result<()> {
        extract_archive(&task.archive_path, &scratch)?;
        fix_backslash_filenames(&scratch)?;

        let content_root = unwrap_wrapper_folders(&scratch);

        let fomod = find_module_config(&content_root);
        let choices = task
            .choices
            .as_ref()
            .filter(|c| !c.options.is_empty());

        match (fomod, choices) {
            (Some((config_path, data_root)), Some(choices)) => {
                let config = parse_module_config(&config_path)?;
                let choice_set = ChoiceSet::from_choices(choices);
                fs::create_dir_all(&task.dest_dir)?;
                run_fomod(&data_root, &task.dest_dir, &config, &choice_set)?;
            }
            (Some(_), None) if !task.expected_paths.is_empty() => {
                // FOMOD without recorded choices: fall back to the
                // descriptor's expected file list.
                let copied =
                    install_expected_paths(&content_root, &task.dest_dir, &task.expected_paths)?;
                if copied == 0 {
                    warn!(
                        "Expected-path install found nothing for {}; copying tree",
                        task.mod_name
                    );
                    install_plain(&content_root, &task.dest_dir, &task.mod_name)?;
                }
            }
            _ => install_plain(&content_root, &task.dest_dir, &task.mod_name)?,
        }

        flatten_data_folder(&task.dest_dir)?;

        if task.mod_id > 0 {
            write_meta_ini(&task.dest_dir, task.mod_id)?;
        }

        Ok(())
    })();

    // Scratch is removed on every exit path; the destination stays put on
    // failure so the user can inspect it.
    let _ = fs::remove_dir_all(&scratch);

    outcome
}

/// Run the install pool over all tasks with `workers` threads.
pub fn run_install_phase(tasks: &[InstallTask], workers: usize) -> InstallStats {
    let installed = AtomicUsize::new(0);
    let failed = AtomicUsize::new(0);

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers.max(1))
        .build();

    let body = || {
        tasks.par_iter().for_each(|task| {
            match install_one(task) {
                Ok(()) => {
                    installed.fetch_add(1, Ordering::Relaxed);
                    progress::print_line(&format!(
                        "  [{}/{}] {} - Done!",
                        task.ordinal + 1,
                        task.total,
                        task.mod_name
                    ));
                }
                Err(e) => {
                    failed.fetch_add(1, Ordering::Relaxed);
                    progress::print_line(&format!(
                        "  [{}/{}] {} - FAILED: {:#}",
                        task.ordinal + 1,
                        task.total,
                        task.mod_name,
                        e
                    ));
                }
            }
        });
    };

    match pool {
        Ok(pool) => pool.install(body),
        Err(e) => {
            warn!("Falling back to the global thread pool: {}", e);
            body();
        }
    }

    InstallStats {
        installed: installed.load(Ordering::Relaxed),
        failed: failed.load(Ordering::Relaxed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn touch(path: &Path, content: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_install_expected_paths_exact_and_suffix() {
        let src = tempdir().unwrap();
        let dst = tempdir().unwrap();
        touch(&src.path().join("Core.esp"), "core");
        touch(&src.path().join("00 Option/meshes/a.nif"), "nif");

        let expected = vec!["core.esp".to_string(), "meshes/a.nif".to_string()];
        let copied = install_expected_paths(src.path(), dst.path(), &expected).unwrap();

        assert_eq!(copied, 2);
        assert!(dst.path().join("core.esp").is_file());
        // Suffix match digs the file out of the option folder but installs
        // it at the expected path.
        assert!(dst.path().join("meshes/a.nif").is_file());
    }

    #[test]
    fn test_install_expected_paths_missing_files_skipped() {
        let src = tempdir().unwrap();
        let dst = tempdir().unwrap();
        touch(&src.path().join("present.esp"), "x");

        let expected = vec!["present.esp".to_string(), "missing.esp".to_string()];
        let copied = install_expected_paths(src.path(), dst.path(), &expected).unwrap();

        assert_eq!(copied, 1);
        assert!(!dst.path().join("missing.esp").exists());
    }

    #[test]
    fn test_install_plain_selects_variant() {
        let src = tempdir().unwrap();
        let dst = tempdir().unwrap();
        touch(&src.path().join("Version A/a.esp"), "a");
        touch(&src.path().join("Version B/b.esp"), "b");

        install_plain(src.path(), dst.path(), "Version B").unwrap();

        assert!(dst.path().join("b.esp").is_file());
        assert!(!dst.path().join("a.esp").exists());
        assert!(!dst.path().join("Version A").exists());
    }

    #[test]
    fn test_install_plain_copies_everything_without_variant() {
        let src = tempdir().unwrap();
        let dst = tempdir().unwrap();
        touch(&src.path().join("meshes/a.nif"), "a");
        touch(&src.path().join("mod.esp"), "esp");

        install_plain(src.path(), dst.path(), "Unrelated Name").unwrap();

        assert!(dst.path().join("meshes/a.nif").is_file());
        assert!(dst.path().join("mod.esp").is_file());
    }
}
