//! Post-extraction tree normalisation.
//!
//! Archives on Nexus come in every shape: wrapper folders named after the
//! mod version, a `Data/` level that MO2 does not want, entry names with
//! literal backslashes from Windows-built archives, and sibling variant
//! folders meant to be picked by hand. These passes rewrite an extracted
//! tree into the layout MO2 expects. All passes are idempotent.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::paths::{find_existing_dir, to_forward_slashes};

/// Game-data folders that are genuine mod content and must never be
/// unwrapped as if they were version wrappers.
const GAME_DATA_FOLDERS: &[&str] = &[
    "meshes",
    "textures",
    "scripts",
    "sound",
    "interface",
    "strings",
    "seq",
    "grass",
    "video",
    "music",
    "shaders",
    "shadersfx",
    "lodsettings",
    "skse",
    "netscriptframework",
    "edit scripts",
    "dialogueviews",
    "facegen",
    "caliente tools",
    "actors",
    "fonts",
    "materials",
    "platform",
    "source",
    "terrain",
    "trees",
    "vis",
    "distantlod",
    "lod",
    "dyndolod",
    "nemesis_engine",
];

/// Extensions of files that never count as mod content.
const JUNK_EXTENSIONS: &[&str] = &[
    ".txt", ".md", ".pdf", ".doc", ".docx", ".rtf", ".url", ".ini", ".png", ".jpg", ".jpeg",
    ".bmp", ".gif",
];

/// Filename fragments that never count as mod content.
const JUNK_NAMES: &[&str] = &[
    "readme",
    "license",
    "changelog",
    "credits",
    "authors",
    "install",
    "instructions",
];

fn is_game_data_folder(name: &str) -> bool {
    let lower = name.to_lowercase();
    GAME_DATA_FOLDERS.contains(&lower.as_str())
}

fn is_data_folder(name: &str) -> bool {
    name.eq_ignore_ascii_case("data")
}

/// Whether a file is documentation/preview junk that should not prevent
/// wrapper unwrapping or variant selection.
pub fn is_junk_file(name: &str) -> bool {
    let lower = name.to_lowercase();

    if JUNK_EXTENSIONS.iter().any(|ext| lower.ends_with(ext)) {
        return true;
    }

    JUNK_NAMES.iter().any(|junk| lower.contains(junk))
}

/// Pass (a): relocate files whose *name* contains literal backslashes.
///
/// Windows-built archives can carry entry names like `SKSE\Plugins\foo.dll`
/// which 7-Zip on Linux extracts as a single file with backslashes in its
/// name. Each such file is moved to the path obtained by treating the
/// backslashes as separators.
pub fn fix_backslash_filenames(root: &Path) -> Result<()> {
    let broken: Vec<PathBuf> = WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| e.file_name().to_string_lossy().contains('\\'))
        .map(|e| e.path().to_path_buf())
        .collect();

    for file in broken {
        let name = file.file_name().unwrap_or_default().to_string_lossy().to_string();
        let parent = file.parent().unwrap_or(root);
        let fixed = parent.join(to_forward_slashes(&name));

        if let Some(fixed_parent) = fixed.parent() {
            fs::create_dir_all(fixed_parent)
                .with_context(|| format!("Failed to create {}", fixed_parent.display()))?;
        }

        debug!("Relocating backslash entry: {} -> {}", name, fixed.display());
        if let Err(e) = fs::rename(&file, &fixed) {
            warn!("Failed to relocate {}: {}", file.display(), e);
        }
    }

    Ok(())
}

/// Split a directory's children into (subdirectories, has-significant-files).
fn scan_level(dir: &Path) -> Result<(Vec<PathBuf>, bool)> {
    let mut dirs = Vec::new();
    let mut has_significant = false;

    for entry in fs::read_dir(dir)
        .with_context(|| format!("Failed to read {}", dir.display()))?
        .flatten()
    {
        let path = entry.path();
        if path.is_dir() {
            dirs.push(path);
        } else if !is_junk_file(&entry.file_name().to_string_lossy()) {
            has_significant = true;
        }
    }

    Ok((dirs, has_significant))
}

/// Pass (b): descend through wrapper folders to the real content root.
///
/// A level is unwrapped while it holds exactly one sub-directory and no
/// significant files. A `Data` folder is always stepped into; a known
/// game-data folder (`meshes`, `textures`, ...) stops the descent because
/// it IS the content.
pub fn unwrap_wrapper_folders(extracted: &Path) -> PathBuf {
    let mut current = extracted.to_path_buf();

    loop {
        let (dirs, has_significant) = match scan_level(&current) {
            Ok(scan) => scan,
            Err(_) => return current,
        };

        if dirs.len() != 1 || has_significant {
            return current;
        }

        let single = &dirs[0];
        let name = single
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        if is_data_folder(&name) {
            debug!("Unwrapping Data folder");
            current = single.clone();
            continue;
        }

        if is_game_data_folder(&name) {
            return current;
        }

        debug!("Unwrapping wrapper folder: {}", name);
        current = single.clone();
    }
}

/// Pass (c): pick a variant sub-folder by mod display name.
///
/// Applies only to mods without a FOMOD installer: when the content root
/// holds several sibling folders (and nothing significant beside them) and
/// one of them matches the mod's display name case-insensitively, that
/// folder becomes the install root.
pub fn select_variant_folder(content_root: &Path, mod_name: &str) -> PathBuf {
    let (dirs, has_significant) = match scan_level(content_root) {
        Ok(scan) => scan,
        Err(_) => return content_root.to_path_buf(),
    };

    if dirs.len() <= 1 || has_significant {
        return content_root.to_path_buf();
    }

    for dir in &dirs {
        let folder_name = dir
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        if folder_name.eq_ignore_ascii_case(mod_name) {
            debug!("Selected variant folder: {}", folder_name);
            return dir.clone();
        }
    }

    content_root.to_path_buf()
}

/// Pass (d): flatten a top-level `Data/` folder into the install root.
///
/// Children of `Data/` move up one level; directory collisions merge
/// case-insensitively, file collisions overwrite.
pub fn flatten_data_folder(mod_root: &Path) -> Result<()> {
    let data_path = match fs::read_dir(mod_root) {
        Ok(entries) => entries
            .flatten()
            .map(|e| e.path())
            .find(|p| {
                p.is_dir()
                    && p.file_name()
                        .map(|n| is_data_folder(&n.to_string_lossy()))
                        .unwrap_or(false)
            }),
        Err(_) => None,
    };

    let data_path = match data_path {
        Some(p) => p,
        None => return Ok(()),
    };

    debug!("Flattening Data folder in {}", mod_root.display());

    for entry in fs::read_dir(&data_path)?.flatten() {
        let src = entry.path();
        let name = entry.file_name().to_string_lossy().to_string();

        if src.is_dir() {
            match find_existing_dir(mod_root, &name) {
                Some(existing) => {
                    merge_directories(&src, &existing)?;
                    fs::remove_dir_all(&src)?;
                }
                None => fs::rename(&src, mod_root.join(&name))?,
            }
        } else {
            let dst = mod_root.join(&name);
            if dst.is_file() {
                fs::remove_file(&dst)?;
            }
            fs::rename(&src, &dst)?;
        }
    }

    let _ = fs::remove_dir(&data_path);
    Ok(())
}

/// Recursively copy `src` into `dst`, reusing case-insensitively matching
/// destination folders (first encountered casing wins) and overwriting
/// files on name collision.
pub fn merge_directories(src: &Path, dst: &Path) -> Result<()> {
    if !dst.exists() {
        fs::create_dir_all(dst).with_context(|| format!("Failed to create {}", dst.display()))?;
    }

    for entry in fs::read_dir(src)
        .with_context(|| format!("Failed to read {}", src.display()))?
        .flatten()
    {
        let src_path = entry.path();
        let item_name = entry.file_name().to_string_lossy().to_string();

        if src_path.is_dir() {
            let target = match find_existing_dir(dst, &item_name) {
                Some(existing) => existing,
                None => {
                    let new_dir = dst.join(&item_name);
                    fs::create_dir_all(&new_dir)?;
                    new_dir
                }
            };
            merge_directories(&src_path, &target)?;
        } else {
            let target = dst.join(&item_name);
            fs::copy(&src_path, &target).with_context(|| {
                format!("Failed to copy {} -> {}", src_path.display(), target.display())
            })?;
        }
    }

    Ok(())
}
