//! Path and name handling shared across the pipeline.
//!
//! Collection descriptors and FOMOD configs are written on Windows, so
//! every path that reaches us may use backslashes and any casing. This
//! module handles:
//! - Sanitising mod folder names for the target filesystem
//! - Converting `\` separators to `/`
//! - Case-insensitive path resolution (one directory scan per segment)
//! - Locating the Nexus API key on disk

use std::fs;
use std::path::{Path, PathBuf};

/// Characters that cannot appear in a mod folder name.
const FORBIDDEN: &[char] = &['/', '\\', ':', '*', '?', '"', '<', '>', '|'];

/// Sanitise a mod folder name for the filesystem.
///
/// Forbidden characters become `_`; trailing dots and spaces are trimmed
/// (Windows compatibility). Idempotent: sanitising twice is a no-op.
pub fn sanitize_folder_name(name: &str) -> String {
    let mut result: String = name
        .chars()
        .map(|c| if FORBIDDEN.contains(&c) { '_' } else { c })
        .collect();

    while result.ends_with(' ') || result.ends_with('.') {
        result.pop();
    }

    result
}

/// Convert Windows path separators to forward slashes.
pub fn to_forward_slashes(path: &str) -> String {
    path.replace('\\', "/")
}

/// Resolve a relative path against `root`, matching each segment
/// case-insensitively against the filesystem.
///
/// Tries an exact join first, then falls back to one directory scan per
/// segment. Returns `None` when any segment cannot be matched.
pub fn resolve_case_insensitive(root: &Path, relative: &str) -> Option<PathBuf> {
    let normalized = to_forward_slashes(relative);
    let mut current = root.to_path_buf();

    for segment in normalized.split('/').filter(|s| !s.is_empty()) {
        let exact = current.join(segment);
        if exact.exists() {
            current = exact;
            continue;
        }

        let segment_lower = segment.to_lowercase();
        let matched = fs::read_dir(&current).ok()?.find_map(|entry| {
            let entry = entry.ok()?;
            if entry.file_name().to_string_lossy().to_lowercase() == segment_lower {
                Some(entry.path())
            } else {
                None
            }
        });

        current = matched?;
    }

    current.exists().then_some(current)
}

/// Find a direct child directory of `dir` matching `name` case-insensitively.
pub fn find_existing_dir(dir: &Path, name: &str) -> Option<PathBuf> {
    let name_lower = name.to_lowercase();
    let entries = fs::read_dir(dir).ok()?;

    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() && entry.file_name().to_string_lossy().to_lowercase() == name_lower {
            return Some(path);
        }
    }
    None
}

/// Load the Nexus API key.
///
/// Order: explicit value (CLI/env), `nexus_apikey.txt` in the working
/// directory, then `<config-dir>/nexusbridge/apikey.txt`.
pub fn load_api_key(explicit: Option<&str>) -> Option<String> {
    if let Some(key) = explicit {
        let key = key.trim();
        if !key.is_empty() {
            return Some(key.to_string());
        }
    }

    if let Ok(contents) = fs::read_to_string("nexus_apikey.txt") {
        let key = contents.trim();
        if !key.is_empty() {
            return Some(key.to_string());
        }
    }

    let config_key = dirs::config_dir()?.join("nexusbridge").join("apikey.txt");
    let contents = fs::read_to_string(config_key).ok()?;
    let key = contents.trim();
    (!key.is_empty()).then(|| key.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_sanitize_folder_name() {
        assert_eq!(sanitize_folder_name("Normal Name"), "Normal Name");
        assert_eq!(
            sanitize_folder_name("Bad/Name\\With:Chars*?\"<>|"),
            "Bad_Name_With_Chars______"
        );
        assert_eq!(sanitize_folder_name("Trailing dots... "), "Trailing dots");
    }

    #[test]
    fn test_sanitize_idempotent() {
        let inputs = ["A/B:C", "Mod Name 1.2.", "  spaced  ", "plain"];
        for input in inputs {
            let once = sanitize_folder_name(input);
            assert_eq!(sanitize_folder_name(&once), once);
        }
    }

    #[test]
    fn test_to_forward_slashes() {
        assert_eq!(
            to_forward_slashes("SKSE\\Plugins\\foo.dll"),
            "SKSE/Plugins/foo.dll"
        );
        assert_eq!(to_forward_slashes("already/fine"), "already/fine");
    }

    #[test]
    fn test_resolve_case_insensitive() {
        let temp = tempdir().unwrap();
        fs::create_dir_all(temp.path().join("Meshes/Armor")).unwrap();
        fs::write(temp.path().join("Meshes/Armor/Test.nif"), "x").unwrap();

        let resolved = resolve_case_insensitive(temp.path(), "meshes\\armor\\test.nif");
        assert!(resolved.is_some());
        assert!(resolved.unwrap().ends_with("Meshes/Armor/Test.nif"));

        assert!(resolve_case_insensitive(temp.path(), "meshes/missing.nif").is_none());
    }

    #[test]
    fn test_find_existing_dir() {
        let temp = tempdir().unwrap();
        fs::create_dir(temp.path().join("Textures")).unwrap();

        let found = find_existing_dir(temp.path(), "TEXTURES").unwrap();
        assert!(found.ends_with("Textures"));
        assert!(find_existing_dir(temp.path(), "meshes").is_none());
    }
}
