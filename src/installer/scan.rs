//! Phase 1: scanning.
//!
//! Walks the collection, assigns every mod its destination folder name,
//! recognises archives already sitting in the downloads folder, skips
//! mods whose destination folder is already populated, and queues
//! download tasks for the rest.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::collection::{Collection, CollectionMod};
use crate::paths::sanitize_folder_name;

/// One archive that still needs downloading.
#[derive(Debug, Clone)]
pub struct DownloadTask {
    /// Index into `collection.mods`.
    pub mod_index: usize,
    pub name: String,
    pub mod_id: i64,
    pub file_id: i64,
    pub expected_size: i64,
    /// Fixed destination for direct downloads; Nexus archives get their
    /// name from the CDN link at download time.
    pub direct: Option<DirectSource>,
}

/// A non-Nexus source: the URL dictates the archive filename.
#[derive(Debug, Clone)]
pub struct DirectSource {
    pub url: String,
    pub dest: PathBuf,
}

/// Outcome of the scanning phase.
#[derive(Debug, Default)]
pub struct ScanResult {
    /// Mod index -> archive already on disk.
    pub archives: std::collections::HashMap<usize, PathBuf>,
    pub download_tasks: Vec<DownloadTask>,
    /// Mods skipped because the destination folder is already populated
    /// or the descriptor lacks usable source ids.
    pub skipped: usize,
}

/// Destination folder name for a mod.
///
/// Nexus mods encode `(logicalOrDisplayName, modId, fileId)` so an
/// existing install is recognisable across runs without a manifest;
/// direct mods use their display name.
pub fn folder_name_for(m: &CollectionMod) -> String {
    if m.is_direct() {
        sanitize_folder_name(&m.name)
    } else {
        format!(
            "{}-{}-{}",
            sanitize_folder_name(m.logical_or_name()),
            m.source.mod_id,
            m.source.file_id
        )
    }
}

/// Archive filename for a fresh Nexus download: logical name plus
/// `modId-fileId` and the extension the CDN link carries.
pub fn archive_name_for(m: &CollectionMod, cdn_url: &str) -> String {
    let path_part = cdn_url.split(['?', '#']).next().unwrap_or(cdn_url);
    let last_segment = path_part.rsplit('/').next().unwrap_or(path_part);
    let ext = last_segment
        .rsplit_once('.')
        .map(|(_, e)| e)
        .filter(|e| !e.is_empty() && e.len() <= 4)
        .unwrap_or("7z");

    sanitize_folder_name(&format!(
        "{}-{}-{}.{}",
        m.logical_or_name(),
        m.source.mod_id,
        m.source.file_id,
        ext
    ))
}

/// Filename for a direct download, taken from the URL.
fn direct_archive_name(m: &CollectionMod) -> String {
    let url = &m.source.url;
    let path_part = url.split(['?', '#']).next().unwrap_or(url);
    let last = path_part.rsplit('/').next().unwrap_or("");
    if last.is_empty() {
        sanitize_folder_name(&format!("{}.7z", m.name))
    } else {
        sanitize_folder_name(last)
    }
}

/// Find a reusable archive for a Nexus mod in the downloads folder.
///
/// Priority order:
/// 1. a name starting (case-insensitively) with `{logical}-{modId}-`
/// 2. the same with the `Creation Club - ` prefix stripped from the
///    logical name
/// 3. any name containing `-{modId}-` whose size equals the expected size
///    exactly
/// 4. the first name containing `-{modId}-`, as a last resort
pub fn find_existing_archive(downloads_dir: &Path, m: &CollectionMod) -> Option<PathBuf> {
    let mut entries: Vec<(String, PathBuf)> = fs::read_dir(downloads_dir)
        .ok()?
        .flatten()
        .filter(|e| e.path().is_file())
        .map(|e| (e.file_name().to_string_lossy().to_lowercase(), e.path()))
        .collect();
    entries.sort();

    let id_marker = format!("-{}-", m.source.mod_id);
    let logical_lower = m.source.logical_filename.to_lowercase();
    let expected_size = m.source.file_size;

    if !logical_lower.is_empty() {
        let prefix = format!("{}{}", logical_lower, id_marker);
        if let Some((_, path)) = entries.iter().find(|(name, _)| name.starts_with(&prefix)) {
            return Some(path.clone());
        }

        if let Some(stripped) = logical_lower.strip_prefix("creation club - ") {
            let prefix = format!("{}{}", stripped, id_marker);
            if let Some((_, path)) = entries.iter().find(|(name, _)| name.starts_with(&prefix)) {
                return Some(path.clone());
            }
        }
    }

    let mut fallback: Option<PathBuf> = None;
    for (name, path) in &entries {
        if !name.contains(&id_marker) {
            continue;
        }
        if expected_size > 0 {
            if let Ok(meta) = fs::metadata(path) {
                if meta.len() as i64 == expected_size {
                    return Some(path.clone());
                }
            }
        }
        if fallback.is_none() {
            fallback = Some(path.clone());
        }
    }

    fallback
}

/// Scan the collection and classify every mod.
///
/// Mutates the collection to record the assigned folder names. `mods_dir`
/// is consulted for already-installed mods (a non-empty destination
/// folder skips reinstallation).
pub fn scan_collection(
    collection: &mut Collection,
    mods_dir: &Path,
    downloads_dir: &Path,
) -> ScanResult {
    let mut result = ScanResult::default();

    for index in 0..collection.mods.len() {
        let m = &collection.mods[index];

        let is_direct = m.is_direct();
        if !is_direct && (m.source.mod_id <= 0 || m.source.file_id <= 0) {
            debug!("Skipping '{}': no usable source ids", m.name);
            result.skipped += 1;
            continue;
        }

        let folder = folder_name_for(m);
        let dest = mods_dir.join(&folder);
        collection.mods[index].folder_name = folder;

        let already_installed = dest.is_dir()
            && fs::read_dir(&dest)
                .map(|mut entries| entries.next().is_some())
                .unwrap_or(false);
        if already_installed {
            debug!("Skipping '{}': already installed", collection.mods[index].name);
            result.skipped += 1;
            continue;
        }

        let m = &collection.mods[index];
        if is_direct {
            let dest_path = downloads_dir.join(direct_archive_name(m));
            let present = fs::metadata(&dest_path)
                .map(|meta| meta.len() > 0)
                .unwrap_or(false);
            if present {
                result.archives.insert(index, dest_path);
            } else {
                result.download_tasks.push(DownloadTask {
                    mod_index: index,
                    name: m.name.clone(),
                    mod_id: m.source.mod_id,
                    file_id: m.source.file_id,
                    expected_size: m.source.file_size,
                    direct: Some(DirectSource {
                        url: m.source.url.clone(),
                        dest: dest_path,
                    }),
                });
            }
        } else if let Some(existing) = find_existing_archive(downloads_dir, m) {
            result.archives.insert(index, existing);
        } else {
            result.download_tasks.push(DownloadTask {
                mod_index: index,
                name: m.name.clone(),
                mod_id: m.source.mod_id,
                file_id: m.source.file_id,
                expected_size: m.source.file_size,
                direct: None,
            });
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::{CollectionMod, ModSource};
    use tempfile::tempdir;

    fn nexus_mod(name: &str, logical: &str, mod_id: i64, file_id: i64, size: i64) -> CollectionMod {
        CollectionMod {
            name: name.to_string(),
            source: ModSource {
                source_type: "nexus".to_string(),
                mod_id,
                file_id,
                logical_filename: logical.to_string(),
                file_size: size,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_folder_name_encoding() {
        let m = nexus_mod("SkyUI", "SkyUI_5_2_SE.7z", 12604, 35407, 0);
        assert_eq!(folder_name_for(&m), "SkyUI_5_2_SE.7z-12604-35407");

        // Stable across runs.
        assert_eq!(folder_name_for(&m), folder_name_for(&m));
    }

    #[test]
    fn test_folder_name_direct() {
        let mut m = nexus_mod("SKSE", "", 0, 0, 0);
        m.source.source_type = "direct".to_string();
        m.source.url = "https://example.com/skse.7z".to_string();
        assert_eq!(folder_name_for(&m), "SKSE");
    }

    #[test]
    fn test_archive_name_from_cdn_url() {
        let m = nexus_mod("SkyUI", "SkyUI_5_2_SE", 12604, 35407, 0);
        assert_eq!(
            archive_name_for(&m, "https://cf-files.nexusmods.com/files/x/SkyUI_5_2_SE.zip?md5=a"),
            "SkyUI_5_2_SE-12604-35407.zip"
        );
        // No extension in the link: default to 7z.
        assert_eq!(
            archive_name_for(&m, "https://cdn.example.com/file"),
            "SkyUI_5_2_SE-12604-35407.7z"
        );
    }

    #[test]
    fn test_reuse_by_logical_prefix() {
        let temp = tempdir().unwrap();
        let archive = temp.path().join("skyui_5_2_se-12604-35407.7z");
        fs::write(&archive, "data").unwrap();

        let m = nexus_mod("SkyUI", "SkyUI_5_2_SE", 12604, 35407, 0);
        assert_eq!(find_existing_archive(temp.path(), &m).unwrap(), archive);
    }

    #[test]
    fn test_reuse_creation_club_prefix_stripped() {
        let temp = tempdir().unwrap();
        let archive = temp.path().join("survival mode-999-1.7z");
        fs::write(&archive, "data").unwrap();

        let m = nexus_mod("Survival", "Creation Club - Survival Mode", 999, 1, 0);
        assert_eq!(find_existing_archive(temp.path(), &m).unwrap(), archive);
    }

    #[test]
    fn test_reuse_by_mod_id_requires_exact_size() {
        let temp = tempdir().unwrap();
        let wrong = temp.path().join("other-777-2.7z");
        fs::write(&wrong, "12").unwrap(); // 2 bytes
        let right = temp.path().join("zz-777-3.7z");
        fs::write(&right, "1234").unwrap(); // 4 bytes

        let m = nexus_mod("Mod", "NoSuchLogical", 777, 3, 4);
        assert_eq!(find_existing_archive(temp.path(), &m).unwrap(), right);
    }

    #[test]
    fn test_reuse_fallback_first_id_match() {
        let temp = tempdir().unwrap();
        let only = temp.path().join("anything-555-9.7z");
        fs::write(&only, "data").unwrap();

        // Wrong size, but the only candidate carrying the mod id.
        let m = nexus_mod("Mod", "Missing", 555, 9, 999);
        assert_eq!(find_existing_archive(temp.path(), &m).unwrap(), only);
    }

    #[test]
    fn test_no_reuse_without_id_marker() {
        let temp = tempdir().unwrap();
        fs::write(temp.path().join("unrelated.7z"), "data").unwrap();

        let m = nexus_mod("Mod", "Missing", 555, 9, 0);
        assert!(find_existing_archive(temp.path(), &m).is_none());
    }

    #[test]
    fn test_scan_skips_installed_and_queues_missing() {
        let temp = tempdir().unwrap();
        let mods_dir = temp.path().join("mods");
        let downloads_dir = temp.path().join("downloads");
        fs::create_dir_all(&mods_dir).unwrap();
        fs::create_dir_all(&downloads_dir).unwrap();

        let mut collection = crate::collection::parse_collection(
            r#"{"mods": [
                {"name": "Installed", "source": {"modId": 1, "fileId": 10, "logicalFilename": "installed"}},
                {"name": "HaveArchive", "source": {"modId": 2, "fileId": 20, "logicalFilename": "have"}},
                {"name": "NeedsDownload", "source": {"modId": 3, "fileId": 30, "logicalFilename": "needs"}},
                {"name": "NoIds", "source": {}}
            ]}"#,
        )
        .unwrap();

        // "Installed" already has a populated destination folder.
        let installed_dir = mods_dir.join("installed-1-10");
        fs::create_dir_all(&installed_dir).unwrap();
        fs::write(installed_dir.join("x.esp"), "x").unwrap();

        // "HaveArchive" has a matching archive on disk.
        fs::write(downloads_dir.join("have-2-20.7z"), "data").unwrap();

        let result = scan_collection(&mut collection, &mods_dir, &downloads_dir);

        assert_eq!(result.skipped, 2); // Installed + NoIds
        assert_eq!(result.archives.len(), 1);
        assert!(result.archives.contains_key(&1));
        assert_eq!(result.download_tasks.len(), 1);
        assert_eq!(result.download_tasks[0].name, "NeedsDownload");
        assert_eq!(collection.mods[2].folder_name, "needs-3-30");
    }
}
