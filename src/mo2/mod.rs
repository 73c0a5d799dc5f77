//! Mod Organizer 2 instance handling.
//!
//! An MO2 instance is a directory holding `mods/`, `downloads/`,
//! `profiles/<name>/` and usually `ModOrganizer.ini`. We create the
//! layout, locate the game installation the instance points at, and find
//! the Proton-prefix local app data LOOT needs on Linux.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::debug;

/// Steam app id of Skyrim Special Edition.
const SKYRIM_SE_APP_ID: &str = "489830";

/// Paths of one MO2 instance.
#[derive(Debug, Clone)]
pub struct Mo2Instance {
    pub root: PathBuf,
    pub mods_dir: PathBuf,
    pub downloads_dir: PathBuf,
    pub profiles_dir: PathBuf,
    pub ini_path: PathBuf,
}

impl Mo2Instance {
    pub fn new(root: PathBuf) -> Self {
        Self {
            mods_dir: root.join("mods"),
            downloads_dir: root.join("downloads"),
            profiles_dir: root.join("profiles"),
            ini_path: root.join("ModOrganizer.ini"),
            root,
        }
    }

    /// Create `mods/`, `downloads/` and `profiles/<profile>`.
    pub fn create_directories(&self, profile: &str) -> Result<()> {
        fs::create_dir_all(&self.mods_dir)
            .with_context(|| format!("Failed to create {}", self.mods_dir.display()))?;
        fs::create_dir_all(&self.downloads_dir)
            .with_context(|| format!("Failed to create {}", self.downloads_dir.display()))?;
        fs::create_dir_all(self.profile_dir(profile))
            .with_context(|| format!("Failed to create profile {}", profile))?;
        Ok(())
    }

    pub fn profile_dir(&self, profile: &str) -> PathBuf {
        self.profiles_dir.join(profile)
    }

    /// Scratch space for parallel extraction, inside the instance so it
    /// shares a filesystem with the destinations.
    pub fn scratch_dir(&self) -> PathBuf {
        self.root.join("temp_extract")
    }

    /// Locate the game installation this instance uses.
    ///
    /// Checked in order: a `Stock Game` folder inside the instance, the
    /// `gamePath=` entry of `ModOrganizer.ini`, then the default Steam
    /// library location.
    pub fn discover_game_path(&self) -> Option<PathBuf> {
        let stock = self.root.join("Stock Game");
        if stock.is_dir() {
            return Some(stock);
        }

        if let Some(path) = read_game_path_from_ini(&self.ini_path, &self.root) {
            if path.is_dir() {
                return Some(path);
            }
        }

        let home = std::env::var("HOME").ok()?;
        let steam_default = PathBuf::from(home)
            .join(".local/share/Steam/steamapps/common/Skyrim Special Edition");
        steam_default.is_dir().then_some(steam_default)
    }
}

/// Parse `gamePath=` out of ModOrganizer.ini.
///
/// MO2 writes Qt-flavoured values: `gamePath=@ByteArray(Z:\\path\\to\\game)`
/// or, for portable instances, `@ByteArray(@relative/inside/instance)`.
/// Wine `Z:` drive prefixes map onto the filesystem root.
pub fn read_game_path_from_ini(ini_path: &Path, mo2_root: &Path) -> Option<PathBuf> {
    let contents = fs::read_to_string(ini_path).ok()?;

    for line in contents.lines() {
        let Some(value) = line.trim().strip_prefix("gamePath=") else {
            continue;
        };
        let value = value.trim_end_matches(['\r', '\n']);

        let unwrapped = value
            .strip_prefix("@ByteArray(")
            .and_then(|v| v.strip_suffix(')'))
            .unwrap_or(value);

        let path = if let Some(relative) = unwrapped.strip_prefix('@') {
            // Relative to the instance root.
            mo2_root.join(relative.trim_start_matches(['/', '\\']))
        } else {
            let slashes = unwrapped.replace("\\\\", "/").replace('\\', "/");
            if let Some(rest) = slashes.strip_prefix("Z:") {
                PathBuf::from(rest)
            } else {
                PathBuf::from(slashes)
            }
        };

        debug!("gamePath from ini: {}", path.display());
        return Some(path);
    }

    None
}

/// Find the "local app data" folder for Skyrim SE.
///
/// Under Proton this lives inside the wine prefix of the Steam compatdata
/// for app 489830; a native linux path does not exist, so `None` simply
/// means "let the sort library use its default".
pub fn find_local_app_data() -> Option<PathBuf> {
    let home = std::env::var("HOME").ok()?;

    let candidates = [
        format!(
            "{home}/.local/share/Steam/steamapps/compatdata/{SKYRIM_SE_APP_ID}/pfx/drive_c/users/steamuser/AppData/Local/Skyrim Special Edition"
        ),
        format!(
            "{home}/.steam/steam/steamapps/compatdata/{SKYRIM_SE_APP_ID}/pfx/drive_c/users/steamuser/AppData/Local/Skyrim Special Edition"
        ),
        format!(
            "{home}/.var/app/com.valvesoftware.Steam/.local/share/Steam/steamapps/compatdata/{SKYRIM_SE_APP_ID}/pfx/drive_c/users/steamuser/AppData/Local/Skyrim Special Edition"
        ),
    ];

    candidates
        .into_iter()
        .map(PathBuf::from)
        .find(|p| p.is_dir())
}

/// Write the `meta.ini` MO2 uses to tie a mod folder back to its Nexus id.
pub fn write_meta_ini(mod_dir: &Path, mod_id: i64) -> Result<()> {
    let meta = format!("[General]\nmodid={}\n", mod_id);
    fs::write(mod_dir.join("meta.ini"), meta)
        .with_context(|| format!("Failed to write meta.ini in {}", mod_dir.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_instance_layout() {
        let temp = tempdir().unwrap();
        let instance = Mo2Instance::new(temp.path().to_path_buf());

        instance.create_directories("TestProfile").unwrap();

        assert!(temp.path().join("mods").is_dir());
        assert!(temp.path().join("downloads").is_dir());
        assert!(temp.path().join("profiles/TestProfile").is_dir());
    }

    #[test]
    fn test_read_game_path_plain() {
        let temp = tempdir().unwrap();
        let ini = temp.path().join("ModOrganizer.ini");
        fs::write(&ini, "[General]\ngamePath=/games/skyrim\n").unwrap();

        let path = read_game_path_from_ini(&ini, temp.path()).unwrap();
        assert_eq!(path, PathBuf::from("/games/skyrim"));
    }

    #[test]
    fn test_read_game_path_bytearray_wine() {
        let temp = tempdir().unwrap();
        let ini = temp.path().join("ModOrganizer.ini");
        fs::write(
            &ini,
            "[General]\ngamePath=@ByteArray(Z:\\\\games\\\\Skyrim Special Edition)\n",
        )
        .unwrap();

        let path = read_game_path_from_ini(&ini, temp.path()).unwrap();
        assert_eq!(path, PathBuf::from("/games/Skyrim Special Edition"));
    }

    #[test]
    fn test_read_game_path_bytearray_relative() {
        let temp = tempdir().unwrap();
        let ini = temp.path().join("ModOrganizer.ini");
        fs::write(&ini, "gamePath=@ByteArray(@Stock Game)\n").unwrap();

        let path = read_game_path_from_ini(&ini, temp.path()).unwrap();
        assert_eq!(path, temp.path().join("Stock Game"));
    }

    #[test]
    fn test_discover_prefers_stock_game() {
        let temp = tempdir().unwrap();
        fs::create_dir_all(temp.path().join("Stock Game")).unwrap();
        fs::write(
            temp.path().join("ModOrganizer.ini"),
            "gamePath=/nonexistent\n",
        )
        .unwrap();

        let instance = Mo2Instance::new(temp.path().to_path_buf());
        assert_eq!(
            instance.discover_game_path().unwrap(),
            temp.path().join("Stock Game")
        );
    }

    #[test]
    fn test_write_meta_ini() {
        let temp = tempdir().unwrap();
        write_meta_ini(temp.path(), 12345).unwrap();

        let contents = fs::read_to_string(temp.path().join("meta.ini")).unwrap();
        assert!(contents.contains("modid=12345"));
    }
}
