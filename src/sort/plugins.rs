//! Plugin load-order sorting for plugins.txt.
//!
//! The heavy lifting is delegated to libloot, treated as an opaque
//! capability: create a game handle, register every mod folder as an
//! additional data path, load the plugin headers, sort. Any failure along
//! the way falls back to the collection's own plugin order; a missing
//! sort is never fatal.

use std::collections::HashSet;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::collection::PluginInfo;
use crate::error::BridgeError;
use crate::mo2;

/// Nexus domain the libloot path supports. Other games fall back to
/// collection order until sorting for them is wired up.
const SORTABLE_DOMAIN: &str = "skyrimspecialedition";

/// Deduplicate enabled plugins case-insensitively, keeping first casing
/// and collection order.
fn unique_enabled(plugins: &[PluginInfo]) -> Vec<String> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut names = Vec::new();

    for plugin in plugins {
        if !plugin.enabled {
            continue;
        }
        if seen.insert(plugin.name.to_lowercase()) {
            names.push(plugin.name.clone());
        }
    }

    names
}

/// Find each plugin on disk: mod folders first (MO2 priority), the game's
/// own `Data/` last. Returns (names found, their paths).
fn locate_plugins(
    names: &[String],
    mods_dir: &Path,
    game_data_dir: &Path,
) -> (Vec<String>, Vec<PathBuf>) {
    let mod_dirs: Vec<PathBuf> = std::fs::read_dir(mods_dir)
        .map(|entries| {
            entries
                .flatten()
                .map(|e| e.path())
                .filter(|p| p.is_dir())
                .collect()
        })
        .unwrap_or_default();

    let mut found_names = Vec::new();
    let mut found_paths = Vec::new();

    for name in names {
        let in_mods = mod_dirs.iter().map(|d| d.join(name)).find(|p| p.exists());
        let located = in_mods.or_else(|| {
            let in_game = game_data_dir.join(name);
            in_game.exists().then_some(in_game)
        });

        if let Some(path) = located {
            found_names.push(name.clone());
            found_paths.push(path);
        }
    }

    (found_names, found_paths)
}

/// Sort via libloot. Errors bubble out as [`BridgeError::SortFailed`] so
/// the caller can fall back.
fn sort_with_libloot(
    game_path: &Path,
    mods_dir: &Path,
    names: &[String],
) -> Result<Vec<String>> {
    let local_path = mo2::find_local_app_data();

    let mut game = match &local_path {
        Some(local) => {
            info!("LOOT local app data: {}", local.display());
            libloot::Game::with_local_path(libloot::GameType::SkyrimSE, game_path, local)
        }
        None => libloot::Game::new(libloot::GameType::SkyrimSE, game_path),
    }
    .map_err(|e| BridgeError::SortFailed(format!("game handle: {}", e)))?;

    let mod_dirs: Vec<PathBuf> = std::fs::read_dir(mods_dir)
        .map(|entries| {
            entries
                .flatten()
                .map(|e| e.path())
                .filter(|p| p.is_dir())
                .collect()
        })
        .unwrap_or_default();
    if !mod_dirs.is_empty() {
        game.set_additional_data_paths(mod_dirs)
            .map_err(|e| BridgeError::SortFailed(format!("data paths: {}", e)))?;
    }

    let (found_names, found_paths) = locate_plugins(names, mods_dir, &game_path.join("Data"));
    if found_names.is_empty() {
        warn!("No plugins found on disk to sort");
        return Ok(Vec::new());
    }

    info!(
        "Loading {} of {} plugin headers for sorting",
        found_paths.len(),
        names.len()
    );

    let path_refs: Vec<&Path> = found_paths.iter().map(PathBuf::as_path).collect();
    game.load_plugin_headers(&path_refs)
        .map_err(|e| BridgeError::SortFailed(format!("plugin headers: {}", e)))?;

    let name_refs: Vec<&str> = found_names.iter().map(String::as_str).collect();
    let sorted = game
        .sort_plugins(&name_refs)
        .map_err(|e| BridgeError::SortFailed(format!("sort: {}", e)))?;

    info!("libloot sorted {} plugins", sorted.len());
    Ok(sorted)
}

/// Produce the plugin load order for a collection.
///
/// With a usable game path and a Skyrim SE domain, plugins are sorted via
/// libloot; every failure path degrades to the collection's own order.
pub fn plugin_load_order(
    game_path: Option<&Path>,
    mods_dir: &Path,
    plugins: &[PluginInfo],
    game_domain: &str,
) -> Vec<String> {
    let names = unique_enabled(plugins);

    if !game_domain.eq_ignore_ascii_case(SORTABLE_DOMAIN) {
        warn!(
            "Plugin sorting is not wired up for '{}'; using collection order",
            game_domain
        );
        return names;
    }

    let Some(game_path) = game_path else {
        warn!("Game installation not found; using collection plugin order");
        return names;
    };

    match sort_with_libloot(game_path, mods_dir, &names) {
        Ok(sorted) if !sorted.is_empty() => sorted,
        Ok(_) => names,
        Err(e) => {
            warn!("{:#}; falling back to collection order", e);
            names
        }
    }
}

/// Write plugins.txt: a generator comment, then one `*plugin` per line.
pub fn write_plugins(path: &Path, plugin_order: &[String]) -> Result<()> {
    let mut file = File::create(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;

    writeln!(file, "# This file was automatically generated by NexusBridge")?;
    for plugin in plugin_order {
        writeln!(file, "*{}", plugin)?;
    }

    info!("Generated plugins.txt with {} plugins", plugin_order.len());
    Ok(())
}

/// Read the enabled plugin names back out of a plugins.txt.
pub fn parse_plugins(path: &Path) -> Result<Vec<String>> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    Ok(contents
        .lines()
        .filter_map(|line| line.strip_prefix('*'))
        .map(str::to_string)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn plugin(name: &str, enabled: bool) -> PluginInfo {
        PluginInfo {
            name: name.to_string(),
            enabled,
        }
    }

    #[test]
    fn test_unique_enabled() {
        let plugins = vec![
            plugin("SkyUI.esp", true),
            plugin("skyui.esp", true),
            plugin("Disabled.esp", false),
            plugin("Other.esm", true),
        ];

        let names = unique_enabled(&plugins);
        assert_eq!(names, vec!["SkyUI.esp", "Other.esm"]);
    }

    #[test]
    fn test_locate_plugins_mods_first() {
        let temp = tempdir().unwrap();
        let mods_dir = temp.path().join("mods");
        let data_dir = temp.path().join("Data");
        std::fs::create_dir_all(mods_dir.join("SomeMod")).unwrap();
        std::fs::create_dir_all(&data_dir).unwrap();

        std::fs::write(mods_dir.join("SomeMod/a.esp"), "").unwrap();
        std::fs::write(data_dir.join("a.esp"), "").unwrap();
        std::fs::write(data_dir.join("b.esp"), "").unwrap();

        let names = vec!["a.esp".to_string(), "b.esp".to_string(), "c.esp".to_string()];
        let (found, paths) = locate_plugins(&names, &mods_dir, &data_dir);

        assert_eq!(found, vec!["a.esp", "b.esp"]);
        // a.esp resolves inside the mod folder, not the game Data dir.
        assert!(paths[0].starts_with(mods_dir.join("SomeMod")));
        assert!(paths[1].starts_with(&data_dir));
    }

    #[test]
    fn test_fallback_for_unsupported_domain() {
        let temp = tempdir().unwrap();
        let plugins = vec![plugin("B.esp", true), plugin("A.esp", true)];

        let order = plugin_load_order(None, temp.path(), &plugins, "fallout4");
        assert_eq!(order, vec!["B.esp", "A.esp"]);
    }

    #[test]
    fn test_fallback_without_game_path() {
        let temp = tempdir().unwrap();
        let plugins = vec![plugin("A.esp", true)];

        let order = plugin_load_order(None, temp.path(), &plugins, "skyrimspecialedition");
        assert_eq!(order, vec!["A.esp"]);
    }

    #[test]
    fn test_plugins_txt_round_trip() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("plugins.txt");
        let order = vec![
            "Skyrim.esm".to_string(),
            "SkyUI.esp".to_string(),
            "Other.esl".to_string(),
        ];

        write_plugins(&path, &order).unwrap();
        let parsed = parse_plugins(&path).unwrap();

        assert_eq!(parsed, order);
    }
}
