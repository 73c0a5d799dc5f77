//! Typed model of the Nexus collection descriptor (`collection.json`).
//!
//! The parser is tolerant: unknown fields are ignored and missing optional
//! fields default (`enabled = true`, `type = "nexus"`, empty rule lists).
//! Parsing fails only when the top-level shape is unparseable or the `mods`
//! array is absent. Whether the referenced mods actually exist on Nexus is
//! the API client's concern, not the parser's.

use std::collections::{HashMap, HashSet};

use serde::Deserialize;

use crate::paths::to_forward_slashes;

/// Collection metadata (new descriptors wrap it in an `info` object).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CollectionInfo {
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub author: String,

    #[serde(rename = "domainName", default)]
    pub domain_name: String,
}

/// A parsed Nexus collection: mods, ordering rules and plugin load order.
#[derive(Debug, Clone, Deserialize)]
pub struct Collection {
    /// Metadata wrapper (newer descriptor revisions).
    #[serde(default)]
    pub info: Option<CollectionInfo>,

    /// Legacy top-level name.
    #[serde(rename = "collectionName", default)]
    pub name: String,

    /// Legacy top-level author.
    #[serde(default)]
    pub author: String,

    /// Legacy top-level game domain.
    #[serde(rename = "domainName", default)]
    pub domain_name: String,

    /// The mods to install. Absence of this array makes the descriptor
    /// invalid; everything else is optional.
    pub mods: Vec<CollectionMod>,

    #[serde(rename = "modRules", default)]
    pub mod_rules: Vec<ModRule>,

    #[serde(default)]
    pub plugins: Vec<PluginInfo>,

    #[serde(rename = "pluginRules", default)]
    pub plugin_rules: Option<PluginRules>,
}

impl Collection {
    /// Collection name, whichever descriptor format carried it.
    pub fn collection_name(&self) -> &str {
        match &self.info {
            Some(info) if !info.name.is_empty() => &info.name,
            _ => &self.name,
        }
    }

    /// Collection author, whichever descriptor format carried it.
    pub fn collection_author(&self) -> &str {
        match &self.info {
            Some(info) if !info.author.is_empty() => &info.author,
            _ => &self.author,
        }
    }

    /// Nexus game domain (e.g. `skyrimspecialedition`).
    pub fn game_domain(&self) -> &str {
        match &self.info {
            Some(info) if !info.domain_name.is_empty() => &info.domain_name,
            _ => &self.domain_name,
        }
    }

    /// Post-parse normalisation: forward slashes in every file path the
    /// descriptor carries, and `expected_paths` derived from the hashes.
    pub(crate) fn normalize(&mut self) {
        for m in &mut self.mods {
            m.expected_paths = m
                .hashes
                .iter()
                .filter(|h| !h.path.is_empty())
                .map(|h| to_forward_slashes(&h.path))
                .collect();
        }
    }
}

/// One mod entry in a collection.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CollectionMod {
    /// Display name shown to the user.
    #[serde(default)]
    pub name: String,

    /// Installation phase; lower phases install first.
    #[serde(default)]
    pub phase: i32,

    /// Download source information.
    #[serde(default)]
    pub source: ModSource,

    /// FOMOD choices recorded by the collection author, if the mod has a
    /// FOMOD installer.
    #[serde(default)]
    pub choices: Option<FomodChoices>,

    /// Per-file hashes; the paths double as the expected install layout.
    #[serde(default)]
    pub hashes: Vec<FileHash>,

    /// Mod folder name under `<mo2>/mods`, assigned during installation.
    #[serde(skip)]
    pub folder_name: String,

    /// Forward-slash file paths extracted from `hashes`, filled by
    /// [`Collection::normalize`].
    #[serde(skip)]
    pub expected_paths: Vec<String>,
}

impl CollectionMod {
    /// Logical archive filename, falling back to the display name.
    pub fn logical_or_name(&self) -> &str {
        if self.source.logical_filename.is_empty() {
            &self.name
        } else {
            &self.source.logical_filename
        }
    }

    pub fn is_direct(&self) -> bool {
        self.source.source_type.eq_ignore_ascii_case("direct") && !self.source.url.is_empty()
    }

    /// Whether the descriptor recorded explicit FOMOD selections.
    pub fn has_fomod_choices(&self) -> bool {
        self.choices
            .as_ref()
            .map(|c| !c.options.is_empty())
            .unwrap_or(false)
    }
}

fn default_source_type() -> String {
    "nexus".to_string()
}

/// Where a mod's archive comes from.
#[derive(Debug, Clone, Deserialize)]
pub struct ModSource {
    /// `nexus` or `direct`.
    #[serde(rename = "type", default = "default_source_type")]
    pub source_type: String,

    #[serde(rename = "modId", default)]
    pub mod_id: i64,

    #[serde(rename = "fileId", default)]
    pub file_id: i64,

    #[serde(rename = "logicalFilename", default)]
    pub logical_filename: String,

    /// Expected archive size in bytes; a hard equality check for reuse.
    #[serde(rename = "fileSize", default)]
    pub file_size: i64,

    #[serde(default)]
    pub md5: String,

    /// Direct download URL for non-Nexus sources.
    #[serde(default)]
    pub url: String,
}

impl Default for ModSource {
    fn default() -> Self {
        Self {
            source_type: default_source_type(),
            mod_id: 0,
            file_id: 0,
            logical_filename: String::new(),
            file_size: 0,
            md5: String::new(),
            url: String::new(),
        }
    }
}

/// A hash entry; the path tells us where the file lands on install.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FileHash {
    #[serde(default)]
    pub path: String,

    #[serde(default)]
    pub md5: String,
}

/// A before/after ordering rule between two mods.
#[derive(Debug, Clone, Deserialize)]
pub struct ModRule {
    /// `before` or `after`.
    #[serde(rename = "type", default)]
    pub rule_type: String,

    #[serde(default)]
    pub source: RuleReference,

    #[serde(default)]
    pub reference: RuleReference,
}

/// One end of a mod rule, identified by hash or logical filename.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RuleReference {
    #[serde(rename = "fileMD5", default)]
    pub file_md5: String,

    #[serde(rename = "logicalFileName", default)]
    pub logical_file_name: String,
}

fn default_true() -> bool {
    true
}

/// A plugin (`.esp`/`.esm`/`.esl`) entry from the collection's load order.
#[derive(Debug, Clone, Deserialize)]
pub struct PluginInfo {
    pub name: String,

    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// The descriptor's `pluginRules` section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PluginRules {
    #[serde(default)]
    pub plugins: Vec<PluginRule>,
}

/// Ordering constraint on a single plugin.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PluginRule {
    #[serde(default)]
    pub name: String,

    /// Plugins that must precede this one.
    #[serde(default)]
    pub after: Vec<String>,
}

/// The FOMOD choice tree exactly as the descriptor records it.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FomodChoices {
    #[serde(default)]
    pub options: Vec<ChoiceStep>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChoiceStep {
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub groups: Vec<ChoiceGroup>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChoiceGroup {
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub choices: Vec<Choice>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Choice {
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub idx: i32,
}

/// Selections indexed by the `(stepName, groupName)` composite key.
///
/// Group names are NOT unique across steps (real collections reuse names
/// like "Read first" under several steps), so flattening by group name
/// alone would leak selections between steps. All lookups are
/// case-insensitive; keys and members are stored lowercased.
#[derive(Debug, Clone, Default)]
pub struct ChoiceSet {
    selections: HashMap<(String, String), HashSet<String>>,
}

impl ChoiceSet {
    /// Build the composite-key store once from the descriptor's tree.
    pub fn from_choices(choices: &FomodChoices) -> Self {
        let mut selections: HashMap<(String, String), HashSet<String>> = HashMap::new();

        for step in &choices.options {
            for group in &step.groups {
                let key = (step.name.to_lowercase(), group.name.to_lowercase());
                let entry = selections.entry(key).or_default();
                for choice in &group.choices {
                    entry.insert(choice.name.to_lowercase());
                }
            }
        }

        Self { selections }
    }

    /// The option names selected for `(step, group)`, or `None` when the
    /// descriptor recorded nothing for that pair.
    pub fn selected_options(&self, step: &str, group: &str) -> Option<&HashSet<String>> {
        self.selections
            .get(&(step.to_lowercase(), group.to_lowercase()))
    }

    /// Whether `option` is selected under `(step, group)`.
    pub fn is_selected(&self, step: &str, group: &str, option: &str) -> bool {
        self.selected_options(step, group)
            .map(|set| set.contains(&option.to_lowercase()))
            .unwrap_or(false)
    }

    pub fn is_empty(&self) -> bool {
        self.selections.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_choice_set_composite_key() {
        let choices = FomodChoices {
            options: vec![
                ChoiceStep {
                    name: "Installation Notice".to_string(),
                    groups: vec![ChoiceGroup {
                        name: "Read first".to_string(),
                        choices: vec![Choice {
                            name: "Proceed".to_string(),
                            idx: 0,
                        }],
                    }],
                },
                ChoiceStep {
                    name: "Choose Marker version".to_string(),
                    groups: vec![ChoiceGroup {
                        name: "Read first".to_string(),
                        choices: vec![Choice {
                            name: "Simplified".to_string(),
                            idx: 1,
                        }],
                    }],
                },
            ],
        };

        let set = ChoiceSet::from_choices(&choices);

        // Same group name under different steps must not leak selections.
        assert!(set.is_selected("Installation Notice", "Read first", "Proceed"));
        assert!(!set.is_selected("Installation Notice", "Read first", "Simplified"));
        assert!(set.is_selected("Choose Marker version", "Read first", "Simplified"));
        assert!(!set.is_selected("Choose Marker version", "Read first", "Proceed"));
    }

    #[test]
    fn test_choice_set_case_insensitive() {
        let choices = FomodChoices {
            options: vec![ChoiceStep {
                name: "Step One".to_string(),
                groups: vec![ChoiceGroup {
                    name: "Options".to_string(),
                    choices: vec![Choice {
                        name: "Full Install".to_string(),
                        idx: 0,
                    }],
                }],
            }],
        };

        let set = ChoiceSet::from_choices(&choices);
        assert!(set.is_selected("step one", "OPTIONS", "full install"));
    }

    #[test]
    fn test_choice_set_unknown_pair() {
        let set = ChoiceSet::from_choices(&FomodChoices::default());
        assert!(set.selected_options("Any", "Pair").is_none());
        assert!(!set.is_selected("Any", "Pair", "Option"));
    }
}
