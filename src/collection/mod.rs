//! Collection descriptor parsing.
//!
//! A collection is a JSON document describing a curated set of mods:
//! download sources, FOMOD selections, before/after ordering rules and a
//! plugin load order. This module turns the JSON into the typed model in
//! [`types`]; fetching descriptors from nexusmods.com lives in
//! [`crate::nexus::fetch`].

mod types;

pub use types::{
    Choice, ChoiceGroup, ChoiceSet, ChoiceStep, Collection, CollectionInfo, CollectionMod,
    FileHash, FomodChoices, ModRule, ModSource, PluginInfo, PluginRule, PluginRules,
    RuleReference,
};

use std::path::Path;

use anyhow::{Context, Result};

use crate::error::BridgeError;

/// Parse a collection descriptor from JSON text.
///
/// Returns [`BridgeError::InvalidDescriptor`] when the document is not
/// valid JSON or lacks the `mods` array; every other field is optional.
pub fn parse_collection(json: &str) -> Result<Collection> {
    let mut collection: Collection = serde_json::from_str(json)
        .map_err(|e| BridgeError::InvalidDescriptor(e.to_string()))?;
    collection.normalize();
    Ok(collection)
}

/// Load and parse a collection descriptor from disk.
pub fn load_collection(path: &Path) -> Result<Collection> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read collection file: {}", path.display()))?;
    parse_collection(&content)
}
