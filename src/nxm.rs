//! `nxm://` link parsing.
//!
//! Clicking "Download with Manager" on nexusmods.com produces links like
//! `nxm://skyrimspecialedition/mods/266/files/1000?key=...&expires=...`.
//! The key/expires pair authorises one download for non-premium accounts;
//! the `--nxm` flag feeds such a link to a single queued download.

use std::collections::HashMap;

use anyhow::{bail, Context, Result};

/// A parsed `nxm://` link.
#[derive(Debug, Clone)]
pub struct NxmLink {
    pub game_domain: String,
    pub mod_id: i64,
    pub file_id: i64,
    pub key: String,
    pub expires: u64,
}

impl NxmLink {
    /// Parse `nxm://<game>/mods/<id>/files/<fileId>?key=..&expires=..`.
    pub fn parse(url: &str) -> Result<Self> {
        let rest = url
            .strip_prefix("nxm://")
            .context("URL must start with nxm://")?;

        let (path, query) = rest
            .split_once('?')
            .context("nxm link is missing its query parameters")?;

        let parts: Vec<&str> = path.split('/').collect();
        if parts.len() != 5 || parts[1] != "mods" || parts[3] != "files" {
            bail!("Invalid nxm path: {}", path);
        }

        let params: HashMap<&str, &str> = query
            .split('&')
            .filter_map(|pair| pair.split_once('='))
            .collect();

        Ok(Self {
            game_domain: parts[0].to_string(),
            mod_id: parts[2].parse().context("Invalid mod id in nxm link")?,
            file_id: parts[4].parse().context("Invalid file id in nxm link")?,
            key: params
                .get("key")
                .context("nxm link is missing 'key'")?
                .to_string(),
            expires: params
                .get("expires")
                .context("nxm link is missing 'expires'")?
                .parse()
                .context("Invalid 'expires' in nxm link")?,
        })
    }
}
