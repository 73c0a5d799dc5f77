//! Fetching collection descriptors from nexusmods.com.
//!
//! A collection URL is resolved through the GraphQL v2 API to the latest
//! published revision's download link, which in turn yields a CDN URL for
//! a .7z archive containing `collection.json`.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use regex::Regex;
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use super::{encode_url_spaces, NexusClient, API_BASE};
use crate::archive::sevenzip::extract_single_file;

/// Game domain and slug parsed out of a collection URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionUrl {
    pub game: String,
    pub slug: String,
}

/// Parse a Nexus collection URL.
///
/// Accepts `nexusmods.com/<game>/collections/<slug>` and the
/// `nexusmods.com/games/<game>/collections/<slug>` form, with or without
/// query/fragment suffixes. Returns `None` for anything else (e.g. a
/// local file path).
pub fn parse_collection_url(input: &str) -> Option<CollectionUrl> {
    if !input.contains("nexusmods.com") && !input.starts_with("http") {
        return None;
    }

    let re = Regex::new(r"nexusmods\.com/(?:games/)?([^/]+)/collections/([^/?#]+)").ok()?;
    let caps = re.captures(input)?;

    Some(CollectionUrl {
        game: caps.get(1)?.as_str().to_string(),
        slug: caps.get(2)?.as_str().to_string(),
    })
}

/// Whether the CLI input looks like a URL rather than a local path.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://") || input.contains("nexusmods.com")
}

#[derive(Debug, Deserialize)]
struct GraphQlResponse {
    data: Option<GraphQlData>,
    errors: Option<Vec<serde_json::Value>>,
}

#[derive(Debug, Deserialize)]
struct GraphQlData {
    collection: Option<GraphQlCollection>,
}

#[derive(Debug, Deserialize)]
struct GraphQlCollection {
    #[serde(rename = "latestPublishedRevision")]
    latest_published_revision: Option<Revision>,
}

#[derive(Debug, Deserialize)]
struct Revision {
    #[serde(rename = "revisionNumber", default)]
    revision_number: i64,
    #[serde(rename = "downloadLink")]
    download_link: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DownloadLinksResponse {
    download_links: Vec<CdnLink>,
}

#[derive(Debug, Deserialize)]
struct CdnLink {
    #[serde(rename = "URI")]
    uri: String,
}

/// Fetch a collection archive and return the path of the extracted
/// `collection.json` inside `work_dir`.
pub async fn fetch_collection(
    client: &NexusClient,
    url: &CollectionUrl,
    work_dir: &Path,
) -> Result<PathBuf> {
    info!("Fetching collection {} ({})", url.slug, url.game);

    // Latest published revision via GraphQL.
    let query = json!({
        "query": "query GetCollection($slug: String!) { \
            collection(slug: $slug) { \
                latestPublishedRevision { revisionNumber downloadLink } \
            } }",
        "variables": { "slug": url.slug },
    });

    let response = client
        .http()
        .inner()
        .post(format!("{}/v2/graphql", API_BASE))
        .header("Content-Type", "application/json")
        .header("apikey", client.api_key())
        .json(&query)
        .send()
        .await
        .context("Failed to query Nexus GraphQL API")?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        bail!("GraphQL API error {}: {}", status, body);
    }

    let graphql: GraphQlResponse = response
        .json()
        .await
        .context("Failed to parse GraphQL response")?;

    if let Some(errors) = graphql.errors {
        bail!("GraphQL errors: {:?}", errors);
    }

    let revision = graphql
        .data
        .and_then(|d| d.collection)
        .and_then(|c| c.latest_published_revision)
        .context("Collection has no published revision (adult content may be blocked)")?;

    info!("  Revision: {}", revision.revision_number);

    let download_link = revision
        .download_link
        .context("Revision carries no download link (premium or content settings)")?;
    let download_link = if download_link.starts_with('/') {
        format!("{}{}", API_BASE, download_link)
    } else {
        download_link
    };

    // The link endpoint hands back CDN URLs for the .7z bundle.
    let (status, _headers, body) = client
        .http()
        .get_with_retry(&download_link, Some(client.api_key()))
        .await?;
    if status != 200 {
        bail!("Download-links endpoint returned HTTP {}", status);
    }

    let links: DownloadLinksResponse =
        serde_json::from_str(&body).context("Failed to parse collection download links")?;
    let cdn_url = links
        .download_links
        .first()
        .map(|l| encode_url_spaces(&l.uri))
        .context("No CDN links for collection archive")?;

    // Download the bundle and pull collection.json out of it.
    std::fs::create_dir_all(work_dir)?;
    let archive_path = work_dir.join(format!("collection_{}.7z", url.slug));

    info!("  Downloading collection archive...");
    super::download_to_file(client.download_http(), &cdn_url, &archive_path, false).await?;

    let extract_dir = work_dir.join(format!("collection_{}", url.slug));
    extract_single_file(&archive_path, "collection.json", &extract_dir)?;

    let json_path = extract_dir.join("collection.json");
    if !json_path.exists() {
        bail!("collection.json not found in collection archive");
    }

    let _ = std::fs::remove_file(&archive_path);

    info!("  Extracted {}", json_path.display());
    Ok(json_path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_collection_url() {
        let info =
            parse_collection_url("https://www.nexusmods.com/skyrimspecialedition/collections/vith5v")
                .unwrap();
        assert_eq!(info.game, "skyrimspecialedition");
        assert_eq!(info.slug, "vith5v");

        let info = parse_collection_url(
            "https://next.nexusmods.com/games/skyrimspecialedition/collections/abc123?tab=mods",
        )
        .unwrap();
        assert_eq!(info.game, "skyrimspecialedition");
        assert_eq!(info.slug, "abc123");

        assert!(parse_collection_url("/path/to/collection.json").is_none());
        assert!(parse_collection_url("collection.json").is_none());
    }

    #[test]
    fn test_url_fragment_stripped() {
        let info = parse_collection_url(
            "https://www.nexusmods.com/skyrimspecialedition/collections/slug#section",
        )
        .unwrap();
        assert_eq!(info.slug, "slug");
    }

    #[test]
    fn test_is_url() {
        assert!(is_url("https://www.nexusmods.com/x/collections/y"));
        assert!(is_url("nexusmods.com/x/collections/y"));
        assert!(!is_url("collection.json"));
        assert!(!is_url("./dir/collection.json"));
    }
}
