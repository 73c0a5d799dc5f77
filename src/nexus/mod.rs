//! Nexus Mods API client.
//!
//! Covers credential validation, CDN link resolution and collection
//! fetching. Requests are rate limited to at least 100 ms apart per client
//! instance (the floor is applied under the client's own lock, so
//! concurrent workers share it), and the X-RL-* response headers are
//! tracked for logging.

pub mod fetch;
pub mod http;

pub use fetch::{fetch_collection, parse_collection_url, CollectionUrl};
pub use http::{download_to_file, encode_url_spaces, HttpClient};

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::error::BridgeError;

pub(crate) const API_BASE: &str = "https://api.nexusmods.com";

/// Minimum spacing between outgoing API requests.
const REQUEST_FLOOR: Duration = Duration::from_millis(100);

/// Validated account info.
#[derive(Debug, Clone, Deserialize)]
pub struct UserInfo {
    pub name: String,
    pub is_premium: bool,
}

/// Rate limits reported by the API, tracked for logging.
#[derive(Debug, Clone, Default)]
pub struct RateLimits {
    pub hourly_remaining: Option<u32>,
    pub daily_remaining: Option<u32>,
    pub hourly_reset: Option<DateTime<Utc>>,
}

impl RateLimits {
    fn from_headers(headers: &reqwest::header::HeaderMap) -> Self {
        fn header<T: std::str::FromStr>(
            headers: &reqwest::header::HeaderMap,
            name: &str,
        ) -> Option<T> {
            headers.get(name)?.to_str().ok()?.parse().ok()
        }

        Self {
            hourly_remaining: header(headers, "x-rl-hourly-remaining"),
            daily_remaining: header(headers, "x-rl-daily-remaining"),
            hourly_reset: header(headers, "x-rl-hourly-reset"),
        }
    }

    pub fn is_low(&self) -> bool {
        self.hourly_remaining.map(|n| n < 10).unwrap_or(false)
            || self.daily_remaining.map(|n| n < 50).unwrap_or(false)
    }
}

#[derive(Debug, Deserialize)]
struct DownloadLink {
    #[serde(rename = "URI")]
    uri: String,
}

/// Nexus API client bound to one game domain.
pub struct NexusClient {
    /// API requests: 30 s connect / 60 s overall timeouts.
    http: HttpClient,
    /// Archive transfers: no overall timeout, the low-speed abort rules.
    downloads: HttpClient,
    api_key: String,
    game_domain: String,
    /// Timestamp of the last outgoing request; the 100 ms floor lives here.
    last_request: Mutex<Instant>,
    /// Latest X-RL-* headers seen, for logging.
    rate_limits: std::sync::RwLock<RateLimits>,
}

impl NexusClient {
    pub fn new(api_key: &str, game_domain: &str) -> Result<Self> {
        Ok(Self {
            http: HttpClient::new()?,
            downloads: HttpClient::new_for_downloads()?,
            api_key: api_key.to_string(),
            game_domain: game_domain.to_string(),
            last_request: Mutex::new(Instant::now()),
            rate_limits: std::sync::RwLock::new(RateLimits::default()),
        })
    }

    pub fn rate_limits(&self) -> RateLimits {
        self.rate_limits
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn record_rate_limits(&self, headers: &reqwest::header::HeaderMap) {
        let limits = RateLimits::from_headers(headers);
        if limits.is_low() {
            debug!(
                "Nexus rate limits low: hourly {:?}, daily {:?} (reset {:?})",
                limits.hourly_remaining, limits.daily_remaining, limits.hourly_reset
            );
        }
        *self.rate_limits.write().unwrap_or_else(|e| e.into_inner()) = limits;
    }

    pub fn game_domain(&self) -> &str {
        &self.game_domain
    }

    /// Enforce the inter-request floor. Held briefly; the sleep happens
    /// inside the lock so concurrent callers queue behind it.
    async fn rate_limit_wait(&self) {
        let mut last = self.last_request.lock().await;
        let elapsed = last.elapsed();
        if elapsed < REQUEST_FLOOR {
            tokio::time::sleep(REQUEST_FLOOR - elapsed).await;
        }
        *last = Instant::now();
    }

    /// Validate the API key and report the account's premium status.
    pub async fn validate(&self) -> Result<UserInfo> {
        self.rate_limit_wait().await;

        let url = format!("{}/v1/users/validate.json", API_BASE);
        let (status, headers, body) = self.http.get_with_retry(&url, Some(&self.api_key)).await?;
        self.record_rate_limits(&headers);

        if status != 200 {
            return Err(BridgeError::AuthFailed { status }.into());
        }

        let user: UserInfo =
            serde_json::from_str(&body).context("Failed to parse validation response")?;

        info!(
            "Nexus user '{}' validated (premium: {})",
            user.name, user.is_premium
        );

        Ok(user)
    }

    /// Resolve CDN download URIs for `(mod_id, file_id)`.
    ///
    /// A 403 means the account cannot receive direct links (not premium);
    /// that is reported as an empty list, not an error. Other non-200s are
    /// retried by the HTTP layer and surface as `ApiTransient`.
    pub async fn resolve_download(&self, mod_id: i64, file_id: i64) -> Result<Vec<String>> {
        self.resolve_download_inner(mod_id, file_id, None).await
    }

    /// Resolve CDN URIs using the key/expires pair from an `nxm://` link
    /// (the manual flow for non-premium accounts).
    pub async fn resolve_download_with_key(
        &self,
        mod_id: i64,
        file_id: i64,
        key: &str,
        expires: u64,
    ) -> Result<Vec<String>> {
        self.resolve_download_inner(mod_id, file_id, Some((key, expires)))
            .await
    }

    async fn resolve_download_inner(
        &self,
        mod_id: i64,
        file_id: i64,
        nxm_key: Option<(&str, u64)>,
    ) -> Result<Vec<String>> {
        self.rate_limit_wait().await;

        let mut url = format!(
            "{}/v1/games/{}/mods/{}/files/{}/download_link.json",
            API_BASE, self.game_domain, mod_id, file_id
        );
        if let Some((key, expires)) = nxm_key {
            url.push_str(&format!("?key={}&expires={}", key, expires));
        }

        let (status, headers, body) = self.http.get_with_retry(&url, Some(&self.api_key)).await?;
        self.record_rate_limits(&headers);

        if status == 403 {
            debug!(
                "403 resolving {}/{} - premium required, no direct link",
                mod_id, file_id
            );
            return Ok(Vec::new());
        }

        if status != 200 {
            return Err(BridgeError::ApiTransient(format!(
                "download_link for {}/{} returned HTTP {}",
                mod_id, file_id, status
            ))
            .into());
        }

        let links: Vec<DownloadLink> =
            serde_json::from_str(&body).context("Failed to parse download links")?;

        Ok(links.into_iter().map(|l| l.uri).collect())
    }

    pub fn http(&self) -> &HttpClient {
        &self.http
    }

    /// The client archive transfers go through.
    pub fn download_http(&self) -> &HttpClient {
        &self.downloads
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// Web URL of a mod file page, for manual-download fallbacks.
    pub fn mod_page_url(&self, mod_id: i64, file_id: i64) -> String {
        format!(
            "https://www.nexusmods.com/{}/mods/{}?tab=files&file_id={}",
            self.game_domain.to_lowercase(),
            mod_id,
            file_id
        )
    }
}
