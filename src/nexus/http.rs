//! HTTP plumbing: retrying GETs and streaming downloads.
//!
//! API GETs retry up to 3 times on timeout / connection / DNS / empty-body
//! errors with a 2 second pause between attempts. Downloads stream to disk
//! with progress lines at >=5 % granularity and abort after 60 seconds
//! below 1 KB/s.

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::error::BridgeError;
use crate::progress;

/// Retries for transient GET failures.
const MAX_RETRIES: u32 = 3;
/// Pause between retry attempts.
const RETRY_DELAY: Duration = Duration::from_secs(2);
/// Low-speed abort: below this rate...
const LOW_SPEED_BYTES_PER_SEC: u64 = 1024;
/// ...for this long, the transfer is dead.
const LOW_SPEED_WINDOW: Duration = Duration::from_secs(60);

/// Shared HTTP client with the pipeline's timeouts baked in.
pub struct HttpClient {
    client: reqwest::Client,
}

impl HttpClient {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("NexusBridge/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(30))
            .timeout(Duration::from_secs(60))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client })
    }

    /// A client without the overall timeout, for large archive downloads
    /// (the low-speed detector handles dead transfers there).
    pub fn new_for_downloads() -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("NexusBridge/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client })
    }

    pub fn inner(&self) -> &reqwest::Client {
        &self.client
    }

    /// GET returning status, headers and body, retrying transient
    /// failures.
    ///
    /// `api_key`, when present, is sent as the `apikey` header. The status
    /// code is returned so callers can map 403/429 themselves; an empty
    /// body on a 200 counts as transient.
    pub async fn get_with_retry(
        &self,
        url: &str,
        api_key: Option<&str>,
    ) -> Result<(u16, reqwest::header::HeaderMap, String)> {
        let mut last_error = String::new();

        for attempt in 1..=MAX_RETRIES {
            let mut request = self.client.get(url);
            if let Some(key) = api_key {
                request = request.header("apikey", key);
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status().as_u16();
                    let headers = response.headers().clone();
                    match response.text().await {
                        Ok(body) => {
                            if status == 200 && body.is_empty() {
                                last_error = "empty response body".to_string();
                            } else {
                                return Ok((status, headers, body));
                            }
                        }
                        Err(e) => last_error = e.to_string(),
                    }
                }
                Err(e) if is_transient(&e) => last_error = e.to_string(),
                Err(e) => return Err(e).with_context(|| format!("GET {}", url)),
            }

            if attempt < MAX_RETRIES {
                warn!(
                    "HTTP request failed (attempt {}/{}): {} - retrying",
                    attempt, MAX_RETRIES, last_error
                );
                tokio::time::sleep(RETRY_DELAY).await;
            }
        }

        Err(BridgeError::ApiTransient(format!("{}: {}", url, last_error)).into())
    }
}

/// Connection-level failures worth retrying: timeouts, refused or reset
/// connections, DNS failures (surfaced as connect errors) and truncated
/// bodies.
fn is_transient(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect() || error.is_body()
}

/// Percent-encode spaces in the path portion of a URL, preserving the
/// query untouched. Nexus CDN links carry raw spaces in filenames.
pub fn encode_url_spaces(url: &str) -> String {
    match url.split_once('?') {
        Some((path, query)) => format!("{}?{}", path.replace(' ', "%20"), query),
        None => url.replace(' ', "%20"),
    }
}

/// Stream a URL to disk, emitting progress lines and enforcing the
/// low-speed abort. Returns the byte count written.
pub async fn download_to_file(
    client: &HttpClient,
    url: &str,
    dest: &Path,
    show_progress: bool,
) -> Result<u64> {
    let encoded = encode_url_spaces(url);

    let response = client
        .inner()
        .get(&encoded)
        .send()
        .await
        .with_context(|| format!("Connection failed: {}", truncate(url, 80)))?;

    if !response.status().is_success() {
        bail!("HTTP {} from {}", response.status().as_u16(), truncate(url, 80));
    }

    let total = response.content_length().unwrap_or(0);

    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut file = tokio::fs::File::create(dest)
        .await
        .with_context(|| format!("Failed to create {}", dest.display()))?;

    let mut stream = response.bytes_stream();
    let mut downloaded: u64 = 0;
    let mut last_printed_percent: i64 = -5;

    let mut window_start = tokio::time::Instant::now();
    let mut window_bytes: u64 = 0;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.context("Failed to read download chunk")?;
        file.write_all(&chunk)
            .await
            .context("Failed to write download chunk")?;
        downloaded += chunk.len() as u64;

        if show_progress && total > 0 {
            let percent = (downloaded * 100 / total) as i64;
            if percent >= last_printed_percent + 5 || downloaded == total {
                let dl_mb = downloaded as f64 / (1024.0 * 1024.0);
                let total_mb = total as f64 / (1024.0 * 1024.0);
                progress::print_inline(&format!(
                    "  Downloading: {:.1} / {:.1} MB ({}%)",
                    dl_mb, total_mb, percent
                ));
                last_printed_percent = percent;
            }
        }

        // Low-speed abort: under 1 KB/s averaged over a 60 s window.
        let elapsed = window_start.elapsed();
        if elapsed >= LOW_SPEED_WINDOW {
            let window_delta = downloaded - window_bytes;
            if window_delta < LOW_SPEED_BYTES_PER_SEC * LOW_SPEED_WINDOW.as_secs() {
                if show_progress {
                    progress::finish_inline();
                }
                bail!(
                    "Transfer too slow: {} bytes in {}s",
                    window_delta,
                    elapsed.as_secs()
                );
            }
            window_start = tokio::time::Instant::now();
            window_bytes = downloaded;
        }
    }

    file.flush().await.context("Failed to flush download")?;
    if show_progress && total > 0 {
        progress::finish_inline();
    }

    debug!("Downloaded {} bytes to {}", downloaded, dest.display());
    Ok(downloaded)
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        format!("{}...", &s[..max.saturating_sub(3)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_url_spaces_path_only() {
        assert_eq!(
            encode_url_spaces("https://cdn.example.com/My Mod File.7z?key=a b&x=1"),
            "https://cdn.example.com/My%20Mod%20File.7z?key=a b&x=1"
        );
        assert_eq!(
            encode_url_spaces("https://cdn.example.com/plain.7z"),
            "https://cdn.example.com/plain.7z"
        );
        assert_eq!(
            encode_url_spaces("https://cdn.example.com/a b.7z"),
            "https://cdn.example.com/a%20b.7z"
        );
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("0123456789abcdef", 10), "0123456...");
    }

    #[test]
    fn test_http_client_creation() {
        assert!(HttpClient::new().is_ok());
        assert!(HttpClient::new_for_downloads().is_ok());
    }
}
