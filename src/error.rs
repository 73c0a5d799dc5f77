//! Error kinds shared across the installation pipeline.
//!
//! Most functions return `anyhow::Result` and attach context as errors
//! bubble up; these typed kinds mark the failures the driver reacts to
//! differently (fatal vs per-task vs fallback).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BridgeError {
    /// The collection JSON could not be parsed or lacks a `mods` array.
    /// Fatal: nothing has been written when this is raised.
    #[error("invalid collection descriptor: {0}")]
    InvalidDescriptor(String),

    /// The Nexus API rejected the supplied key.
    #[error("Nexus API key validation failed (HTTP {status})")]
    AuthFailed { status: u16 },

    /// The account is not premium; the API does not vend CDN links.
    #[error("Nexus Premium is required for direct downloads")]
    PremiumRequired,

    /// Transient API failure (timeout, DNS, 5xx, empty body) that survived
    /// all retries.
    #[error("Nexus API request failed after retries: {0}")]
    ApiTransient(String),

    /// A single archive download failed; counted per task.
    #[error("download failed for {name}: {reason}")]
    DownloadFailed { name: String, reason: String },

    /// 7-Zip could not unpack an archive; counted as an install failure.
    #[error("extraction failed for {0}")]
    ExtractionFailed(String),

    /// ModuleConfig.xml was present but unreadable or malformed.
    #[error("FOMOD config invalid: {0}")]
    FomodXmlInvalid(String),

    /// The plugin sort library failed; the caller falls back to the
    /// collection's own plugin order.
    #[error("plugin sorting failed: {0}")]
    SortFailed(String),
}
