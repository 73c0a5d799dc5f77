//! External 7-Zip driver.
//!
//! Extraction shells out to a 7-Zip binary (`7za`, `7z` or `7zzs`) found
//! next to our executable or on PATH. `x -y -o<dest>` keeps the archive's
//! directory structure and never prompts.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use anyhow::{Context, Result};
use tracing::debug;

use crate::error::BridgeError;

/// Candidate binary names, in preference order.
const BINARY_NAMES: &[&str] = &["7za", "7z", "7zzs"];

/// Locate a 7-Zip binary next to the executable or on PATH.
pub fn find_7z_binary() -> Result<PathBuf> {
    let exe_dir = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(Path::to_path_buf));

    if let Some(dir) = exe_dir {
        for name in BINARY_NAMES {
            let candidate = dir.join(name);
            if candidate.exists() {
                return Ok(candidate);
            }
        }
    }

    for name in BINARY_NAMES {
        if let Ok(output) = Command::new("which").arg(name).output() {
            if output.status.success() {
                let path = String::from_utf8_lossy(&output.stdout).trim().to_string();
                if !path.is_empty() {
                    return Ok(PathBuf::from(path));
                }
            }
        }
    }

    anyhow::bail!(
        "7-Zip binary not found; install p7zip or place {} next to the executable",
        BINARY_NAMES[0]
    )
}

/// Extract an archive into `dest`, creating it if needed.
pub fn extract_archive(archive: &Path, dest: &Path) -> Result<()> {
    let kind = detect_archive_kind(archive);
    if !matches!(kind.as_str(), "7z" | "zip" | "rar") {
        return Err(
            BridgeError::ExtractionFailed(format!(
                "{}: unsupported archive format '{}'",
                archive.display(),
                kind
            ))
            .into(),
        );
    }

    let sevenzip = find_7z_binary()?;
    std::fs::create_dir_all(dest)
        .with_context(|| format!("Failed to create {}", dest.display()))?;

    debug!("Extracting {} -> {}", archive.display(), dest.display());

    let output = Command::new(&sevenzip)
        .arg("x")
        .arg("-y")
        .arg(format!("-o{}", dest.display()))
        .arg(archive)
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .output()
        .with_context(|| format!("Failed to run {}", sevenzip.display()))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let first_line = stderr.lines().next().unwrap_or("unknown error");
        return Err(BridgeError::ExtractionFailed(format!(
            "{}: {}",
            archive.display(),
            first_line
        ))
        .into());
    }

    Ok(())
}

/// Extract a single named entry from an archive into `dest`.
pub fn extract_single_file(archive: &Path, entry: &str, dest: &Path) -> Result<()> {
    let sevenzip = find_7z_binary()?;
    std::fs::create_dir_all(dest)?;

    let output = Command::new(&sevenzip)
        .arg("x")
        .arg("-y")
        .arg(format!("-o{}", dest.display()))
        .arg(archive)
        .arg(entry)
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .output()
        .with_context(|| format!("Failed to run {}", sevenzip.display()))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(BridgeError::ExtractionFailed(format!(
            "{} ({})",
            archive.display(),
            stderr.lines().next().unwrap_or("unknown error")
        ))
        .into());
    }

    Ok(())
}

/// Identify an archive by magic bytes, falling back to the extension.
pub fn detect_archive_kind(path: &Path) -> String {
    if let Ok(mut file) = File::open(path) {
        let mut magic = [0u8; 8];
        if file.read(&mut magic).is_ok() {
            if magic.starts_with(b"PK\x03\x04") || magic.starts_with(b"PK\x05\x06") {
                return "zip".to_string();
            }
            if magic.starts_with(b"7z\xBC\xAF\x27\x1C") {
                return "7z".to_string();
            }
            if magic.starts_with(b"Rar!") {
                return "rar".to_string();
            }
        }
    }
    path.extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase()
}
