//! Phase 1b: the parallel download pool.
//!
//! Tasks are pulled through a bounded `buffer_unordered` stream sized to
//! the worker count. Completed archive paths land in a shared map under a
//! mutex; failures collect for the retry waves, which run at reduced
//! concurrency with a pause between passes so a struggling CDN gets some
//! air.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use futures::stream::{self, StreamExt};
use tokio::sync::Mutex;
use tracing::warn;

use super::scan::{archive_name_for, DownloadTask};
use crate::collection::Collection;
use crate::error::BridgeError;
use crate::nexus::{download_to_file, NexusClient};
use crate::progress;

/// Additional passes over still-failed tasks.
const RETRY_WAVES: u32 = 3;
/// Pause before each retry wave.
const WAVE_DELAY: Duration = Duration::from_secs(2);

/// Final tally of the download phase.
#[derive(Debug, Default)]
pub struct DownloadOutcome {
    pub downloaded: usize,
    /// Tasks that failed every wave, with their last error.
    pub failed: Vec<(DownloadTask, String)>,
}

/// Download a single task's archive. Returns the on-disk path.
async fn download_one(
    client: &NexusClient,
    collection: &Collection,
    task: &DownloadTask,
    downloads_dir: &Path,
) -> Result<PathBuf> {
    if let Some(direct) = &task.direct {
        download_to_file(client.download_http(), &direct.url, &direct.dest, true).await?;
        return Ok(direct.dest.clone());
    }

    let links = client.resolve_download(task.mod_id, task.file_id).await?;
    let Some(url) = links.first() else {
        bail!(
            "no download links (premium required?) - {}",
            client.mod_page_url(task.mod_id, task.file_id)
        );
    };

    let m = &collection.mods[task.mod_index];
    let dest = downloads_dir.join(archive_name_for(m, url));

    let bytes = download_to_file(client.download_http(), url, &dest, true).await?;

    if task.expected_size > 0 && bytes as i64 != task.expected_size {
        warn!(
            "Size mismatch for {}: expected {}, got {}",
            task.name, task.expected_size, bytes
        );
    }

    Ok(dest)
}

/// Run one pass over `tasks` at the given concurrency, recording results
/// into the shared archive map and returning the failures.
async fn run_wave(
    client: Arc<NexusClient>,
    collection: Arc<Collection>,
    tasks: Vec<DownloadTask>,
    downloads_dir: PathBuf,
    concurrency: usize,
    archives: Arc<Mutex<HashMap<usize, PathBuf>>>,
    is_retry: bool,
) -> Vec<(DownloadTask, String)> {
    let total = tasks.len();

    let results: Vec<Option<(DownloadTask, String)>> = stream::iter(
        tasks.into_iter().enumerate(),
    )
    .map(|(i, task)| {
        let client = Arc::clone(&client);
        let collection = Arc::clone(&collection);
        let downloads_dir = downloads_dir.clone();
        let archives = Arc::clone(&archives);
        async move {
            if is_retry {
                progress::print_line(&format!("  [Retry] Downloading: {}", task.name));
            } else {
                progress::print_line(&format!(
                    "  [{}/{}] Downloading: {}",
                    i + 1,
                    total,
                    task.name
                ));
            }

            match download_one(&client, &collection, &task, &downloads_dir).await {
                Ok(path) => {
                    archives.lock().await.insert(task.mod_index, path);
                    None
                }
                Err(e) => {
                    let failure = BridgeError::DownloadFailed {
                        name: task.name.clone(),
                        reason: format!("{:#}", e),
                    };
                    progress::print_line(&format!("  FAILED: {}", failure));
                    Some((task, format!("{:#}", e)))
                }
            }
        }
    })
    .buffer_unordered(concurrency.max(1))
    .collect()
    .await;

    results.into_iter().flatten().collect()
}

/// Run the download phase: one full-width pass, then up to three retry
/// waves at `min(workers, 4)` with a 2 s pause before each.
pub async fn run_download_phase(
    client: Arc<NexusClient>,
    collection: Arc<Collection>,
    tasks: Vec<DownloadTask>,
    downloads_dir: &Path,
    workers: usize,
    archives: Arc<Mutex<HashMap<usize, PathBuf>>>,
) -> DownloadOutcome {
    let task_count = tasks.len();

    let mut failed = run_wave(
        Arc::clone(&client),
        Arc::clone(&collection),
        tasks,
        downloads_dir.to_path_buf(),
        workers,
        Arc::clone(&archives),
        false,
    )
    .await;

    let retry_workers = workers.min(4);
    for wave in 1..=RETRY_WAVES {
        if failed.is_empty() {
            break;
        }

        progress::print_line(&format!(
            "  === Retry {}/{} for {} failed downloads ===",
            wave,
            RETRY_WAVES,
            failed.len()
        ));
        tokio::time::sleep(WAVE_DELAY).await;

        let retry_tasks: Vec<DownloadTask> = failed.drain(..).map(|(t, _)| t).collect();
        failed = run_wave(
            Arc::clone(&client),
            Arc::clone(&collection),
            retry_tasks,
            downloads_dir.to_path_buf(),
            retry_workers,
            Arc::clone(&archives),
            true,
        )
        .await;
    }

    DownloadOutcome {
        downloaded: task_count - failed.len(),
        failed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_accounting() {
        let outcome = DownloadOutcome {
            downloaded: 3,
            failed: vec![],
        };
        assert!(outcome.failed.is_empty());
        assert_eq!(outcome.downloaded, 3);
    }
}
