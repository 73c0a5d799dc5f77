//! The installation driver.
//!
//! Orchestrates the pipeline end to end: resolve the input (URL or local
//! descriptor), validate credentials, scan for existing archives, run the
//! download pool with its retry waves, run the install pool, then write
//! `plugins.txt` and `modlist.txt` into the profile. Progress is emitted
//! as protocol lines on stdout for the GUI shell.

pub mod download;
pub mod install;
pub mod scan;

pub use download::{run_download_phase, DownloadOutcome};
pub use install::{run_install_phase, InstallStats, InstallTask};
pub use scan::{scan_collection, DownloadTask, ScanResult};

use std::collections::HashMap;
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tokio::sync::Mutex;
use tracing::info;

use crate::collection::{self, Collection};
use crate::error::BridgeError;
use crate::mo2::Mo2Instance;
use crate::nexus::{fetch, NexusClient};
use crate::nxm::NxmLink;
use crate::progress;
use crate::sort::{self, SortMod, SortRule};

/// Download/install worker pool size: every core, but at least 4; 8 when
/// the machine will not say.
pub fn worker_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get().max(4))
        .unwrap_or(8)
}

/// Driver configuration, straight from the CLI.
#[derive(Debug, Clone)]
pub struct InstallerConfig {
    /// Collection URL or path to a local collection.json.
    pub input: String,
    /// MO2 instance root.
    pub mo2_root: PathBuf,
    /// Profile receiving modlist.txt / plugins.txt.
    pub profile: String,
    /// Continue past residual download failures without asking.
    pub auto_yes: bool,
    pub api_key: String,
    pub workers: usize,
}

/// Final counts; the process exits non-zero iff `failed > 0`.
#[derive(Debug, Default)]
pub struct RunSummary {
    pub downloaded: usize,
    pub installed: usize,
    pub skipped: usize,
    pub failed: usize,
}

pub struct Installer {
    config: InstallerConfig,
}

impl Installer {
    pub fn new(config: InstallerConfig) -> Self {
        Self { config }
    }

    /// Resolve the CLI input into a parsed collection. URLs are fetched
    /// through the API (and archived next to the instance); anything else
    /// is read as a local file.
    async fn resolve_collection(&self) -> Result<Collection> {
        if fetch::is_url(&self.config.input) {
            let url = fetch::parse_collection_url(&self.config.input)
                .context("Unrecognised collection URL")?;

            let client = NexusClient::new(&self.config.api_key, &url.game)?;
            let work_dir = self.config.mo2_root.join(".collection_temp");
            let json_path = fetch::fetch_collection(&client, &url, &work_dir).await?;

            // Archival copy for later re-runs and inspection.
            let saved = self
                .config
                .mo2_root
                .join(format!("collection_{}.json", url.slug));
            if std::fs::copy(&json_path, &saved).is_ok() {
                progress::print_line(&format!("Saved collection to: {}", saved.display()));
            }

            collection::load_collection(&json_path)
        } else {
            progress::print_line(&format!("Loading collection: {}", self.config.input));
            collection::load_collection(std::path::Path::new(&self.config.input))
        }
    }

    /// Full install run. Returns the summary; the caller maps `failed`
    /// onto the exit code.
    pub async fn run(&self) -> Result<RunSummary> {
        let workers = self.config.workers;
        let mut collection = self.resolve_collection().await?;

        progress::print_line(&format!(
            "Parsed collection: {} by {}",
            collection.collection_name(),
            collection.collection_author()
        ));
        progress::print_line(&format!("  Game: {}", collection.game_domain()));
        progress::print_line(&format!("  Mods: {}", collection.mods.len()));

        let client = Arc::new(NexusClient::new(
            &self.config.api_key,
            collection.game_domain(),
        )?);

        let user = client.validate().await?;
        progress::print_line(&format!("  Logged in as: {}", user.name));
        progress::print_line(&format!(
            "  Premium: {}",
            if user.is_premium { "Yes" } else { "No" }
        ));
        if !user.is_premium {
            return Err(BridgeError::PremiumRequired.into());
        }
        let limits = client.rate_limits();
        if let (Some(hourly), Some(daily)) = (limits.hourly_remaining, limits.daily_remaining) {
            progress::print_line(&format!(
                "  API limits: {} hourly, {} daily remaining",
                hourly, daily
            ));
        }

        let instance = Mo2Instance::new(self.config.mo2_root.clone());
        instance.create_directories(&self.config.profile)?;

        // Phase 1: recognise what is already on disk.
        progress::print_line("Phase 1: Scanning archives ...");
        let scan = scan_collection(&mut collection, &instance.mods_dir, &instance.downloads_dir);
        progress::print_line(&format!("  Found {} existing archives", scan.archives.len()));
        progress::print_line(&format!(
            "  Need to download {} archives",
            scan.download_tasks.len()
        ));

        let skipped = scan.skipped;
        let archives = Arc::new(Mutex::new(scan.archives));
        let collection = Arc::new(collection);
        let mut downloaded = 0usize;

        // Phase 1b: the download pool plus retry waves.
        if !scan.download_tasks.is_empty() {
            progress::print_line(&format!(
                "Phase 1b: Downloading {} archives with {} threads ...",
                scan.download_tasks.len(),
                workers
            ));

            let outcome = run_download_phase(
                Arc::clone(&client),
                Arc::clone(&collection),
                scan.download_tasks,
                &instance.downloads_dir,
                workers,
                Arc::clone(&archives),
            )
            .await;

            downloaded = outcome.downloaded;
            progress::print_line(&format!(
                "  Downloaded: {}, Failed: {}",
                outcome.downloaded,
                outcome.failed.len()
            ));

            if !outcome.failed.is_empty() {
                progress::print_line(&format!(
                    "WARNING: {} mod(s) failed to download after retries:",
                    outcome.failed.len()
                ));
                for (task, error) in &outcome.failed {
                    progress::print_line(&format!("  - {} ({})", task.name, error));
                }

                if !self.confirm_continue()? {
                    bail!("Installation cancelled by user");
                }
                progress::print_line("Continuing with installation...");
            }
        }

        // Phase 2: install everything we have an archive for. The download
        // pool has drained, so the shared map is quiescent.
        let archives = archives.lock().await.clone();
        let collection = Arc::try_unwrap(collection).unwrap_or_else(|shared| (*shared).clone());

        let stats = self.run_install(&collection, archives, &instance, workers)?;

        // Load orders: plugins first, the mod sorter consumes them.
        progress::print_line("Generating plugins.txt");
        let profile_dir = instance.profile_dir(&self.config.profile);
        let game_path = instance.discover_game_path();
        match &game_path {
            Some(path) => progress::print_line(&format!("  Using game path: {}", path.display())),
            None => progress::print_line("  Game path not found, using collection order"),
        }

        let plugin_order = sort::plugin_load_order(
            game_path.as_deref(),
            &instance.mods_dir,
            &collection.plugins,
            collection.game_domain(),
        );
        sort::write_plugins(&profile_dir.join("plugins.txt"), &plugin_order)?;

        progress::print_line("Generating modlist.txt");
        let sort_mods: Vec<SortMod> = collection
            .mods
            .iter()
            .map(|m| SortMod {
                name: m.name.clone(),
                logical_filename: m.source.logical_filename.clone(),
                folder_name: m.folder_name.clone(),
                md5: m.source.md5.clone(),
            })
            .collect();
        let sort_rules: Vec<SortRule> = collection
            .mod_rules
            .iter()
            .map(|r| SortRule {
                rule_type: r.rule_type.to_lowercase(),
                source_logical_name: r.source.logical_file_name.clone(),
                source_md5: r.source.file_md5.clone(),
                reference_logical_name: r.reference.logical_file_name.clone(),
                reference_md5: r.reference.file_md5.clone(),
            })
            .collect();

        let mod_order =
            sort::compute_mod_order(&sort_mods, &sort_rules, &plugin_order, &instance.mods_dir);
        sort::write_modlist(&profile_dir.join("modlist.txt"), &mod_order)?;

        let summary = RunSummary {
            downloaded,
            installed: stats.installed,
            skipped,
            failed: stats.failed,
        };

        progress::print_line("");
        progress::print_line("=== Summary ===");
        progress::print_line(&format!("Downloaded: {}", summary.downloaded));
        progress::print_line(&format!("Installed:  {}", summary.installed));
        progress::print_line(&format!(
            "Skipped:    {} (already installed)",
            summary.skipped
        ));
        progress::print_line(&format!("Failed:     {}", summary.failed));
        progress::print_line("");
        progress::print_line("Done! Please restart Mod Organizer 2.");

        Ok(summary)
    }

    /// Build install tasks for every mod with an archive and an empty
    /// destination, then run the pool.
    fn run_install(
        &self,
        collection: &Collection,
        archives: HashMap<usize, PathBuf>,
        instance: &Mo2Instance,
        workers: usize,
    ) -> Result<InstallStats> {
        let total = collection.mods.len();
        let mut tasks: Vec<InstallTask> = Vec::new();

        for (index, archive_path) in archives {
            let m = &collection.mods[index];
            let dest_dir = instance.mods_dir.join(&m.folder_name);

            tasks.push(InstallTask {
                archive_path,
                dest_dir,
                scratch_base: instance.scratch_dir(),
                folder_name: m.folder_name.clone(),
                mod_name: m.name.clone(),
                mod_id: m.source.mod_id,
                choices: m.choices.clone(),
                expected_paths: m.expected_paths.clone(),
                ordinal: index,
                total,
            });
        }

        if tasks.is_empty() {
            return Ok(InstallStats::default());
        }
        tasks.sort_by_key(|t| t.ordinal);

        std::fs::create_dir_all(instance.scratch_dir())?;
        progress::print_line(&format!(
            "Phase 2: Installing {} mods with {} threads ...",
            tasks.len(),
            workers
        ));

        let stats = run_install_phase(&tasks, workers);

        let _ = std::fs::remove_dir_all(instance.scratch_dir());
        Ok(stats)
    }

    /// Ask the user whether to continue past residual download failures.
    fn confirm_continue(&self) -> Result<bool> {
        if self.config.auto_yes {
            progress::print_line("Auto-continuing due to --yes flag...");
            return Ok(true);
        }

        progress::print_line(
            "Continue anyway? This may leave the mod setup incomplete. [y/N]: ",
        );
        let mut response = String::new();
        std::io::stdin()
            .lock()
            .read_line(&mut response)
            .context("Failed to read confirmation")?;

        Ok(matches!(response.trim(), "y" | "Y" | "yes" | "Yes"))
    }

    /// `--query`: parse and scan only, emitting the machine-readable
    /// block the GUI consumes. Writes nothing.
    pub async fn query(&self) -> Result<()> {
        let mut collection = self.resolve_collection().await?;

        let instance = Mo2Instance::new(self.config.mo2_root.clone());
        let scan = scan_collection(&mut collection, &instance.mods_dir, &instance.downloads_dir);

        let download_bytes: i64 = scan
            .download_tasks
            .iter()
            .map(|t| t.expected_size.max(0))
            .sum();
        let install_bytes: i64 = collection
            .mods
            .iter()
            .filter(|m| !m.folder_name.is_empty())
            .map(|m| m.source.file_size.max(0))
            .sum();

        progress::print_line(&format!("COLLECTION_NAME:{}", collection.collection_name()));
        progress::print_line(&format!("GAME:{}", collection.game_domain()));
        progress::print_line(&format!("TOTAL_MODS:{}", collection.mods.len()));
        progress::print_line(&format!("TO_DOWNLOAD:{}", scan.download_tasks.len()));
        progress::print_line(&format!("ALREADY_HAVE:{}", scan.archives.len()));
        progress::print_line(&format!("SKIPPED:{}", scan.skipped));
        progress::print_line(&format!("DOWNLOAD_BYTES:{}", download_bytes));
        progress::print_line(&format!("INSTALL_BYTES:{}", install_bytes));

        for task in &scan.download_tasks {
            progress::print_line(&format!(
                "QUEUE_ITEM:{}:{}:{}:{}",
                task.mod_id, task.file_id, task.expected_size, task.name
            ));
        }

        let premium = match NexusClient::new(&self.config.api_key, collection.game_domain()) {
            Ok(client) => client
                .validate()
                .await
                .map(|user| user.is_premium)
                .unwrap_or(false),
            Err(_) => false,
        };
        progress::print_line(&format!("Premium: {}", if premium { "Yes" } else { "No" }));

        Ok(())
    }

    /// `--nxm <link>`: satisfy one queued download with the key/expires
    /// pair from an nxm:// link (the non-premium manual flow).
    pub async fn satisfy_nxm(&self, link_text: &str) -> Result<()> {
        let link = NxmLink::parse(link_text)?;
        let mut collection = self.resolve_collection().await?;

        let instance = Mo2Instance::new(self.config.mo2_root.clone());
        instance.create_directories(&self.config.profile)?;

        let scan = scan_collection(&mut collection, &instance.mods_dir, &instance.downloads_dir);
        let task = scan
            .download_tasks
            .iter()
            .find(|t| t.mod_id == link.mod_id && t.file_id == link.file_id)
            .with_context(|| {
                format!(
                    "nxm link {}/{} does not match any queued download",
                    link.mod_id, link.file_id
                )
            })?;

        let client = NexusClient::new(&self.config.api_key, &link.game_domain)?;
        let links = client
            .resolve_download_with_key(link.mod_id, link.file_id, &link.key, link.expires)
            .await?;
        let url = links
            .first()
            .context("No download links for nxm request")?;

        let m = &collection.mods[task.mod_index];
        let dest = instance.downloads_dir.join(scan::archive_name_for(m, url));

        progress::print_line(&format!("  [nxm] Downloading: {}", task.name));
        crate::nexus::download_to_file(client.download_http(), url, &dest, true).await?;
        progress::print_line(&format!("  [nxm] Saved: {}", dest.display()));

        info!("nxm download complete for {}", task.name);
        Ok(())
    }
}
