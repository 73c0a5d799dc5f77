//! NexusBridge CLI - Nexus collections straight into MO2.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use nexusbridge::installer::{worker_count, Installer, InstallerConfig};
use nexusbridge::paths::load_api_key;

#[derive(Parser)]
#[command(name = "nexusbridge")]
#[command(version)]
#[command(about = "Installs Nexus Mods collections directly into Mod Organizer 2 - no Vortex required")]
struct Cli {
    /// Collection URL or path to a local collection.json
    collection: String,

    /// Path to the MO2 instance directory
    mo2_path: PathBuf,

    /// Continue automatically when some downloads keep failing
    #[arg(short = 'y', long = "yes")]
    yes: bool,

    /// Profile to write modlist.txt / plugins.txt into
    #[arg(long, default_value = "Default")]
    profile: String,

    /// Parse and scan only, printing a machine-readable summary
    #[arg(long)]
    query: bool,

    /// Satisfy one queued download from an nxm:// link (non-premium flow)
    #[arg(long, value_name = "nxm-url")]
    nxm: Option<String>,

    /// Nexus API key (otherwise read from nexus_apikey.txt or the config dir)
    #[arg(long, env = "NEXUS_API_KEY")]
    api_key: Option<String>,

    /// Enable verbose logging (RUST_LOG overrides)
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if cli.verbose || std::env::var("RUST_LOG").is_ok() {
        let default = if cli.verbose {
            "nexusbridge=debug"
        } else {
            "nexusbridge=warn"
        };
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
            )
            .with_writer(std::io::stderr)
            .init();
    }

    match run(cli).await {
        Ok(failed) if failed == 0 => ExitCode::SUCCESS,
        Ok(_) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// Returns the number of failed installs.
async fn run(cli: Cli) -> Result<usize> {
    let Some(api_key) = load_api_key(cli.api_key.as_deref()) else {
        anyhow::bail!(
            "Nexus API key required. Create nexus_apikey.txt or place it in the \
             nexusbridge config directory.\n\
             Get your key from: https://www.nexusmods.com/users/myaccount?tab=api"
        );
    };

    let config = InstallerConfig {
        input: cli.collection,
        mo2_root: cli.mo2_path,
        profile: cli.profile,
        auto_yes: cli.yes,
        api_key,
        workers: worker_count(),
    };

    let installer = Installer::new(config);

    if cli.query {
        installer.query().await?;
        return Ok(0);
    }

    if let Some(link) = cli.nxm {
        installer.satisfy_nxm(&link).await?;
        return Ok(0);
    }

    let summary = installer.run().await?;
    Ok(summary.failed)
}
