//! NexusBridge - installs Nexus Mods collections directly into Mod
//! Organizer 2 instances, no Vortex required.
//!
//! The pipeline: parse the collection descriptor, resolve CDN links
//! through the Nexus API, download archives in parallel, extract and
//! normalise each one, replay recorded FOMOD choices, then write the
//! profile's `modlist.txt` and `plugins.txt`.

pub mod archive;
pub mod collection;
pub mod error;
pub mod fomod;
pub mod installer;
pub mod mo2;
pub mod nexus;
pub mod nxm;
pub mod paths;
pub mod progress;
pub mod sort;

pub use collection::{load_collection, parse_collection, ChoiceSet, Collection};
pub use error::BridgeError;
pub use installer::{Installer, InstallerConfig, RunSummary};
pub use mo2::Mo2Instance;
