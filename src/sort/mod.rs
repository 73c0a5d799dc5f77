//! Load-order generation: `modlist.txt` and `plugins.txt`.

pub mod modlist;
pub mod plugins;

pub use modlist::{compute_mod_order, write_modlist, SortMod, SortRule};
pub use plugins::{parse_plugins, plugin_load_order, write_plugins};
