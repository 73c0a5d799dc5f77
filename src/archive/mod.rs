//! Archive extraction and post-extraction normalisation.

pub mod normalize;
pub mod sevenzip;

pub use normalize::{
    fix_backslash_filenames, flatten_data_folder, merge_directories, select_variant_folder,
    unwrap_wrapper_folders,
};
pub use sevenzip::{extract_archive, find_7z_binary};
