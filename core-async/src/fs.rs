//! Async filesystem helpers re-exported from tokio.
//!
//! Device drivers backed by mounted storage and the staging area use these
//! rather than `std::fs` so that byte transfer never blocks a runtime thread.

pub use tokio::fs::{
    copy, create_dir, create_dir_all, metadata, read, read_dir, remove_dir, remove_dir_all,
    remove_file, rename, try_exists, write, DirEntry, File, OpenOptions,
};
