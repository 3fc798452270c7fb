//! Filesystem helpers for the on-disk lock store, task registry, and config.

pub mod atomic;
mod dir_lock;

pub use atomic::{atomic_write, create_exclusive, read_json};
pub use dir_lock::with_dir_lock;
