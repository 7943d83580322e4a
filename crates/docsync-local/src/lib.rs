//! Local filesystem backends for docsync: per-stream watermark files and
//! the pass lock.

mod lock;
mod watermark;

use std::path::PathBuf;

pub use lock::FileLock;
pub use watermark::FileWatermarkStore;

/// Default state directory (`{data_local_dir}/docsync`).
pub fn default_state_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("docsync")
}
