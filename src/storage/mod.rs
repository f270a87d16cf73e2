//! Persisted state: one event log, snapshot, token index, and frame log per
//! session, all rooted under `Config::sessions_dir()`.

pub mod event_log;
pub mod extractor_state;
pub mod frame_log;
pub mod snapshot;
pub mod token_store;

pub use event_log::EventLog;
pub use extractor_state::ExtractorState;
pub use frame_log::{FrameDirection, FrameLog};
pub use snapshot::SessionSnapshot;
pub use token_store::TokenStore;

/// Writes `contents` to `path` atomically: write to a sibling temp file,
/// `fsync`, then rename over the destination. Used by every store whose
/// writes must never leave a half-written file on disk.
pub(crate) fn atomic_write(path: &std::path::Path, contents: &[u8]) -> std::io::Result<()> {
    use std::io::Write;

    let dir = path.parent().unwrap_or_else(|| std::path::Path::new("."));
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("tmp");
    let tmp_path = dir.join(format!(".{file_name}.{}.tmp", uuid::Uuid::new_v4().simple()));

    let mut file = std::fs::File::create(&tmp_path)?;
    file.write_all(contents)?;
    file.sync_all()?;
    drop(file);

    std::fs::rename(&tmp_path, path)?;
    Ok(())
}
