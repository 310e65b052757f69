//! Atomic file replacement.
//!
//! Content is written to a sibling `*.tmp` file, flushed, then renamed over
//! the destination. A failed write leaves the previous file untouched.

use std::error::Error;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{error, info, instrument};

use crate::utils::ensure_parent_writable;

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "output".into());
    name.push(".tmp");
    path.with_file_name(name)
}

async fn write_and_sync(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let mut file = fs::File::create(path).await?;
    file.write_all(contents).await?;
    file.sync_all().await?;
    Ok(())
}

/// Replace `path` with `contents` atomically.
#[instrument(level = "info", skip_all, fields(path = %path.display(), bytes = contents.len()))]
pub async fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), Box<dyn Error>> {
    ensure_parent_writable(path).await?;
    let tmp = temp_path(path);

    if let Err(e) = write_and_sync(&tmp, contents).await {
        error!(tmp = %tmp.display(), error = %e, "Failed to write temp file");
        let _ = fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    if let Err(e) = fs::rename(&tmp, path).await {
        error!(error = %e, "Failed to move temp file into place");
        let _ = fs::remove_file(&tmp).await;
        return Err(e.into());
    }

    info!("Wrote file");
    Ok(())
}
