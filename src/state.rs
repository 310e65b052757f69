//! Incremental-run marker: `{ "last_date": "<RFC-3339>" }`.
//!
//! A missing file means a first run. An unreadable or corrupt file is
//! logged and treated the same way, so a bad marker never blocks the feed.

use std::error::Error;
use std::path::Path;
use tokio::fs;
use tracing::{info, instrument, warn};

use crate::models::ProcessingState;
use crate::outputs::writer::write_atomic;

#[instrument(level = "info", skip_all, fields(path = %path.display()))]
pub async fn load_state(path: &Path) -> Option<ProcessingState> {
    let raw = match fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!("No state file yet");
            return None;
        }
        Err(e) => {
            warn!(error = %e, "Could not read state file; ignoring it");
            return None;
        }
    };
    match serde_json::from_str::<ProcessingState>(&raw) {
        Ok(state) => {
            info!(last_date = %state.last_date, "Loaded state");
            Some(state)
        }
        Err(e) => {
            warn!(error = %e, "Corrupt state file; ignoring it");
            None
        }
    }
}

#[instrument(level = "info", skip_all, fields(path = %path.display(), last_date = %state.last_date))]
pub async fn save_state(path: &Path, state: &ProcessingState) -> Result<(), Box<dyn Error>> {
    let json = serde_json::to_string_pretty(state)?;
    write_atomic(path, json.as_bytes()).await
}
