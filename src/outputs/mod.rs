//! Feed output.
//!
//! - [`rss`]: renders a [`FeedDocument`](crate::models::FeedDocument) as RSS 2.0
//! - [`writer`]: replaces files atomically
//!
//! ```text
//! feed.xml        # overwritten every run
//! feed.xml.tmp    # exists only while a write is in flight
//! ```

pub mod rss;
pub mod writer;

use std::error::Error;
use std::path::Path;
use tracing::{info, instrument};

use crate::models::FeedDocument;

/// Render and atomically write the feed.
#[instrument(level = "info", skip_all, fields(path = %path.display(), items = doc.items.len()))]
pub async fn write_feed(doc: &FeedDocument, path: &Path) -> Result<(), Box<dyn Error>> {
    let xml = rss::render(doc)?;
    writer::write_atomic(path, xml.as_bytes()).await?;
    info!("Feed written");
    Ok(())
}
