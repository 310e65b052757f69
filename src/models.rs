//! Data models for fetched records, finished articles and the output feed.
//!
//! - [`RawRecord`]: one listing entry or API post, before selection
//! - [`Article`]: an extracted, sanitized item ready for the feed
//! - [`ChannelMeta`] and [`FeedDocument`]: the RSS channel being assembled
//! - [`ProcessingState`]: the optional "last processed" marker

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A taxonomy term attached to a record (WordPress category or tag).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Term {
    pub name: String,
    pub slug: String,
}

/// A raw record as returned by a source, before filtering and extraction.
///
/// API sources fill most fields directly from the post object. Listing and
/// feed sources only know what the card or item shows, so `body_html` (and
/// for some listings `date`) stays `None` until the detail page is fetched.
#[derive(Debug, Clone, Default)]
pub struct RawRecord {
    /// Source-side identifier (WordPress post id), when there is one.
    pub id: Option<u64>,
    /// Title markup: escaped text, possibly with inline tags. Sources that
    /// read plain text escape it before storing.
    pub title: String,
    /// Link to the article page. May still carry an internal port.
    pub link: String,
    /// Publish date in the source's local time, in whatever shape the source uses.
    pub date: Option<String>,
    /// Publish date in UTC, when the source provides one.
    pub date_gmt: Option<String>,
    /// Full body HTML.
    pub body_html: Option<String>,
    /// Short summary HTML or text.
    pub excerpt: Option<String>,
    /// Structured featured image (API `featured_media` or listing thumbnail).
    pub featured_image: Option<String>,
    pub categories: Vec<Term>,
}

/// A finished article: extracted, sanitized and ready to serialize.
#[derive(Debug, Clone, PartialEq)]
pub struct Article {
    pub title: String,
    /// Absolute link with internal ports removed.
    pub link: String,
    pub published_at: DateTime<Utc>,
    /// Sanitized body, safe to place inside a single CDATA section.
    pub body_html: String,
    /// Plain-text excerpt for `<description>`.
    pub summary: String,
    pub image_url: Option<String>,
    pub category: Option<String>,
}

/// Channel-level metadata for the generated feed.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelMeta {
    pub title: String,
    pub link: String,
    pub description: String,
    pub language: String,
    pub last_build_date: DateTime<Utc>,
    /// Time-to-live in minutes.
    pub ttl: u32,
    pub generator: Option<String>,
    /// Public URL of the feed itself, emitted as `atom:link rel="self"`.
    pub self_link: Option<String>,
}

/// The output artifact: channel metadata plus its items in emission order.
#[derive(Debug, Clone)]
pub struct FeedDocument {
    pub channel: ChannelMeta,
    /// Prefix for item GUIDs (a slug of the source name).
    pub guid_prefix: String,
    /// When set, mixed into every GUID so each run looks new to consumers.
    pub guid_salt: Option<i64>,
    /// Emit `media:content` blocks for item images.
    pub media_rss: bool,
    pub items: Vec<Article>,
}

impl FeedDocument {
    pub fn new(channel: ChannelMeta, guid_prefix: impl Into<String>) -> Self {
        Self {
            channel,
            guid_prefix: guid_prefix.into(),
            guid_salt: None,
            media_rss: false,
            items: Vec::new(),
        }
    }

    pub fn push(&mut self, article: Article) {
        self.items.push(article);
    }

    /// Publish time of the newest item, if any.
    pub fn newest_item(&self) -> Option<DateTime<Utc>> {
        self.items.iter().map(|a| a.published_at).max()
    }
}

/// Persisted marker for incremental runs.
///
/// Serialized as `{ "last_date": "<RFC-3339>" }`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct ProcessingState {
    pub last_date: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn channel() -> ChannelMeta {
        ChannelMeta {
            title: "Câmara".to_string(),
            link: "https://example.gov.br".to_string(),
            description: "Notícias".to_string(),
            language: "pt-br".to_string(),
            last_build_date: Utc.with_ymd_and_hms(2025, 12, 10, 15, 0, 0).unwrap(),
            ttl: 60,
            generator: None,
            self_link: None,
        }
    }

    fn article(hour: u32) -> Article {
        Article {
            title: "Sessão".to_string(),
            link: "https://example.gov.br/noticia/1".to_string(),
            published_at: Utc.with_ymd_and_hms(2025, 12, 10, hour, 0, 0).unwrap(),
            body_html: "<p>Texto</p>".to_string(),
            summary: "Texto".to_string(),
            image_url: None,
            category: None,
        }
    }

    #[test]
    fn test_newest_item() {
        let mut doc = FeedDocument::new(channel(), "cmfor");
        assert_eq!(doc.newest_item(), None);
        doc.push(article(9));
        doc.push(article(14));
        doc.push(article(11));
        assert_eq!(
            doc.newest_item(),
            Some(Utc.with_ymd_and_hms(2025, 12, 10, 14, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_processing_state_json_shape() {
        let state = ProcessingState {
            last_date: Utc.with_ymd_and_hms(2025, 12, 10, 17, 54, 0).unwrap(),
        };
        let json = serde_json::to_string(&state).unwrap();
        assert_eq!(json, r#"{"last_date":"2025-12-10T17:54:00Z"}"#);

        let back: ProcessingState =
            serde_json::from_str(r#"{ "last_date": "2025-12-10T14:54:00-03:00" }"#).unwrap();
        assert_eq!(back, state);
    }
}
