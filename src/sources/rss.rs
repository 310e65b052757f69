//! RSS 2.0 feed source.
//!
//! Some sites publish an official feed that is good for discovery (title,
//! link, RFC-2822 `pubDate`) but carries only a teaser. Items become records
//! here; bodies and images come from the detail pages later, unless the item
//! ships `content:encoded`.
//!
//! | Element | Record field |
//! |---------|--------------|
//! | `title` | `title` |
//! | `link` | `link` |
//! | `pubDate`, `dc:date` | `date` |
//! | `description` | `excerpt` |
//! | `content:encoded` | `body_html` |
//! | `category` | `categories` |
//! | `enclosure`, `media:content`, `media:thumbnail` | `featured_image` |

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use tracing::{debug, error, info, instrument};
use url::Url;

use super::FetchPlan;
use crate::config::RssSource;
use crate::fetch::HttpFetch;
use crate::models::{RawRecord, Term};
use crate::sanitize::{decode_text, escape_xml_text};
use crate::utils::slugify;

/// Item children whose text is kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Title,
    Link,
    Published,
    Description,
    Content,
    Category,
}

impl Field {
    fn from_tag(name: &[u8]) -> Option<Self> {
        match name {
            b"title" => Some(Field::Title),
            b"link" => Some(Field::Link),
            b"pubDate" | b"dc:date" => Some(Field::Published),
            b"description" => Some(Field::Description),
            b"content:encoded" => Some(Field::Content),
            b"category" => Some(Field::Category),
            _ => None,
        }
    }
}

/// One `<item>` while it is being read. Text is kept XML-escaped until the
/// field closes.
#[derive(Debug, Default)]
struct ItemDraft {
    title: String,
    link: String,
    published: String,
    description: String,
    content: String,
    categories: Vec<String>,
    image: Option<String>,
}

impl ItemDraft {
    fn set(&mut self, field: Field, value: String) {
        match field {
            Field::Title => self.title = value,
            Field::Link => self.link = value,
            Field::Published => {
                // `pubDate` wins over `dc:date`.
                if self.published.is_empty() {
                    self.published = value
                }
            }
            Field::Description => self.description = value,
            Field::Content => self.content = value,
            Field::Category => self.categories.push(value),
        }
    }

    /// Take the first image-like `enclosure` or `media:*` URL.
    fn offer_image(&mut self, e: &BytesStart<'_>) {
        if self.image.is_some() {
            return;
        }
        let attr = |key: &str| -> Option<String> {
            e.try_get_attribute(key)
                .ok()
                .flatten()
                .and_then(|a| a.unescape_value().ok())
                .map(|v| v.trim().to_string())
        };
        let is_image = match e.name().as_ref() {
            b"enclosure" | b"media:content" => attr("type")
                .map(|t| t.starts_with("image/"))
                .or_else(|| attr("medium").map(|m| m == "image"))
                .unwrap_or(true),
            b"media:thumbnail" => true,
            _ => false,
        };
        if is_image {
            self.image = attr("url").filter(|u| !u.is_empty());
        }
    }

    fn finish(self, base: &Url) -> Option<RawRecord> {
        let non_empty = |s: String| {
            let s = s.trim().to_string();
            (!s.is_empty()).then_some(s)
        };
        let link = base.join(non_empty(self.link)?.as_str()).ok()?;
        let categories = self
            .categories
            .into_iter()
            .filter_map(non_empty)
            .map(|name| Term {
                slug: slugify(&name),
                name,
            })
            .collect();

        Some(RawRecord {
            title: escape_xml_text(self.title.trim()),
            link: link.to_string(),
            date: non_empty(self.published),
            body_html: non_empty(self.content),
            excerpt: non_empty(self.description),
            featured_image: self
                .image
                .and_then(|src| base.join(&src).ok())
                .map(|u| u.to_string()),
            categories,
            ..Default::default()
        })
    }
}

/// Parse the items of an RSS 2.0 document. Links resolve against `base`.
pub fn parse_items(xml: &str, base: &Url) -> Result<Vec<RawRecord>, quick_xml::Error> {
    let mut reader = Reader::from_str(xml);
    let mut records = Vec::new();
    let mut item: Option<ItemDraft> = None;
    // The open item child and its text so far, still escaped.
    let mut open: Option<(Field, String)> = None;

    loop {
        match reader.read_event()? {
            Event::Start(e) if e.name().as_ref() == b"item" => item = Some(ItemDraft::default()),
            Event::Start(e) => {
                if let Some(draft) = item.as_mut() {
                    draft.offer_image(&e);
                    if open.is_none() {
                        open = Field::from_tag(e.name().as_ref()).map(|f| (f, String::new()));
                    }
                }
            }
            Event::Empty(e) => {
                if let Some(draft) = item.as_mut() {
                    draft.offer_image(&e);
                }
            }
            Event::Text(t) => {
                if let Some((_, buf)) = open.as_mut() {
                    buf.push_str(&t.decode().unwrap_or_default());
                }
            }
            Event::GeneralRef(r) => {
                if let Some((_, buf)) = open.as_mut() {
                    buf.push('&');
                    buf.push_str(&r.decode().unwrap_or_default());
                    buf.push(';');
                }
            }
            Event::CData(c) => {
                if let Some((_, buf)) = open.as_mut() {
                    buf.push_str(&escape_xml_text(&c.decode().unwrap_or_default()));
                }
            }
            Event::End(e) if e.name().as_ref() == b"item" => {
                open = None;
                if let Some(record) = item.take().and_then(|draft| draft.finish(base)) {
                    records.push(record);
                }
            }
            Event::End(e) => {
                let closes_open = open
                    .as_ref()
                    .is_some_and(|(field, _)| Field::from_tag(e.name().as_ref()) == Some(*field));
                if closes_open {
                    if let (Some(draft), Some((field, buf))) = (item.as_mut(), open.take()) {
                        draft.set(field, decode_text(&buf));
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(records)
}

/// Fetch the feed and turn its items into records.
#[instrument(level = "info", skip_all, fields(url = %source.url))]
pub async fn fetch_rss<F: HttpFetch>(fetcher: &F, source: &RssSource, plan: &FetchPlan) -> Vec<RawRecord> {
    let url = match Url::parse(&source.url) {
        Ok(url) => url,
        Err(e) => {
            error!(error = %e, "Invalid feed URL");
            return Vec::new();
        }
    };
    let xml = match fetcher.get_text(&url).await {
        Ok(xml) => xml,
        Err(e) => {
            error!(error = %e, "Feed request failed");
            return Vec::new();
        }
    };
    debug!(bytes = xml.len(), "Fetched feed");

    match parse_items(&xml, &plan.base) {
        Ok(records) => {
            info!(count = records.len(), "Collected feed items");
            records
        }
        Err(e) => {
            error!(error = %e, "Feed is not well-formed XML");
            Vec::new()
        }
    }
}
