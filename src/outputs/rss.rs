//! RSS 2.0 document assembly.
//!
//! The document is built with `quick_xml::Writer`, never by string
//! concatenation, so tags always balance. Text nodes are escaped once here;
//! item bodies go into exactly one CDATA section per item.
//!
//! Namespaces are declared on `<rss>` only when something uses them:
//!
//! | Prefix | Declared when |
//! |--------|---------------|
//! | `content` | the feed has at least one item |
//! | `media` | media RSS is on and some item has an image |
//! | `atom` | the channel has a self link |

use quick_xml::Writer;
use quick_xml::events::{BytesCData, BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use sha2::{Digest, Sha256};
use std::error::Error;
use std::io::Write;

use crate::dates::to_rfc2822;
use crate::models::{Article, FeedDocument};
use crate::sanitize::{escape_cdata, escape_xml_text};

const NS_CONTENT: &str = "http://purl.org/rss/1.0/modules/content/";
const NS_MEDIA: &str = "http://search.yahoo.com/mrss/";
const NS_ATOM: &str = "http://www.w3.org/2005/Atom";

/// Stable item identifier: `{prefix}-{16 hex of sha256(link)}`.
///
/// A salt (the run timestamp) makes every run's GUIDs new.
pub fn item_guid(prefix: &str, link: &str, salt: Option<i64>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(link.as_bytes());
    if let Some(salt) = salt {
        hasher.update(b"#");
        hasher.update(salt.to_string().as_bytes());
    }
    let digest = hasher.finalize();
    let hex: String = digest.iter().take(8).map(|b| format!("{b:02x}")).collect();
    format!("{prefix}-{hex}")
}

/// MIME type for an image URL, from its extension.
pub fn image_mime(url: &str) -> &'static str {
    let path = url.split(['?', '#']).next().unwrap_or(url).to_ascii_lowercase();
    match path.rsplit('.').next() {
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("svg") => "image/svg+xml",
        Some("avif") => "image/avif",
        _ => "image/jpeg",
    }
}

/// Drop characters XML 1.0 does not allow (C0 controls other than tab, LF, CR).
fn xml_chars(text: &str) -> String {
    text.chars()
        .filter(|&c| matches!(c, '\t' | '\n' | '\r') || c >= ' ')
        .collect()
}

fn text_element<W: Write>(w: &mut Writer<W>, name: &str, text: &str) -> Result<(), Box<dyn Error>> {
    w.write_event(Event::Start(BytesStart::new(name)))?;
    w.write_event(Event::Text(BytesText::from_escaped(escape_xml_text(&xml_chars(text)))))?;
    w.write_event(Event::End(BytesEnd::new(name)))?;
    Ok(())
}

fn write_item<W: Write>(w: &mut Writer<W>, doc: &FeedDocument, article: &Article) -> Result<(), Box<dyn Error>> {
    w.write_event(Event::Start(BytesStart::new("item")))?;
    text_element(w, "title", &article.title)?;
    text_element(w, "link", &article.link)?;

    let mut guid = BytesStart::new("guid");
    guid.push_attribute(("isPermaLink", "false"));
    w.write_event(Event::Start(guid))?;
    let id = item_guid(&doc.guid_prefix, &article.link, doc.guid_salt);
    w.write_event(Event::Text(BytesText::from_escaped(escape_xml_text(&id))))?;
    w.write_event(Event::End(BytesEnd::new("guid")))?;

    text_element(w, "pubDate", &to_rfc2822(article.published_at))?;
    text_element(w, "description", &article.summary)?;

    w.write_event(Event::Start(BytesStart::new("content:encoded")))?;
    w.write_event(Event::CData(BytesCData::new(escape_cdata(&xml_chars(&article.body_html)))))?;
    w.write_event(Event::End(BytesEnd::new("content:encoded")))?;

    if let Some(category) = &article.category {
        text_element(w, "category", category)?;
    }

    if let Some(image) = &article.image_url {
        let image = xml_chars(image);
        let mut enclosure = BytesStart::new("enclosure");
        enclosure.push_attribute(("url", image.as_str()));
        enclosure.push_attribute(("length", "0"));
        enclosure.push_attribute(("type", image_mime(&image)));
        w.write_event(Event::Empty(enclosure))?;

        if doc.media_rss {
            let mut media = BytesStart::new("media:content");
            media.push_attribute(("url", image.as_str()));
            media.push_attribute(("medium", "image"));
            media.push_attribute(("type", image_mime(&image)));
            w.write_event(Event::Start(media))?;
            let mut title = BytesStart::new("media:title");
            title.push_attribute(("type", "plain"));
            w.write_event(Event::Start(title))?;
            w.write_event(Event::Text(BytesText::from_escaped(escape_xml_text(&xml_chars(
                &article.title,
            )))))?;
            w.write_event(Event::End(BytesEnd::new("media:title")))?;
            w.write_event(Event::End(BytesEnd::new("media:content")))?;
        }
    }

    w.write_event(Event::End(BytesEnd::new("item")))?;
    Ok(())
}

/// Render a complete RSS 2.0 document.
pub fn render(doc: &FeedDocument) -> Result<String, Box<dyn Error>> {
    let channel = &doc.channel;
    let uses_media = doc.media_rss && doc.items.iter().any(|a| a.image_url.is_some());

    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

    let mut rss = BytesStart::new("rss");
    rss.push_attribute(("version", "2.0"));
    if !doc.items.is_empty() {
        rss.push_attribute(("xmlns:content", NS_CONTENT));
    }
    if uses_media {
        rss.push_attribute(("xmlns:media", NS_MEDIA));
    }
    if channel.self_link.is_some() {
        rss.push_attribute(("xmlns:atom", NS_ATOM));
    }
    writer.write_event(Event::Start(rss))?;
    writer.write_event(Event::Start(BytesStart::new("channel")))?;

    text_element(&mut writer, "title", &channel.title)?;
    text_element(&mut writer, "link", &channel.link)?;
    text_element(&mut writer, "description", &channel.description)?;
    text_element(&mut writer, "language", &channel.language)?;
    text_element(&mut writer, "lastBuildDate", &to_rfc2822(channel.last_build_date))?;
    text_element(&mut writer, "ttl", &channel.ttl.to_string())?;
    if let Some(generator) = &channel.generator {
        text_element(&mut writer, "generator", generator)?;
    }
    if let Some(self_link) = &channel.self_link {
        let mut atom = BytesStart::new("atom:link");
        atom.push_attribute(("href", xml_chars(self_link).as_str()));
        atom.push_attribute(("rel", "self"));
        atom.push_attribute(("type", "application/rss+xml"));
        writer.write_event(Event::Empty(atom))?;
    }

    for article in &doc.items {
        write_item(&mut writer, doc, article)?;
    }

    writer.write_event(Event::End(BytesEnd::new("channel")))?;
    writer.write_event(Event::End(BytesEnd::new("rss")))?;

    let mut out = String::from_utf8(writer.into_inner())?;
    out.push('\n');
    Ok(out)
}
