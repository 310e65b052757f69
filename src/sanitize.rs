//! Make scraped HTML and text safe to publish inside an RSS document.
//!
//! [`Sanitizer::clean_body`] runs the body pipeline in a fixed order:
//!
//! 1. decode a fragment that arrived entity-escaped (`&lt;p&gt;...`)
//! 2. drop unwanted elements with their content (`script`, `style`, ...)
//! 3. rewrite root-relative `href`/`src` against the site's base URL
//! 4. remove internal port markers (`host:8080` → `host`)
//! 5. split literal `]]>` so the result can sit inside one CDATA section
//!
//! Every step is idempotent, so cleaning already-clean content is a no-op.
//! Plain-text helpers ([`escape_xml_text`], [`escape_xml_attr`], [`excerpt`])
//! cover nodes that are not wrapped in CDATA.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::borrow::Cow;
use url::Url;

const CDATA_END: &str = "]]>";
const CDATA_END_ESCAPED: &str = "]]]]><![CDATA[>";

static TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<[^>]*>").unwrap());
static BLOCK_END: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)</(p|div|li|h[1-6]|blockquote)\s*>|<br\s*/?>").unwrap());
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());
static ROOT_RELATIVE_DQ: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)\b(href|src)(\s*=\s*)"(/[^"]*)""#).unwrap());
static ROOT_RELATIVE_SQ: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)\b(href|src)(\s*=\s*)'(/[^']*)'"#).unwrap());

/// Body and URL cleaner bound to one site.
#[derive(Debug, Clone)]
pub struct Sanitizer {
    base: Url,
    strip: Vec<Regex>,
    internal_ports: Vec<u16>,
    port_marker: Option<Regex>,
}

impl Sanitizer {
    /// `strip_elements` are tag names; `internal_ports` are removed from any host they follow.
    pub fn new(base: Url, strip_elements: &[String], internal_ports: &[u16]) -> Self {
        let strip = strip_elements
            .iter()
            .flat_map(|tag| {
                let tag = regex::escape(tag);
                [
                    Regex::new(&format!(r"(?is)<{tag}\b[^>]*>.*?</{tag}\s*>")),
                    Regex::new(&format!(r"(?is)</?{tag}\b[^>]*>")),
                ]
            })
            .filter_map(Result::ok)
            .collect();

        let port_marker = if internal_ports.is_empty() {
            None
        } else {
            let alternatives = internal_ports
                .iter()
                .map(u16::to_string)
                .collect::<Vec<_>>()
                .join("|");
            Regex::new(&format!(
                r"(?i)\b([a-z0-9-]+(?:\.[a-z0-9-]+)+):(?:{alternatives})\b"
            ))
            .ok()
        };

        Self {
            base,
            strip,
            internal_ports: internal_ports.to_vec(),
            port_marker,
        }
    }

    /// Run the full body pipeline. The result is safe inside `<![CDATA[ ... ]]>`.
    pub fn clean_body(&self, html: &str) -> String {
        let decoded = decode_escaped_markup(html);
        let stripped = self.strip_elements(&decoded);
        let absolute = self.absolutize(&stripped);
        let public = self.strip_ports(&absolute);
        escape_cdata(public.trim())
    }

    /// Remove configured elements together with their content.
    pub fn strip_elements(&self, html: &str) -> String {
        let mut out = html.to_string();
        for re in &self.strip {
            if let Cow::Owned(replaced) = re.replace_all(&out, "") {
                out = replaced;
            }
        }
        out
    }

    /// Rewrite `href="/..."` and `src="/..."` to absolute URLs.
    pub fn absolutize(&self, html: &str) -> String {
        let rewrite = |caps: &Captures, quote: char| -> String {
            let joined = self
                .base
                .join(&caps[3])
                .map(String::from)
                .unwrap_or_else(|_| caps[3].to_string());
            format!("{}{}{quote}{joined}{quote}", &caps[1], &caps[2])
        };
        let once = ROOT_RELATIVE_DQ.replace_all(html, |caps: &Captures| rewrite(caps, '"'));
        ROOT_RELATIVE_SQ
            .replace_all(&once, |caps: &Captures| rewrite(caps, '\''))
            .into_owned()
    }

    /// Remove internal port markers from every host in `text`.
    pub fn strip_ports(&self, text: &str) -> String {
        match &self.port_marker {
            Some(re) => re.replace_all(text, "$1").into_owned(),
            None => text.to_string(),
        }
    }

    /// Resolve `raw` against the base URL and drop internal ports.
    ///
    /// Returns `None` for anything that is not an `http(s)` URL after resolution
    /// (`data:` URIs, `javascript:` links, garbage).
    pub fn normalize_url(&self, raw: &str) -> Option<String> {
        let raw = html_escape::decode_html_entities(raw.trim());
        if raw.is_empty() {
            return None;
        }
        let mut url = self.base.join(&raw).ok()?;
        if !matches!(url.scheme(), "http" | "https") {
            return None;
        }
        if url
            .port()
            .is_some_and(|p| self.internal_ports.contains(&p))
        {
            url.set_port(None).ok()?;
        }
        Some(url.into())
    }
}

/// Decode a fragment that was delivered entity-escaped.
///
/// Only fragments with no literal markup but escaped markup (`&lt;p&gt;`) are
/// decoded; real HTML keeps its entities.
pub fn decode_escaped_markup(html: &str) -> Cow<'_, str> {
    if !html.contains('<') && html.contains("&lt;") {
        html_escape::decode_html_entities(html)
    } else {
        Cow::Borrowed(html)
    }
}

/// Decode entities in a text field such as a title (`&#8211;` → `–`).
pub fn decode_text(text: &str) -> String {
    html_escape::decode_html_entities(text).into_owned()
}

/// Split every `]]>` so it cannot close an enclosing CDATA section.
///
/// Already-split sequences are left alone, so the function is idempotent.
pub fn escape_cdata(text: &str) -> String {
    if !text.contains(CDATA_END) {
        return text.to_string();
    }
    text.replace(CDATA_END_ESCAPED, CDATA_END)
        .replace(CDATA_END, CDATA_END_ESCAPED)
}

/// Escape text for an XML text node. `&` goes first.
pub fn escape_xml_text(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Escape text for a double- or single-quoted XML attribute value.
pub fn escape_xml_attr(text: &str) -> String {
    escape_xml_text(text)
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

/// Strip all tags, decode entities and collapse whitespace.
pub fn strip_tags(html: &str) -> String {
    let spaced = BLOCK_END.replace_all(html, " ");
    let untagged = TAG.replace_all(&spaced, " ");
    let decoded = html_escape::decode_html_entities(&untagged);
    WHITESPACE.replace_all(&decoded, " ").trim().to_string()
}

/// Collapse runs of whitespace into single spaces and trim.
pub fn collapse_whitespace(text: &str) -> String {
    WHITESPACE.replace_all(text, " ").trim().to_string()
}

/// Plain-text summary of at most `max_chars` characters (plus an ellipsis).
///
/// Prefers to cut after the last sentence end, then the last clause break,
/// inside the limit; falls back to the last word boundary.
pub fn excerpt(html: &str, max_chars: usize) -> String {
    let text = strip_tags(html);
    if text.chars().count() <= max_chars {
        return text;
    }

    let head: String = text.chars().take(max_chars).collect();
    let min_keep = head.len() / 2;

    let sentence = [". ", "! ", "? "]
        .iter()
        .filter_map(|p| head.rfind(p).map(|i| i + 1))
        .filter(|&i| i >= min_keep)
        .max();
    if let Some(end) = sentence {
        return head[..end].trim_end().to_string();
    }

    let clause = ["; ", ", ", ": "]
        .iter()
        .filter_map(|p| head.rfind(p))
        .filter(|&i| i >= min_keep)
        .max();
    let cut = clause.or_else(|| head.rfind(' ')).unwrap_or(head.len());
    format!("{}…", head[..cut].trim_end())
}
