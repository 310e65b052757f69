//! Turn a selected record (and optionally its HTML page) into an [`Article`].
//!
//! Each piece is found by walking an ordered list of strategies and taking
//! the first one that yields something:
//!
//! | Piece | Strategies, in order |
//! |-------|----------------------|
//! | title | structured field → `og:title` → heading selectors |
//! | body | structured field → content selectors → largest text block |
//! | image | featured media → `og:image` → first content `<img>` → thematic table |
//!
//! A missing image is fine (the thematic default covers it). A missing
//! title or body drops the article.

use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};
use thiserror::Error;
use tracing::{debug, instrument};

use crate::config::{ExtractorConfig, ThemeRule};
use crate::dates::find_date;
use crate::filter::Selected;
use crate::models::{Article, RawRecord};
use crate::sanitize::{
    Sanitizer, collapse_whitespace, decode_escaped_markup, decode_text, escape_xml_attr, excerpt, strip_tags,
};
use crate::utils::fold_text;

static OG_TITLE: Lazy<Selector> = Lazy::new(|| {
    Selector::parse(r#"meta[property="og:title"], meta[name="og:title"]"#).unwrap()
});
static OG_IMAGE: Lazy<Selector> = Lazy::new(|| {
    Selector::parse(
        r#"meta[property="og:image"], meta[name="og:image"], meta[property="og:image:url"], meta[name="twitter:image"]"#,
    )
    .unwrap()
});
static IMG: Lazy<Selector> = Lazy::new(|| Selector::parse("img").unwrap());
static BLOCKS: Lazy<Selector> =
    Lazy::new(|| Selector::parse("div, section, main, article, td").unwrap());

/// Why an article was dropped.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ExtractError {
    #[error("no title found")]
    MissingTitle,

    #[error("no body content found")]
    EmptyBody,

    #[error("unusable link: {0:?}")]
    BadLink(String),
}

/// Where to look for the main article content in a page.
#[derive(Debug, Clone)]
pub enum ContentStrategy {
    /// First element matching the selector that has any text.
    Selector(Selector),
    /// The block whose direct `<p>` children carry the most text.
    LargestTextBlock,
}

impl ContentStrategy {
    pub fn find<'a>(&self, doc: &'a Html) -> Option<ElementRef<'a>> {
        match self {
            ContentStrategy::Selector(sel) => doc
                .select(sel)
                .find(|el| el.text().any(|t| !t.trim().is_empty())),
            ContentStrategy::LargestTextBlock => doc
                .select(&BLOCKS)
                .map(|el| (paragraph_chars(el), el))
                .filter(|(score, _)| *score > 0)
                .fold(None, |best: Option<(usize, ElementRef<'a>)>, (score, el)| match best {
                    Some((top, _)) if top >= score => best,
                    _ => Some((score, el)),
                })
                .map(|(_, el)| el),
        }
    }
}

fn paragraph_chars(el: ElementRef<'_>) -> usize {
    el.children()
        .filter_map(ElementRef::wrap)
        .filter(|child| child.value().name() == "p")
        .map(|p| p.text().map(|t| t.trim().chars().count()).sum::<usize>())
        .sum()
}

/// Where to look for the article's representative image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageStrategy {
    FeaturedMedia,
    OpenGraph,
    FirstContentImage,
    Thematic,
}

impl ImageStrategy {
    pub const CASCADE: [ImageStrategy; 4] = [
        ImageStrategy::FeaturedMedia,
        ImageStrategy::OpenGraph,
        ImageStrategy::FirstContentImage,
        ImageStrategy::Thematic,
    ];
}

/// What the image strategies can look at.
struct ImageContext<'a> {
    record: &'a RawRecord,
    page: Option<&'a Html>,
    content_html: &'a str,
    title: &'a str,
}

/// Extraction rules for one site.
#[derive(Debug)]
pub struct Extractor<'a> {
    config: &'a ExtractorConfig,
    sanitizer: &'a Sanitizer,
    content: Vec<ContentStrategy>,
    titles: Vec<Selector>,
    dates: Vec<Selector>,
}

impl<'a> Extractor<'a> {
    pub fn new(config: &'a ExtractorConfig, sanitizer: &'a Sanitizer) -> Self {
        let mut content: Vec<ContentStrategy> = config
            .content_selectors
            .iter()
            .filter_map(|s| Selector::parse(s).ok())
            .map(ContentStrategy::Selector)
            .collect();
        content.push(ContentStrategy::LargestTextBlock);

        let parse_all = |selectors: &[String]| -> Vec<Selector> {
            selectors.iter().filter_map(|s| Selector::parse(s).ok()).collect()
        };

        Self {
            config,
            sanitizer,
            content,
            titles: parse_all(&config.title_selectors),
            dates: parse_all(&config.date_selectors),
        }
    }

    /// Publish date of an undated record, read from its detail page.
    ///
    /// Date selectors come first (`datetime` or `content` attribute, else a
    /// date inside the element text); then the first date in the visible
    /// page text.
    pub fn page_date(&self, page_html: &str) -> Option<String> {
        let doc = Html::parse_document(page_html);
        self.dates
            .iter()
            .flat_map(|sel| doc.select(sel))
            .find_map(|el| {
                let attr = el
                    .value()
                    .attr("datetime")
                    .or_else(|| el.value().attr("content"))
                    .map(str::trim)
                    .filter(|a| !a.is_empty());
                match attr {
                    Some(a) => Some(a.to_string()),
                    None => find_date(&el.text().collect::<Vec<_>>().join(" ")),
                }
            })
            .or_else(|| find_date(&strip_tags(&self.sanitizer.strip_elements(page_html))))
    }

    /// Build an article from a selected record and, when fetched, its page HTML.
    #[instrument(level = "debug", skip_all, fields(link = %selected.record.link))]
    pub fn extract(&self, selected: &Selected, page_html: Option<&str>) -> Result<Article, ExtractError> {
        let record = &selected.record;
        let page = page_html.map(Html::parse_document);

        let link = self
            .sanitizer
            .normalize_url(&record.link)
            .ok_or_else(|| ExtractError::BadLink(record.link.clone()))?;

        let title = self.title(record, page.as_ref()).ok_or(ExtractError::MissingTitle)?;

        let raw_body = self.body(record, page.as_ref()).ok_or(ExtractError::EmptyBody)?;
        let decoded = decode_escaped_markup(&raw_body);
        let visible = self.sanitizer.strip_elements(&decoded);
        if strip_tags(&visible).is_empty() {
            return Err(ExtractError::EmptyBody);
        }

        let image_url = self.image(&ImageContext {
            record,
            page: page.as_ref(),
            content_html: &visible,
            title: &title,
        });

        let summary = record
            .excerpt
            .as_deref()
            .map(|e| excerpt(e, self.config.excerpt_chars))
            .filter(|e| !e.is_empty())
            .unwrap_or_else(|| excerpt(&visible, self.config.excerpt_chars));

        let decorated = self.decorate(&visible, &title, &link, image_url.as_deref());
        let body_html = self.sanitizer.clean_body(&decorated);

        let category = record
            .categories
            .first()
            .map(|t| decode_text(&t.name).trim().to_string())
            .filter(|c| !c.is_empty());

        Ok(Article {
            title,
            link,
            published_at: selected.published_at,
            body_html,
            summary,
            image_url,
            category,
        })
    }

    fn title(&self, record: &RawRecord, page: Option<&Html>) -> Option<String> {
        // Record titles are markup; page attributes and text nodes are already decoded.
        let from_markup = |s: &str| Some(strip_tags(s)).filter(|t| !t.is_empty());
        let from_text = |s: &str| Some(collapse_whitespace(s)).filter(|t| !t.is_empty());

        from_markup(&record.title)
            .or_else(|| {
                let doc = page?;
                doc.select(&OG_TITLE)
                    .find_map(|m| m.value().attr("content").and_then(from_text))
            })
            .or_else(|| {
                let doc = page?;
                self.titles.iter().find_map(|sel| {
                    doc.select(sel)
                        .find_map(|h| from_text(&h.text().collect::<Vec<_>>().join(" ")))
                })
            })
    }

    fn body(&self, record: &RawRecord, page: Option<&Html>) -> Option<String> {
        let structured = record
            .body_html
            .as_deref()
            .filter(|b| {
                let visible = self.sanitizer.strip_elements(&decode_escaped_markup(b));
                !strip_tags(&visible).is_empty()
            })
            .map(str::to_string);
        structured.or_else(|| {
            let doc = page?;
            self.content.iter().find_map(|strategy| {
                let el = strategy.find(doc)?;
                debug!(?strategy, "Content container found");
                Some(el.inner_html())
            })
        })
    }

    fn image(&self, ctx: &ImageContext<'_>) -> Option<String> {
        ImageStrategy::CASCADE.iter().find_map(|strategy| {
            let found = self.try_image(*strategy, ctx);
            if let Some(url) = &found {
                debug!(?strategy, %url, "Image resolved");
            }
            found
        })
    }

    fn try_image(&self, strategy: ImageStrategy, ctx: &ImageContext<'_>) -> Option<String> {
        match strategy {
            ImageStrategy::FeaturedMedia => ctx
                .record
                .featured_image
                .as_deref()
                .and_then(|src| self.usable_image(src)),
            ImageStrategy::OpenGraph => ctx.page.and_then(|doc| {
                doc.select(&OG_IMAGE)
                    .filter_map(|m| m.value().attr("content"))
                    .find_map(|src| self.usable_image(src))
            }),
            ImageStrategy::FirstContentImage => {
                let fragment = Html::parse_fragment(ctx.content_html);
                fragment
                    .select(&IMG)
                    .filter_map(|img| {
                        img.value()
                            .attr("src")
                            .or_else(|| img.value().attr("data-src"))
                    })
                    .find_map(|src| self.usable_image(src))
            }
            ImageStrategy::Thematic => {
                let haystack = fold_text(&format!("{} {}", ctx.title, strip_tags(ctx.content_html)));
                thematic_image(&self.config.themes, &haystack)
                    .or(self.config.default_image.as_deref())
                    .and_then(|src| self.sanitizer.normalize_url(src))
            }
        }
    }

    /// Resolve and vet an image candidate. Placeholders and logos are rejected.
    fn usable_image(&self, src: &str) -> Option<String> {
        let url = self.sanitizer.normalize_url(src)?;
        let lower = url.to_lowercase();
        if self
            .config
            .image_exclusions
            .iter()
            .any(|ex| lower.contains(&ex.to_lowercase()))
        {
            debug!(%url, "Rejected placeholder image");
            return None;
        }
        Some(url)
    }

    fn decorate(&self, body: &str, title: &str, link: &str, image: Option<&str>) -> String {
        let mut out = String::with_capacity(body.len() + 256);
        if self.config.prepend_image {
            if let Some(src) = image {
                out.push_str(&format!(
                    "<p><img src=\"{}\" alt=\"{}\" /></p>\n",
                    escape_xml_attr(src),
                    escape_xml_attr(title)
                ));
            }
        }
        out.push_str(body.trim());
        if let Some(label) = &self.config.source_footer {
            out.push_str(&format!(
                "\n<p><em>{}: <a href=\"{}\" rel=\"nofollow\">{}</a></em></p>",
                escape_xml_attr(label),
                escape_xml_attr(link),
                escape_xml_attr(link)
            ));
        }
        out
    }
}

/// Image of the first theme with a keyword present in `folded_text`.
///
/// `folded_text` must already be passed through [`fold_text`].
pub fn thematic_image<'t>(themes: &'t [ThemeRule], folded_text: &str) -> Option<&'t str> {
    themes
        .iter()
        .find(|theme| {
            theme
                .keywords
                .iter()
                .map(|k| fold_text(k))
                .any(|k| !k.is_empty() && folded_text.contains(&k))
        })
        .map(|theme| theme.image.as_str())
}
