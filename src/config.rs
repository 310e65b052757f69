//! YAML configuration for one news source and the feed it produces.
//!
//! A configuration file describes exactly one site. Every field outside
//! `site`, `channel` and `source` has a default, so a minimal file looks like:
//!
//! ```yaml
//! site:
//!   name: cmfor
//!   base_url: https://www.cmfor.ce.gov.br
//! channel:
//!   title: Câmara Municipal de Fortaleza
//!   description: Notícias oficiais
//! source:
//!   kind: wordpress
//!   endpoint: https://www.cmfor.ce.gov.br:8080/wp-json/wp/v2/posts
//! ```
//!
//! See `feed.example.yaml` for every option.

use chrono_tz::Tz;
use scraper::Selector;
use serde::Deserialize;
use std::error::Error;
use std::ops::RangeInclusive;
use std::path::Path;
use thiserror::Error;
use tracing::{info, instrument};
use url::Url;

/// Errors found while validating a loaded configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown timezone: {0}")]
    Timezone(String),

    #[error("invalid URL for {field}: {value}")]
    Url { field: &'static str, value: String },

    #[error("invalid CSS selector for {field}: {value}")]
    Selector { field: &'static str, value: String },

    #[error("timeout_secs must be between 1 and 120, got {0}")]
    Timeout(u64),
}

/// Accepted request timeouts, in seconds.
pub const TIMEOUT_SECS: RangeInclusive<u64> = 1..=120;

/// Reject request timeouts outside [`TIMEOUT_SECS`].
pub fn check_timeout(secs: u64) -> Result<u64, ConfigError> {
    if TIMEOUT_SECS.contains(&secs) {
        Ok(secs)
    } else {
        Err(ConfigError::Timeout(secs))
    }
}

/// Root of the configuration file.
#[derive(Debug, Clone, Deserialize)]
pub struct FeedConfig {
    pub site: SiteConfig,
    pub channel: ChannelConfig,
    pub source: SourceConfig,
    #[serde(default)]
    pub filter: FilterConfig,
    #[serde(default)]
    pub extractor: ExtractorConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

/// The site the news comes from.
#[derive(Debug, Clone, Deserialize)]
pub struct SiteConfig {
    /// Short name, slugified into the GUID prefix.
    pub name: String,
    /// Public origin used to absolutize relative links.
    pub base_url: String,
    /// IANA timezone of the site's civil calendar.
    #[serde(default = "default_timezone")]
    pub timezone: String,
    /// Internal ports that must never leak into public links (e.g. an API on `:8080`).
    #[serde(default = "default_internal_ports")]
    pub internal_ports: Vec<u16>,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Request timeout in seconds, within [`TIMEOUT_SECS`].
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChannelConfig {
    pub title: String,
    /// Defaults to `site.base_url`.
    pub link: Option<String>,
    pub description: String,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default = "default_ttl")]
    pub ttl: u32,
    pub generator: Option<String>,
    pub self_link: Option<String>,
}

/// Where records come from.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceConfig {
    Wordpress(WordpressSource),
    Listing(ListingSource),
    Rss(RssSource),
}

/// A WordPress REST `wp/v2/posts` endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct WordpressSource {
    pub endpoint: String,
    #[serde(default = "default_per_page")]
    pub per_page: u32,
    /// Ask for `_embed` so featured media and terms come inline.
    #[serde(default = "default_true")]
    pub embed: bool,
    /// Send an `after=` filter for the date window or the last processed date.
    #[serde(default = "default_true")]
    pub date_filter: bool,
    /// Below this many results the request is repeated once without `after=`.
    #[serde(default = "default_min_results")]
    pub min_results: usize,
}

/// An HTML listing page with article cards.
#[derive(Debug, Clone, Deserialize)]
pub struct ListingSource {
    pub url: String,
    pub item_selector: String,
    pub link_selector: String,
    pub title_selector: Option<String>,
    /// Cards without a date get it from their detail page.
    pub date_selector: Option<String>,
    pub image_selector: Option<String>,
    pub next_page_selector: Option<String>,
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,
}

/// An RSS 2.0 feed published by the site itself.
#[derive(Debug, Clone, Deserialize)]
pub struct RssSource {
    pub url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowKind {
    /// Only records from the reference date.
    #[default]
    Today,
    /// The reference date and `days - 1` days before it.
    Recent,
    /// No date restriction (dates must still parse).
    Any,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FilterConfig {
    #[serde(default)]
    pub window: WindowKind,
    #[serde(default = "default_recent_days")]
    pub days: u32,
    /// Dropped when found in the title or body text.
    #[serde(default)]
    pub deny_keywords: Vec<String>,
    /// Dropped when matching a category name or slug.
    #[serde(default)]
    pub deny_categories: Vec<String>,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            window: WindowKind::Today,
            days: default_recent_days(),
            deny_keywords: Vec::new(),
            deny_categories: Vec::new(),
        }
    }
}

/// One row of the keyword → image lookup table.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ThemeRule {
    pub name: String,
    pub keywords: Vec<String>,
    pub image: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExtractorConfig {
    /// Fetch each API post's page so `og:image` and in-body images are visible.
    #[serde(default)]
    pub fetch_detail_pages: bool,
    /// Main-content selectors, tried in order before the largest-block heuristic.
    #[serde(default = "default_content_selectors")]
    pub content_selectors: Vec<String>,
    /// Heading selectors tried after `og:title`.
    #[serde(default = "default_title_selectors")]
    pub title_selectors: Vec<String>,
    /// Where an undated record's detail page shows its publish date. The
    /// first date in the page text is used when none of them match.
    #[serde(default)]
    pub date_selectors: Vec<String>,
    /// Image URLs containing any of these substrings are placeholders.
    #[serde(default = "default_image_exclusions")]
    pub image_exclusions: Vec<String>,
    /// Elements removed with their content before publishing.
    #[serde(default = "default_strip_elements")]
    pub strip_elements: Vec<String>,
    #[serde(default)]
    pub themes: Vec<ThemeRule>,
    pub default_image: Option<String>,
    #[serde(default)]
    pub prepend_image: bool,
    /// Label for a closing paragraph linking the original article.
    pub source_footer: Option<String>,
    #[serde(default = "default_excerpt_chars")]
    pub excerpt_chars: usize,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            fetch_detail_pages: false,
            content_selectors: default_content_selectors(),
            title_selectors: default_title_selectors(),
            date_selectors: Vec::new(),
            image_exclusions: default_image_exclusions(),
            strip_elements: default_strip_elements(),
            themes: Vec::new(),
            default_image: None,
            prepend_image: false,
            source_footer: None,
            excerpt_chars: default_excerpt_chars(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_output_path")]
    pub path: String,
    #[serde(default = "default_true")]
    pub media_rss: bool,
    /// Salt GUIDs with the run timestamp so consumers re-import every item.
    #[serde(default)]
    pub force_refresh_guids: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            path: default_output_path(),
            media_rss: true,
            force_refresh_guids: false,
        }
    }
}

fn default_timezone() -> String {
    "America/Fortaleza".to_string()
}
fn default_internal_ports() -> Vec<u16> {
    vec![8080]
}
fn default_user_agent() -> String {
    concat!("gov_news_feed/", env!("CARGO_PKG_VERSION")).to_string()
}
fn default_timeout_secs() -> u64 {
    20
}
fn default_language() -> String {
    "pt-br".to_string()
}
fn default_ttl() -> u32 {
    60
}
fn default_per_page() -> u32 {
    10
}
fn default_true() -> bool {
    true
}
fn default_min_results() -> usize {
    1
}
fn default_max_pages() -> usize {
    20
}
fn default_recent_days() -> u32 {
    2
}
fn default_excerpt_chars() -> usize {
    250
}
fn default_output_path() -> String {
    "feed.xml".to_string()
}

fn default_content_selectors() -> Vec<String> {
    [
        "article",
        "main",
        "[itemprop='articleBody']",
        ".entry-content",
        ".post-content",
        ".item-page",
        ".conteudo-noticia",
        ".noticia-conteudo",
        ".materia-conteudo",
        ".texto-materia",
        ".conteudo",
        ".article-body",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_title_selectors() -> Vec<String> {
    vec!["h1".to_string(), "h2".to_string()]
}

fn default_image_exclusions() -> Vec<String> {
    ["logo", "icon", "placeholder", "banner"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_strip_elements() -> Vec<String> {
    ["script", "style", "iframe", "form", "nav"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl FeedConfig {
    /// Parse a YAML document and validate it.
    pub fn from_yaml(yaml: &str) -> Result<Self, Box<dyn Error>> {
        let config: FeedConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn timezone(&self) -> Result<Tz, ConfigError> {
        self.site
            .timezone
            .parse::<Tz>()
            .map_err(|_| ConfigError::Timezone(self.site.timezone.clone()))
    }

    pub fn base_url(&self) -> Result<Url, ConfigError> {
        Url::parse(&self.site.base_url).map_err(|_| ConfigError::Url {
            field: "site.base_url",
            value: self.site.base_url.clone(),
        })
    }

    pub fn channel_link(&self) -> &str {
        self.channel.link.as_deref().unwrap_or(&self.site.base_url)
    }

    /// Check everything that serde cannot: timezone names, URLs, selectors
    /// and the timeout range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.timezone()?;
        self.base_url()?;
        check_timeout(self.site.timeout_secs)?;

        match &self.source {
            SourceConfig::Wordpress(wp) => check_url("source.endpoint", &wp.endpoint)?,
            SourceConfig::Listing(listing) => {
                check_url("source.url", &listing.url)?;
                check_selector("source.item_selector", &listing.item_selector)?;
                check_selector("source.link_selector", &listing.link_selector)?;
                for sel in [
                    &listing.title_selector,
                    &listing.date_selector,
                    &listing.image_selector,
                    &listing.next_page_selector,
                ]
                .into_iter()
                .flatten()
                {
                    check_selector("source", sel)?;
                }
            }
            SourceConfig::Rss(rss) => check_url("source.url", &rss.url)?,
        }

        for sel in &self.extractor.content_selectors {
            check_selector("extractor.content_selectors", sel)?;
        }
        for sel in &self.extractor.title_selectors {
            check_selector("extractor.title_selectors", sel)?;
        }
        for sel in &self.extractor.date_selectors {
            check_selector("extractor.date_selectors", sel)?;
        }
        Ok(())
    }
}

fn check_url(field: &'static str, value: &str) -> Result<(), ConfigError> {
    Url::parse(value).map(|_| ()).map_err(|_| ConfigError::Url {
        field,
        value: value.to_string(),
    })
}

fn check_selector(field: &'static str, value: &str) -> Result<(), ConfigError> {
    Selector::parse(value)
        .map(|_| ())
        .map_err(|_| ConfigError::Selector {
            field,
            value: value.to_string(),
        })
}

/// Load and validate a configuration file.
#[instrument(level = "info", skip_all, fields(path = %path.display()))]
pub async fn load_config(path: &Path) -> Result<FeedConfig, Box<dyn Error>> {
    let yaml = tokio::fs::read_to_string(path).await?;
    let config = FeedConfig::from_yaml(&yaml)?;
    info!(site = %config.site.name, "Loaded configuration");
    Ok(config)
}
