//! WordPress REST API source (`/wp-json/wp/v2/posts`).
//!
//! One request, newest first, with an optional `after=` filter. When the
//! filtered request comes back short (or fails), a single relaxed request
//! without `after=` is made; the date filter downstream sorts it out.
//!
//! # Fields used
//!
//! `id`, `link`, `date` (site local), `date_gmt` (UTC), `title.rendered`,
//! `content.rendered`, `excerpt.rendered`, and with `_embed`:
//! `_embedded["wp:featuredmedia"][0].source_url` and
//! `_embedded["wp:term"]` categories.

use chrono::NaiveDateTime;
use serde::Deserialize;
use tracing::{error, info, instrument, warn};
use url::Url;

use super::FetchPlan;
use crate::config::WordpressSource;
use crate::fetch::HttpFetch;
use crate::models::{RawRecord, Term};

#[derive(Debug, Default, Deserialize)]
struct Rendered {
    #[serde(default)]
    rendered: String,
}

#[derive(Debug, Deserialize)]
struct WpPost {
    id: Option<u64>,
    #[serde(default)]
    link: String,
    date: Option<String>,
    date_gmt: Option<String>,
    #[serde(default)]
    title: Rendered,
    #[serde(default)]
    content: Rendered,
    excerpt: Option<Rendered>,
    #[serde(rename = "_embedded")]
    embedded: Option<Embedded>,
}

#[derive(Debug, Default, Deserialize)]
struct Embedded {
    #[serde(rename = "wp:featuredmedia", default)]
    featured_media: Vec<Media>,
    #[serde(rename = "wp:term", default)]
    terms: Vec<Vec<EmbeddedTerm>>,
}

/// Media entries may be error objects (`rest_forbidden`), hence the option.
#[derive(Debug, Deserialize)]
struct Media {
    source_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EmbeddedTerm {
    #[serde(default)]
    name: String,
    #[serde(default)]
    slug: String,
    taxonomy: Option<String>,
}

impl From<WpPost> for RawRecord {
    fn from(post: WpPost) -> Self {
        let embedded = post.embedded.unwrap_or_default();
        let featured_image = embedded
            .featured_media
            .into_iter()
            .find_map(|m| m.source_url)
            .filter(|s| !s.trim().is_empty());
        let categories = embedded
            .terms
            .into_iter()
            .flatten()
            .filter(|t| t.taxonomy.as_deref().is_none_or(|tax| tax == "category"))
            .map(|t| Term {
                name: t.name,
                slug: t.slug,
            })
            .collect();

        RawRecord {
            id: post.id,
            title: post.title.rendered,
            link: post.link,
            date: post.date,
            date_gmt: post.date_gmt,
            body_html: Some(post.content.rendered).filter(|c| !c.trim().is_empty()),
            excerpt: post.excerpt.map(|e| e.rendered).filter(|e| !e.trim().is_empty()),
            featured_image,
            categories,
        }
    }
}

/// Endpoint URL with paging, ordering, embed and the optional `after=` bound.
pub fn posts_url(source: &WordpressSource, after: Option<NaiveDateTime>) -> Result<Url, url::ParseError> {
    let mut url = Url::parse(&source.endpoint)?;
    {
        let mut query = url.query_pairs_mut();
        query
            .append_pair("per_page", &source.per_page.to_string())
            .append_pair("orderby", "date")
            .append_pair("order", "desc");
        if source.embed {
            query.append_pair("_embed", "1");
        }
        if let Some(after) = after {
            query.append_pair("after", &after.format("%Y-%m-%dT%H:%M:%S").to_string());
        }
    }
    Ok(url)
}

/// Parse a posts response. Malformed posts are skipped individually.
pub fn parse_posts(body: &str) -> Result<Vec<RawRecord>, serde_json::Error> {
    let values: Vec<serde_json::Value> = serde_json::from_str(body)?;
    let total = values.len();
    let records: Vec<RawRecord> = values
        .into_iter()
        .enumerate()
        .filter_map(|(i, value)| match serde_json::from_value::<WpPost>(value) {
            Ok(post) => Some(RawRecord::from(post)),
            Err(e) => {
                warn!(index = i, error = %e, "Skipping malformed post");
                None
            }
        })
        .collect();
    if records.len() < total {
        warn!(total, parsed = records.len(), "Some posts could not be parsed");
    }
    Ok(records)
}

async fn request<F: HttpFetch>(fetcher: &F, url: &Url) -> Vec<RawRecord> {
    match fetcher.get_text(url).await {
        Ok(body) => parse_posts(&body).unwrap_or_else(|e| {
            error!(%url, error = %e, "Posts response is not a JSON array");
            Vec::new()
        }),
        Err(e) => {
            error!(%url, error = %e, "Posts request failed");
            Vec::new()
        }
    }
}

/// Fetch posts, relaxing the date filter once if too few come back.
#[instrument(level = "info", skip_all, fields(endpoint = %source.endpoint))]
pub async fn fetch_posts<F: HttpFetch>(fetcher: &F, source: &WordpressSource, plan: &FetchPlan) -> Vec<RawRecord> {
    let after = if source.date_filter {
        plan.lower_bound_local()
    } else {
        None
    };

    let url = match posts_url(source, after) {
        Ok(url) => url,
        Err(e) => {
            error!(error = %e, "Invalid endpoint");
            return Vec::new();
        }
    };
    let records = request(fetcher, &url).await;
    info!(count = records.len(), filtered = after.is_some(), "Fetched posts");

    if after.is_none() || records.len() >= source.min_results {
        return records;
    }

    warn!(
        count = records.len(),
        min_results = source.min_results,
        "Too few posts with date filter; retrying once without it"
    );
    match posts_url(source, None) {
        Ok(relaxed) => {
            let retry = request(fetcher, &relaxed).await;
            info!(count = retry.len(), "Fetched posts without date filter");
            if retry.len() > records.len() { retry } else { records }
        }
        Err(_) => records,
    }
}
