//! HTML listing page source.
//!
//! Scrapes the configured listing page with CSS selectors, following the
//! next-page link until one of these holds:
//!
//! - `max_pages` pages were read
//! - there is no next link, or it points back at the current page
//! - the page had dated entries and every one of them is older than wanted
//!
//! Entries carry only what the listing shows (title, link, date text and
//! maybe a thumbnail). Bodies come from the detail pages later, and so do
//! dates for cards that show none.

use chrono_tz::Tz;
use itertools::Itertools;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, error, info, instrument, warn};
use url::Url;

use super::FetchPlan;
use crate::config::ListingSource;
use crate::dates::{civil_date, parse_published};
use crate::fetch::HttpFetch;
use crate::models::RawRecord;
use crate::sanitize::{decode_text, escape_xml_text};

/// Parsed selectors for one listing source.
struct ListingSelectors {
    item: Selector,
    link: Selector,
    title: Option<Selector>,
    date: Option<Selector>,
    image: Option<Selector>,
    next: Option<Selector>,
}

impl ListingSelectors {
    fn parse(source: &ListingSource) -> Option<Self> {
        let optional = |sel: &Option<String>| match sel {
            Some(s) => Selector::parse(s).ok().map(Some),
            None => Some(None),
        };
        Some(Self {
            item: Selector::parse(&source.item_selector).ok()?,
            link: Selector::parse(&source.link_selector).ok()?,
            title: optional(&source.title_selector)?,
            date: optional(&source.date_selector)?,
            image: optional(&source.image_selector)?,
            next: optional(&source.next_page_selector)?,
        })
    }
}

/// One listing page: its entries and the next page, if any.
#[derive(Debug, Default)]
pub struct ListingPage {
    pub entries: Vec<RawRecord>,
    pub next: Option<Url>,
}

fn element_text(el: ElementRef<'_>) -> String {
    el.text().collect::<Vec<_>>().join(" ").split_whitespace().join(" ")
}

fn parse_entry(item: ElementRef<'_>, sel: &ListingSelectors, base: &Url) -> Option<RawRecord> {
    // The item itself may be the anchor.
    let anchor = item
        .select(&sel.link)
        .next()
        .or_else(|| item.value().attr("href").map(|_| item))?;
    let href = anchor.value().attr("href")?;
    let link = base.join(decode_text(href).trim()).ok()?;

    let title = sel
        .title
        .as_ref()
        .and_then(|t| item.select(t).next())
        .map(element_text)
        .filter(|t| !t.is_empty())
        .or_else(|| anchor.value().attr("title").map(str::to_string))
        .unwrap_or_else(|| element_text(anchor));

    let date = sel.date.as_ref().and_then(|d| item.select(d).next()).map(|el| {
        el.value()
            .attr("datetime")
            .map(str::to_string)
            .unwrap_or_else(|| element_text(el))
    });

    let featured_image = sel
        .image
        .as_ref()
        .and_then(|s| item.select(s).next())
        .and_then(|img| {
            img.value()
                .attr("data-src")
                .or_else(|| img.value().attr("src"))
        })
        .and_then(|src| base.join(src.trim()).ok())
        .map(|u| u.to_string());

    Some(RawRecord {
        title: escape_xml_text(&title),
        link: link.to_string(),
        date: date.filter(|d| !d.trim().is_empty()),
        featured_image,
        ..Default::default()
    })
}

/// Parse a listing page. Links resolve against `base`, the next link
/// against `page_url`.
pub fn parse_listing(html: &str, source: &ListingSource, base: &Url, page_url: &Url) -> ListingPage {
    let Some(sel) = ListingSelectors::parse(source) else {
        error!("Listing selectors do not parse");
        return ListingPage::default();
    };
    let document = Html::parse_document(html);

    let entries: Vec<RawRecord> = document
        .select(&sel.item)
        .filter_map(|item| parse_entry(item, &sel, base))
        .unique_by(|r| r.link.clone())
        .collect();

    let next = sel
        .next
        .as_ref()
        .and_then(|s| document.select(s).next())
        .and_then(|a| a.value().attr("href"))
        .and_then(|href| page_url.join(decode_text(href).trim()).ok());

    ListingPage { entries, next }
}

/// True when the page had dated entries and all of them are too old.
fn all_older(entries: &[RawRecord], plan: &FetchPlan, tz: Tz) -> bool {
    let dates: Vec<_> = entries
        .iter()
        .filter_map(|r| r.date.as_deref().and_then(|d| parse_published(d, tz)))
        .collect();
    !dates.is_empty()
        && dates.iter().all(|&dt| {
            plan.window.is_before(civil_date(dt, tz)) || plan.since.is_some_and(|since| dt <= since)
        })
}

/// Walk the listing pages and collect every entry, de-duplicated by link.
#[instrument(level = "info", skip_all, fields(url = %source.url))]
pub async fn fetch_listing<F: HttpFetch>(fetcher: &F, source: &ListingSource, plan: &FetchPlan) -> Vec<RawRecord> {
    let mut page_url = match Url::parse(&source.url) {
        Ok(url) => url,
        Err(e) => {
            error!(error = %e, "Invalid listing URL");
            return Vec::new();
        }
    };

    let mut records: Vec<RawRecord> = Vec::new();
    for page_no in 1..=source.max_pages.max(1) {
        let html = match fetcher.get_text(&page_url).await {
            Ok(html) => html,
            Err(e) => {
                error!(url = %page_url, error = %e, "Listing page request failed");
                break;
            }
        };

        let page = parse_listing(&html, source, &plan.base, &page_url);
        debug!(page = page_no, entries = page.entries.len(), "Parsed listing page");
        if page.entries.is_empty() {
            warn!(url = %page_url, "Listing page has no entries");
        }
        let stop_old = all_older(&page.entries, plan, plan.tz);
        records.extend(page.entries);

        if stop_old {
            debug!(page = page_no, "Every entry on this page is older than wanted");
            break;
        }
        match page.next {
            Some(next) if next != page_url => page_url = next,
            _ => break,
        }
    }

    let records: Vec<RawRecord> = records.into_iter().unique_by(|r| r.link.clone()).collect();
    info!(count = records.len(), "Collected listing entries");
    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::testing::StaticFetcher;
    use crate::filter::DateWindow;
    use chrono::NaiveDate;
    use chrono_tz::America::Fortaleza;

    fn source() -> ListingSource {
        ListingSource {
            url: "https://www.exemplo.ce.gov.br/noticias".to_string(),
            item_selector: "article.noticia".to_string(),
            link_selector: "a".to_string(),
            title_selector: Some("h3".to_string()),
            date_selector: Some("time".to_string()),
            image_selector: Some("img".to_string()),
            next_page_selector: Some("a.proxima".to_string()),
            max_pages: 20,
        }
    }

    fn plan() -> FetchPlan {
        let day = NaiveDate::from_ymd_opt(2025, 12, 10).unwrap();
        FetchPlan {
            base: Url::parse("https://www.exemplo.ce.gov.br").unwrap(),
            tz: Fortaleza,
            window: DateWindow::Between { first: day, last: day },
            since: None,
        }
    }

    fn page(items: &[(&str, &str, &str)], next: Option<&str>) -> String {
        let mut html = String::from("<html><body>");
        for (href, title, date) in items {
            html.push_str(&format!(
                r#"<article class="noticia"><a href="{href}"><img data-src="/img/{title}.jpg"></a><h3> {title} </h3><time>{date}</time></article>"#
            ));
        }
        if let Some(next) = next {
            html.push_str(&format!(r#"<a class="proxima" href="{next}">Próxima</a>"#));
        }
        html.push_str("</body></html>");
        html
    }

    #[test]
    fn test_parse_listing() {
        let html = page(
            &[
                ("/noticia/1", "Primeira", "10/12/2025 14h30"),
                ("/noticia/1", "Primeira", "10/12/2025 14h30"),
                ("https://www.exemplo.ce.gov.br/noticia/2?a=1&amp;b=2", "Segunda", "10 de dezembro de 2025"),
            ],
            Some("?pagina=2"),
        );
        let page_url = Url::parse("https://www.exemplo.ce.gov.br/noticias").unwrap();
        let parsed = parse_listing(&html, &source(), &plan().base, &page_url);

        assert_eq!(parsed.entries.len(), 2);
        assert_eq!(parsed.entries[0].link, "https://www.exemplo.ce.gov.br/noticia/1");
        assert_eq!(parsed.entries[0].title, "Primeira");
        assert_eq!(parsed.entries[0].date.as_deref(), Some("10/12/2025 14h30"));
        assert_eq!(
            parsed.entries[0].featured_image.as_deref(),
            Some("https://www.exemplo.ce.gov.br/img/Primeira.jpg")
        );
        assert_eq!(
            parsed.entries[1].link,
            "https://www.exemplo.ce.gov.br/noticia/2?a=1&b=2"
        );
        assert_eq!(
            parsed.next.map(|u| u.to_string()),
            Some("https://www.exemplo.ce.gov.br/noticias?pagina=2".to_string())
        );
    }

    #[test]
    fn test_item_as_anchor() {
        let mut src = source();
        src.item_selector = "a.card".to_string();
        src.link_selector = "span.nope".to_string();
        src.title_selector = None;
        let html = r#"<a class="card" href="/n/9">Feira <b>cultural</b></a>"#;
        let base = plan().base;
        let parsed = parse_listing(html, &src, &base, &base);
        assert_eq!(parsed.entries.len(), 1);
        assert_eq!(parsed.entries[0].title, "Feira cultural");
        assert_eq!(parsed.entries[0].date, None);
    }

    #[test]
    fn test_undated_cards_keep_escaped_titles() {
        let mut src = source();
        src.date_selector = None;
        let html = r#"<article class="noticia"><a href="/n/5"></a><h3>Taxa &lt; 5% e &gt; 3%</h3><time>10/12/2025</time></article>"#;
        let base = plan().base;
        let parsed = parse_listing(html, &src, &base, &base);
        assert_eq!(parsed.entries.len(), 1);
        assert_eq!(parsed.entries[0].title, "Taxa &lt; 5% e &gt; 3%");
        assert_eq!(parsed.entries[0].date, None);
    }

    #[tokio::test]
    async fn test_pagination_stops_on_older_page() {
        let first = "https://www.exemplo.ce.gov.br/noticias";
        let second = "https://www.exemplo.ce.gov.br/noticias?pagina=2";
        let third = "https://www.exemplo.ce.gov.br/noticias?pagina=3";
        let fetcher = StaticFetcher::new()
            .page(first, &page(&[("/n/1", "Hoje", "10/12/2025")], Some("?pagina=2")))
            .page(second, &page(&[("/n/2", "Ontem", "09/12/2025")], Some("?pagina=3")))
            .page(third, &page(&[("/n/3", "Anteontem", "08/12/2025")], None));

        let records = fetch_listing(&fetcher, &source(), &plan()).await;
        assert_eq!(records.len(), 2);
        assert_eq!(fetcher.requested(), vec![first.to_string(), second.to_string()]);
    }

    #[tokio::test]
    async fn test_pagination_stops_on_self_link_and_max_pages() {
        let first = "https://www.exemplo.ce.gov.br/noticias";
        let fetcher = StaticFetcher::new()
            .page(first, &page(&[("/n/1", "Hoje", "10/12/2025")], Some(first)));
        let records = fetch_listing(&fetcher, &source(), &plan()).await;
        assert_eq!(records.len(), 1);
        assert_eq!(fetcher.requested().len(), 1);

        let second = "https://www.exemplo.ce.gov.br/noticias?pagina=2";
        let fetcher = StaticFetcher::new()
            .page(first, &page(&[("/n/1", "Hoje", "10/12/2025")], Some("?pagina=2")))
            .page(second, &page(&[("/n/2", "Hoje 2", "10/12/2025")], Some("?pagina=3")));
        let mut src = source();
        src.max_pages = 2;
        let records = fetch_listing(&fetcher, &src, &plan()).await;
        assert_eq!(records.len(), 2);
        assert_eq!(fetcher.requested().len(), 2);
    }

    #[tokio::test]
    async fn test_listing_error_is_empty() {
        let fetcher = StaticFetcher::new().status("https://www.exemplo.ce.gov.br/noticias", 500);
        assert!(fetch_listing(&fetcher, &source(), &plan()).await.is_empty());
    }
}
