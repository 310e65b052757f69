//! One pass: fetch, select, extract, assemble, write.
//!
//! Only configuration, feed-write and state-write failures end the run with
//! an error. Everything else (source down, one bad article) degrades to
//! fewer items, and an empty feed is still written.

use chrono::{DateTime, NaiveDate, Utc};
use futures::stream::{self, StreamExt};
use itertools::Itertools;
use std::collections::HashMap;
use std::error::Error;
use std::path::PathBuf;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::config::{FeedConfig, SourceConfig};
use crate::extract::Extractor;
use crate::fetch::HttpFetch;
use crate::filter::{DateWindow, Denylist, Selected, Selection, select};
use crate::models::{Article, ChannelMeta, FeedDocument, ProcessingState, RawRecord};
use crate::outputs::write_feed;
use crate::sanitize::{Sanitizer, strip_tags};
use crate::sources::{self, FetchPlan};
use crate::state::{load_state, save_state};
use crate::utils::{slugify, truncate_for_log};

/// Per-run inputs that do not come from the configuration file.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// "Today" in the site's calendar.
    pub reference_date: NaiveDate,
    /// Wall clock for `lastBuildDate` and the GUID salt.
    pub now: DateTime<Utc>,
    pub output_path: PathBuf,
    pub state_path: Option<PathBuf>,
    pub force_refresh_guids: bool,
}

/// Counts logged at the end of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunReport {
    pub fetched: usize,
    pub selected: usize,
    pub emitted: usize,
    pub skipped: usize,
}

fn needs_detail_page(config: &FeedConfig) -> bool {
    match config.source {
        SourceConfig::Listing(_) | SourceConfig::Rss(_) => true,
        SourceConfig::Wordpress(_) => config.extractor.fetch_detail_pages,
    }
}

async fn detail_page<F: HttpFetch>(fetcher: &F, sanitizer: &Sanitizer, link: &str) -> Option<String> {
    let url = sanitizer
        .normalize_url(link)
        .and_then(|u| Url::parse(&u).ok())?;
    match fetcher.get_text(&url).await {
        Ok(html) => Some(html),
        Err(e) => {
            warn!(%url, error = %e, "Detail page fetch failed");
            None
        }
    }
}

/// Date undated records from their detail pages.
///
/// Returns the pages it fetched, keyed by record link, so extraction does
/// not request them again.
#[instrument(level = "info", skip_all)]
async fn date_from_pages<F: HttpFetch>(
    fetcher: &F,
    sanitizer: &Sanitizer,
    extractor: &Extractor<'_>,
    records: Vec<RawRecord>,
) -> (Vec<RawRecord>, HashMap<String, String>) {
    let mut pages = HashMap::new();
    let mut dated = Vec::with_capacity(records.len());
    for mut record in records {
        if record.date.is_none() && record.date_gmt.is_none() {
            if let Some(html) = detail_page(fetcher, sanitizer, &record.link).await {
                record.date = extractor.page_date(&html);
                debug!(link = %record.link, date = ?record.date, "Dated from detail page");
                pages.insert(record.link.clone(), html);
            }
        }
        dated.push(record);
    }
    if !pages.is_empty() {
        info!(count = pages.len(), "Read dates from detail pages");
    }
    (dated, pages)
}

/// Extract every selected record, one at a time, skipping failures.
///
/// Each item may carry its detail page already; otherwise it is fetched
/// when the source calls for one.
#[instrument(level = "info", skip_all, fields(count = selected.len()))]
async fn extract_all<F: HttpFetch>(
    fetcher: &F,
    config: &FeedConfig,
    sanitizer: &Sanitizer,
    extractor: &Extractor<'_>,
    denylist: &Denylist,
    selected: Vec<(Selected, Option<String>)>,
) -> Vec<Article> {
    let with_pages = needs_detail_page(config);

    stream::iter(selected)
        .then(|(item, fetched)| {
            async move {
                let page = match fetched {
                    Some(html) => Some(html),
                    None if with_pages => detail_page(fetcher, sanitizer, &item.record.link).await,
                    None => None,
                };
                match extractor.extract(&item, page.as_deref()) {
                    Ok(article) => {
                        // Listing entries only show their text after the page is read.
                        let text = format!("{} {}", article.title, strip_tags(&article.body_html));
                        if let Some(hit) = denylist.matches_text(&text) {
                            debug!(title = %article.title, denied = hit, "Denylisted after extraction");
                            return None;
                        }
                        Some(article)
                    }
                    Err(e) => {
                        warn!(
                            link = %item.record.link,
                            title = %truncate_for_log(&item.record.title, 80),
                            error = %e,
                            "Skipping article"
                        );
                        None
                    }
                }
            }
        })
        .filter_map(|article| async move { article })
        .collect::<Vec<_>>()
        .await
}

fn channel_meta(config: &FeedConfig, now: DateTime<Utc>) -> ChannelMeta {
    let channel = &config.channel;
    ChannelMeta {
        title: channel.title.clone(),
        link: config.channel_link().to_string(),
        description: channel.description.clone(),
        language: channel.language.clone(),
        last_build_date: now,
        ttl: channel.ttl,
        generator: channel
            .generator
            .clone()
            .or_else(|| Some(format!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")))),
        self_link: channel.self_link.clone(),
    }
}

/// Run the whole pipeline once and write the feed.
#[instrument(level = "info", skip_all, fields(site = %config.site.name))]
pub async fn run<F: HttpFetch>(
    fetcher: &F,
    config: &FeedConfig,
    options: &RunOptions,
) -> Result<RunReport, Box<dyn Error>> {
    let tz = config.timezone()?;
    let base = config.base_url()?;

    let prior = match &options.state_path {
        Some(path) => load_state(path).await,
        None => None,
    };
    let since = prior.map(|s| s.last_date);

    let window = DateWindow::from_config(&config.filter, options.reference_date);
    info!(?window, ?since, "Selecting records");

    let plan = FetchPlan {
        base: base.clone(),
        tz,
        window,
        since,
    };
    let sanitizer = Sanitizer::new(base, &config.extractor.strip_elements, &config.site.internal_ports);
    let extractor = Extractor::new(&config.extractor, &sanitizer);

    let records = sources::collect(fetcher, &config.source, &plan).await;
    let fetched = records.len();
    let (records, mut pages) = if needs_detail_page(config) {
        date_from_pages(fetcher, &sanitizer, &extractor, records).await
    } else {
        (records, HashMap::new())
    };

    let denylist = Denylist::from_config(&config.filter);
    let selected = select(
        records,
        &Selection {
            window,
            since,
            denylist: &denylist,
            tz,
        },
    );
    let selected_count = selected.len();
    info!(fetched, selected = selected_count, "Selection done");

    let selected = selected
        .into_iter()
        .map(|item| {
            let page = pages.remove(&item.record.link);
            (item, page)
        })
        .collect::<Vec<_>>();
    let articles = extract_all(fetcher, config, &sanitizer, &extractor, &denylist, selected).await;

    let mut doc = FeedDocument::new(channel_meta(config, options.now), slugify(&config.site.name));
    doc.media_rss = config.output.media_rss;
    if options.force_refresh_guids || config.output.force_refresh_guids {
        doc.guid_salt = Some(options.now.timestamp());
    }
    for article in articles.into_iter().unique_by(|a| a.link.clone()) {
        doc.push(article);
    }

    write_feed(&doc, &options.output_path).await?;

    if let Some(path) = &options.state_path {
        match doc.newest_item() {
            Some(newest) => {
                let last_date = since.map_or(newest, |s| s.max(newest));
                save_state(path, &ProcessingState { last_date }).await?;
            }
            None => debug!("Nothing emitted; state unchanged"),
        }
    }

    let emitted = doc.items.len();
    Ok(RunReport {
        fetched,
        selected: selected_count,
        emitted,
        skipped: selected_count - emitted,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::testing::StaticFetcher;
    use crate::sources::wordpress::posts_url;
    use chrono::TimeZone;
    use quick_xml::Reader;
    use quick_xml::events::Event;

    const CONFIG: &str = r#"
site:
  name: Câmara Exemplo
  base_url: https://example.gov.br
  internal_ports: [8080]
channel:
  title: Câmara Exemplo
  description: Notícias
source:
  kind: wordpress
  endpoint: https://example.gov.br:8080/wp-json/wp/v2/posts
filter:
  deny_keywords: [segurança]
extractor:
  themes:
    - name: educacao
      keywords: [educação, escola]
      image: https://example.gov.br/temas/educacao.jpg
  default_image: https://example.gov.br/temas/geral.jpg
output:
  media_rss: true
"#;

    fn config() -> FeedConfig {
        FeedConfig::from_yaml(CONFIG).unwrap()
    }

    fn options(dir: &tempfile::TempDir) -> RunOptions {
        RunOptions {
            reference_date: NaiveDate::from_ymd_opt(2025, 12, 10).unwrap(),
            now: Utc.with_ymd_and_hms(2025, 12, 10, 21, 0, 0).unwrap(),
            output_path: dir.path().join("feed.xml"),
            state_path: None,
            force_refresh_guids: false,
        }
    }

    fn filtered_url(config: &FeedConfig) -> String {
        let SourceConfig::Wordpress(wp) = &config.source else {
            unreachable!()
        };
        let after = NaiveDate::from_ymd_opt(2025, 12, 10)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        posts_url(wp, Some(after)).unwrap().to_string()
    }

    fn relaxed_url(config: &FeedConfig) -> String {
        let SourceConfig::Wordpress(wp) = &config.source else {
            unreachable!()
        };
        posts_url(wp, None).unwrap().to_string()
    }

    fn post(id: u64, title: &str, content: &str, media: Option<&str>) -> String {
        let embedded = match media {
            Some(src) => format!(r#", "_embedded": {{ "wp:featuredmedia": [ {{ "source_url": "{src}" }} ] }}"#),
            None => String::new(),
        };
        format!(
            r#"{{ "id": {id}, "date": "2025-12-10T1{id}:00:00", "link": "https://example.gov.br:8080/noticia/{id}",
               "title": {{ "rendered": "{title}" }}, "content": {{ "rendered": "{content}" }}{embedded} }}"#
        )
    }

    /// Count `<item>` and `<channel>` starts, panicking on malformed XML.
    fn count_elements(xml: &str) -> (usize, usize) {
        let mut reader = Reader::from_str(xml);
        let (mut channels, mut items) = (0, 0);
        loop {
            match reader.read_event() {
                Ok(Event::Start(e)) if e.name().as_ref() == b"channel" => channels += 1,
                Ok(Event::Start(e)) if e.name().as_ref() == b"item" => items += 1,
                Ok(Event::Eof) => break,
                Ok(_) => {}
                Err(e) => panic!("malformed feed: {e}"),
            }
        }
        (channels, items)
    }

    #[tokio::test]
    async fn test_three_posts_one_cdata_one_denied() {
        let config = config();
        let body = format!(
            "[{}, {}, {}]",
            post(1, "Sessão ordinária", "<p>Pauta com ]]> no texto.</p>", None),
            post(2, "Secretaria de Segurança faz balanço", "<p>Balanço.</p>", None),
            post(3, "Feira cultural", "<p>Feira no centro.</p>", Some("https://example.gov.br/foto.jpg"))
        );
        let fetcher = StaticFetcher::new().page(&filtered_url(&config), &body);
        let dir = tempfile::tempdir().unwrap();

        let report = run(&fetcher, &config, &options(&dir)).await.unwrap();
        assert_eq!(
            report,
            RunReport {
                fetched: 3,
                selected: 2,
                emitted: 2,
                skipped: 0
            }
        );

        let xml = std::fs::read_to_string(dir.path().join("feed.xml")).unwrap();
        assert_eq!(count_elements(&xml), (1, 2));
        assert!(xml.contains("]]]]><![CDATA[>"));
        assert!(!xml.contains("Segurança"));
    }

    #[tokio::test]
    async fn test_server_error_writes_empty_feed() {
        let config = config();
        let fetcher = StaticFetcher::new()
            .status(&filtered_url(&config), 500)
            .status(&relaxed_url(&config), 500);
        let dir = tempfile::tempdir().unwrap();

        let report = run(&fetcher, &config, &options(&dir)).await.unwrap();
        assert_eq!(report, RunReport::default());

        let xml = std::fs::read_to_string(dir.path().join("feed.xml")).unwrap();
        assert_eq!(count_elements(&xml), (1, 0));
        assert!(xml.contains("<title>Câmara Exemplo</title>"));
    }

    #[tokio::test]
    async fn test_education_thematic_image_and_port_stripped() {
        let config = config();
        let body = format!(
            "[{}]",
            post(
                4,
                "Educação: novas vagas em escola municipal",
                r#"<p>Matrículas abertas. Veja <a href='https://example.gov.br:8080/edital'>o edital</a>.</p><img src='/uploads/logo-prefeitura.png'>"#,
                None
            )
        );
        let fetcher = StaticFetcher::new().page(&filtered_url(&config), &body);
        let dir = tempfile::tempdir().unwrap();

        let report = run(&fetcher, &config, &options(&dir)).await.unwrap();
        assert_eq!(report.emitted, 1);

        let xml = std::fs::read_to_string(dir.path().join("feed.xml")).unwrap();
        assert!(xml.contains("<link>https://example.gov.br/noticia/4</link>"));
        assert!(!xml.contains(":8080"));
        assert!(xml.contains(r#"<enclosure url="https://example.gov.br/temas/educacao.jpg""#));
        assert!(xml.contains("xmlns:media"));
    }

    #[tokio::test]
    async fn test_state_bounds_next_run() {
        let config = config();
        let body = format!(
            "[{}, {}]",
            post(5, "Audiência pública", "<p>Audiência.</p>", None),
            post(3, "Feira cultural", "<p>Feira.</p>", None)
        );
        let fetcher = StaticFetcher::new().page(&filtered_url(&config), &body);
        let dir = tempfile::tempdir().unwrap();
        let mut opts = options(&dir);
        opts.state_path = Some(dir.path().join("state.json"));

        let first = run(&fetcher, &config, &opts).await.unwrap();
        assert_eq!(first.emitted, 2);
        let state = load_state(dir.path().join("state.json").as_path()).await.unwrap();
        // 15:00 Fortaleza == 18:00 UTC
        assert_eq!(state.last_date, Utc.with_ymd_and_hms(2025, 12, 10, 18, 0, 0).unwrap());

        // The second run asks with the state as lower bound and gets nothing new.
        let SourceConfig::Wordpress(wp) = &config.source else {
            unreachable!()
        };
        let bounded = posts_url(
            wp,
            Some(NaiveDate::from_ymd_opt(2025, 12, 10).unwrap().and_hms_opt(15, 0, 0).unwrap()),
        )
        .unwrap();
        let fetcher = StaticFetcher::new()
            .page(bounded.as_str(), &body)
            .page(&relaxed_url(&config), &body);
        let second = run(&fetcher, &config, &opts).await.unwrap();
        assert_eq!(second.fetched, 2);
        assert_eq!(second.emitted, 0);
        let state = load_state(dir.path().join("state.json").as_path()).await.unwrap();
        assert_eq!(state.last_date, Utc.with_ymd_and_hms(2025, 12, 10, 18, 0, 0).unwrap());
    }

    #[tokio::test]
    async fn test_force_refresh_changes_guids() {
        let config = config();
        let body = format!("[{}]", post(3, "Feira cultural", "<p>Feira.</p>", None));
        let dir = tempfile::tempdir().unwrap();
        let mut opts = options(&dir);

        let fetcher = StaticFetcher::new().page(&filtered_url(&config), &body);
        run(&fetcher, &config, &opts).await.unwrap();
        let stable = std::fs::read_to_string(&opts.output_path).unwrap();

        opts.force_refresh_guids = true;
        let fetcher = StaticFetcher::new().page(&filtered_url(&config), &body);
        run(&fetcher, &config, &opts).await.unwrap();
        let refreshed = std::fs::read_to_string(&opts.output_path).unwrap();

        let guid = |xml: &str| {
            let start = xml.find("<guid").unwrap();
            let end = xml[start..].find("</guid>").unwrap();
            xml[start..start + end].to_string()
        };
        assert!(guid(&stable).contains("camara-exemplo-"));
        assert_ne!(guid(&stable), guid(&refreshed));
    }

    #[tokio::test]
    async fn test_listing_source_reads_detail_pages() {
        let yaml = r#"
site:
  name: prefeitura
  base_url: https://www.exemplo.ce.gov.br
channel:
  title: Prefeitura
  description: Notícias
source:
  kind: listing
  url: https://www.exemplo.ce.gov.br/noticias
  item_selector: li.noticia
  link_selector: a
  date_selector: span.data
extractor:
  content_selectors: [div.conteudo]
"#;
        let config = FeedConfig::from_yaml(yaml).unwrap();
        let listing = r#"<ul>
          <li class="noticia"><a href="/noticia/1">Obra na avenida</a><span class="data">10/12/2025 09h30</span></li>
          <li class="noticia"><a href="/noticia/2">Sem página</a><span class="data">10/12/2025</span></li>
          <li class="noticia"><a href="/noticia/0">Antiga</a><span class="data">01/12/2025</span></li>
        </ul>"#;
        let detail = r#"<html><head><meta property="og:image" content="/img/obra.jpg"></head>
          <body><nav>Menu</nav><div class="conteudo"><p>A obra começa segunda.</p></div></body></html>"#;
        let fetcher = StaticFetcher::new()
            .page("https://www.exemplo.ce.gov.br/noticias", listing)
            .page("https://www.exemplo.ce.gov.br/noticia/1", detail);
        let dir = tempfile::tempdir().unwrap();

        let report = run(&fetcher, &config, &options(&dir)).await.unwrap();
        assert_eq!(
            report,
            RunReport {
                fetched: 3,
                selected: 2,
                emitted: 1,
                skipped: 1
            }
        );
        let xml = std::fs::read_to_string(dir.path().join("feed.xml")).unwrap();
        assert!(xml.contains("<title>Obra na avenida</title>"));
        assert!(xml.contains("https://www.exemplo.ce.gov.br/img/obra.jpg"));
        assert!(xml.contains("A obra começa segunda."));
    }

    #[tokio::test]
    async fn test_undated_listing_dated_from_detail_page() {
        let yaml = r#"
site:
  name: caucaia
  base_url: https://www.exemplo.ce.gov.br
channel:
  title: Prefeitura
  description: Notícias
source:
  kind: listing
  url: https://www.exemplo.ce.gov.br/informa
  item_selector: div.card
  link_selector: a
  title_selector: h5
extractor:
  content_selectors: [div.texto]
"#;
        let config = FeedConfig::from_yaml(yaml).unwrap();
        let listing = r#"<div class="card"><a href="/informa/5"></a><h5>Taxa &lt; 5% e &gt; 3% em dezembro</h5></div>
          <div class="card"><a href="/informa/4"></a><h5>Mutirão antigo</h5></div>"#;
        let today = r#"<html><body><div class="data">Publicado em 10/12/2025, às 14h30</div>
          <div class="texto"><p>A taxa caiu.</p></div></body></html>"#;
        let older = r#"<html><body><p>01/12/2025</p><div class="texto"><p>Mutirão.</p></div></body></html>"#;
        let fetcher = StaticFetcher::new()
            .page("https://www.exemplo.ce.gov.br/informa", listing)
            .page("https://www.exemplo.ce.gov.br/informa/5", today)
            .page("https://www.exemplo.ce.gov.br/informa/4", older);
        let dir = tempfile::tempdir().unwrap();

        let report = run(&fetcher, &config, &options(&dir)).await.unwrap();
        assert_eq!(
            report,
            RunReport {
                fetched: 2,
                selected: 1,
                emitted: 1,
                skipped: 0
            }
        );
        // Each detail page is read once, before selection.
        assert_eq!(
            fetcher.requested(),
            vec![
                "https://www.exemplo.ce.gov.br/informa".to_string(),
                "https://www.exemplo.ce.gov.br/informa/5".to_string(),
                "https://www.exemplo.ce.gov.br/informa/4".to_string(),
            ]
        );
        let xml = std::fs::read_to_string(dir.path().join("feed.xml")).unwrap();
        assert!(xml.contains("<title>Taxa &lt; 5% e &gt; 3% em dezembro</title>"));
        assert!(xml.contains("<pubDate>Wed, 10 Dec 2025 17:30:00 +0000</pubDate>"));
        assert!(xml.contains("A taxa caiu."));
        assert!(!xml.contains("Mutirão"));
    }

    #[tokio::test]
    async fn test_rss_source_reads_detail_pages() {
        let yaml = r#"
site:
  name: agencia
  base_url: https://agencia.example.gov.br
channel:
  title: Agência
  description: Notícias
source:
  kind: rss
  url: https://agencia.example.gov.br/rss/feed.xml
extractor:
  content_selectors: [div.conteudo]
"#;
        let config = FeedConfig::from_yaml(yaml).unwrap();
        let feed = r#"<?xml version="1.0"?><rss version="2.0"><channel><title>Agência</title>
          <item><title>Plano safra anunciado</title><link>https://agencia.example.gov.br/noticia/10</link>
            <pubDate>Wed, 10 Dec 2025 11:00:00 -0300</pubDate><description>Resumo curto.</description></item>
          <item><title>Notícia de ontem</title><link>https://agencia.example.gov.br/noticia/9</link>
            <pubDate>Tue, 09 Dec 2025 11:00:00 -0300</pubDate></item>
        </channel></rss>"#;
        let detail = r#"<html><head><meta property="og:image" content="/img/safra.jpg"></head>
          <body><div class="conteudo"><p>O plano safra terá recursos recordes.</p></div></body></html>"#;
        let fetcher = StaticFetcher::new()
            .page("https://agencia.example.gov.br/rss/feed.xml", feed)
            .page("https://agencia.example.gov.br/noticia/10", detail);
        let dir = tempfile::tempdir().unwrap();

        let report = run(&fetcher, &config, &options(&dir)).await.unwrap();
        assert_eq!(
            report,
            RunReport {
                fetched: 2,
                selected: 1,
                emitted: 1,
                skipped: 0
            }
        );
        assert_eq!(fetcher.requested().len(), 2);
        let xml = std::fs::read_to_string(dir.path().join("feed.xml")).unwrap();
        assert!(xml.contains("<title>Plano safra anunciado</title>"));
        assert!(xml.contains("<pubDate>Wed, 10 Dec 2025 14:00:00 +0000</pubDate>"));
        assert!(xml.contains("<description>Resumo curto.</description>"));
        assert!(xml.contains("https://agencia.example.gov.br/img/safra.jpg"));
        assert!(xml.contains("recursos recordes"));
    }
}
