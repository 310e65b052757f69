//! Record sources.
//!
//! Each source turns one configured site into a list of [`RawRecord`]s:
//!
//! | Source | Module | Method |
//! |--------|--------|--------|
//! | WordPress REST | [`wordpress`] | `wp/v2/posts` JSON, optional `_embed` |
//! | HTML listing | [`listing`] | listing-page scrape with pagination |
//! | RSS 2.0 | [`rss`] | the site's own feed, read for discovery |
//!
//! Sources never fail the run. Network and parse errors are logged and the
//! source returns whatever it managed to collect (possibly nothing).

pub mod listing;
pub mod rss;
pub mod wordpress;

use chrono::{DateTime, NaiveDateTime, NaiveTime, Utc};
use chrono_tz::Tz;
use tracing::{info, instrument};
use url::Url;

use crate::config::SourceConfig;
use crate::fetch::HttpFetch;
use crate::filter::DateWindow;
use crate::models::RawRecord;

/// What the run is looking for, so sources can narrow requests and stop early.
#[derive(Debug, Clone)]
pub struct FetchPlan {
    pub base: Url,
    pub tz: Tz,
    pub window: DateWindow,
    pub since: Option<DateTime<Utc>>,
}

impl FetchPlan {
    /// Lower bound in the site's local time, for APIs that filter server-side.
    ///
    /// The later of the window start (midnight) and the last processed date.
    pub fn lower_bound_local(&self) -> Option<NaiveDateTime> {
        let window_start = self
            .window
            .first()
            .map(|day| day.and_time(NaiveTime::MIN));
        let since = self.since.map(|dt| dt.with_timezone(&self.tz).naive_local());
        match (window_start, since) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        }
    }
}

/// Fetch raw records from the configured source.
#[instrument(level = "info", skip_all)]
pub async fn collect<F: HttpFetch>(fetcher: &F, source: &SourceConfig, plan: &FetchPlan) -> Vec<RawRecord> {
    let records = match source {
        SourceConfig::Wordpress(wp) => wordpress::fetch_posts(fetcher, wp, plan).await,
        SourceConfig::Listing(listing) => listing::fetch_listing(fetcher, listing, plan).await,
        SourceConfig::Rss(feed) => rss::fetch_rss(fetcher, feed, plan).await,
    };
    info!(count = records.len(), "Collected raw records");
    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone};
    use chrono_tz::America::Fortaleza;

    fn plan(window: DateWindow, since: Option<DateTime<Utc>>) -> FetchPlan {
        FetchPlan {
            base: Url::parse("https://example.gov.br").unwrap(),
            tz: Fortaleza,
            window,
            since,
        }
    }

    #[test]
    fn test_lower_bound_local() {
        let day = NaiveDate::from_ymd_opt(2025, 12, 10).unwrap();
        let window = DateWindow::Between { first: day, last: day };
        assert_eq!(
            plan(window, None).lower_bound_local(),
            Some(day.and_hms_opt(0, 0, 0).unwrap())
        );

        let since = Utc.with_ymd_and_hms(2025, 12, 10, 15, 30, 0).unwrap();
        assert_eq!(
            plan(window, Some(since)).lower_bound_local(),
            Some(day.and_hms_opt(12, 30, 0).unwrap())
        );
        assert_eq!(
            plan(DateWindow::Any, Some(since)).lower_bound_local(),
            Some(day.and_hms_opt(12, 30, 0).unwrap())
        );
        assert_eq!(plan(DateWindow::Any, None).lower_bound_local(), None);
    }
}
