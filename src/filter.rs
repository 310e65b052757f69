//! Record selection: date window and denylist.
//!
//! [`select`] is pure and keeps input order. A record survives when its
//! publish date parses, falls inside the window (and after the incremental
//! lower bound, if any), and nothing in its title, body or categories is on
//! the denylist.

use chrono::{DateTime, Days, NaiveDate, Utc};
use chrono_tz::Tz;
use tracing::debug;

use crate::config::{FilterConfig, WindowKind};
use crate::dates::{civil_date, record_published};
use crate::models::RawRecord;
use crate::sanitize::strip_tags;
use crate::utils::fold_text;

/// Inclusive range of civil dates accepted by the filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateWindow {
    Between { first: NaiveDate, last: NaiveDate },
    Any,
}

impl DateWindow {
    /// Window for `reference` (today in the site's calendar).
    pub fn from_config(config: &FilterConfig, reference: NaiveDate) -> Self {
        match config.window {
            WindowKind::Today => DateWindow::Between {
                first: reference,
                last: reference,
            },
            WindowKind::Recent => {
                let back = u64::from(config.days.max(1) - 1);
                DateWindow::Between {
                    first: reference.checked_sub_days(Days::new(back)).unwrap_or(reference),
                    last: reference,
                }
            }
            WindowKind::Any => DateWindow::Any,
        }
    }

    pub fn contains(&self, day: NaiveDate) -> bool {
        match self {
            DateWindow::Between { first, last } => *first <= day && day <= *last,
            DateWindow::Any => true,
        }
    }

    /// Earliest accepted date, if bounded.
    pub fn first(&self) -> Option<NaiveDate> {
        match self {
            DateWindow::Between { first, .. } => Some(*first),
            DateWindow::Any => None,
        }
    }

    /// True when `day` is before the window, i.e. everything after it in a
    /// newest-first listing is too old as well.
    pub fn is_before(&self, day: NaiveDate) -> bool {
        self.first().is_some_and(|first| day < first)
    }
}

/// Case- and accent-insensitive keyword and category denylist.
#[derive(Debug, Clone, Default)]
pub struct Denylist {
    keywords: Vec<String>,
    categories: Vec<String>,
}

impl Denylist {
    pub fn new(keywords: &[String], categories: &[String]) -> Self {
        let fold_all = |items: &[String]| -> Vec<String> {
            items
                .iter()
                .map(|s| fold_text(s.trim()))
                .filter(|s| !s.is_empty())
                .collect()
        };
        Self {
            keywords: fold_all(keywords),
            categories: fold_all(categories),
        }
    }

    pub fn from_config(config: &FilterConfig) -> Self {
        Self::new(&config.deny_keywords, &config.deny_categories)
    }

    /// First denylist entry found in the given text, if any.
    pub fn matches_text(&self, text: &str) -> Option<&str> {
        let folded = fold_text(text);
        self.keywords
            .iter()
            .find(|k| folded.contains(k.as_str()))
            .map(String::as_str)
    }

    /// First denylist entry found in the record's title, body, excerpt or categories.
    pub fn matches_record(&self, record: &RawRecord) -> Option<&str> {
        let category_hit = record.categories.iter().find_map(|term| {
            let name = fold_text(&term.name);
            let slug = fold_text(&term.slug);
            self.categories
                .iter()
                .find(|c| name.contains(c.as_str()) || slug.contains(c.as_str()))
        });
        if let Some(hit) = category_hit {
            return Some(hit.as_str());
        }

        let body_text = record.body_html.as_deref().map(strip_tags).unwrap_or_default();
        let excerpt_text = record.excerpt.as_deref().map(strip_tags).unwrap_or_default();
        [record.title.as_str(), body_text.as_str(), excerpt_text.as_str()]
            .into_iter()
            .find_map(|text| self.matches_text(text))
    }
}

/// A record that passed selection, with its normalized publish time.
#[derive(Debug, Clone)]
pub struct Selected {
    pub record: RawRecord,
    pub published_at: DateTime<Utc>,
}

/// Everything [`select`] needs besides the records.
#[derive(Debug, Clone)]
pub struct Selection<'a> {
    pub window: DateWindow,
    /// Records must be strictly newer than this (incremental mode).
    pub since: Option<DateTime<Utc>>,
    pub denylist: &'a Denylist,
    pub tz: Tz,
}

/// Keep the records that pass the date window and the denylist, in order.
pub fn select(records: Vec<RawRecord>, rules: &Selection<'_>) -> Vec<Selected> {
    records
        .into_iter()
        .filter_map(|record| {
            let Some(published_at) = record_published(&record, rules.tz) else {
                debug!(id = ?record.id, title = %record.title, date = ?record.date, "Dropping record with unparseable date");
                return None;
            };
            if !rules.window.contains(civil_date(published_at, rules.tz)) {
                debug!(title = %record.title, %published_at, "Outside date window");
                return None;
            }
            if rules.since.is_some_and(|since| published_at <= since) {
                debug!(title = %record.title, %published_at, "Already processed");
                return None;
            }
            if let Some(hit) = rules.denylist.matches_record(&record) {
                debug!(title = %record.title, denied = hit, "Denylisted");
                return None;
            }
            Some(Selected {
                record,
                published_at,
            })
        })
        .collect()
}
