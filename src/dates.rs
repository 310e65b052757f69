//! Publish-date parsing and formatting.
//!
//! Sources publish dates in many shapes: RFC-3339 from APIs, naive ISO
//! timestamps in the site's local time, RFC-2822 from other feeds,
//! `10/12/2025` on listing cards and `Quarta, 10 Dezembro 2025 14:54` in
//! Portuguese prose. Everything is normalized to `DateTime<Utc>`; naive values
//! are read in the site's timezone.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::RawRecord;
use crate::utils::fold_text;

static NUMERIC_DATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(\d{1,2})/(\d{1,2})/(\d{4})(?:\D{1,8}(\d{1,2})[:h](\d{2}))?").unwrap()
});

static WORDY_DATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\b(\d{1,2})\s+(?:de\s+)?([a-z]{3,9})\.?\s+(?:de\s+)?(\d{4})(?:\D{1,8}(\d{1,2})[:h](\d{2}))?",
    )
    .unwrap()
});

const MONTHS: [&str; 12] = [
    "janeiro", "fevereiro", "marco", "abril", "maio", "junho", "julho", "agosto", "setembro",
    "outubro", "novembro", "dezembro",
];

fn month_number(name: &str) -> Option<u32> {
    MONTHS
        .iter()
        .position(|m| *m == name || (name.len() == 3 && m.starts_with(name)))
        .map(|i| i as u32 + 1)
}

/// Parse a publish date in any supported shape.
///
/// Returns `None` when nothing matches; callers drop such records instead of
/// pretending they were published now.
pub fn parse_published(raw: &str, tz: Tz) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return localize(naive, tz);
        }
    }
    if let Ok(day) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return localize(day.and_time(noon()), tz);
    }

    parse_numeric(raw, tz).or_else(|| parse_wordy(raw, tz))
}

/// First date written in running text (a page body, a byline), as it appears.
///
/// Numeric dates win over spelled-out ones; the result feeds [`parse_published`].
pub fn find_date(text: &str) -> Option<String> {
    if let Some(m) = NUMERIC_DATE
        .find_iter(text)
        .find(|m| parse_numeric(m.as_str(), chrono_tz::UTC).is_some())
    {
        return Some(m.as_str().to_string());
    }
    let folded = fold_text(text);
    WORDY_DATE
        .find_iter(&folded)
        .find(|m| parse_wordy(m.as_str(), chrono_tz::UTC).is_some())
        .map(|m| m.as_str().to_string())
}

/// Parse a UTC timestamp without offset, as WordPress sends in `date_gmt`.
pub fn parse_gmt(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}

/// Publish time of a raw record, preferring the UTC field.
pub fn record_published(record: &RawRecord, tz: Tz) -> Option<DateTime<Utc>> {
    record
        .date_gmt
        .as_deref()
        .and_then(parse_gmt)
        .or_else(|| record.date.as_deref().and_then(|d| parse_published(d, tz)))
}

/// Civil date of `dt` in the site's calendar.
pub fn civil_date(dt: DateTime<Utc>, tz: Tz) -> NaiveDate {
    dt.with_timezone(&tz).date_naive()
}

/// `Wed, 10 Dec 2025 17:54:00 +0000`
pub fn to_rfc2822(dt: DateTime<Utc>) -> String {
    dt.format("%a, %d %b %Y %H:%M:%S +0000").to_string()
}

fn noon() -> NaiveTime {
    NaiveTime::from_hms_opt(12, 0, 0).unwrap_or_default()
}

fn localize(naive: NaiveDateTime, tz: Tz) -> Option<DateTime<Utc>> {
    tz.from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
}

fn build(day: u32, month: u32, year: i32, hour: Option<&str>, minute: Option<&str>, tz: Tz) -> Option<DateTime<Utc>> {
    let date = NaiveDate::from_ymd_opt(year, month, day)?;
    let time = match (hour, minute) {
        (Some(h), Some(m)) => NaiveTime::from_hms_opt(h.parse().ok()?, m.parse().ok()?, 0)?,
        _ => noon(),
    };
    localize(date.and_time(time), tz)
}

fn parse_numeric(raw: &str, tz: Tz) -> Option<DateTime<Utc>> {
    let caps = NUMERIC_DATE.captures(raw)?;
    build(
        caps[1].parse().ok()?,
        caps[2].parse().ok()?,
        caps[3].parse().ok()?,
        caps.get(4).map(|m| m.as_str()),
        caps.get(5).map(|m| m.as_str()),
        tz,
    )
}

fn parse_wordy(raw: &str, tz: Tz) -> Option<DateTime<Utc>> {
    let folded = fold_text(raw);
    WORDY_DATE.captures_iter(&folded).find_map(|caps| {
        let month = month_number(&caps[2])?;
        build(
            caps[1].parse().ok()?,
            month,
            caps[3].parse().ok()?,
            caps.get(4).map(|m| m.as_str()),
            caps.get(5).map(|m| m.as_str()),
            tz,
        )
    })
}
