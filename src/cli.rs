//! Command-line interface.
//!
//! Every flag can also come from an environment variable, which is how the
//! cron jobs that drive this binary usually pass them.

use chrono::NaiveDate;
use clap::Parser;
use std::path::PathBuf;

/// Build an RSS feed from one municipal news source.
///
/// # Examples
///
/// ```sh
/// # Today's news, written where the config says
/// gov_news_feed -c cmfor.yaml
///
/// # Incremental run to a specific file
/// gov_news_feed -c cmfor.yaml -o public/cmfor.xml --state state/cmfor.json
///
/// # Rebuild a past day
/// gov_news_feed -c cmfor.yaml --date 2025-12-10
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Source configuration (YAML)
    #[arg(short, long, env = "FEED_CONFIG")]
    pub config: PathBuf,

    /// Output file; overrides `output.path` from the configuration
    #[arg(short, long, env = "FEED_OUTPUT")]
    pub output: Option<PathBuf>,

    /// State file for incremental runs (`{"last_date": ...}`)
    #[arg(long, env = "FEED_STATE")]
    pub state: Option<PathBuf>,

    /// Salt GUIDs with the run timestamp so every item looks new
    #[arg(long, env = "FEED_FORCE_REFRESH_GUIDS")]
    pub force_refresh_guids: bool,

    /// Reference date (YYYY-MM-DD) instead of today in the site's timezone
    #[arg(long, env = "FEED_DATE")]
    pub date: Option<NaiveDate>,

    /// HTTP timeout in seconds (1-120); overrides `site.timeout_secs`
    #[arg(long, env = "FEED_TIMEOUT_SECS", value_parser = clap::value_parser!(u64).range(1..=120))]
    pub timeout_secs: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::parse_from([
            "gov_news_feed",
            "--config",
            "cmfor.yaml",
            "--output",
            "public/cmfor.xml",
            "--state",
            "state.json",
            "--force-refresh-guids",
            "--date",
            "2025-12-10",
            "--timeout-secs",
            "5",
        ]);

        assert_eq!(cli.config, PathBuf::from("cmfor.yaml"));
        assert_eq!(cli.output, Some(PathBuf::from("public/cmfor.xml")));
        assert_eq!(cli.state, Some(PathBuf::from("state.json")));
        assert!(cli.force_refresh_guids);
        assert_eq!(cli.date, NaiveDate::from_ymd_opt(2025, 12, 10));
        assert_eq!(cli.timeout_secs, Some(5));
    }

    #[test]
    fn test_cli_short_flags_and_defaults() {
        let cli = Cli::parse_from(["gov_news_feed", "-c", "/etc/feeds/cmfor.yaml", "-o", "/tmp/feed.xml"]);

        assert_eq!(cli.config, PathBuf::from("/etc/feeds/cmfor.yaml"));
        assert_eq!(cli.output, Some(PathBuf::from("/tmp/feed.xml")));
        assert_eq!(cli.state, None);
        assert!(!cli.force_refresh_guids);
        assert_eq!(cli.date, None);
    }

    #[test]
    fn test_cli_rejects_unbounded_timeout() {
        for secs in ["0", "121", "3600"] {
            assert!(Cli::try_parse_from(["gov_news_feed", "-c", "a.yaml", "--timeout-secs", secs]).is_err());
        }
        let cli = Cli::try_parse_from(["gov_news_feed", "-c", "a.yaml", "--timeout-secs", "120"]).unwrap();
        assert_eq!(cli.timeout_secs, Some(120));
    }

    #[test]
    fn test_cli_rejects_bad_date() {
        assert!(Cli::try_parse_from(["gov_news_feed", "-c", "a.yaml", "--date", "10/12/2025"]).is_err());
    }
}
