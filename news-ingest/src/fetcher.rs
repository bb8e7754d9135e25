use crate::retry::{retry_within, RetryPolicy};
use crate::types::{CandidateItem, IngestError, Result, Source};
use async_trait::async_trait;
use chrono::Utc;
use feed_rs::parser;
use reqwest::{Client, Response};
use std::collections::HashSet;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Retrieves and parses one feed endpoint.
#[async_trait]
pub trait FeedReader: Send + Sync {
    /// Fetch the document at `endpoint` and return its entries in document
    /// order.
    async fn fetch(&self, endpoint: &str) -> Result<Vec<CandidateItem>>;
}

pub struct HttpFeedReader {
    client: Client,
    max_feed_bytes: usize,
}

impl HttpFeedReader {
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .gzip(true)
            .deflate(true)
            .brotli(true)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()?;

        Ok(Self::with_client(client))
    }

    pub fn with_client(client: Client) -> Self {
        Self {
            client,
            max_feed_bytes: 10 * 1024 * 1024,
        }
    }

    pub fn with_max_feed_bytes(mut self, max_feed_bytes: usize) -> Self {
        self.max_feed_bytes = max_feed_bytes;
        self
    }
}

/// Reads the body chunk by chunk, keeping at most `limit` bytes. The flag is
/// set when the body was longer than that.
pub(crate) async fn read_capped(mut response: Response, limit: usize) -> Result<(Vec<u8>, bool)> {
    let mut body = Vec::new();
    while let Some(chunk) = response.chunk().await? {
        let room = limit - body.len();
        if chunk.len() > room {
            body.extend_from_slice(&chunk[..room]);
            return Ok((body, true));
        }
        body.extend_from_slice(&chunk);
    }
    Ok((body, false))
}

#[async_trait]
impl FeedReader for HttpFeedReader {
    async fn fetch(&self, endpoint: &str) -> Result<Vec<CandidateItem>> {
        debug!("Fetching feed: {}", endpoint);

        let response = self.client.get(endpoint).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(IngestError::Status {
                status: status.as_u16(),
                url: endpoint.to_string(),
            });
        }

        let (body, truncated) = read_capped(response, self.max_feed_bytes).await?;
        if truncated {
            return Err(IngestError::Parse(format!(
                "feed too large: more than {} bytes",
                self.max_feed_bytes
            )));
        }

        debug!("Fetched feed: {} ({} bytes)", endpoint, body.len());
        parse_feed(&body)
    }
}

/// Parses an RSS/Atom/JSON feed document. Entries without a link are
/// dropped; entries without a date are stamped with the current time.
pub fn parse_feed(content: &[u8]) -> Result<Vec<CandidateItem>> {
    let feed = parser::parse(content)
        .map_err(|e| IngestError::Parse(format!("Failed to parse feed: {}", e)))?;

    let now = Utc::now();
    let items = feed
        .entries
        .into_iter()
        .filter_map(|entry| {
            let link = entry.links.first()?.href.trim().to_string();
            if link.is_empty() {
                return None;
            }
            let title = entry
                .title
                .map(|t| t.content.trim().to_string())
                .unwrap_or_else(|| "Untitled".to_string());
            let published_at = entry.published.or(entry.updated).unwrap_or(now);

            Some(CandidateItem {
                title,
                link,
                published_at,
            })
        })
        .collect();

    Ok(items)
}

/// Orders items newest first, drops repeated links (keeping the newest) and
/// applies `limit` (0 keeps everything).
pub fn select_recent(mut items: Vec<CandidateItem>, limit: usize) -> Vec<CandidateItem> {
    items.sort_by(|a, b| b.published_at.cmp(&a.published_at));

    let mut seen = HashSet::new();
    items.retain(|item| seen.insert(item.link.clone()));

    if limit > 0 {
        items.truncate(limit);
    }
    items
}

/// Fetches one source with retries, bounded overall by `timeout`. If the
/// deadline passes after a failed attempt, that attempt's error is returned.
pub async fn fetch_source(
    reader: &dyn FeedReader,
    source: &Source,
    policy: &RetryPolicy,
    timeout: Duration,
    limit: usize,
    cancel: &CancellationToken,
) -> Result<Vec<CandidateItem>> {
    let operation = format!("fetch feed {}", source.endpoint);
    let endpoint = source.endpoint.as_str();

    let fetched = retry_within(policy, cancel, &operation, timeout, move || {
        reader.fetch(endpoint)
    })
    .await?;

    let found = fetched.len();
    let items = select_recent(fetched, limit);
    info!(
        source = %source.name,
        "Fetched {} items from {} ({} kept)",
        found,
        source.name,
        items.len()
    );
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Timelike};

    const RSS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>Example</title>
    <link>https://example.com</link>
    <description>Example feed</description>
    <item>
      <title>Older</title>
      <link>https://example.com/older</link>
      <pubDate>Mon, 01 Jan 2024 08:00:00 GMT</pubDate>
    </item>
    <item>
      <title>Undated</title>
      <link>https://example.com/undated</link>
    </item>
    <item>
      <title>Newer</title>
      <link>https://example.com/newer</link>
      <pubDate>Tue, 02 Jan 2024 08:00:00 GMT</pubDate>
    </item>
    <item>
      <title>No link</title>
    </item>
  </channel>
</rss>"#;

    #[test]
    fn parses_entries_and_defaults_missing_dates() {
        let before = Utc::now().with_nanosecond(0).unwrap();
        let items = parse_feed(RSS.as_bytes()).unwrap();

        assert_eq!(items.len(), 3);
        assert_eq!(items[0].title, "Older");
        assert_eq!(
            items[0].published_at,
            Utc.with_ymd_and_hms(2024, 1, 1, 8, 0, 0).unwrap()
        );
        assert!(items[1].published_at >= before);
    }

    #[test]
    fn select_recent_sorts_before_limiting() {
        let items = parse_feed(RSS.as_bytes()).unwrap();
        let recent = select_recent(items, 2);

        let titles: Vec<_> = recent.iter().map(|i| i.title.as_str()).collect();
        assert_eq!(titles, vec!["Undated", "Newer"]);
    }

    #[test]
    fn select_recent_drops_repeated_links() {
        let at = |h| Utc.with_ymd_and_hms(2024, 1, 1, h, 0, 0).unwrap();
        let item = |title: &str, h| CandidateItem {
            title: title.to_string(),
            link: "https://example.com/same".to_string(),
            published_at: at(h),
        };

        let recent = select_recent(vec![item("first", 1), item("second", 2)], 0);
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].title, "second");
    }

    struct Unavailable;

    #[async_trait]
    impl FeedReader for Unavailable {
        async fn fetch(&self, endpoint: &str) -> Result<Vec<CandidateItem>> {
            Err(IngestError::Status {
                status: 503,
                url: endpoint.to_string(),
            })
        }
    }

    #[tokio::test]
    async fn deadline_surfaces_last_fetch_error() {
        let policy = RetryPolicy {
            max_attempts: 100,
            base_delay: Duration::from_millis(20),
            max_delay: Duration::from_millis(20),
            multiplier: 1.0,
            max_elapsed: Duration::from_secs(30),
        };
        let source = Source::new("down", "https://down.example/feed");

        let err = fetch_source(
            &Unavailable,
            &source,
            &policy,
            Duration::from_millis(70),
            0,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err.root(), IngestError::Status { status: 503, .. }));
        assert!(err.to_string().starts_with("fetch feed https://down.example/feed"));
    }

    #[test]
    fn malformed_documents_are_parse_errors() {
        let err = parse_feed(b"<html>not a feed").unwrap_err();
        assert!(matches!(err, IngestError::Parse(_)));
        assert!(!err.is_retryable());
    }
}
