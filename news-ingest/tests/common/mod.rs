#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use news_ingest::{
    Analysis, Analyzer, ContentExtractor, Entities, IngestError, ItemStore, NewItem, Result,
    RetryPolicy, RunConfig, SqliteStore, StoredItem,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use uuid::Uuid;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

pub fn fast_config() -> RunConfig {
    RunConfig {
        retry: RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(20),
            multiplier: 2.0,
            max_elapsed: Duration::from_secs(2),
        },
        network_timeout: Duration::from_secs(5),
        fetch_limit: 0,
    }
}

/// An RSS 2.0 document with one entry per `(title, link)`, newest first.
pub fn rss_feed(items: &[(&str, &str)]) -> String {
    let entries: String = items
        .iter()
        .enumerate()
        .map(|(i, (title, link))| {
            let published = Utc.with_ymd_and_hms(2024, 1, 28, 10, 0, 0).unwrap()
                - chrono::Duration::hours(i as i64);
            format!(
                "<item><title>{}</title><link>{}</link><pubDate>{}</pubDate></item>",
                title,
                link,
                published.to_rfc2822()
            )
        })
        .collect();

    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0"><channel><title>Test feed</title><link>https://news.example</link><description>test</description>{}</channel></rss>"#,
        entries
    )
}

/// Serves `items` as an RSS feed under `route` and returns its URL.
pub async fn mount_feed(server: &MockServer, route: &str, items: &[(&str, &str)]) -> String {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "application/rss+xml")
                .set_body_string(rss_feed(items)),
        )
        .mount(server)
        .await;
    format!("{}{}", server.uri(), route)
}

pub struct StubExtractor {
    content: Option<String>,
    pub calls: AtomicUsize,
}

impl StubExtractor {
    pub fn returning(content: &str) -> Self {
        Self {
            content: Some(content.to_string()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            content: None,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ContentExtractor for StubExtractor {
    async fn extract(&self, link: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.content {
            Some(content) => Ok(format!("{} ({})", content, link)),
            None => Err(IngestError::Status {
                status: 404,
                url: link.to_string(),
            }),
        }
    }
}

pub struct StubAnalyzer {
    fail: bool,
    pub calls: AtomicUsize,
}

impl StubAnalyzer {
    pub fn succeeding() -> Self {
        Self {
            fail: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Analyzer for StubAnalyzer {
    async fn analyze(&self, content: &str) -> Result<Analysis> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(IngestError::Analysis {
                message: "model refused".into(),
                transient: false,
            });
        }
        Ok(Analysis {
            summary: format!("• {}", content),
            entities: Entities {
                organizations: vec!["Acme".into()],
                ..Default::default()
            },
            topics: vec!["testing".into()],
            content_type: "News Article".into(),
            story_group_id: news_ingest::analyze::story_group_id(content),
        })
    }
}

/// Wraps a real store and fails the first lookups and inserts with a
/// transient pool error.
pub struct FlakyStore {
    inner: SqliteStore,
    lookup_failures: AtomicUsize,
    insert_failures: AtomicUsize,
    pub lookup_calls: AtomicUsize,
    pub insert_calls: AtomicUsize,
}

impl FlakyStore {
    /// Fails the first `failures` inserts.
    pub fn new(inner: SqliteStore, failures: usize) -> Self {
        Self {
            inner,
            lookup_failures: AtomicUsize::new(0),
            insert_failures: AtomicUsize::new(failures),
            lookup_calls: AtomicUsize::new(0),
            insert_calls: AtomicUsize::new(0),
        }
    }

    /// Fails the first `failures` lookups.
    pub fn failing_lookups(inner: SqliteStore, failures: usize) -> Self {
        Self {
            lookup_failures: AtomicUsize::new(failures),
            ..Self::new(inner, 0)
        }
    }
}

fn take_failure(remaining: &AtomicUsize) -> bool {
    remaining
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[async_trait]
impl ItemStore for FlakyStore {
    async fn find_by_link(&self, link: &str) -> Result<Option<StoredItem>> {
        self.lookup_calls.fetch_add(1, Ordering::SeqCst);
        if take_failure(&self.lookup_failures) {
            return Err(IngestError::Database(sqlx::Error::PoolTimedOut));
        }
        self.inner.find_by_link(link).await
    }

    async fn insert(&self, item: &NewItem) -> Result<Uuid> {
        self.insert_calls.fetch_add(1, Ordering::SeqCst);
        if take_failure(&self.insert_failures) {
            return Err(IngestError::Database(sqlx::Error::PoolTimedOut));
        }
        self.inner.insert(item).await
    }
}

/// A store where another writer always gets there first: lookups miss and
/// every insert hits the unique link constraint.
#[derive(Default)]
pub struct RacingStore {
    pub insert_calls: AtomicUsize,
}

#[async_trait]
impl ItemStore for RacingStore {
    async fn find_by_link(&self, _link: &str) -> Result<Option<StoredItem>> {
        Ok(None)
    }

    async fn insert(&self, item: &NewItem) -> Result<Uuid> {
        self.insert_calls.fetch_add(1, Ordering::SeqCst);
        Err(IngestError::DuplicateLink {
            link: item.link.clone(),
        })
    }
}
