use crate::pipeline::RunConfig;
use crate::retry::RetryPolicy;
use crate::types::{IngestError, Result, Source};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub database_url: String,
    pub network_timeout_secs: u64,
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    /// 0 means one worker per CPU.
    pub workers: usize,
    /// 0 means every item in the feed.
    pub fetch_limit: usize,
    pub user_agent: String,
    pub reader_endpoint: String,
    pub analysis_model: String,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://news-ingest.db".to_string(),
            network_timeout_secs: 8,
            max_retries: 3,
            backoff_base_ms: 250,
            backoff_max_ms: 2000,
            workers: 0,
            fetch_limit: 0,
            user_agent: format!("news-ingest/{}", env!("CARGO_PKG_VERSION")),
            reader_endpoint: "https://r.jina.ai/".to_string(),
            analysis_model: "gemini-1.5-flash".to_string(),
        }
    }
}

impl IngestConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Applies overrides from `lookup` on top of the defaults. Values that
    /// fail to parse are ignored.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(url) = lookup("DATABASE_URL").filter(|v| !v.trim().is_empty()) {
            config.database_url = url;
        }
        override_parsed(&lookup, "NETWORK_TIMEOUT", &mut config.network_timeout_secs);
        override_parsed(&lookup, "MAX_RETRIES", &mut config.max_retries);
        override_parsed(&lookup, "BACKOFF_BASE_MS", &mut config.backoff_base_ms);
        override_parsed(&lookup, "BACKOFF_MAX_MS", &mut config.backoff_max_ms);
        override_parsed(&lookup, "FETCH_WORKERS", &mut config.workers);
        override_parsed(&lookup, "FETCH_LIMIT", &mut config.fetch_limit);

        config
    }

    pub fn network_timeout(&self) -> Duration {
        Duration::from_secs(self.network_timeout_secs.max(1))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_retries.max(1),
            base_delay: Duration::from_millis(self.backoff_base_ms),
            max_delay: Duration::from_millis(self.backoff_max_ms),
            multiplier: 2.0,
            max_elapsed: self.network_timeout() * 2,
        }
    }

    pub fn run_config(&self) -> RunConfig {
        RunConfig {
            retry: self.retry_policy(),
            network_timeout: self.network_timeout(),
            fetch_limit: self.fetch_limit,
        }
    }
}

fn override_parsed<F, T>(lookup: &F, key: &str, target: &mut T)
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    if let Some(raw) = lookup(key) {
        match raw.trim().parse() {
            Ok(value) => *target = value,
            Err(_) => warn!("Ignoring invalid {}={:?}, keeping default", key, raw),
        }
    }
}

/// Parses a `name=url` source argument.
pub fn parse_source_arg(arg: &str) -> Result<Source> {
    let (name, url) = arg
        .split_once('=')
        .ok_or_else(|| IngestError::General(format!("expected name=url, got {:?}", arg)))?;
    let (name, url) = (name.trim(), url.trim());
    if name.is_empty() || url.is_empty() {
        return Err(IngestError::General(format!("expected name=url, got {:?}", arg)));
    }
    url::Url::parse(url)?;
    Ok(Source::new(name, url))
}

/// Loads a JSON array of sources.
pub fn load_sources(path: impl AsRef<Path>) -> Result<Vec<Source>> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path)
        .map_err(|e| IngestError::General(format!("failed to read {}: {}", path.display(), e)))?;
    serde_json::from_str(&raw)
        .map_err(|e| IngestError::Parse(format!("invalid sources file {}: {}", path.display(), e)))
}
