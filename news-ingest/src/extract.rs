use crate::fetcher::read_capped;
use crate::types::{IngestError, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;
use url::Url;

const MAX_CONTENT_BYTES: usize = 5 * 1024 * 1024;

/// Turns an item link into readable page text.
#[async_trait]
pub trait ContentExtractor: Send + Sync {
    async fn extract(&self, link: &str) -> Result<String>;
}

/// Extracts page content through a reader service that renders any URL as
/// markdown when requested as `{endpoint}{url}`.
pub struct ReaderExtractor {
    client: Client,
    endpoint: String,
    max_bytes: usize,
}

impl ReaderExtractor {
    pub fn new(endpoint: impl Into<String>, user_agent: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()?;

        Ok(Self::with_client(client, endpoint))
    }

    pub fn with_client(client: Client, endpoint: impl Into<String>) -> Self {
        let mut endpoint = endpoint.into();
        if !endpoint.ends_with('/') {
            endpoint.push('/');
        }
        Self {
            client,
            endpoint,
            max_bytes: MAX_CONTENT_BYTES,
        }
    }

    pub fn with_max_bytes(mut self, max_bytes: usize) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    fn reader_url(&self, link: &str) -> Result<String> {
        let parsed = Url::parse(link)?;
        if !matches!(parsed.scheme(), "http" | "https") || parsed.host().is_none() {
            return Err(IngestError::InvalidUrl(link.to_string()));
        }
        Ok(format!("{}{}", self.endpoint, parsed))
    }
}

#[async_trait]
impl ContentExtractor for ReaderExtractor {
    async fn extract(&self, link: &str) -> Result<String> {
        let reader_url = self.reader_url(link)?;
        debug!("Extracting content from: {}", link);

        let response = self
            .client
            .get(&reader_url)
            .header("Accept", "text/markdown")
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(IngestError::RateLimited(format!("reader service for {}", link)));
        }
        if !status.is_success() {
            return Err(IngestError::Status {
                status: status.as_u16(),
                url: reader_url,
            });
        }

        let (mut body, truncated) = read_capped(response, self.max_bytes).await?;
        if truncated {
            debug!("Content of {} cut at {} bytes", link, self.max_bytes);
            body.truncate(char_boundary(&body));
        }
        let content = String::from_utf8_lossy(&body).trim().to_string();

        if content.is_empty() {
            return Err(IngestError::General(format!(
                "received empty content for {}",
                link
            )));
        }

        Ok(content)
    }
}

/// Length of `body` without a trailing incomplete UTF-8 sequence.
fn char_boundary(body: &[u8]) -> usize {
    let end = body.len();
    let mut start = end;
    while start > 0 && end - start < 3 && body[start - 1] & 0xC0 == 0x80 {
        start -= 1;
    }
    if start == 0 {
        return end;
    }

    let lead = body[start - 1];
    let width = match lead {
        b if b & 0x80 == 0 => 1,
        b if b & 0xE0 == 0xC0 => 2,
        b if b & 0xF0 == 0xE0 => 3,
        b if b & 0xF8 == 0xF0 => 4,
        _ => return end,
    };
    if end - (start - 1) < width {
        start - 1
    } else {
        end
    }
}
