use crate::types::{Analysis, Entities, IngestError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::time::Duration;
use tracing::debug;

pub const API_KEY_ENV: &str = "GEMINI_API_KEY";
const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Produces structured analysis for extracted page text.
#[async_trait]
pub trait Analyzer: Send + Sync {
    async fn analyze(&self, content: &str) -> Result<Analysis>;
}

pub struct GeminiAnalyzer {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl GeminiAnalyzer {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            model: model.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
        })
    }

    /// Reads the API key from `GEMINI_API_KEY`.
    pub fn from_env(model: impl Into<String>, timeout: Duration) -> Result<Self> {
        let api_key = std::env::var(API_KEY_ENV)
            .ok()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| {
                IngestError::MissingCredential(format!("{} environment variable is not set", API_KEY_ENV))
            })?;
        Self::new(api_key, model, timeout)
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AnalysisPayload {
    summary: String,
    #[serde(default)]
    entities: Entities,
    #[serde(default)]
    topics: Vec<String>,
    #[serde(default)]
    content_type: String,
}

#[async_trait]
impl Analyzer for GeminiAnalyzer {
    async fn analyze(&self, content: &str) -> Result<Analysis> {
        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);
        let body = json!({
            "contents": [{ "parts": [{ "text": build_prompt(content) }] }],
            "generationConfig": { "responseMimeType": "application/json" }
        });

        debug!("Requesting analysis from {} ({} bytes)", self.model, content.len());
        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status().as_u16();
        match status {
            200..=299 => {}
            429 => return Err(IngestError::RateLimited("gemini quota exceeded".into())),
            401 | 403 => {
                return Err(IngestError::MissingCredential(format!(
                    "gemini rejected the API key (HTTP {})",
                    status
                )))
            }
            500..=599 => {
                return Err(IngestError::Analysis {
                    message: format!("gemini server error (HTTP {})", status),
                    transient: true,
                })
            }
            _ => {
                return Err(IngestError::Analysis {
                    message: format!("gemini request failed (HTTP {})", status),
                    transient: false,
                })
            }
        }

        let response: GenerateResponse = response.json().await?;
        let text = response
            .candidates
            .into_iter()
            .filter_map(|c| c.content)
            .flat_map(|c| c.parts)
            .find_map(|p| p.text)
            .ok_or_else(|| IngestError::Analysis {
                message: "no response from Gemini API".into(),
                transient: false,
            })?;

        parse_analysis(&text, content)
    }
}

fn build_prompt(content: &str) -> String {
    format!(
        r#"Analyze this news article and return a JSON response with the following structure:
{{
  "summary": "• Bullet point summary\n• Key points\n• Important details",
  "entities": {{
    "organizations": ["Company1", "Company2"],
    "products": ["Product1", "Model1"],
    "people": ["Person1", "Person2"]
  }},
  "topics": ["Topic1", "Topic2"],
  "content_type": "Research Paper|Product Launch|News Article|Opinion Piece|Tutorial"
}}

Article content:
{}"#,
        content
    )
}

/// Parses the model's JSON answer, tolerating a fenced code block around it.
pub fn parse_analysis(text: &str, content: &str) -> Result<Analysis> {
    let trimmed = text.trim();
    let json_text = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.trim_end().strip_suffix("```"))
        .unwrap_or(trimmed)
        .trim();

    let payload: AnalysisPayload = serde_json::from_str(json_text).map_err(|e| IngestError::Analysis {
        message: format!("failed to parse Gemini response: {}", e),
        transient: false,
    })?;

    Ok(Analysis {
        summary: payload.summary,
        entities: payload.entities,
        topics: payload.topics,
        content_type: payload.content_type,
        story_group_id: story_group_id(content),
    })
}

/// Stable grouping key for the same story: the first 16 hex characters of
/// the SHA-256 of the analysed text.
pub fn story_group_id(content: &str) -> String {
    let digest = Sha256::digest(content.as_bytes());
    digest.iter().take(8).map(|b| format!("{:02x}", b)).collect()
}
