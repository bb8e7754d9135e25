use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use crate::error::{ErrorKind, IngestError, Result};

/// How a source is retrieved. Only syndication feeds are fetched today; the
/// kind is carried so registries can describe other endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    #[default]
    Rss,
    Atom,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub name: String,
    #[serde(alias = "url")]
    pub endpoint: String,
    #[serde(default, alias = "type")]
    pub kind: SourceKind,
    #[serde(default)]
    pub priority: i32,
}

impl Source {
    pub fn new(name: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            endpoint: endpoint.into(),
            kind: SourceKind::Rss,
            priority: 0,
        }
    }
}

/// An entry read from a feed, before it has been checked against the store.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateItem {
    pub title: String,
    pub link: String,
    pub published_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadStatus {
    Unread,
    Read,
}

impl ReadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReadStatus::Unread => "unread",
            ReadStatus::Read => "read",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "unread" => Some(ReadStatus::Unread),
            "read" => Some(ReadStatus::Read),
            _ => None,
        }
    }
}

/// Enrichment lifecycle of a stored item. Tracked separately from
/// [`ReadStatus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisStatus {
    Unprocessed,
    Pending,
    Completed,
}

impl AnalysisStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisStatus::Unprocessed => "unprocessed",
            AnalysisStatus::Pending => "pending",
            AnalysisStatus::Completed => "completed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "unprocessed" => Some(AnalysisStatus::Unprocessed),
            "pending" => Some(AnalysisStatus::Pending),
            "completed" => Some(AnalysisStatus::Completed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entities {
    #[serde(default)]
    pub organizations: Vec<String>,
    #[serde(default)]
    pub products: Vec<String>,
    #[serde(default)]
    pub people: Vec<String>,
}

/// Structured result of the analysis service for one piece of content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
    pub summary: String,
    pub entities: Entities,
    pub topics: Vec<String>,
    pub content_type: String,
    pub story_group_id: String,
}

/// Row to be inserted. Built by the pipeline once enrichment has finished
/// (or been skipped).
#[derive(Debug, Clone)]
pub struct NewItem {
    pub title: String,
    pub link: String,
    pub source_name: String,
    pub published_at: DateTime<Utc>,
    pub summary: Option<String>,
    pub entities: Option<Entities>,
    pub topics: Option<Vec<String>>,
    pub content_type: Option<String>,
    pub raw_content: Option<String>,
    pub read_status: ReadStatus,
    pub analysis_status: AnalysisStatus,
    pub story_group_id: Option<String>,
}

impl NewItem {
    pub fn from_candidate(candidate: &CandidateItem, source_name: &str) -> Self {
        Self {
            title: candidate.title.clone(),
            link: candidate.link.clone(),
            source_name: source_name.to_string(),
            published_at: candidate.published_at,
            summary: None,
            entities: None,
            topics: None,
            content_type: None,
            raw_content: None,
            read_status: ReadStatus::Unread,
            analysis_status: AnalysisStatus::Unprocessed,
            story_group_id: None,
        }
    }

    pub fn with_content(mut self, content: String) -> Self {
        self.raw_content = Some(content);
        self
    }

    pub fn with_analysis(mut self, analysis: Analysis) -> Self {
        self.summary = Some(analysis.summary);
        self.entities = Some(analysis.entities);
        self.topics = Some(analysis.topics);
        self.content_type = Some(analysis.content_type);
        self.story_group_id = Some(analysis.story_group_id);
        self.analysis_status = AnalysisStatus::Completed;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredItem {
    pub id: Uuid,
    pub title: String,
    pub link: String,
    pub source_name: String,
    pub published_at: DateTime<Utc>,
    pub summary: Option<String>,
    pub entities: Option<Entities>,
    pub topics: Option<Vec<String>>,
    pub content_type: Option<String>,
    pub raw_content: Option<String>,
    pub read_status: ReadStatus,
    pub analysis_status: AnalysisStatus,
    pub story_group_id: Option<String>,
    pub created_at: DateTime<Utc>,
}
