use crate::error::{user_message, ErrorKind, IngestError};
use crate::types::Source;
use serde::Serialize;
use std::fmt;

/// Result of running the pipeline for one source.
#[derive(Debug)]
pub struct Outcome {
    pub source: Source,
    pub added: usize,
    pub error: Option<IngestError>,
}

impl Outcome {
    pub fn succeeded(source: Source, added: usize) -> Self {
        Self {
            source,
            added,
            error: None,
        }
    }

    pub fn failed(source: Source, added: usize, error: IngestError) -> Self {
        Self {
            source,
            added,
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceError {
    pub source_name: String,
    pub kind: String,
    pub message: String,
    pub detail: String,
}

impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "source {}: {}", self.source_name, self.message)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    pub total_added: usize,
    pub total_sources: usize,
    pub success_count: usize,
    pub error_count: usize,
    pub errors: Vec<SourceError>,
}

impl RunSummary {
    pub fn from_outcomes(outcomes: &[Outcome]) -> Self {
        let mut summary = RunSummary {
            total_sources: outcomes.len(),
            ..Default::default()
        };

        for outcome in outcomes {
            summary.total_added += outcome.added;
            match &outcome.error {
                None => summary.success_count += 1,
                Some(err) => {
                    summary.error_count += 1;
                    summary.errors.push(SourceError {
                        source_name: outcome.source.name.clone(),
                        kind: if err.is_cancelled() {
                            "cancelled".to_string()
                        } else {
                            err.kind().to_string()
                        },
                        message: user_message(err),
                        detail: err.to_string(),
                    });
                }
            }
        }

        summary
    }

    pub fn has_errors(&self) -> bool {
        self.error_count > 0
    }

    pub fn errors_of(&self, kind: ErrorKind) -> impl Iterator<Item = &SourceError> {
        self.errors.iter().filter(move |e| e.kind == kind.as_str())
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Added {} new items from {} sources",
            self.total_added, self.total_sources
        )?;
        if self.has_errors() {
            writeln!(f, "{} errors occurred:", self.error_count)?;
            for error in &self.errors {
                writeln!(f, "  - {} ({})", error, error.detail)?;
            }
        }
        Ok(())
    }
}
