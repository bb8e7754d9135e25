use std::time::Duration;

/// Failure classes used to decide retries and to pick user-facing messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Network,
    Storage,
    AnalysisService,
    Validation,
    Timeout,
    RateLimit,
    Unknown,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Network => "network",
            ErrorKind::Storage => "storage",
            ErrorKind::AnalysisService => "analysis-service",
            ErrorKind::Validation => "validation",
            ErrorKind::Timeout => "timeout",
            ErrorKind::RateLimit => "rate-limit",
            ErrorKind::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },

    #[error("Feed parse error: {0}")]
    Parse(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Item already stored: {link}")]
    DuplicateLink { link: String },

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Analysis service error: {message}")]
    Analysis { message: String, transient: bool },

    #[error("Missing credential: {0}")]
    MissingCredential(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Cancelled")]
    Cancelled,

    #[error("{operation}: {source}")]
    Operation {
        operation: String,
        source: Box<IngestError>,
    },

    #[error("{0}")]
    General(String),
}

impl From<url::ParseError> for IngestError {
    fn from(err: url::ParseError) -> Self {
        IngestError::InvalidUrl(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, IngestError>;

const VALIDATION_FRAGMENTS: &[&str] = &["invalid url", "malformed", "parse error", "validation"];
const RATE_LIMIT_FRAGMENTS: &[&str] = &["rate limit", "too many requests"];
const TIMEOUT_FRAGMENTS: &[&str] = &["timeout", "timed out", "deadline exceeded"];
const STORAGE_FRAGMENTS: &[&str] = &["database", "sqlite", "sql", "constraint", "locked", "busy"];
const ANALYSIS_FRAGMENTS: &[&str] = &["gemini", "api key", "api_key", "quota", "generate content"];
const NETWORK_FRAGMENTS: &[&str] = &[
    "connection refused",
    "connection reset",
    "no such host",
    "network unreachable",
    "temporary failure",
];
const STORAGE_BUSY_FRAGMENTS: &[&str] = &["database is locked", "database is busy"];
const TRANSIENT_ANALYSIS_FRAGMENTS: &[&str] = &[
    "rate limit",
    "quota exceeded",
    "server error",
    "service unavailable",
    "timeout",
    "temporary",
];

// SQLITE_BUSY and SQLITE_LOCKED primary result codes.
const SQLITE_BUSY_CODES: &[&str] = &["5", "6"];

impl IngestError {
    /// Wraps the error with the name of the operation that produced it.
    pub fn with_operation(self, operation: impl Into<String>) -> Self {
        IngestError::Operation {
            operation: operation.into(),
            source: Box::new(self),
        }
    }

    /// The innermost error, with operation annotations peeled off.
    pub fn root(&self) -> &IngestError {
        match self {
            IngestError::Operation { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.root(), IngestError::Cancelled)
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self.root(), IngestError::DuplicateLink { .. })
    }

    pub fn kind(&self) -> ErrorKind {
        match self.root() {
            IngestError::Http(err) => classify_http(err),
            IngestError::Status { status, .. } => classify_status(*status),
            IngestError::Parse(_) => ErrorKind::Validation,
            IngestError::Database(_) | IngestError::DuplicateLink { .. } => ErrorKind::Storage,
            IngestError::InvalidUrl(_) => ErrorKind::Network,
            IngestError::Analysis { .. } | IngestError::MissingCredential(_) => {
                ErrorKind::AnalysisService
            }
            IngestError::RateLimited(_) => ErrorKind::RateLimit,
            IngestError::Timeout(_) => ErrorKind::Timeout,
            IngestError::Cancelled => ErrorKind::Unknown,
            IngestError::General(message) => classify_message(message),
            IngestError::Operation { .. } => unreachable!("root() strips annotations"),
        }
    }

    /// Malformed input inside the network class: retrying cannot help.
    pub fn is_malformed_input(&self) -> bool {
        match self.root() {
            IngestError::InvalidUrl(_) => true,
            IngestError::Http(err) => {
                err.is_builder() || err.status().map(is_permanent_client_error).unwrap_or(false)
            }
            IngestError::Status { status, .. } => is_permanent_client_error(*status),
            IngestError::General(message) => contains_any(message, &["invalid url"]),
            _ => false,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self.kind() {
            ErrorKind::Network => !self.is_malformed_input(),
            ErrorKind::Storage => self.is_storage_transient(),
            ErrorKind::AnalysisService => self.is_analysis_transient(),
            ErrorKind::Timeout | ErrorKind::RateLimit => true,
            ErrorKind::Validation | ErrorKind::Unknown => false,
        }
    }

    fn is_storage_transient(&self) -> bool {
        match self.root() {
            IngestError::DuplicateLink { .. } => false,
            IngestError::Database(err) => match err {
                sqlx::Error::Database(db) => {
                    matches!(db.kind(), sqlx::error::ErrorKind::Other)
                        && (db
                            .code()
                            .map(|code| SQLITE_BUSY_CODES.contains(&code.as_ref()))
                            .unwrap_or(false)
                            || contains_any(db.message(), STORAGE_BUSY_FRAGMENTS))
                }
                sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut => true,
                _ => false,
            },
            IngestError::General(message) => contains_any(message, STORAGE_BUSY_FRAGMENTS),
            _ => false,
        }
    }

    fn is_analysis_transient(&self) -> bool {
        match self.root() {
            IngestError::Analysis { transient, .. } => *transient,
            IngestError::MissingCredential(_) => false,
            IngestError::General(message) => contains_any(message, TRANSIENT_ANALYSIS_FRAGMENTS),
            _ => false,
        }
    }
}

fn classify_http(err: &reqwest::Error) -> ErrorKind {
    if err.is_timeout() {
        return ErrorKind::Timeout;
    }
    match err.status() {
        Some(status) => classify_status(status.as_u16()),
        None => ErrorKind::Network,
    }
}

fn classify_status(status: u16) -> ErrorKind {
    match status {
        429 => ErrorKind::RateLimit,
        408 | 504 => ErrorKind::Timeout,
        _ => ErrorKind::Network,
    }
}

fn is_permanent_client_error(status: impl Into<u16>) -> bool {
    let status = status.into();
    (400..500).contains(&status) && status != 408 && status != 429
}

/// Fallback for opaque errors that carry nothing but text.
fn classify_message(message: &str) -> ErrorKind {
    if contains_any(message, VALIDATION_FRAGMENTS) {
        if contains_any(message, &["invalid url"]) {
            return ErrorKind::Network;
        }
        return ErrorKind::Validation;
    }
    if contains_any(message, RATE_LIMIT_FRAGMENTS) {
        return ErrorKind::RateLimit;
    }
    if contains_any(message, TIMEOUT_FRAGMENTS) {
        return ErrorKind::Timeout;
    }
    if contains_any(message, STORAGE_FRAGMENTS) {
        return ErrorKind::Storage;
    }
    if contains_any(message, ANALYSIS_FRAGMENTS) {
        return ErrorKind::AnalysisService;
    }
    if contains_any(message, NETWORK_FRAGMENTS) {
        return ErrorKind::Network;
    }
    ErrorKind::Unknown
}

fn contains_any(message: &str, fragments: &[&str]) -> bool {
    let lower = message.to_lowercase();
    fragments.iter().any(|fragment| lower.contains(fragment))
}

/// Human-readable explanation for the end of a run.
pub fn user_message(err: &IngestError) -> String {
    if err.is_cancelled() {
        return "Operation was cancelled before it could finish.".to_string();
    }

    match err.kind() {
        ErrorKind::Network => {
            if err.is_malformed_input() {
                match err.root() {
                    IngestError::Status { status, .. } => {
                        format!("The server rejected the request (HTTP {}). Please check the source URL.", status)
                    }
                    _ => "Invalid URL provided. Please check the URL format.".to_string(),
                }
            } else {
                "Network connection failed. Please check your internet connection and try again."
                    .to_string()
            }
        }
        ErrorKind::Storage => {
            if err.is_storage_transient() {
                "Database is temporarily busy. The operation will be retried automatically."
                    .to_string()
            } else {
                "Database error occurred. Please check file permissions and disk space."
                    .to_string()
            }
        }
        ErrorKind::AnalysisService => match err.root() {
            IngestError::MissingCredential(_) => {
                "AI API key is missing or invalid. Please set GEMINI_API_KEY environment variable."
                    .to_string()
            }
            IngestError::General(message) if contains_any(message, &["api key", "api_key"]) => {
                "AI API key is missing or invalid. Please set GEMINI_API_KEY environment variable."
                    .to_string()
            }
            _ => "AI processing failed. The item will be saved without analysis.".to_string(),
        },
        ErrorKind::Validation => {
            "Invalid input received. Please check the source configuration.".to_string()
        }
        ErrorKind::Timeout => {
            "Operation timed out. Please try again or check your network connection.".to_string()
        }
        ErrorKind::RateLimit => {
            "Rate limit exceeded. Please wait a moment before trying again.".to_string()
        }
        ErrorKind::Unknown => format!("An error occurred: {}", err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_annotation_keeps_classification() {
        let err = IngestError::Timeout(Duration::from_secs(1)).with_operation("fetch feed https://a");
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert!(err.is_retryable());
        assert_eq!(err.to_string(), "fetch feed https://a: Timed out after 1s");
    }

    #[test]
    fn invalid_url_is_network_but_never_retried() {
        let err = IngestError::InvalidUrl("ftp://example.com".into()).with_operation("extract");
        assert_eq!(err.kind(), ErrorKind::Network);
        assert!(err.is_malformed_input());
        assert!(!err.is_retryable());
        assert_eq!(user_message(&err), "Invalid URL provided. Please check the URL format.");
    }

    #[test]
    fn status_codes_map_to_classes() {
        let status = |code| IngestError::Status { status: code, url: "https://a".into() };

        assert_eq!(status(429).kind(), ErrorKind::RateLimit);
        assert!(status(429).is_retryable());
        assert_eq!(status(503).kind(), ErrorKind::Network);
        assert!(status(503).is_retryable());
        assert_eq!(status(408).kind(), ErrorKind::Timeout);
        assert!(!status(404).is_retryable());
    }

    #[test]
    fn duplicate_and_parse_errors_are_not_retried() {
        let dup = IngestError::DuplicateLink { link: "https://a".into() };
        assert_eq!(dup.kind(), ErrorKind::Storage);
        assert!(!dup.is_retryable());
        assert!(dup.with_operation("insert item").is_duplicate());

        let parse = IngestError::Parse("unexpected eof".into());
        assert_eq!(parse.kind(), ErrorKind::Validation);
        assert!(!parse.is_retryable());
    }

    #[test]
    fn analysis_errors_follow_transient_flag() {
        let transient = IngestError::Analysis { message: "503".into(), transient: true };
        let permanent = IngestError::Analysis { message: "bad json".into(), transient: false };
        let missing = IngestError::MissingCredential("GEMINI_API_KEY".into());

        assert!(transient.is_retryable());
        assert!(!permanent.is_retryable());
        assert!(!missing.is_retryable());
        assert!(user_message(&missing).contains("GEMINI_API_KEY"));
    }

    #[test]
    fn opaque_messages_fall_back_to_fragments() {
        let cases = [
            ("Database is locked", ErrorKind::Storage, true),
            ("SQL logic error", ErrorKind::Storage, false),
            ("Too Many Requests", ErrorKind::RateLimit, true),
            ("context deadline exceeded", ErrorKind::Timeout, true),
            ("dial tcp: connection refused", ErrorKind::Network, true),
            ("invalid URL escape", ErrorKind::Network, false),
            ("malformed payload", ErrorKind::Validation, false),
            ("gemini quota exceeded", ErrorKind::AnalysisService, true),
            ("something odd", ErrorKind::Unknown, false),
        ];

        for (message, kind, retryable) in cases {
            let err = IngestError::General(message.to_string());
            assert_eq!(err.kind(), kind, "{}", message);
            assert_eq!(err.is_retryable(), retryable, "{}", message);
        }
    }

    #[test]
    fn cancellation_is_terminal() {
        let err = IngestError::Cancelled.with_operation("fetch feed");
        assert!(err.is_cancelled());
        assert!(!err.is_retryable());
        assert!(user_message(&err).contains("cancelled"));
    }

    #[tokio::test]
    async fn reqwest_builder_error_is_malformed_input() {
        let err: IngestError = reqwest::Client::new()
            .get("not a url")
            .send()
            .await
            .unwrap_err()
            .into();

        assert_eq!(err.kind(), ErrorKind::Network);
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn refused_connection_is_retryable_network() {
        let err: IngestError = reqwest::Client::new()
            .get("http://127.0.0.1:1/feed.xml")
            .send()
            .await
            .unwrap_err()
            .into();

        assert_eq!(err.kind(), ErrorKind::Network);
        assert!(err.is_retryable());
        assert!(user_message(&err).starts_with("Network connection failed"));
    }
}
