use thiserror::Error;

#[derive(Error, Debug)]
pub enum GreenScoreError {
    #[error("Request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Redis error: {0}")]
    RedisError(#[from] redis::RedisError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse JSON: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("{service} returned {status}: {body}")]
    UpstreamError {
        service: String,
        status: u16,
        body: String,
    },

    #[error("{message}")]
    NoDataError { message: String },

    #[error("Overpass query failed: {message}")]
    OverpassError { message: String },

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Invalid value for {field} ({value}): {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Missing required configuration: {field}")]
    MissingConfigError { field: String },

    #[error("Validation error: {message}")]
    ValidationError { message: String },
}

impl GreenScoreError {
    pub fn no_data(message: impl Into<String>) -> Self {
        Self::NoDataError {
            message: message.into(),
        }
    }

    pub fn upstream(service: &str, status: reqwest::StatusCode, body: String) -> Self {
        Self::UpstreamError {
            service: service.to_string(),
            status: status.as_u16(),
            body,
        }
    }

    /// 上游暫時性錯誤，可重試
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::HttpError(e) => e.is_timeout() || e.is_connect(),
            Self::UpstreamError { status, .. } => *status == 429 || *status >= 500,
            Self::OverpassError { .. } => true,
            Self::RedisError(e) => e.is_timeout() || e.is_connection_dropped(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, GreenScoreError>;
