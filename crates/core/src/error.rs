use thiserror::Error;

pub type CampaignResult<T> = Result<T, CampaignError>;

#[derive(Error, Debug)]
pub enum CampaignError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Campaign cache error: {0}")]
    Cache(String),

    #[error("Service error: {0}")]
    Service(#[from] ServiceError),

    #[error("In-app messaging is disabled for this client")]
    Disabled,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure categories of the remote services (campaign list, configuration,
/// display permission, impressions). Each category maps to its own retry
/// policy in the polling loops.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    #[error("invalid service configuration: {0}")]
    InvalidConfiguration(String),

    #[error("could not decode response: {0}")]
    Decoding(String),

    #[error("too many requests")]
    TooManyRequests,

    #[error("client error (status {0})")]
    ClientError(u16),

    #[error("server error (status {0})")]
    ServerError(u16),

    #[error("transport error: {0}")]
    Transport(String),
}

impl ServiceError {
    /// Maps a non-success HTTP status code to its error category.
    pub fn from_status(status: u16) -> Self {
        match status {
            429 => ServiceError::TooManyRequests,
            400..=499 => ServiceError::ClientError(status),
            500..=599 => ServiceError::ServerError(status),
            other => ServiceError::Transport(format!("unexpected status {other}")),
        }
    }

    /// Short label used in logs and metric labels.
    pub fn category(&self) -> &'static str {
        match self {
            ServiceError::InvalidConfiguration(_) => "invalid_configuration",
            ServiceError::Decoding(_) => "decoding",
            ServiceError::TooManyRequests => "too_many_requests",
            ServiceError::ClientError(_) => "client_error",
            ServiceError::ServerError(_) => "server_error",
            ServiceError::Transport(_) => "transport",
        }
    }
}
