use thiserror::Error;

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    /// Malformed inbound payload; dead-lettered, never retried
    #[error("decode error: {0}")]
    Decode(String),

    /// Payload fails the structural contract; dead-lettered, never retried
    #[error("schema validation error: {0}")]
    Schema(String),

    /// Circuit breaker is open for a downstream service; fails fast
    #[error("circuit open for '{0}'")]
    CircuitOpen(String),

    /// Transport-level failure talking to a downstream service
    #[error("call to {service} failed: {message}")]
    Call { service: String, message: String },

    /// Downstream service answered with a non-success HTTP status
    #[error("{service} returned status {status}")]
    Status { service: String, status: u16 },

    /// Publish to the outbound exchange failed after processing
    #[error("publish failed: {0}")]
    Publish(String),

    /// Broker connection/channel error
    #[error("broker error: {0}")]
    Broker(String),

    /// Configuration errors
    #[error("configuration error: {0}")]
    Configuration(String),

    /// IO errors
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl AppError {
    /// Metric outcome label for this error
    pub fn outcome(&self) -> String {
        match self {
            AppError::Decode(_) => "decode_error".to_string(),
            AppError::Schema(_) => "schema_error".to_string(),
            AppError::CircuitOpen(_) => "circuit_open".to_string(),
            AppError::Status { status, .. } => format!("error_{}", status),
            AppError::Call { .. } => "error".to_string(),
            AppError::Publish(_) => "publish_error".to_string(),
            AppError::Broker(_) => "broker_error".to_string(),
            AppError::Configuration(_) => "configuration_error".to_string(),
            AppError::Io(_) => "io_error".to_string(),
        }
    }
}

/// Conversion from serde_json::Error
impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Decode(err.to_string())
    }
}

/// Conversion from config::ConfigError
impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Configuration(err.to_string())
    }
}

/// Conversion from lapin::Error
impl From<lapin::Error> for AppError {
    fn from(err: lapin::Error) -> Self {
        AppError::Broker(err.to_string())
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_labels() {
        assert_eq!(
            AppError::Status {
                service: "preprocess".to_string(),
                status: 503
            }
            .outcome(),
            "error_503"
        );
        assert_eq!(
            AppError::Call {
                service: "generate".to_string(),
                message: "connection refused".to_string()
            }
            .outcome(),
            "error"
        );
        assert_eq!(
            AppError::CircuitOpen("generate".to_string()).outcome(),
            "circuit_open"
        );
    }

    #[test]
    fn test_error_display() {
        let err = AppError::CircuitOpen("preprocess".to_string());
        assert_eq!(err.to_string(), "circuit open for 'preprocess'");

        let err = AppError::Schema("'id' is a required property".to_string());
        assert!(err.to_string().starts_with("schema validation error"));
    }
}
