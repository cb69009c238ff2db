use thiserror::Error;

pub type Result<T> = std::result::Result<T, SchemaFlowError>;

#[derive(Error, Debug)]
pub enum SchemaFlowError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("schema subject '{0}' not found by registry")]
    SubjectNotFound(String),

    #[error("schema registry unavailable for subject '{subject}': {last_error}")]
    RegistryUnavailable { subject: String, last_error: String },

    #[error("invalid schema: {0}")]
    SchemaInvalid(String),

    #[error("encode failed: {0}")]
    EncodeFailure(String),

    #[error("wire format error: {0}")]
    WireFormat(String),

    #[error("subject resolution error: {0}")]
    SubjectResolution(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    #[error("operation timeout")]
    Timeout,

    #[error("message payload is not valid JSON: {0}")]
    InvalidPayload(String),
}

impl SchemaFlowError {
    /// Whether a registry fetch that failed with this error is worth
    /// retrying. Confirmed absence and malformed schemas never are.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SchemaFlowError::RegistryUnavailable { .. } | SchemaFlowError::Timeout
        )
    }
}
