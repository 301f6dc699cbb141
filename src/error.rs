use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ClientError>;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Invalid client configuration: {0}")]
    Config(String),

    #[error("Error loading '{}': {message}", path.display())]
    CertificateLoad { path: PathBuf, message: String },

    #[error("TLS configuration rejected: {0}")]
    Tls(String),

    /// The server answered 404 for a single secret.
    #[error("deleted")]
    SecretDeleted,

    /// Names that would not address a single secret once placed in a path.
    #[error("invalid secret name '{name}'")]
    InvalidSecretName { name: String },

    #[error("bad response code (status={status}, msg='{message}')")]
    BadStatus { status: u16, message: String },

    #[error("Request error: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("duplicate filename detected: {filename} on secrets {first} and {second}")]
    DuplicateFilename {
        filename: String,
        first: String,
        second: String,
    },

    #[error("unable to get filename of secret '{name}': {reason}")]
    InvalidFilename { name: String, reason: String },

    #[error("error decoding retrieved secrets: {0}")]
    Decode(#[from] serde_json::Error),
}

impl ClientError {
    pub(crate) fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub(crate) fn certificate_load(path: impl Into<PathBuf>, message: impl ToString) -> Self {
        Self::CertificateLoad {
            path: path.into(),
            message: message.to_string(),
        }
    }

    /// True for the 404 condition on a single secret.
    pub fn is_deleted(&self) -> bool {
        matches!(self, Self::SecretDeleted)
    }

    /// True when the final observed status was in the server-error class.
    pub fn is_retryable_status(&self) -> bool {
        matches!(self, Self::BadStatus { status, .. } if *status >= 500)
    }
}
