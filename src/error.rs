//! Error types for bucketeer

use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Provider not initialized: {0}")]
    NotInitialized(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("{operation} timed out after {after:?}")]
    Timeout { operation: String, after: Duration },

    #[error("{operation} failed for {resource}: {message}")]
    Transport {
        operation: String,
        resource: String,
        code: Option<String>,
        message: String,
    },

    #[error("{operation} for {resource} did not reach a terminal state")]
    NotReady { operation: String, resource: String },

    #[error("Ambiguous result: {0}")]
    AmbiguousResult(String),

    #[error("Irrecoverable error: {0}")]
    Irrecoverable(String),

    #[error("Invalid bucket URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("failed to create bucket {bucket_url}: {source}")]
    BucketCreation {
        bucket_url: String,
        #[source]
        source: Box<Error>,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Error::Configuration(msg.into())
    }

    pub fn not_initialized(msg: impl Into<String>) -> Self {
        Error::NotInitialized(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Error::NotFound(msg.into())
    }

    pub fn transport(
        operation: impl Into<String>,
        resource: impl Into<String>,
        code: Option<String>,
        message: impl Into<String>,
    ) -> Self {
        Error::Transport {
            operation: operation.into(),
            resource: resource.into(),
            code,
            message: message.into(),
        }
    }

    pub fn not_ready(operation: impl Into<String>, resource: impl Into<String>) -> Self {
        Error::NotReady {
            operation: operation.into(),
            resource: resource.into(),
        }
    }

    pub fn invalid_url(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::InvalidUrl {
            url: url.into(),
            reason: reason.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    pub fn is_not_ready(&self) -> bool {
        matches!(self, Error::NotReady { .. })
    }

    /// Backend-reported error code, if the failure came from a remote service.
    pub fn code(&self) -> Option<&str> {
        match self {
            Error::Transport { code, .. } => code.as_deref(),
            Error::BucketCreation { source, .. } => source.code(),
            _ => None,
        }
    }
}
