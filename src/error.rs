// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error types.
//!
//! Cache operations never surface these to request paths: the service turns
//! them into misses, `false` results and `error` events. They appear only at
//! construction time (bad configuration, unusable Redis URL) and inside the
//! remote tier, where [`StorageError::is_connection_error`] decides whether a
//! failure should trigger reconnection.

use thiserror::Error;

use crate::compression::CompressionError;

/// Failure of a remote backend operation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// Transport-level failure (refused, reset, dropped).
    #[error("connection error: {0}")]
    Connection(String),

    /// The command did not complete within the configured timeout.
    #[error("operation '{0}' timed out")]
    Timeout(String),

    /// The client is not connected; no network I/O was attempted.
    #[error("remote store not ready")]
    NotReady,

    /// The backend answered with an error.
    #[error("storage backend error: {0}")]
    Backend(String),

    /// Payload could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl StorageError {
    /// Whether this error means the connection itself is unusable.
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Timeout(_))
    }

    /// Short label used for metrics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connection(_) => "connection",
            Self::Timeout(_) => "timeout",
            Self::NotReady => "not_ready",
            Self::Backend(_) => "backend",
            Self::Serialization(_) => "serialization",
        }
    }
}

impl From<redis::RedisError> for StorageError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else if err.is_io_error() || err.is_connection_dropped() || err.is_connection_refusal() {
            Self::Connection(err.to_string())
        } else {
            Self::Backend(err.to_string())
        }
    }
}

/// Failure to encode or decode a stored entry.
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Compression(#[from] CompressionError),
}

impl From<CodecError> for StorageError {
    fn from(err: CodecError) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// A single offending configuration field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    /// Dotted path of the field, e.g. `redis.port`.
    pub field: String,
    /// Human-readable reason.
    pub message: String,
}

impl std::fmt::Display for FieldError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Configuration could not be loaded or is invalid.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Sources could not be read or deserialized.
    #[error("failed to load cache configuration: {0}")]
    Load(String),

    /// One or more fields failed validation.
    #[error("invalid cache configuration ({} field(s)): {}", .errors.len(), format_field_errors(.errors))]
    Invalid { errors: Vec<FieldError> },
}

impl ConfigError {
    /// The offending fields, empty for load failures.
    #[must_use]
    pub fn field_errors(&self) -> &[FieldError] {
        match self {
            Self::Invalid { errors } => errors,
            Self::Load(_) => &[],
        }
    }
}

fn format_field_errors(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Load(err.to_string())
    }
}

/// Errors raised while assembling a [`crate::CacheService`].
#[derive(Error, Debug)]
pub enum CacheError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("remote store setup failed: {0}")]
    Remote(#[from] StorageError),
}
