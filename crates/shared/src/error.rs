use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classification of a failed backend call. `Copy` so it can travel inside
/// published outcomes without dragging the transport error along.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "status", rename_all = "snake_case")]
pub enum ErrorKind {
    Transport,
    Http(u16),
    Credential,
    Decode,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
    pub kind: ErrorKind,
    pub message: String,
}

impl ApiError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
#[error("credential unavailable: {message}")]
pub struct CredentialError {
    pub message: String,
}

impl CredentialError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<CredentialError> for ApiError {
    fn from(value: CredentialError) -> Self {
        Self {
            kind: ErrorKind::Credential,
            message: value.message,
        }
    }
}
