use shared::error::{ApiError, CredentialError, ErrorKind};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("transport failure: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("unexpected status code: {status}")]
    Http { status: u16 },
    #[error(transparent)]
    Credential(#[from] CredentialError),
    #[error("response body did not match the expected shape: {0}")]
    Decode(#[from] serde_json::Error),
}

impl SessionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Transport(_) => ErrorKind::Transport,
            Self::Http { status } => ErrorKind::Http(*status),
            Self::Credential(_) => ErrorKind::Credential,
            Self::Decode(_) => ErrorKind::Decode,
        }
    }
}

impl From<&SessionError> for ApiError {
    fn from(value: &SessionError) -> Self {
        ApiError::new(value.kind(), value.to_string())
    }
}
