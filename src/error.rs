// src/error.rs
use thiserror::Error;

/// Failures while decoding NDEF bytes or a text record payload.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NdefError {
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),
}

impl NdefError {
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedPayload(reason.into())
    }
}

/// Terminal failure of a tag transaction.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TagError {
    #[error("Connection to tag lost")]
    ConnectionLost,

    #[error("Tag is not writable")]
    NotWritable,

    #[error("Message too large for this tag ({required}B > {available}B)")]
    CapacityExceeded { required: usize, available: usize },

    #[error("Tag doesn't support NDEF")]
    UnsupportedTag,

    #[error(transparent)]
    Malformed(#[from] NdefError),
}

pub type Result<T, E = TagError> = std::result::Result<T, E>;
