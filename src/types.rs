// src/types.rs
#![allow(non_camel_case_types)]

use serde::{Deserialize, Serialize};

use crate::tag::TagCapability;

// Messages sent TO the WebSocket client (Frontend)
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum OutgoingMessage {
    READER_STATUS {
        success: bool,
    },
    CARD_STATUS {
        success: bool,
        message: String,
    },
    MODE_STATUS {
        mode: String,
        message: String,
    },
    DATA_READ_SUCCESS {
        data: String,
    },
    NO_NDEF_MESSAGE {
        message: String,
    },
    DATA_READ_ERROR {
        error: String,
    },
    DATA_WRITE_SUCCESS {
        message: String,
        bytes_written: usize,
        formatted: bool,
    },
    DATA_WRITE_ERROR {
        error: String,
    },
    TAG_INFO {
        uid: String,
        technologies: Vec<String>,
        ndef_max_size: Option<usize>,
        writable: Option<bool>,
        summary: String,
    },
    READER_ERROR {
        error: String,
    },
}

impl From<&TagCapability> for OutgoingMessage {
    fn from(capability: &TagCapability) -> Self {
        OutgoingMessage::TAG_INFO {
            uid: capability.uid_hex(),
            technologies: capability.technologies.clone(),
            ndef_max_size: capability.ndef_max_size(),
            writable: capability.is_writable(),
            summary: capability.to_string(),
        }
    }
}

// Messages received FROM the WebSocket client
#[derive(Deserialize, Debug, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum IncomingMessage {
    GET_READER_STATUS,
    WRITE_TEXT {
        text: String,
        #[serde(default)]
        language: Option<String>,
    },
    READ_TEXT,
    CANCEL,
}

/// What the next presented tag should be used for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    Read,
    Write { text: String, language: String },
}

/// One armed operation, consumed by the next tag presence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationRequest {
    pub mode: Mode,
}

impl OperationRequest {
    pub fn read() -> Self {
        Self { mode: Mode::Read }
    }

    pub fn write(text: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            mode: Mode::Write {
                text: text.into(),
                language: language.into(),
            },
        }
    }

    pub fn mode_name(&self) -> &'static str {
        match self.mode {
            Mode::Read => "READ",
            Mode::Write { .. } => "WRITE",
        }
    }
}

// Internal commands sent from WS Server -> NFC Thread
#[derive(Debug)]
pub enum NfcCommand {
    Arm(OperationRequest),
    Cancel,
    CheckReaderStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outgoing_messages_are_tagged_by_type() {
        let json = serde_json::to_value(OutgoingMessage::DATA_READ_SUCCESS {
            data: "Hello".into(),
        })
        .unwrap();
        assert_eq!(json, serde_json::json!({"type": "DATA_READ_SUCCESS", "data": "Hello"}));
    }

    #[test]
    fn write_request_language_is_optional() {
        let parsed: IncomingMessage =
            serde_json::from_str(r#"{"type":"WRITE_TEXT","text":"hi"}"#).unwrap();
        assert_eq!(
            parsed,
            IncomingMessage::WRITE_TEXT {
                text: "hi".into(),
                language: None
            }
        );

        let parsed: IncomingMessage =
            serde_json::from_str(r#"{"type":"WRITE_TEXT","text":"hi","language":"fr"}"#).unwrap();
        assert_eq!(
            parsed,
            IncomingMessage::WRITE_TEXT {
                text: "hi".into(),
                language: Some("fr".into())
            }
        );
    }

    #[test]
    fn unit_commands_parse() {
        let parsed: IncomingMessage = serde_json::from_str(r#"{"type":"READ_TEXT"}"#).unwrap();
        assert_eq!(parsed, IncomingMessage::READ_TEXT);
    }
}
