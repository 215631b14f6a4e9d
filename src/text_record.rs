// src/text_record.rs
//! Well-Known Text record payloads (NFC Forum RTD Text).
//!
//! Payload layout: `[status][language][text]`. Status bit 7 selects UTF-16,
//! bit 6 is reserved and bits 5-0 hold the language code length.

use crate::error::NdefError;

const STATUS_UTF16: u8 = 0x80;
const STATUS_LANG_MASK: u8 = 0x3F;

/// Longest language code the 6-bit length field can describe.
pub const MAX_LANGUAGE_LEN: usize = STATUS_LANG_MASK as usize;

pub const FALLBACK_LANGUAGE: &str = "en";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextEncoding {
    Utf8,
    Utf16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextRecord {
    pub language: String,
    pub text: String,
    pub encoding: TextEncoding,
}

impl TextRecord {
    pub fn new(text: impl Into<String>, language: &str) -> Self {
        Self {
            language: normalize_language(language),
            text: text.into(),
            encoding: TextEncoding::Utf8,
        }
    }

    pub fn utf16(text: impl Into<String>, language: &str) -> Self {
        Self {
            encoding: TextEncoding::Utf16,
            ..Self::new(text, language)
        }
    }

    pub fn to_payload(&self) -> Vec<u8> {
        let lang = self.language.as_bytes();
        let mut status = lang.len() as u8 & STATUS_LANG_MASK;

        let text_bytes = match self.encoding {
            TextEncoding::Utf8 => self.text.as_bytes().to_vec(),
            TextEncoding::Utf16 => {
                status |= STATUS_UTF16;
                self.text
                    .encode_utf16()
                    .flat_map(|unit| unit.to_be_bytes())
                    .collect()
            }
        };

        let mut payload = Vec::with_capacity(1 + lang.len() + text_bytes.len());
        payload.push(status);
        payload.extend_from_slice(lang);
        payload.extend_from_slice(&text_bytes);
        payload
    }
}

/// Language code as written to the tag: blank falls back to `en`, lowercased,
/// US-ASCII only and at most 63 bytes.
pub fn normalize_language(language: &str) -> String {
    if language.trim().is_empty() {
        return FALLBACK_LANGUAGE.to_string();
    }

    language
        .chars()
        .map(|c| if c.is_ascii() { c.to_ascii_lowercase() } else { '?' })
        .take(MAX_LANGUAGE_LEN)
        .collect()
}

/// Encodes `text` as a UTF-8 text record payload.
pub fn encode(text: &str, language: &str) -> Vec<u8> {
    TextRecord::new(text, language).to_payload()
}

/// Decodes the text of a text record payload.
pub fn decode(payload: &[u8]) -> Result<String, NdefError> {
    decode_record(payload).map(|record| record.text)
}

/// Decodes a text record payload, keeping its language and encoding.
pub fn decode_record(payload: &[u8]) -> Result<TextRecord, NdefError> {
    let Some(&status) = payload.first() else {
        return Ok(TextRecord {
            language: String::new(),
            text: String::new(),
            encoding: TextEncoding::Utf8,
        });
    };

    let lang_len = (status & STATUS_LANG_MASK) as usize;
    let text_start = 1 + lang_len;
    if text_start > payload.len() {
        return Err(NdefError::malformed(format!(
            "language code length {lang_len} exceeds payload of {} bytes",
            payload.len()
        )));
    }

    let language = String::from_utf8_lossy(&payload[1..text_start]).into_owned();
    let text_bytes = &payload[text_start..];

    let (encoding, text) = if status & STATUS_UTF16 != 0 {
        (TextEncoding::Utf16, decode_utf16(text_bytes)?)
    } else {
        let text = std::str::from_utf8(text_bytes)
            .map_err(|e| NdefError::malformed(format!("invalid UTF-8 text: {e}")))?;
        (TextEncoding::Utf8, text.to_string())
    };

    Ok(TextRecord {
        language,
        text,
        encoding,
    })
}

fn decode_utf16(bytes: &[u8]) -> Result<String, NdefError> {
    if bytes.len() % 2 != 0 {
        return Err(NdefError::malformed("UTF-16 text has an odd byte count"));
    }

    let (bytes, little_endian) = match bytes {
        [0xFE, 0xFF, rest @ ..] => (rest, false),
        [0xFF, 0xFE, rest @ ..] => (rest, true),
        _ => (bytes, false),
    };

    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| {
            let pair = [pair[0], pair[1]];
            if little_endian {
                u16::from_le_bytes(pair)
            } else {
                u16::from_be_bytes(pair)
            }
        })
        .collect();

    String::from_utf16(&units).map_err(|e| NdefError::malformed(format!("invalid UTF-16 text: {e}")))
}
