// src/tag.rs
//! The tag handle a transaction drives, and what inspecting a tag reveals.

mod memory;

use std::fmt;

pub use memory::MemoryTag;

use crate::error::Result;
use crate::ndef::NdefMessage;

pub const TECH_NDEF: &str = "Ndef";
pub const TECH_NDEF_FORMATABLE: &str = "NdefFormatable";

/// Low-level session with one physical tag.
///
/// Every I/O call is bounded by the reader's own timeout and fails with
/// `TagError::ConnectionLost` once the tag leaves the field.
pub trait TagHandle {
    fn uid(&self) -> Vec<u8>;

    fn technologies(&self) -> Vec<String>;

    fn connect(&mut self) -> Result<()>;

    fn capabilities(&mut self) -> Result<TagCapability>;

    /// Message captured when the tag was discovered, if the platform keeps one.
    fn cached_message(&self) -> Option<NdefMessage> {
        None
    }

    fn read_message(&mut self) -> Result<Option<NdefMessage>>;

    fn write_message(&mut self, message: &NdefMessage) -> Result<()>;

    /// Initializes a blank tag with `message` in one operation.
    fn format_and_write(&mut self, message: &NdefMessage) -> Result<()>;

    /// Releases the session. Safe to call any number of times.
    fn close(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NdefInfo {
    pub max_size: usize,
    pub writable: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagKind {
    NdefCapable { max_size: usize, writable: bool },
    FormattableOnly,
    Unsupported,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagCapability {
    pub uid: Vec<u8>,
    pub technologies: Vec<String>,
    pub ndef: Option<NdefInfo>,
    pub formattable: bool,
}

impl TagCapability {
    /// Identity only, nothing known about NDEF support.
    pub fn bare(uid: Vec<u8>, technologies: Vec<String>) -> Self {
        Self {
            uid,
            technologies,
            ndef: None,
            formattable: false,
        }
    }

    pub fn kind(&self) -> TagKind {
        match (self.ndef, self.formattable) {
            (Some(info), _) => TagKind::NdefCapable {
                max_size: info.max_size,
                writable: info.writable,
            },
            (None, true) => TagKind::FormattableOnly,
            (None, false) => TagKind::Unsupported,
        }
    }

    pub fn ndef_max_size(&self) -> Option<usize> {
        self.ndef.map(|info| info.max_size)
    }

    pub fn is_writable(&self) -> Option<bool> {
        self.ndef.map(|info| info.writable)
    }

    pub fn uid_hex(&self) -> String {
        hex::encode_upper(&self.uid)
    }
}

impl fmt::Display for TagCapability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tag UID: {}\nTech: {}", self.uid_hex(), self.technologies.join(", "))?;
        if let Some(info) = self.ndef {
            write!(f, "\nNDEF size: {} bytes\nWritable: {}", info.max_size, info.writable)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capability(ndef: Option<NdefInfo>, formattable: bool) -> TagCapability {
        TagCapability {
            uid: vec![0x04, 0xA2, 0x1F],
            technologies: vec!["NfcA".into(), "MifareUltralight".into(), TECH_NDEF.into()],
            ndef,
            formattable,
        }
    }

    #[test]
    fn kind_prefers_ndef_over_formattable() {
        let info = NdefInfo {
            max_size: 137,
            writable: true,
        };
        assert_eq!(
            capability(Some(info), true).kind(),
            TagKind::NdefCapable {
                max_size: 137,
                writable: true
            }
        );
        assert_eq!(capability(None, true).kind(), TagKind::FormattableOnly);
        assert_eq!(capability(None, false).kind(), TagKind::Unsupported);
    }

    #[test]
    fn summary_lists_ndef_fields_when_known() {
        let info = NdefInfo {
            max_size: 137,
            writable: false,
        };
        assert_eq!(
            capability(Some(info), false).to_string(),
            "Tag UID: 04A21F\nTech: NfcA, MifareUltralight, Ndef\nNDEF size: 137 bytes\nWritable: false"
        );
    }

    #[test]
    fn summary_omits_unknown_ndef_fields() {
        let bare = TagCapability::bare(vec![0xDE, 0xAD], vec!["NfcA".into()]);
        assert_eq!(bare.to_string(), "Tag UID: DEAD\nTech: NfcA");
        assert_eq!(bare.ndef_max_size(), None);
        assert_eq!(bare.is_writable(), None);
    }
}
