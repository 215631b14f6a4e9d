// src/tag/memory.rs
use super::{NdefInfo, TECH_NDEF, TECH_NDEF_FORMATABLE, TagCapability, TagHandle};
use crate::error::{Result, TagError};
use crate::ndef::NdefMessage;

/// Tag emulated in memory, for dry runs and tests.
///
/// Counts calls into the write paths so callers can assert which one a
/// transaction took.
#[derive(Debug, Clone)]
pub struct MemoryTag {
    uid: Vec<u8>,
    ndef: Option<NdefInfo>,
    formattable: bool,
    format_capacity: usize,
    memory: Option<Vec<u8>>,
    cached: Option<NdefMessage>,
    in_field: bool,
    drop_on_write: bool,
    connected: bool,
    pub connect_calls: usize,
    pub read_calls: usize,
    pub write_calls: usize,
    pub format_calls: usize,
    pub close_calls: usize,
}

impl MemoryTag {
    /// NDEF-formatted, writable and empty.
    pub fn ndef(max_size: usize) -> Self {
        Self {
            uid: vec![0x04, 0x5A, 0x3C, 0x12, 0x9B, 0x61, 0x80],
            ndef: Some(NdefInfo {
                max_size,
                writable: true,
            }),
            formattable: false,
            format_capacity: max_size,
            memory: None,
            cached: None,
            in_field: true,
            drop_on_write: false,
            connected: false,
            connect_calls: 0,
            read_calls: 0,
            write_calls: 0,
            format_calls: 0,
            close_calls: 0,
        }
    }

    /// Blank tag that becomes NDEF-capable with `capacity` bytes once formatted.
    pub fn blank(capacity: usize) -> Self {
        Self {
            ndef: None,
            formattable: true,
            ..Self::ndef(capacity)
        }
    }

    pub fn unsupported() -> Self {
        Self {
            ndef: None,
            formattable: false,
            ..Self::ndef(0)
        }
    }

    pub fn read_only(mut self) -> Self {
        if let Some(info) = self.ndef.as_mut() {
            info.writable = false;
        }
        self
    }

    pub fn with_message(mut self, message: &NdefMessage) -> Self {
        self.memory = Some(message.to_bytes());
        self
    }

    /// Stores raw bytes as the message area, for corrupt-content cases.
    pub fn with_raw_memory(mut self, bytes: Vec<u8>) -> Self {
        self.memory = Some(bytes);
        self
    }

    pub fn with_cached(mut self, message: NdefMessage) -> Self {
        self.cached = Some(message);
        self
    }

    pub fn out_of_field(mut self) -> Self {
        self.in_field = false;
        self
    }

    /// The tag leaves the field as soon as a write reaches it.
    pub fn drop_on_write(mut self) -> Self {
        self.drop_on_write = true;
        self
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn stored_message(&self) -> Option<NdefMessage> {
        self.memory
            .as_deref()
            .and_then(|bytes| NdefMessage::parse(bytes).ok())
    }

    fn ensure_session(&self) -> Result<()> {
        if self.in_field && self.connected {
            Ok(())
        } else {
            Err(TagError::ConnectionLost)
        }
    }

    fn store(&mut self, message: &NdefMessage) -> Result<()> {
        if self.drop_on_write {
            self.in_field = false;
            self.connected = false;
            return Err(TagError::ConnectionLost);
        }
        self.memory = Some(message.to_bytes());
        self.cached = None;
        Ok(())
    }
}

impl TagHandle for MemoryTag {
    fn uid(&self) -> Vec<u8> {
        self.uid.clone()
    }

    fn technologies(&self) -> Vec<String> {
        let mut techs = vec!["NfcA".to_string(), "MifareUltralight".to_string()];
        if self.ndef.is_some() {
            techs.push(TECH_NDEF.to_string());
        } else if self.formattable {
            techs.push(TECH_NDEF_FORMATABLE.to_string());
        }
        techs
    }

    fn connect(&mut self) -> Result<()> {
        self.connect_calls += 1;
        if !self.in_field {
            return Err(TagError::ConnectionLost);
        }
        self.connected = true;
        Ok(())
    }

    fn capabilities(&mut self) -> Result<TagCapability> {
        self.ensure_session()?;
        Ok(TagCapability {
            uid: self.uid(),
            technologies: self.technologies(),
            ndef: self.ndef,
            formattable: self.formattable,
        })
    }

    fn cached_message(&self) -> Option<NdefMessage> {
        self.cached.clone()
    }

    fn read_message(&mut self) -> Result<Option<NdefMessage>> {
        self.ensure_session()?;
        self.read_calls += 1;
        match &self.memory {
            Some(bytes) => Ok(Some(NdefMessage::parse(bytes)?)),
            None => Ok(None),
        }
    }

    fn write_message(&mut self, message: &NdefMessage) -> Result<()> {
        self.ensure_session()?;
        self.write_calls += 1;

        let info = self.ndef.ok_or(TagError::UnsupportedTag)?;
        if !info.writable {
            return Err(TagError::NotWritable);
        }
        if message.byte_len() > info.max_size {
            return Err(TagError::CapacityExceeded {
                required: message.byte_len(),
                available: info.max_size,
            });
        }
        self.store(message)
    }

    fn format_and_write(&mut self, message: &NdefMessage) -> Result<()> {
        self.ensure_session()?;
        self.format_calls += 1;

        if !self.formattable {
            return Err(TagError::UnsupportedTag);
        }
        if message.byte_len() > self.format_capacity {
            return Err(TagError::CapacityExceeded {
                required: message.byte_len(),
                available: self.format_capacity,
            });
        }
        self.store(message)?;
        self.formattable = false;
        self.ndef = Some(NdefInfo {
            max_size: self.format_capacity,
            writable: true,
        });
        Ok(())
    }

    fn close(&mut self) {
        self.close_calls += 1;
        self.connected = false;
    }
}
