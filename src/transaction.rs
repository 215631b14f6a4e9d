// src/transaction.rs
//! One read or write against a presented tag: connect, verify, operate, close.

use log::{debug, info, warn};

use crate::error::{Result, TagError};
use crate::ndef::{NdefMessage, NdefRecord};
use crate::tag::{TagCapability, TagHandle, TagKind};
use crate::text_record;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionState {
    Idle,
    Connecting,
    Verifying,
    Writing,
    Reading,
    Closing,
    Done,
    Failed(TagError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteReceipt {
    pub bytes_written: usize,
    /// The tag was blank and got formatted as part of the write.
    pub formatted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    Text(String),
    NoNdefMessage,
}

pub struct Transaction<'a, T: TagHandle + ?Sized> {
    tag: &'a mut T,
    state: TransactionState,
}

impl<'a, T: TagHandle + ?Sized> Transaction<'a, T> {
    pub fn new(tag: &'a mut T) -> Self {
        Self {
            tag,
            state: TransactionState::Idle,
        }
    }

    pub fn state(&self) -> &TransactionState {
        &self.state
    }

    pub fn write(&mut self, text: &str, language: &str) -> Result<WriteReceipt> {
        let result = self.try_write(text, language);
        self.finish(result)
    }

    pub fn read(&mut self) -> Result<ReadOutcome> {
        let result = self.try_read();
        let message = self.finish(result)?;
        Ok(message.map_or(ReadOutcome::NoNdefMessage, |m| collect_text(&m)))
    }

    fn transition(&mut self, next: TransactionState) {
        debug!("Tag transaction: {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    fn connect(&mut self) -> Result<TagCapability> {
        self.transition(TransactionState::Connecting);
        self.tag.connect()?;
        self.transition(TransactionState::Verifying);
        self.tag.capabilities()
    }

    fn try_write(&mut self, text: &str, language: &str) -> Result<WriteReceipt> {
        let capability = self.connect()?;
        let message = NdefMessage::single(NdefRecord::text(text, language));
        let required = message.byte_len();

        match capability.kind() {
            TagKind::NdefCapable { max_size, writable } => {
                if !writable {
                    return Err(TagError::NotWritable);
                }
                if required > max_size {
                    return Err(TagError::CapacityExceeded {
                        required,
                        available: max_size,
                    });
                }

                self.transition(TransactionState::Writing);
                // plain write only, the tag is never locked
                self.tag.write_message(&message)?;
                Ok(WriteReceipt {
                    bytes_written: required,
                    formatted: false,
                })
            }
            TagKind::FormattableOnly => {
                self.transition(TransactionState::Writing);
                self.tag.format_and_write(&message)?;
                Ok(WriteReceipt {
                    bytes_written: required,
                    formatted: true,
                })
            }
            TagKind::Unsupported => Err(TagError::UnsupportedTag),
        }
    }

    fn try_read(&mut self) -> Result<Option<NdefMessage>> {
        let capability = self.connect()?;
        if capability.ndef.is_none() {
            return Ok(None);
        }

        self.transition(TransactionState::Reading);
        match self.tag.cached_message() {
            Some(message) => Ok(Some(message)),
            None => self.tag.read_message(),
        }
    }

    fn finish<R>(&mut self, result: Result<R>) -> Result<R> {
        if let Err(err) = &result {
            self.transition(TransactionState::Failed(err.clone()));
        }

        self.transition(TransactionState::Closing);
        self.tag.close();

        match result {
            Ok(value) => {
                self.transition(TransactionState::Done);
                Ok(value)
            }
            Err(err) => {
                self.transition(TransactionState::Failed(err.clone()));
                Err(err)
            }
        }
    }
}

/// Writes `text` as a single Well-Known Text record.
pub fn write<T: TagHandle + ?Sized>(tag: &mut T, text: &str, language: &str) -> Result<WriteReceipt> {
    let receipt = Transaction::new(tag).write(text, language)?;
    info!(
        "Wrote {} bytes{}",
        receipt.bytes_written,
        if receipt.formatted { " after formatting" } else { "" }
    );
    Ok(receipt)
}

/// Reads every Well-Known Text record on the tag, joined by newlines.
pub fn read<T: TagHandle + ?Sized>(tag: &mut T) -> Result<ReadOutcome> {
    Transaction::new(tag).read()
}

/// Summarizes the tag. A failed capability query drops the NDEF fields instead of erroring.
pub fn describe_tag<T: TagHandle + ?Sized>(tag: &mut T) -> TagCapability {
    let inspected = tag.connect().and_then(|_| tag.capabilities());
    tag.close();

    inspected.unwrap_or_else(|err| {
        debug!("Tag inspection failed: {}", err);
        TagCapability::bare(tag.uid(), tag.technologies())
    })
}

// Records that fail to decode are skipped so the rest of the message still shows.
fn collect_text(message: &NdefMessage) -> ReadOutcome {
    let texts: Vec<String> = message
        .text_records()
        .enumerate()
        .filter_map(|(i, record)| match text_record::decode(&record.payload) {
            Ok(text) => Some(text),
            Err(err) => {
                warn!("Skipping text record {}: {}", i, err);
                None
            }
        })
        .collect();

    if texts.is_empty() {
        ReadOutcome::NoNdefMessage
    } else {
        ReadOutcome::Text(texts.join("\n"))
    }
}
