//! NDEF Well-Known Text records and the read/write transaction run against a
//! presented NFC tag, plus the PC/SC service that drives it.

pub mod apdu;
pub mod cards;
pub mod config;
pub mod error;
pub mod ndef;
pub mod nfc_service;
pub mod pcsc_tag;
pub mod tag;
pub mod text_record;
pub mod transaction;
pub mod types;
pub mod ws;

pub use error::{NdefError, TagError};
pub use tag::{MemoryTag, TagCapability, TagHandle, TagKind};
pub use transaction::{ReadOutcome, WriteReceipt, describe_tag, read, write};
