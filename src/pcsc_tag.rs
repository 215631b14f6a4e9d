// src/pcsc_tag.rs
use std::ffi::{CStr, CString};

use log::{debug, warn};
use pcsc::{Card, Context, Disposition, Protocols, ShareMode};

use crate::apdu::{self, ApduError};
use crate::cards::{self, BLANK_NTAG_CC, CapabilityContainer, CardFamily, MIFARE_DATA_AREA};
use crate::error::{Result, TagError};
use crate::ndef::{self, NdefMessage};
use crate::tag::{NdefInfo, TECH_NDEF, TECH_NDEF_FORMATABLE, TagCapability, TagHandle};

/// Tag presented to a PC/SC reader.
pub struct PcscTag<'a> {
    ctx: &'a Context,
    reader: CString,
    card: Option<Card>,
    family: CardFamily,
    uid: Vec<u8>,
    ndef_tech: Option<&'static str>,
}

impl<'a> PcscTag<'a> {
    pub fn new(ctx: &'a Context, reader: &CStr) -> Self {
        Self {
            ctx,
            reader: reader.to_owned(),
            card: None,
            family: CardFamily::Ntag,
            uid: Vec::new(),
            ndef_tech: None,
        }
    }

    pub fn family(&self) -> CardFamily {
        self.family
    }

    fn card(&self) -> Result<&Card> {
        self.card.as_ref().ok_or(TagError::ConnectionLost)
    }

    fn inspect(&self) -> Result<TagCapability> {
        let card = self.card()?;
        let (ndef, formattable) = match self.family {
            CardFamily::Ntag => match cards::read_ntag_cc(card).map_err(read_error)? {
                CapabilityContainer::Ndef {
                    data_area,
                    writable,
                } => (
                    Some(NdefInfo {
                        max_size: cards::message_capacity(cards::ntag_data_area(data_area)),
                        writable,
                    }),
                    false,
                ),
                CapabilityContainer::Blank => (None, true),
                CapabilityContainer::Foreign => (None, false),
            },
            CardFamily::MifareClassic1k => match cards::read_mifare(card).map_err(read_error)? {
                Some(data) if ndef::unwrap_tlv(&data).is_ok_and(|m| m.is_some()) => (
                    Some(NdefInfo {
                        max_size: cards::message_capacity(MIFARE_DATA_AREA),
                        writable: true,
                    }),
                    false,
                ),
                Some(_) => (None, true),
                None => (None, false),
            },
        };

        Ok(TagCapability {
            uid: self.uid.clone(),
            technologies: Vec::new(),
            ndef,
            formattable,
        })
    }

    fn read_area(&self) -> Result<Option<Vec<u8>>> {
        let card = self.card()?;
        match self.family {
            CardFamily::Ntag => match cards::read_ntag_cc(card).map_err(read_error)? {
                CapabilityContainer::Ndef { data_area, .. } => {
                    cards::read_ntag(card, cards::ntag_data_area(data_area))
                        .map(Some)
                        .map_err(read_error)
                }
                _ => Ok(None),
            },
            CardFamily::MifareClassic1k => cards::read_mifare(card).map_err(read_error),
        }
    }

    // `data_area` is the NTAG area declared by the CC; MIFARE has a fixed layout.
    fn write_tlv(&self, message: &NdefMessage, data_area: usize) -> Result<()> {
        let card = self.card()?;
        let tlv = ndef::wrap_in_tlv(&message.to_bytes());
        match self.family {
            CardFamily::Ntag => cards::write_ntag(card, &tlv, data_area),
            CardFamily::MifareClassic1k => cards::write_mifare(card, &tlv),
        }
        .map_err(write_error)
    }

    fn current_data_area(&self) -> Result<usize> {
        match self.family {
            CardFamily::Ntag => match cards::read_ntag_cc(self.card()?).map_err(read_error)? {
                CapabilityContainer::Ndef { data_area, .. } => Ok(data_area),
                _ => Err(TagError::UnsupportedTag),
            },
            CardFamily::MifareClassic1k => Ok(MIFARE_DATA_AREA),
        }
    }
}

fn read_error(err: ApduError) -> TagError {
    warn!("Tag read failed: {}", err);
    TagError::ConnectionLost
}

// A rejected status word on write means the memory is locked
fn write_error(err: ApduError) -> TagError {
    warn!("Tag write failed: {}", err);
    match err {
        ApduError::Transmit(_) => TagError::ConnectionLost,
        ApduError::Status { .. } => TagError::NotWritable,
        ApduError::DataAreaExceeded {
            required,
            available,
        } => TagError::CapacityExceeded {
            required,
            available,
        },
    }
}

impl TagHandle for PcscTag<'_> {
    fn uid(&self) -> Vec<u8> {
        self.uid.clone()
    }

    fn technologies(&self) -> Vec<String> {
        self.family
            .technologies()
            .iter()
            .copied()
            .chain(self.ndef_tech)
            .map(str::to_string)
            .collect()
    }

    fn connect(&mut self) -> Result<()> {
        let card = self
            .ctx
            .connect(&self.reader, ShareMode::Shared, Protocols::ANY)
            .map_err(|e| {
                warn!("Failed to connect to card on {:?}: {}", self.reader, e);
                TagError::ConnectionLost
            })?;

        let mut names_buf = [0u8; 128];
        let mut atr_buf = [0u8; 64];
        self.family = match card.status2(&mut names_buf, &mut atr_buf) {
            Ok(status) => CardFamily::from_atr(status.atr()),
            Err(e) => {
                warn!("Card status unavailable ({}), assuming NTAG", e);
                CardFamily::Ntag
            }
        };
        self.uid = apdu::get_uid(&card).unwrap_or_else(|e| {
            debug!("UID unavailable: {}", e);
            Vec::new()
        });

        debug!("Connected to {:?} card {}", self.family, hex::encode_upper(&self.uid));
        self.card = Some(card);
        Ok(())
    }

    fn capabilities(&mut self) -> Result<TagCapability> {
        let mut capability = self.inspect()?;
        self.ndef_tech = match (capability.ndef, capability.formattable) {
            (Some(_), _) => Some(TECH_NDEF),
            (None, true) => Some(TECH_NDEF_FORMATABLE),
            (None, false) => None,
        };
        capability.technologies = self.technologies();
        Ok(capability)
    }

    fn read_message(&mut self) -> Result<Option<NdefMessage>> {
        let Some(area) = self.read_area()? else {
            return Ok(None);
        };
        match ndef::unwrap_tlv(&area)? {
            Some(bytes) => Ok(Some(NdefMessage::parse(bytes)?)),
            None => Ok(None),
        }
    }

    fn write_message(&mut self, message: &NdefMessage) -> Result<()> {
        let data_area = self.current_data_area()?;
        self.write_tlv(message, data_area)
    }

    fn format_and_write(&mut self, message: &NdefMessage) -> Result<()> {
        // Checked before the CC goes out so an oversize message leaves the tag blank
        let data_area = self.family.blank_data_area();
        let available = cards::message_capacity(data_area);
        if message.byte_len() > available {
            return Err(TagError::CapacityExceeded {
                required: message.byte_len(),
                available,
            });
        }

        if self.family == CardFamily::Ntag {
            cards::write_ntag_cc(self.card()?, &BLANK_NTAG_CC).map_err(write_error)?;
        }
        self.write_tlv(message, data_area)
    }

    fn close(&mut self) {
        if let Some(card) = self.card.take() {
            if let Err((_, e)) = card.disconnect(Disposition::LeaveCard) {
                warn!("Failed to disconnect card: {}", e);
            }
        }
    }
}

impl Drop for PcscTag<'_> {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overflowing_write_maps_to_capacity_error() {
        let err = write_error(ApduError::DataAreaExceeded {
            required: 210,
            available: 144,
        });
        assert_eq!(
            err,
            TagError::CapacityExceeded {
                required: 210,
                available: 144
            }
        );
    }

    #[test]
    fn rejected_write_means_locked_memory() {
        assert_eq!(
            write_error(ApduError::Status { sw1: 0x63, sw2: 0x00 }),
            TagError::NotWritable
        );
    }
}
