// src/cards.rs
//! Memory layout of the supported card families.

use crate::apdu::{self, ApduError, KEY_TYPE_A, KEY_TYPE_B};
use crate::ndef;
use log::warn;
use pcsc::Card;

// Last ATR byte as reported by the ACR122U
const ATR_MIFARE_CLASSIC_1K: u8 = 0x6a;

// Type 2 tags: capability container on page 3, user memory from page 4
const NTAG_CC_PAGE: u8 = 3;
const NTAG_FIRST_DATA_PAGE: u8 = 4;
const NTAG_PAGE_SIZE: usize = 4;
const CC_NDEF_MAGIC: u8 = 0xE1;
const CC_VERSION_1_0: u8 = 0x10;

/// CC written when formatting a blank Type 2 tag: 0x12 * 8 = 144 bytes,
/// the NTAG213 user area, so it never over-reports on larger parts.
pub const BLANK_NTAG_CC: [u8; 4] = [CC_NDEF_MAGIC, CC_VERSION_1_0, 0x12, 0x00];
const BLANK_NTAG_DATA_AREA: usize = 0x12 * 8;

/// Pages 4-255, the most a one-byte page address reaches.
pub const NTAG_MAX_DATA_AREA: usize = (256 - NTAG_FIRST_DATA_PAGE as usize) * NTAG_PAGE_SIZE;

// MIFARE Classic 1K: sectors 1-15, three data blocks of 16 bytes each
const MIFARE_BLOCK_SIZE: usize = 16;
pub const MIFARE_DATA_AREA: usize = 15 * 3 * MIFARE_BLOCK_SIZE;

// Keys from the JS file
pub const COMMON_KEYS: [[u8; 6]; 8] = [
    [0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF],
    [0xA0, 0xA1, 0xA2, 0xA3, 0xA4, 0xA5],
    [0xD3, 0xF7, 0xD3, 0xF7, 0xD3, 0xF7],
    [0x00, 0x00, 0x00, 0x00, 0x00, 0x00],
    [0xB0, 0xB1, 0xB2, 0xB3, 0xB4, 0xB5],
    [0x4D, 0x3A, 0x99, 0xC3, 0x51, 0xDD],
    [0x1A, 0x98, 0x2C, 0x7E, 0x45, 0x9A],
    [0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF],
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardFamily {
    MifareClassic1k,
    /// NTAG21x / Ultralight, NFC Forum Type 2
    Ntag,
}

impl CardFamily {
    pub fn from_atr(atr: &[u8]) -> Self {
        match atr.last() {
            Some(&ATR_MIFARE_CLASSIC_1K) => CardFamily::MifareClassic1k,
            _ => CardFamily::Ntag,
        }
    }

    pub fn technologies(&self) -> &'static [&'static str] {
        match self {
            CardFamily::MifareClassic1k => &["NfcA", "MifareClassic"],
            CardFamily::Ntag => &["NfcA", "MifareUltralight"],
        }
    }

    /// Data area available once a blank card of this family is formatted.
    pub fn blank_data_area(&self) -> usize {
        match self {
            CardFamily::MifareClassic1k => MIFARE_DATA_AREA,
            CardFamily::Ntag => BLANK_NTAG_DATA_AREA,
        }
    }
}

/// Usable part of a Type 2 data area declared by the CC.
pub fn ntag_data_area(declared: usize) -> usize {
    declared.min(NTAG_MAX_DATA_AREA)
}

/// Largest NDEF message a data area of `area` bytes holds.
pub fn message_capacity(area: usize) -> usize {
    ndef::tlv_capacity(area)
}

/// Rejects `len` bytes of TLV data that would not fit in `area`.
pub fn ensure_fits(len: usize, area: usize) -> Result<(), ApduError> {
    if len > area {
        return Err(ApduError::DataAreaExceeded {
            required: len,
            available: area,
        });
    }
    Ok(())
}

/// Type 2 capability container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapabilityContainer {
    Ndef { data_area: usize, writable: bool },
    Blank,
    Foreign,
}

impl CapabilityContainer {
    pub fn parse(cc: &[u8]) -> Self {
        match cc {
            [CC_NDEF_MAGIC, _, size, access, ..] => CapabilityContainer::Ndef {
                data_area: *size as usize * 8,
                // high nibble of the access byte: 0x0 grants write access
                writable: access & 0xF0 == 0,
            },
            [0, 0, 0, 0, ..] => CapabilityContainer::Blank,
            _ => CapabilityContainer::Foreign,
        }
    }
}

pub fn read_ntag_cc(card: &Card) -> Result<CapabilityContainer, ApduError> {
    let cc = apdu::read_binary(card, NTAG_CC_PAGE, NTAG_PAGE_SIZE as u8)?;
    Ok(CapabilityContainer::parse(&cc))
}

pub fn write_ntag_cc(card: &Card, cc: &[u8; 4]) -> Result<(), ApduError> {
    apdu::update_binary(card, NTAG_CC_PAGE, cc)
}

/// Reads `data_area` bytes of user memory starting at page 4.
pub fn read_ntag(card: &Card, data_area: usize) -> Result<Vec<u8>, ApduError> {
    let mut data = Vec::with_capacity(data_area);
    let mut page = NTAG_FIRST_DATA_PAGE as usize;

    while data.len() < data_area {
        // 16 byte reads cover four pages; fall back to single pages near the end
        let len = if data_area - data.len() >= 16 {
            16
        } else {
            NTAG_PAGE_SIZE
        };
        let Ok(page_no) = u8::try_from(page) else {
            break;
        };

        let chunk = apdu::read_binary(card, page_no, len as u8)?;
        if chunk.is_empty() {
            break;
        }
        data.extend_from_slice(&chunk);
        page += len / NTAG_PAGE_SIZE;
    }

    data.truncate(data_area);
    Ok(data)
}

/// Writes `data` from page 4 on. Nothing is written unless all of it fits `data_area`.
pub fn write_ntag(card: &Card, data: &[u8], data_area: usize) -> Result<(), ApduError> {
    ensure_fits(data.len(), ntag_data_area(data_area))?;

    // NTAG writes 4 bytes (1 page) at a time
    for (i, chunk) in data.chunks(NTAG_PAGE_SIZE).enumerate() {
        let current_page = u8::try_from(i)
            .ok()
            .and_then(|i| NTAG_FIRST_DATA_PAGE.checked_add(i))
            .ok_or(ApduError::DataAreaExceeded {
                required: data.len(),
                available: NTAG_MAX_DATA_AREA,
            })?;

        let mut page = [0u8; NTAG_PAGE_SIZE];
        page[..chunk.len()].copy_from_slice(chunk);
        apdu::update_binary(card, current_page, &page)?;
    }
    Ok(())
}

pub fn mifare_data_blocks() -> Vec<u8> {
    let mut blocks = Vec::new();
    // Sector 0 is usually read-only manufacturer data, so we start at Sector 1
    for sector in 1..16 {
        for block_in_sector in 0..3 {
            // 0, 1, 2 are data. 3 is the Trailer.
            blocks.push((sector * 4) + block_in_sector);
        }
    }
    blocks
}

// Tries every common key against the sector holding `block`.
fn authenticate_sector(card: &Card, block: u8, key_types: &[u8]) -> Result<(), ApduError> {
    let mut last_err = ApduError::Status { sw1: 0x63, sw2: 0x00 };

    for key in COMMON_KEYS.iter() {
        if let Err(e) = apdu::load_key(card, key) {
            last_err = e;
            continue;
        }
        for &key_type in key_types {
            match apdu::authenticate(card, block, key_type) {
                Ok(()) => return Ok(()),
                Err(e) => last_err = e,
            }
        }
    }
    Err(last_err)
}

/// Reads the data blocks of sectors 1-15. `None` if sector 1 refuses every key.
pub fn read_mifare(card: &Card) -> Result<Option<Vec<u8>>, ApduError> {
    let mut full_data = Vec::with_capacity(MIFARE_DATA_AREA);

    for block in mifare_data_blocks() {
        // We must authenticate at the start of every sector (blocks 4, 8, 12, etc.)
        if block % 4 == 0 {
            match authenticate_sector(card, block, &[KEY_TYPE_A, KEY_TYPE_B]) {
                Ok(()) => {}
                Err(ApduError::Status { .. }) if full_data.is_empty() => return Ok(None),
                Err(ApduError::Status { .. }) => {
                    warn!("Could not authenticate sector at block {}. Stopping.", block);
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        let data = apdu::read_binary(card, block, MIFARE_BLOCK_SIZE as u8)?;
        full_data.extend_from_slice(&data);
    }

    Ok(Some(full_data))
}

/// Writes `data` over the data blocks. Nothing is written unless all of it fits.
pub fn write_mifare(card: &Card, data: &[u8]) -> Result<(), ApduError> {
    let blocks = mifare_data_blocks();
    ensure_fits(data.len(), blocks.len() * MIFARE_BLOCK_SIZE)?;

    for (chunk, &block) in data.chunks(MIFARE_BLOCK_SIZE).zip(blocks.iter()) {
        if block % 4 == 0 {
            authenticate_sector(card, block, &[KEY_TYPE_A])?;
        }

        let mut padded = [0u8; MIFARE_BLOCK_SIZE]; // Pad with 0s
        padded[..chunk.len()].copy_from_slice(chunk);
        apdu::update_binary(card, block, &padded)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn family_from_atr_suffix() {
        let mifare = [0x3B, 0x8F, 0x80, 0x01, 0x80, 0x4F, 0x0C, 0xA0, 0x00, 0x00, 0x03, 0x06, 0x03, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x6A];
        let ntag = [0x3B, 0x8F, 0x80, 0x01, 0x80, 0x4F, 0x0C, 0xA0, 0x00, 0x00, 0x03, 0x06, 0x03, 0x00, 0x03, 0x00, 0x00, 0x00, 0x00, 0x68];
        assert_eq!(CardFamily::from_atr(&mifare), CardFamily::MifareClassic1k);
        assert_eq!(CardFamily::from_atr(&ntag), CardFamily::Ntag);
        assert_eq!(CardFamily::from_atr(&[]), CardFamily::Ntag);
    }

    #[test]
    fn parses_capability_container() {
        // NTAG215
        assert_eq!(
            CapabilityContainer::parse(&[0xE1, 0x10, 0x3E, 0x00]),
            CapabilityContainer::Ndef {
                data_area: 496,
                writable: true
            }
        );
        assert_eq!(
            CapabilityContainer::parse(&[0xE1, 0x10, 0x12, 0x0F]),
            CapabilityContainer::Ndef {
                data_area: 144,
                writable: false
            }
        );
        assert_eq!(CapabilityContainer::parse(&[0, 0, 0, 0]), CapabilityContainer::Blank);
        assert_eq!(CapabilityContainer::parse(&[0x12, 0x34, 0, 0]), CapabilityContainer::Foreign);
        assert_eq!(CapabilityContainer::parse(&[0xE1]), CapabilityContainer::Foreign);
    }

    #[test]
    fn blank_cc_describes_itself_as_ndef() {
        assert_eq!(
            CapabilityContainer::parse(&BLANK_NTAG_CC),
            CapabilityContainer::Ndef {
                data_area: 144,
                writable: true
            }
        );
    }

    #[test]
    fn blank_areas_match_what_formatting_declares() {
        let CapabilityContainer::Ndef { data_area, .. } = CapabilityContainer::parse(&BLANK_NTAG_CC)
        else {
            panic!("blank CC must describe an NDEF tag");
        };
        assert_eq!(CardFamily::Ntag.blank_data_area(), data_area);
        assert_eq!(CardFamily::MifareClassic1k.blank_data_area(), MIFARE_DATA_AREA);
    }

    #[test]
    fn message_over_blank_ntag_area_does_not_fit() {
        // 200 characters in English: 207 byte message, 210 byte TLV
        let message = ndef::NdefMessage::single(ndef::NdefRecord::text(&"x".repeat(200), "en"));
        let area = CardFamily::Ntag.blank_data_area();

        assert!(message.byte_len() > message_capacity(area));
        assert!(matches!(
            ensure_fits(ndef::tlv_len(message.byte_len()), area),
            Err(ApduError::DataAreaExceeded {
                required: 210,
                available: 144
            })
        ));
    }

    #[test]
    fn message_at_capacity_fits_exactly() {
        for area in [CardFamily::Ntag.blank_data_area(), MIFARE_DATA_AREA, NTAG_MAX_DATA_AREA] {
            let capacity = message_capacity(area);
            assert!(ensure_fits(ndef::tlv_len(capacity), area).is_ok());
            assert!(ensure_fits(ndef::tlv_len(capacity + 1), area).is_err());
        }
    }

    #[test]
    fn ntag_area_is_capped_at_last_addressable_page() {
        // NTAG I2C 2k declares 0xEA * 8 bytes
        assert_eq!(ntag_data_area(0xEA * 8), NTAG_MAX_DATA_AREA);
        assert_eq!(ntag_data_area(496), 496);
        assert_eq!(NTAG_MAX_DATA_AREA, 1008);
        assert_eq!(message_capacity(ntag_data_area(0xEA * 8)), 1003);
    }

    #[test]
    fn mifare_blocks_skip_trailers_and_sector_zero() {
        let blocks = mifare_data_blocks();
        assert_eq!(blocks.len() * MIFARE_BLOCK_SIZE, MIFARE_DATA_AREA);
        assert_eq!(&blocks[..4], &[4, 5, 6, 8]);
        assert!(blocks.iter().all(|b| (b + 1) % 4 != 0));
    }
}
