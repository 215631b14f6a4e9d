// src/apdu.rs
use pcsc::Card;
use thiserror::Error;

// MIFARE Classic key types for the authenticate command
pub const KEY_TYPE_A: u8 = 0x60;
pub const KEY_TYPE_B: u8 = 0x61;

#[derive(Debug, Error)]
pub enum ApduError {
    #[error("Transmit error: {0}")]
    Transmit(#[from] pcsc::Error),

    #[error("Command rejected with status {sw1:02X} {sw2:02X}")]
    Status { sw1: u8, sw2: u8 },

    #[error("{required} bytes do not fit a data area of {available} bytes")]
    DataAreaExceeded { required: usize, available: usize },
}

// Sends a pseudo-APDU and strips the trailing status word. 0x90 0x00 is success.
fn exchange(card: &Card, apdu: &[u8]) -> Result<Vec<u8>, ApduError> {
    let mut recv_buffer = [0u8; 256];
    let resp = card.transmit(apdu, &mut recv_buffer)?;

    match resp {
        [data @ .., 0x90, 0x00] => Ok(data.to_vec()),
        [.., sw1, sw2] => Err(ApduError::Status {
            sw1: *sw1,
            sw2: *sw2,
        }),
        _ => Err(ApduError::Status { sw1: 0, sw2: 0 }),
    }
}

// Card UID
// CMD: FF CA 00 00 00
pub fn get_uid(card: &Card) -> Result<Vec<u8>, ApduError> {
    exchange(card, &[0xFF, 0xCA, 0x00, 0x00, 0x00])
}

// Load Authentication Keys into Reader Memory (Location 0x00)
// ACR122U standard: FF 82 00 key_num 06 [KEY]
pub fn load_key(card: &Card, key: &[u8; 6]) -> Result<(), ApduError> {
    let mut apdu = vec![0xFF, 0x82, 0x00, 0x00, 0x06];
    apdu.extend_from_slice(key);
    exchange(card, &apdu).map(|_| ())
}

// Authenticate Block
// CMD: FF 86 00 00 05 01 00 Block KeyType KeyNumber
pub fn authenticate(card: &Card, block: u8, key_type: u8) -> Result<(), ApduError> {
    let apdu = [
        0xFF, 0x86, 0x00, 0x00, 0x05, 0x01, 0x00, block, key_type, 0x00,
    ];
    exchange(card, &apdu).map(|_| ())
}

// Read: FF B0 00 Block Len
pub fn read_binary(card: &Card, block: u8, length: u8) -> Result<Vec<u8>, ApduError> {
    exchange(card, &[0xFF, 0xB0, 0x00, block, length])
}

// Write: FF D6 00 Block Len [Data]
pub fn update_binary(card: &Card, block: u8, data: &[u8]) -> Result<(), ApduError> {
    let mut apdu = vec![0xFF, 0xD6, 0x00, block, data.len() as u8];
    apdu.extend_from_slice(data);
    exchange(card, &apdu).map(|_| ())
}
