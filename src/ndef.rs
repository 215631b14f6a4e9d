// src/ndef.rs
use crate::error::NdefError;
use crate::text_record;

// Type Name Format values (low 3 bits of the record header)
pub const TNF_WELL_KNOWN: u8 = 0x01;
pub const TNF_EXTERNAL: u8 = 0x04;

pub const RTD_TEXT: &[u8] = b"T";
pub const RTD_URI: &[u8] = b"U";

// Record header flags
const FLAG_MB: u8 = 0x80;
const FLAG_ME: u8 = 0x40;
const FLAG_CF: u8 = 0x20;
const FLAG_SR: u8 = 0x10;
const FLAG_IL: u8 = 0x08;
const TNF_MASK: u8 = 0x07;

// TLV blocks in tag memory
const TLV_NULL: u8 = 0x00;
const TLV_NDEF: u8 = 0x03;
const TLV_TERMINATOR: u8 = 0xFE;
const TLV_LONG_LENGTH: u8 = 0xFF;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NdefRecord {
    pub tnf: u8, // Type Name Format (how to interpret the type)
    pub record_type: Vec<u8>,
    pub id: Vec<u8>,
    pub payload: Vec<u8>,
}

impl NdefRecord {
    pub fn new(tnf: u8, record_type: &[u8], id: &[u8], payload: Vec<u8>) -> Self {
        Self {
            tnf: tnf & TNF_MASK,
            record_type: record_type.to_vec(),
            id: id.to_vec(),
            payload,
        }
    }

    /// Well-Known Text record holding UTF-8 `text`.
    pub fn text(text: &str, language: &str) -> Self {
        Self::new(
            TNF_WELL_KNOWN,
            RTD_TEXT,
            &[],
            text_record::encode(text, language),
        )
    }

    pub fn is_text(&self) -> bool {
        self.tnf == TNF_WELL_KNOWN && self.record_type == RTD_TEXT
    }

    fn is_short(&self) -> bool {
        self.payload.len() <= u8::MAX as usize
    }

    fn encoded_len(&self) -> usize {
        let payload_len_field = if self.is_short() { 1 } else { 4 };
        let id_len_field = if self.id.is_empty() { 0 } else { 1 };

        // header + type length + payload length + id length + fields
        1 + 1
            + payload_len_field
            + id_len_field
            + self.record_type.len()
            + self.id.len()
            + self.payload.len()
    }

    fn write_to(&self, out: &mut Vec<u8>, mb: bool, me: bool) {
        // Bit 7: MB, Bit 6: ME, Bit 5: CF(0), Bit 4: SR, Bit 3: IL, Bits 2-0: TNF
        let mut header = self.tnf;
        if mb {
            header |= FLAG_MB;
        }
        if me {
            header |= FLAG_ME;
        }
        if self.is_short() {
            header |= FLAG_SR;
        }
        if !self.id.is_empty() {
            header |= FLAG_IL;
        }

        out.push(header);
        out.push(self.record_type.len() as u8);
        if self.is_short() {
            out.push(self.payload.len() as u8);
        } else {
            out.extend_from_slice(&(self.payload.len() as u32).to_be_bytes());
        }
        if !self.id.is_empty() {
            out.push(self.id.len() as u8);
        }
        out.extend_from_slice(&self.record_type);
        out.extend_from_slice(&self.id);
        out.extend_from_slice(&self.payload);
    }
}

/// An NDEF message: one or more records in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NdefMessage {
    records: Vec<NdefRecord>,
}

impl NdefMessage {
    pub fn new(records: Vec<NdefRecord>) -> Result<Self, NdefError> {
        if records.is_empty() {
            return Err(NdefError::malformed("NDEF message has no records"));
        }
        Ok(Self { records })
    }

    pub fn single(record: NdefRecord) -> Self {
        Self {
            records: vec![record],
        }
    }

    pub fn records(&self) -> &[NdefRecord] {
        &self.records
    }

    pub fn text_records(&self) -> impl Iterator<Item = &NdefRecord> {
        self.records.iter().filter(|record| record.is_text())
    }

    /// Serialized size, used for tag capacity checks.
    pub fn byte_len(&self) -> usize {
        self.records.iter().map(NdefRecord::encoded_len).sum()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.byte_len());
        let last = self.records.len() - 1;
        for (i, record) in self.records.iter().enumerate() {
            record.write_to(&mut out, i == 0, i == last);
        }
        out
    }

    pub fn parse(data: &[u8]) -> Result<Self, NdefError> {
        let mut reader = ByteReader::new(data);
        let mut records = Vec::new();

        while !reader.is_empty() {
            let header = reader.u8("record header")?;
            if header & FLAG_CF != 0 {
                return Err(NdefError::malformed("chunked records are not supported"));
            }

            let type_len = reader.u8("type length")? as usize;
            let payload_len = if header & FLAG_SR != 0 {
                reader.u8("payload length")? as usize
            } else {
                u32::from_be_bytes(reader.array("payload length")?) as usize
            };
            let id_len = if header & FLAG_IL != 0 {
                reader.u8("id length")? as usize
            } else {
                0
            };

            let record_type = reader.take(type_len, "record type")?.to_vec();
            let id = reader.take(id_len, "record id")?.to_vec();
            let payload = reader.take(payload_len, "record payload")?.to_vec();

            records.push(NdefRecord {
                tnf: header & TNF_MASK,
                record_type,
                id,
                payload,
            });

            if header & FLAG_ME != 0 {
                break;
            }
        }

        Self::new(records)
    }
}

/// Wraps NDEF message bytes in an NDEF TLV followed by a terminator TLV.
pub fn wrap_in_tlv(ndef_bytes: &[u8]) -> Vec<u8> {
    let mut tlv = Vec::with_capacity(ndef_bytes.len() + 5);
    tlv.push(TLV_NDEF);

    if ndef_bytes.len() < TLV_LONG_LENGTH as usize {
        tlv.push(ndef_bytes.len() as u8);
    } else {
        tlv.push(TLV_LONG_LENGTH);
        tlv.extend_from_slice(&(ndef_bytes.len() as u16).to_be_bytes());
    }

    tlv.extend_from_slice(ndef_bytes);
    tlv.push(TLV_TERMINATOR);
    tlv
}

/// Locates the NDEF TLV in tag memory. `Ok(None)` means the tag holds no message.
pub fn unwrap_tlv(buffer: &[u8]) -> Result<Option<&[u8]>, NdefError> {
    let mut reader = ByteReader::new(buffer);

    loop {
        let Ok(tag) = reader.u8("TLV tag") else {
            return Ok(None);
        };

        match tag {
            TLV_NULL => continue,
            TLV_TERMINATOR => return Ok(None),
            _ => {
                let len = match reader.u8("TLV length")? {
                    TLV_LONG_LENGTH => u16::from_be_bytes(reader.array("TLV length")?) as usize,
                    short => short as usize,
                };
                let value = reader.take(len, "TLV value")?;

                if tag == TLV_NDEF {
                    return Ok((!value.is_empty()).then_some(value));
                }
            }
        }
    }
}

/// Byte length of the TLV framing needed for a message of `len` bytes.
pub fn tlv_len(len: usize) -> usize {
    let length_field = if len < TLV_LONG_LENGTH as usize { 1 } else { 3 };
    1 + length_field + len + 1
}

/// Largest NDEF message that fits a data area of `area` bytes once wrapped in a TLV.
pub fn tlv_capacity(area: usize) -> usize {
    let short = area.saturating_sub(3);
    if short < TLV_LONG_LENGTH as usize {
        short
    } else {
        area.saturating_sub(5).max(TLV_LONG_LENGTH as usize - 1)
    }
}

struct ByteReader<'a> {
    data: &'a [u8],
    cursor: usize,
}

impl<'a> ByteReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, cursor: 0 }
    }

    fn is_empty(&self) -> bool {
        self.cursor >= self.data.len()
    }

    fn take(&mut self, len: usize, what: &str) -> Result<&'a [u8], NdefError> {
        let end = self
            .cursor
            .checked_add(len)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| NdefError::malformed(format!("truncated {what}")))?;

        let slice = &self.data[self.cursor..end];
        self.cursor = end;
        Ok(slice)
    }

    fn u8(&mut self, what: &str) -> Result<u8, NdefError> {
        Ok(self.take(1, what)?[0])
    }

    fn array<const N: usize>(&mut self, what: &str) -> Result<[u8; N], NdefError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N, what)?);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_text_record_matches_wire_format() {
        let message = NdefMessage::single(NdefRecord::text("hi", "en"));
        let bytes = message.to_bytes();

        // MB | ME | SR | TNF well-known
        assert_eq!(bytes[0], 0xD1);
        assert_eq!(bytes[1], 1); // type length
        assert_eq!(bytes[2], 5); // payload length
        assert_eq!(bytes[3], b'T');
        assert_eq!(&bytes[4..], &[0x02, b'e', b'n', b'h', b'i']);
        assert_eq!(bytes.len(), message.byte_len());
    }

    #[test]
    fn long_payload_uses_four_byte_length() {
        let text = "x".repeat(300);
        let message = NdefMessage::single(NdefRecord::text(&text, "en"));
        let bytes = message.to_bytes();

        assert_eq!(bytes[0] & FLAG_SR, 0);
        assert_eq!(&bytes[2..6], &(303u32).to_be_bytes());
        assert_eq!(bytes.len(), message.byte_len());
        assert_eq!(NdefMessage::parse(&bytes).unwrap(), message);
    }

    #[test]
    fn parses_multiple_records_with_id() {
        let uri = NdefRecord::new(TNF_WELL_KNOWN, RTD_URI, b"id", vec![0x04, b'a']);
        let text = NdefRecord::text("Hello", "en");
        let message = NdefMessage::new(vec![uri, text]).unwrap();
        let bytes = message.to_bytes();

        assert_eq!(bytes[0] & FLAG_IL, FLAG_IL);
        let parsed = NdefMessage::parse(&bytes).unwrap();
        assert_eq!(parsed.records().len(), 2);
        assert_eq!(parsed.records()[0].id, b"id");
        assert_eq!(parsed.text_records().count(), 1);
    }

    #[test]
    fn parse_stops_at_message_end() {
        let mut bytes = NdefMessage::single(NdefRecord::text("a", "en")).to_bytes();
        bytes.extend_from_slice(&[0x00, 0x00, 0x00]);
        assert_eq!(NdefMessage::parse(&bytes).unwrap().records().len(), 1);
    }

    #[test]
    fn truncated_message_is_malformed() {
        let bytes = NdefMessage::single(NdefRecord::text("Hello", "en")).to_bytes();
        for cut in 0..bytes.len() {
            assert!(NdefMessage::parse(&bytes[..cut]).is_err(), "cut at {cut}");
        }
    }

    #[test]
    fn chunked_record_is_rejected() {
        let bytes = [0xB1, 0x01, 0x01, b'T', 0x00];
        assert!(NdefMessage::parse(&bytes).is_err());
    }

    #[test]
    fn empty_message_is_rejected() {
        assert!(NdefMessage::new(Vec::new()).is_err());
    }

    #[test]
    fn tlv_short_form_round_trip() {
        let tlv = wrap_in_tlv(&[1, 2, 3]);
        assert_eq!(tlv, vec![0x03, 3, 1, 2, 3, 0xFE]);
        assert_eq!(tlv.len(), tlv_len(3));
        assert_eq!(unwrap_tlv(&tlv).unwrap(), Some(&[1u8, 2, 3][..]));
    }

    #[test]
    fn tlv_long_form_round_trip() {
        let data = vec![0xAB; 300];
        let tlv = wrap_in_tlv(&data);
        assert_eq!(&tlv[..4], &[0x03, 0xFF, 0x01, 0x2C]);
        assert_eq!(tlv.len(), tlv_len(300));
        assert_eq!(unwrap_tlv(&tlv).unwrap(), Some(&data[..]));
    }

    #[test]
    fn tlv_skips_null_and_foreign_blocks() {
        // NULL, lock control TLV (0x01), then the NDEF TLV
        let buffer = [0x00, 0x01, 0x03, 0xA0, 0x10, 0x44, 0x03, 0x01, 0x99, 0xFE];
        assert_eq!(unwrap_tlv(&buffer).unwrap(), Some(&[0x99u8][..]));
    }

    #[test]
    fn tlv_without_message() {
        assert_eq!(unwrap_tlv(&[0x03, 0x00, 0xFE]).unwrap(), None);
        assert_eq!(unwrap_tlv(&[0xFE, 0x00]).unwrap(), None);
        assert_eq!(unwrap_tlv(&[]).unwrap(), None);
    }

    #[test]
    fn truncated_tlv_is_malformed() {
        assert!(unwrap_tlv(&[0x03, 0x05, 0x01]).is_err());
    }

    #[test]
    fn capacity_accounts_for_tlv_framing() {
        assert_eq!(tlv_capacity(144), 141);
        assert_eq!(tlv_len(tlv_capacity(144)), 144);
        assert_eq!(tlv_capacity(720), 715);
        assert_eq!(tlv_len(tlv_capacity(720)), 720);
        assert_eq!(tlv_capacity(2), 0);
    }
}
