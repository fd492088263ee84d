use log::debug;
use thiserror::Error;

pub mod utils;

/* Layout of the wM-Bus link layer with an ELL-II header (CI 0x8D) */
const C_FIELD_SND_NR: u8 = 0x44;
const CI_ELL_II: u8 = 0x8D;
const ELL_HEADER_LEN: usize = 17;
const FRAME_CRC_LEN: usize = 2;

#[derive(Error, Debug, PartialEq)]
pub enum FrameError {
    #[error("Telegram too short")]
    TelegramTooShort,
    #[error("Length field {0} does not match the {1} received bytes")]
    LengthMismatch(usize, usize),
    #[error("Unsupported C field {0:02x}")]
    UnsupportedTelegramType(u8),
    #[error("CI field {0:02x} not supported")]
    CiTypeNotSupported(u8),
}

/// One byte range of the content and what it was decoded into
#[derive(Debug, Clone, PartialEq)]
pub struct Explanation {
    pub offset: usize,
    pub len: usize,
    pub info: String,
}

/// A single received transmission. The pipeline decrypts `payload` into
/// `content` and annotates `explanations` while decoding it.
#[derive(Debug, Clone)]
pub struct Telegram {
    pub payload: Vec<u8>,
    pub content: Vec<u8>,
    /// A field in wire order
    pub address: [u8; 4],
    /// A field as printed on the meter
    pub id: String,
    pub manufacturer: u16,
    pub version: u8,
    pub device_type: u8,
    pub encrypted: bool,
    pub simulated: bool,
    /// AES-CTR initial counter block built from the link header
    pub iv: [u8; 16],
    pub explanations: Vec<Explanation>,
}

impl Telegram {
    pub fn new(payload: Vec<u8>, address: [u8; 4], encrypted: bool, iv: [u8; 16]) -> Self {
        Telegram {
            payload,
            content: Vec::new(),
            address,
            id: utils::ident_no(&address),
            manufacturer: 0,
            version: 0,
            device_type: 0,
            encrypted,
            simulated: false,
            iv,
            explanations: Vec::new(),
        }
    }

    /// Unencrypted telegram as fed in by simulation files and tests
    pub fn simulated(address: [u8; 4], payload: Vec<u8>) -> Self {
        let mut t = Telegram::new(payload, address, false, [0u8; 16]);
        t.simulated = true;
        return t;
    }

    /// Split a raw C1 frame (format B, trailing CRC included) into header fields and payload
    pub fn from_frame(raw: &[u8]) -> Result<Self, FrameError> {
        if raw.len() < ELL_HEADER_LEN + FRAME_CRC_LEN {
            return Err(FrameError::TelegramTooShort);
        }

        let frame_len = raw[0] as usize + 1;
        if frame_len > raw.len() {
            return Err(FrameError::LengthMismatch(raw[0] as usize, raw.len()));
        }
        if frame_len < ELL_HEADER_LEN + FRAME_CRC_LEN {
            return Err(FrameError::TelegramTooShort);
        }

        if raw[1] != C_FIELD_SND_NR {
            return Err(FrameError::UnsupportedTelegramType(raw[1]));
        }

        if raw[10] != CI_ELL_II {
            return Err(FrameError::CiTypeNotSupported(raw[10]));
        }

        let address = [raw[4], raw[5], raw[6], raw[7]];

        /*
            IV: M-field (2) | A-field (6) | CC | SN (4) | FN (2) | BC
            FN and BC stay zero for the first block of a frame
        */
        let mut iv = [0u8; 16];
        iv[0..2].copy_from_slice(&raw[2..4]);
        iv[2..8].copy_from_slice(&raw[4..10]);
        iv[8] = raw[11];
        iv[9..13].copy_from_slice(&raw[13..17]);

        /* ENC field lives in the top three bits of the session number */
        let encrypted = (raw[16] >> 5) & 0x07 != 0;

        let mut t = Telegram::new(raw[ELL_HEADER_LEN..frame_len - FRAME_CRC_LEN].to_vec(), address, encrypted, iv);
        t.manufacturer = (raw[3] as u16) << 8 | raw[2] as u16;
        t.version = raw[8];
        t.device_type = raw[9];

        debug!("Framed telegram from {} ({}), {} payload bytes, encrypted: {}",
               t.id, utils::manufacturer_flag(t.manufacturer), t.payload.len(), t.encrypted);
        return Ok(t);
    }

    pub fn is_encrypted(&self) -> bool {
        self.encrypted
    }

    pub fn is_simulated(&self) -> bool {
        self.simulated
    }

    pub fn add_explanation(&mut self, offset: usize, len: usize, info: String) {
        self.explanations.push(Explanation { offset, len, info });
    }

    /// Render the trace, one line per byte range, offsets shifted by `start`.
    /// Bytes of the content no explanation covers show up as unexplained.
    pub fn explain_parse(&self, prefix: &str, start: usize) -> String {
        let mut entries: Vec<&Explanation> = self.explanations.iter().collect();
        entries.sort_by_key(|e| e.offset);

        let mut lines: Vec<String> = Vec::new();
        let mut pos = 0;
        for e in entries {
            if e.offset > pos && pos < self.content.len() {
                let end = e.offset.min(self.content.len());
                lines.push(format!("{prefix} {:03} {:02}: {} ?", pos + start, end - pos, hex::encode(&self.content[pos..end])));
            }
            lines.push(format!("{prefix} {:03} {:02}: {}", e.offset + start, e.len, e.info));
            pos = pos.max(e.offset + e.len);
        }

        if pos < self.content.len() {
            lines.push(format!("{prefix} {:03} {:02}: {} ?", pos + start, self.content.len() - pos, hex::encode(&self.content[pos..])));
        }

        return lines.join("\n");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /* L C M M A A A A A A CI CC ACC SN SN SN SN | payload | CRC CRC */
    fn frame(sn3: u8, payload: &[u8]) -> Vec<u8> {
        let mut raw = vec![0x00, 0x44, 0x2D, 0x2C, 0x78, 0x56, 0x34, 0x12, 0x30, 0x04, 0x8D, 0x20, 0x5A, 0x01, 0x02, 0x03, sn3];
        raw.extend_from_slice(payload);
        raw.extend_from_slice(&[0xAA, 0xBB]);
        raw[0] = (raw.len() - 1) as u8;
        return raw;
    }

    #[test]
    fn test_from_frame() {
        let raw = frame(0x20, &[0x11, 0x22, 0x79]);
        let t = Telegram::from_frame(&raw).unwrap();

        assert_eq!(t.payload, vec![0x11, 0x22, 0x79]);
        assert_eq!(t.address, [0x78, 0x56, 0x34, 0x12]);
        assert_eq!(t.id, "12345678");
        assert_eq!(utils::manufacturer_flag(t.manufacturer), "KAM");
        assert_eq!(t.version, 0x30);
        assert_eq!(t.device_type, 0x04);
        assert!(t.is_encrypted());
        assert!(!t.is_simulated());
        assert_eq!(t.iv, [0x2D, 0x2C, 0x78, 0x56, 0x34, 0x12, 0x30, 0x04, 0x20, 0x01, 0x02, 0x03, 0x20, 0, 0, 0]);
    }

    #[test]
    fn test_from_frame_plain() {
        let raw = frame(0x00, &[0x11, 0x22, 0x79]);
        let t = Telegram::from_frame(&raw).unwrap();
        assert!(!t.is_encrypted());
    }

    #[test]
    fn test_from_frame_errors() {
        assert_eq!(Telegram::from_frame(&[0x01, 0x44]).unwrap_err(), FrameError::TelegramTooShort);

        let mut raw = frame(0x00, &[0x79]);
        raw[1] = 0x46;
        assert_eq!(Telegram::from_frame(&raw).unwrap_err(), FrameError::UnsupportedTelegramType(0x46));

        let mut raw = frame(0x00, &[0x79]);
        raw[10] = 0x7A;
        assert_eq!(Telegram::from_frame(&raw).unwrap_err(), FrameError::CiTypeNotSupported(0x7A));

        let mut raw = frame(0x00, &[0x79]);
        raw[0] = 0x40;
        assert_eq!(Telegram::from_frame(&raw).unwrap_err(), FrameError::LengthMismatch(0x40, raw.len()));
    }

    #[test]
    fn test_explain_parse_marks_gaps() {
        let mut t = Telegram::simulated([0x78, 0x56, 0x34, 0x12], vec![]);
        t.content = vec![0xAB, 0xCD, 0x79, 0x01, 0x02];
        t.add_explanation(0, 2, "abcd payload crc".to_string());
        t.add_explanation(2, 1, "79 frame type (short frame)".to_string());

        let text = t.explain_parse("(multical302)", 0);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "(multical302) 000 02: abcd payload crc");
        assert_eq!(lines[1], "(multical302) 002 01: 79 frame type (short frame)");
        assert_eq!(lines[2], "(multical302) 003 02: 0102 ?");
    }
}
