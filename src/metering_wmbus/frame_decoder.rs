use std::collections::BTreeMap;
use log::{debug, warn};
use thiserror::Error;
use crate::telegram::Telegram;
use super::field_extractor::{FieldError, FieldExtractor};
use super::structs::{ByteOrder, DecodeReport, FieldRole, FrameLayout, Readings};

/* Every frame starts with two crc bytes followed by the frame type */
const CHECKSUM_OFFSET: usize = 0;
const CHECKSUM_LEN: usize = 2;
const DISCRIMINANT_OFFSET: usize = 2;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    #[error("Unknown frame {0:02x} (did you use the correct encryption key?)")]
    UnrecognizedFrameType(u8),
    #[error("Frame of {0} bytes ends before its frame type")]
    MissingFrameType(usize),
}

#[derive(Error, Debug, PartialEq)]
pub enum RegistryError {
    #[error("Frame type {0:02x} is already registered")]
    DuplicateFrameType(u8),
    #[error("Field {0} of frame type {1:02x} needs a width of 1 to 4 bytes")]
    InvalidWidth(String, u8),
    #[error("Fields of frame type {0:02x} overlap or are out of byte order")]
    FieldsOutOfOrder(u8),
    #[error("Field {0} of frame type {1:02x} overlaps the frame header")]
    OverlapsHeader(String, u8),
    #[error("Meter does not support {0:?}")]
    UnsupportedRole(FieldRole),
}

/// Frame type byte to layout table of one meter family
#[derive(Debug, Clone, Default)]
pub struct FrameRegistry {
    layouts: BTreeMap<u8, FrameLayout>,
}

impl FrameRegistry {
    pub fn new() -> Self {
        FrameRegistry { layouts: BTreeMap::new() }
    }

    pub fn register(&mut self, layout: FrameLayout) -> Result<(), RegistryError> {
        let d = layout.discriminant;
        if self.layouts.contains_key(&d) {
            return Err(RegistryError::DuplicateFrameType(d));
        }

        /* Fields must follow the byte order so the trace reads front to back */
        let mut pos = DISCRIMINANT_OFFSET + 1;
        for field in &layout.fields {
            if field.offset < DISCRIMINANT_OFFSET + 1 {
                return Err(RegistryError::OverlapsHeader(field.label.clone(), d));
            }
            if field.offset < pos {
                return Err(RegistryError::FieldsOutOfOrder(d));
            }
            if field.role != FieldRole::Unknown && !(1..=4).contains(&field.width) {
                return Err(RegistryError::InvalidWidth(field.label.clone(), d));
            }
            if field.width == 0 {
                return Err(RegistryError::InvalidWidth(field.label.clone(), d));
            }
            pos = field.end();
        }

        debug!("Registered frame type {d:02x} ({})", layout.name);
        self.layouts.insert(d, layout);
        Ok(())
    }

    pub fn lookup(&self, discriminant: u8) -> Option<&FrameLayout> {
        self.layouts.get(&discriminant)
    }

    pub fn frame_type_name(&self, discriminant: u8) -> &str {
        match self.lookup(discriminant) {
            Some(l) => &l.name,
            None => "?",
        }
    }

    pub fn layouts(&self) -> impl Iterator<Item = &FrameLayout> {
        self.layouts.values()
    }
}

/// Walk the telegram's content along the layout its frame type selects.
/// Explanations are appended to the telegram even when decoding fails.
pub fn decode(telegram: &mut Telegram, registry: &FrameRegistry) -> Result<DecodeReport, DecodeError> {
    let mut out_of_bounds = Vec::new();
    let mut ex = FieldExtractor::new(telegram);

    /* Recorded only, nothing verifies it */
    if let Err(e) = ex.extract_with(CHECKSUM_OFFSET, CHECKSUM_LEN, ByteOrder::BigEndian, |hex, _| format!("{hex} payload crc")) {
        warn!("Frame has no room for its crc: {e}");
        out_of_bounds.push(e);
    }

    let frame_type = match ex.extract_with(DISCRIMINANT_OFFSET, 1, ByteOrder::LittleEndian, |hex, v| {
        format!("{hex} frame type ({})", registry.frame_type_name(v as u8))
    }) {
        Ok(v) => v as u8,
        Err(e) => {
            warn!("Frame has no frame type: {e}");
            return Err(DecodeError::MissingFrameType(ex.content_len()));
        }
    };

    let layout = match registry.lookup(frame_type) {
        Some(l) => l,
        None => {
            warn!("Unknown frame {frame_type:02x} (did you use the correct encryption key?)");
            return Err(DecodeError::UnrecognizedFrameType(frame_type));
        }
    };

    let content_len = ex.content_len();
    if content_len < layout.expected_len() {
        warn!("Unexpected length of frame {content_len}. Expected {} bytes!", layout.expected_len());
    }

    let mut readings = Readings::default();
    for field in &layout.fields {
        if field.role == FieldRole::Unknown {
            if let Err(e) = ex.record_opaque(field.offset, field.width, &field.label) {
                debug!("Skipping {}: {e}", field.label);
                out_of_bounds.push(e);
            }
            continue;
        }

        let raw = match ex.extract_with(field.offset, field.width, field.byte_order, |hex, v| {
            format!("{hex} {} ({})", field.label, v as f64 * field.scale)
        }) {
            Ok(v) => v,
            Err(e @ FieldError::OutOfBounds { .. }) => {
                warn!("Treating missing bytes of {} as zero: {e}", field.label);
                out_of_bounds.push(e);
                ex.padded(field.offset, field.width, field.byte_order)
            }
        };
        readings.set(field.role, raw as f64 * field.scale);
    }

    return Ok(DecodeReport {
        frame_type,
        layout_name: layout.name.clone(),
        readings,
        out_of_bounds,
    });
}
