use log::debug;
use thiserror::Error;
use crate::telegram::Telegram;
use super::structs::ByteOrder;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FieldError {
    #[error("Field at offset {offset} with {width} bytes exceeds content of {len} bytes")]
    OutOfBounds { offset: usize, width: usize, len: usize },
}

/// value = sum of byte[i] * 256^i for little endian
pub fn compose(bytes: &[u8], order: ByteOrder) -> u64 {
    let fold = |acc: u64, b: &u8| (acc << 8) | *b as u64;
    return match order {
        ByteOrder::LittleEndian => bytes.iter().rev().fold(0, fold),
        ByteOrder::BigEndian => bytes.iter().fold(0, fold),
    };
}

/* Missing trailing bytes count as zero */
pub fn compose_padded(buffer: &[u8], offset: usize, width: usize, order: ByteOrder) -> u64 {
    let mut bytes = vec![0u8; width];
    for (i, b) in bytes.iter_mut().enumerate() {
        if let Some(v) = buffer.get(offset + i) {
            *b = *v;
        }
    }
    return compose(&bytes, order);
}

/// Reads fields out of a telegram's content and appends one explanation per read
pub struct FieldExtractor<'a> {
    telegram: &'a mut Telegram,
}

impl<'a> FieldExtractor<'a> {
    pub fn new(telegram: &'a mut Telegram) -> Self {
        FieldExtractor { telegram }
    }

    pub fn content_len(&self) -> usize {
        self.telegram.content.len()
    }

    /// Lenient read for fields running past the end of the content
    pub fn padded(&self, offset: usize, width: usize, order: ByteOrder) -> u64 {
        compose_padded(&self.telegram.content, offset, width, order)
    }

    fn range(&self, offset: usize, width: usize) -> Result<&[u8], FieldError> {
        let len = self.telegram.content.len();
        if offset + width > len {
            return Err(FieldError::OutOfBounds { offset, width, len });
        }
        Ok(&self.telegram.content[offset..offset + width])
    }

    /// Compose the integer at `offset` and let `describe` word the explanation from hex and value
    pub fn extract_with<F>(&mut self, offset: usize, width: usize, order: ByteOrder, describe: F) -> Result<u64, FieldError>
    where
        F: FnOnce(&str, u64) -> String,
    {
        let bytes = self.range(offset, width)?;
        let hex = hex::encode(bytes);
        let value = compose(bytes, order);

        let info = describe(&hex, value);
        debug!("Extracted {width} bytes at {offset}: {info}");
        self.telegram.add_explanation(offset, width, info);
        return Ok(value);
    }

    pub fn extract(&mut self, offset: usize, width: usize, order: ByteOrder, label: &str) -> Result<u64, FieldError> {
        self.extract_with(offset, width, order, |hex, value| format!("{hex} {label} ({value})"))
    }

    /// Record an opaque byte range as a hex blob, no numeric meaning attached
    pub fn record_opaque(&mut self, offset: usize, width: usize, label: &str) -> Result<(), FieldError> {
        let hex = hex::encode(self.range(offset, width)?);
        self.telegram.add_explanation(offset, width, format!("{hex} {label}"));
        Ok(())
    }
}
