//! TLV8 records: `[tag: 1][length: 1][value: length]`.
//!
//! Values longer than 255 bytes are fragmented across consecutive records with the same
//! tag; on decode, consecutive records with the same tag are concatenated.

use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TlvError {
    #[error("truncated header at offset {0}")]
    TruncatedHeader(usize),
    #[error("truncated value for tag {tag:#04x} (expected {expected} bytes, got {actual})")]
    TruncatedValue { tag: u8, expected: usize, actual: usize },
    #[error("duplicate tag {0:#04x}")]
    DuplicateTag(u8),
}

/// Decoded TLV8 record set, keyed by tag.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tlv8 {
    items: BTreeMap<u8, Vec<u8>>,
}

impl Tlv8 {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parse(data: &[u8]) -> Result<Self, TlvError> {
        let mut items: BTreeMap<u8, Vec<u8>> = BTreeMap::new();
        let mut i = 0;
        let mut last_tag: Option<u8> = None;

        while i < data.len() {
            if i + 2 > data.len() {
                return Err(TlvError::TruncatedHeader(i));
            }
            let tag = data[i];
            let len = data[i + 1] as usize;
            i += 2;

            if i + len > data.len() {
                return Err(TlvError::TruncatedValue {
                    tag,
                    expected: len,
                    actual: data.len() - i,
                });
            }
            let value = &data[i..i + len];
            i += len;

            if last_tag == Some(tag) {
                // Continuation fragment of the previous value.
                if let Some(existing) = items.get_mut(&tag) {
                    existing.extend_from_slice(value);
                }
            } else if items.insert(tag, value.to_vec()).is_some() {
                return Err(TlvError::DuplicateTag(tag));
            }
            last_tag = Some(tag);
        }

        Ok(Self { items })
    }

    /// Encode in ascending tag order.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for (tag, value) in &self.items {
            if value.is_empty() {
                out.push(*tag);
                out.push(0);
                continue;
            }
            for chunk in value.chunks(255) {
                out.push(*tag);
                out.push(chunk.len() as u8);
                out.extend_from_slice(chunk);
            }
        }
        out
    }

    pub fn get(&self, tag: u8) -> Option<&[u8]> {
        self.items.get(&tag).map(Vec::as_slice)
    }

    pub fn contains(&self, tag: u8) -> bool {
        self.items.contains_key(&tag)
    }

    pub fn set(&mut self, tag: u8, value: impl Into<Vec<u8>>) {
        self.items.insert(tag, value.into());
    }

    pub fn set_u8(&mut self, tag: u8, value: u8) {
        self.set(tag, vec![value]);
    }

    /// Set `tag` only when `value` is present.
    pub fn set_opt(&mut self, tag: u8, value: Option<impl Into<Vec<u8>>>) {
        if let Some(value) = value {
            self.set(tag, value);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
