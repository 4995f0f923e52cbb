/*
    Copyright (C) 2023  OqtaDrive developers

    This file is part of OqtaDrive, a Sinclair Microdrive emulator.

    For the full copyright notice, see the lib.rs file.
*/
//! Named-field view over a raw byte buffer.
use thiserror::Error;

/// A single named field of a [Block]: a contiguous byte range.
#[derive(Clone, Copy, Debug)]
pub struct Field {
    pub name: &'static str,
    pub offset: usize,
    pub len: usize,
}

/// Static field table of a block layout, declared per client and section.
pub type FieldMap = &'static [Field];

/// Error returned by the typed setters of a [Block].
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum BlockError {
    #[error("no such field: {0}")]
    NoSuchField(&'static str),
    #[error("field {name} holds {have} bytes, cannot set {want}")]
    WidthMismatch {
        name: &'static str,
        have: usize,
        want: usize,
    },
}

/// A contiguous mutable byte buffer with a read-only field map.
///
/// Getters are forgiving the way the replay path needs them to be: a field
/// that is unknown or lies outside the buffer reads as zero/empty. Setters
/// are strict and fail on unknown fields and width mismatches.
#[derive(Clone, Debug)]
pub struct Block {
    map: FieldMap,
    data: Vec<u8>,
}

impl Block {
    pub fn new(map: FieldMap, data: Vec<u8>) -> Self {
        Block { map, data }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn field(&self, name: &str) -> Option<&Field> {
        self.map.iter().find(|f| f.name == name)
    }

    /// The byte value of a single byte field, 0 when absent.
    pub fn get_byte(&self, name: &str) -> u8 {
        match self.field(name) {
            Some(f) if f.len == 1 && f.offset < self.data.len() => self.data[f.offset],
            _ => 0,
        }
    }

    /// The bytes of a field, empty when the field is unknown or out of range.
    pub fn get_slice(&self, name: &str) -> &[u8] {
        match self.field(name) {
            Some(f) if f.offset + f.len <= self.data.len() => {
                &self.data[f.offset..f.offset + f.len]
            }
            _ => &[],
        }
    }

    /// The little endian value of a two byte field, 0 when absent.
    pub fn get_u16(&self, name: &str) -> u16 {
        match self.get_slice(name) {
            [lo, hi] => u16::from(*lo) | u16::from(*hi) << 8,
            _ => 0,
        }
    }

    /// The field bytes as an ASCII string, lossy.
    pub fn get_string(&self, name: &str) -> String {
        String::from_utf8_lossy(self.get_slice(name)).into_owned()
    }

    /// Sum of all bytes of the named range.
    pub fn sum(&self, name: &str) -> u32 {
        self.get_slice(name).iter().map(|&b| u32::from(b)).sum()
    }

    pub fn set_byte(&mut self, name: &'static str, value: u8) -> Result<(), BlockError> {
        self.set_slice(name, &[value])
    }

    pub fn set_u16(&mut self, name: &'static str, value: u16) -> Result<(), BlockError> {
        self.set_slice(name, &value.to_le_bytes())
    }

    pub fn set_slice(&mut self, name: &'static str, value: &[u8]) -> Result<(), BlockError> {
        let f = *self
            .field(name)
            .ok_or(BlockError::NoSuchField(name))?;
        if f.len != value.len() || f.offset + f.len > self.data.len() {
            return Err(BlockError::WidthMismatch {
                name,
                have: f.len.min(self.data.len().saturating_sub(f.offset)),
                want: value.len(),
            });
        }
        self.data[f.offset..f.offset + f.len].copy_from_slice(value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIELDS: FieldMap = &[
        Field { name: "flags", offset: 0, len: 1 },
        Field { name: "number", offset: 1, len: 1 },
        Field { name: "length", offset: 2, len: 2 },
        Field { name: "name", offset: 4, len: 4 },
        Field { name: "all", offset: 0, len: 8 },
    ];

    fn block() -> Block {
        Block::new(FIELDS, vec![0x06, 0x0a, 0x34, 0x12, b't', b'e', b's', b't'])
    }

    #[test]
    fn typed_getters() {
        let b = block();
        assert_eq!(b.get_byte("flags"), 0x06);
        assert_eq!(b.get_byte("number"), 0x0a);
        assert_eq!(b.get_u16("length"), 0x1234);
        assert_eq!(b.get_string("name"), "test");
        assert_eq!(b.sum("length"), 0x34 + 0x12);
        assert_eq!(b.get_byte("bogus"), 0);
        assert!(b.get_slice("bogus").is_empty());
        assert_eq!(b.get_u16("flags"), 0);
    }

    #[test]
    fn out_of_range_field_reads_empty() {
        let b = Block::new(FIELDS, vec![1, 2]);
        assert!(b.get_slice("name").is_empty());
        assert_eq!(b.sum("all"), 0);
    }

    #[test]
    fn strict_setters() {
        let mut b = block();
        b.set_byte("flags", 0x04).unwrap();
        assert_eq!(b.get_byte("flags"), 0x04);
        b.set_u16("length", 0xbeef).unwrap();
        assert_eq!(b.get_u16("length"), 0xbeef);
        b.set_slice("name", b"demo").unwrap();
        assert_eq!(b.get_string("name"), "demo");

        assert_eq!(
            b.set_byte("bogus", 1),
            Err(BlockError::NoSuchField("bogus"))
        );
        assert!(matches!(
            b.set_slice("name", b"toolong"),
            Err(BlockError::WidthMismatch { name: "name", .. })
        ));
        assert!(b.set_u16("flags", 1).is_err());
    }
}
