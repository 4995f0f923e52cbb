/*
    Copyright (C) 2023  OqtaDrive developers

    This file is part of OqtaDrive, a Sinclair Microdrive emulator.

    For the full copyright notice, see the lib.rs file.
*/
use crate::raw::{self, Block, Field, FieldMap};
use crate::sector::ValidationError;

use super::{checksum, HEADER_LENGTH};

const HEADER_FIELDS: FieldMap = &[
    Field { name: "flags", offset: 12, len: 1 },
    Field { name: "number", offset: 13, len: 1 },
    Field { name: "spares", offset: 14, len: 2 },
    Field { name: "name", offset: 16, len: 10 },
    Field { name: "header", offset: 12, len: 14 },
    Field { name: "checksum", offset: 26, len: 1 },
];

/// An Interface 1 sector header.
#[derive(Clone, Debug)]
pub struct Header {
    muxed: Vec<u8>,
    block: Block,
}

impl Header {
    /// See [crate::sector::Header::new].
    pub fn new(data: &[u8], is_raw: bool) -> Result<Self, ValidationError> {
        let dmx = if is_raw {
            raw::demux(data, false)
        } else {
            data.to_vec()
        };
        if dmx.len() < HEADER_LENGTH {
            return Err(ValidationError::TooShort {
                what: "IF1 header",
                len: dmx.len(),
            });
        }
        let block = Block::new(HEADER_FIELDS, dmx);
        let muxed = raw::mux(block.bytes(), false);
        Ok(Header { muxed, block })
    }

    pub fn muxed(&self) -> &[u8] {
        &self.muxed
    }

    pub fn demuxed(&self) -> &[u8] {
        self.block.bytes()
    }

    pub fn flags(&self) -> u8 {
        self.block.get_byte("flags")
    }

    pub fn index(&self) -> u8 {
        self.block.get_byte("number")
    }

    pub fn name(&self) -> String {
        self.block.get_string("name")
    }

    pub fn stored_checksum(&self) -> u8 {
        self.block.get_byte("checksum")
    }

    pub fn calculate_checksum(&self) -> u8 {
        checksum(self.block.sum("header"))
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        let want = self.stored_checksum();
        let got = self.calculate_checksum();
        if want != got {
            return Err(ValidationError::Checksum {
                what: "sector header",
                want: want.into(),
                got: got.into(),
            });
        }
        Ok(())
    }

    pub fn fix_checksum(&mut self) -> Result<(), ValidationError> {
        let sum = self.calculate_checksum();
        self.block.set_byte("checksum", sum)?;
        self.muxed = raw::mux(self.block.bytes(), false);
        self.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raw::sync;

    pub(crate) fn demuxed_header(number: u8, name: &[u8; 10]) -> Vec<u8> {
        let mut buf = vec![0u8; HEADER_LENGTH];
        sync::copy_sync_pattern(&mut buf);
        buf[12] = 0x01;
        buf[13] = number;
        buf[16..26].copy_from_slice(name);
        let sum: u32 = buf[12..26].iter().map(|&b| u32::from(b)).sum();
        buf[26] = checksum(sum);
        buf
    }

    #[test]
    fn parses_and_validates() {
        let hd = Header::new(&demuxed_header(42, b"DEMOTAPE  "), false).unwrap();
        hd.validate().unwrap();
        assert_eq!(hd.index(), 42);
        assert_eq!(hd.flags(), 0x01);
        assert_eq!(hd.name(), "DEMOTAPE  ");
        assert_eq!(hd.muxed().len(), HEADER_LENGTH + 1);
    }

    #[test]
    fn survives_wire_round_trip() {
        let plain = demuxed_header(7, b"TESTING   ");
        let hd = Header::new(&plain, false).unwrap();
        // recording reverses the bit order within each nibble; what comes
        // back from the adapter is the nibble reversed muxed data
        let wire: Vec<u8> = hd.muxed().iter().map(|&b| raw::mux::reverse_nibbles(b)).collect();
        let back = Header::new(&wire, true).unwrap();
        back.validate().unwrap();
        assert_eq!(back.index(), 7);
        assert_eq!(back.name(), "TESTING   ");
        assert_eq!(back.demuxed(), hd.demuxed());
    }

    #[test]
    fn checksum_fix() {
        let mut bad = demuxed_header(9, b"BROKEN    ");
        bad[26] ^= 0x5f;
        let mut hd = Header::new(&bad, false).unwrap();
        assert!(matches!(
            hd.validate(),
            Err(ValidationError::Checksum { what: "sector header", .. })
        ));
        hd.fix_checksum().unwrap();
        hd.validate().unwrap();
    }

    #[test]
    fn short_buffer_rejected() {
        assert!(matches!(
            Header::new(&[0u8; 10], false),
            Err(ValidationError::TooShort { .. })
        ));
    }
}
