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
    Field { name: "name", offset: 14, len: 10 },
    Field { name: "random", offset: 24, len: 2 },
    Field { name: "header", offset: 12, len: 14 },
    Field { name: "checksum", offset: 26, len: 2 },
];

/// A QL sector header.
#[derive(Clone, Debug)]
pub struct Header {
    muxed: Vec<u8>,
    block: Block,
}

impl Header {
    /// See [crate::sector::Header::new].
    pub fn new(data: &[u8], is_raw: bool) -> Result<Self, ValidationError> {
        let dmx = if is_raw {
            raw::demux(data, true)
        } else {
            data.to_vec()
        };
        if dmx.len() < HEADER_LENGTH {
            return Err(ValidationError::TooShort {
                what: "QL header",
                len: dmx.len(),
            });
        }
        let block = Block::new(HEADER_FIELDS, dmx);
        let muxed = raw::mux(block.bytes(), true);
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

    /// The cartridge name; blank when the name field holds NUL bytes.
    pub fn name(&self) -> String {
        let name = self.block.get_string("name");
        if name.contains('\0') {
            String::new()
        } else {
            name
        }
    }

    pub fn random(&self) -> u16 {
        self.block.get_u16("random")
    }

    pub fn stored_checksum(&self) -> u16 {
        self.block.get_u16("checksum")
    }

    pub fn calculate_checksum(&self) -> u16 {
        checksum(self.block.sum("header"))
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        let want = self.stored_checksum();
        let got = self.calculate_checksum();
        if want != got {
            return Err(ValidationError::Checksum {
                what: "sector header",
                want,
                got,
            });
        }
        Ok(())
    }

    pub fn fix_checksum(&mut self) -> Result<(), ValidationError> {
        let sum = self.calculate_checksum();
        self.block.set_u16("checksum", sum)?;
        self.muxed = raw::mux(self.block.bytes(), true);
        self.validate()
    }
}
