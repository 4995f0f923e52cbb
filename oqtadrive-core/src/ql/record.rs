/*
    Copyright (C) 2023  OqtaDrive developers

    This file is part of OqtaDrive, a Sinclair Microdrive emulator.

    For the full copyright notice, see the lib.rs file.
*/
use log::warn;

use crate::raw::{self, Block, Field, FieldMap};
use crate::sector::ValidationError;

use super::{checksum, MAX_SECTOR_LENGTH, HEADER_LENGTH, RECORD_LENGTH};

const RECORD_FIELDS: FieldMap = &[
    Field { name: "flags", offset: 12, len: 1 },
    Field { name: "number", offset: 13, len: 1 },
    Field { name: "header", offset: 12, len: 2 },
    Field { name: "headerChecksum", offset: 14, len: 2 },
    Field { name: "data", offset: 24, len: 512 },
    Field { name: "dataChecksum", offset: 536, len: 2 },
    Field { name: "extraData", offset: 538, len: 84 },
    Field { name: "extraDataChecksum", offset: 622, len: 2 },
];

// FORMAT records announce themselves with this flag/number/checksum trio.
const FORMAT_FLAGS: u8 = 0xaa;
const FORMAT_NUMBER: u8 = 0x55;
const FORMAT_CHECKSUM: u16 = 0x55aa;

// QDOS file header offsets within the data section of block 0
const QDOS_LENGTH: usize = 0;
const QDOS_NAME_LEN: usize = 14;
const QDOS_NAME: usize = 16;
const QDOS_NAME_MAX: usize = 36;

/// A QL record, the payload part of a sector.
#[derive(Clone, Debug)]
pub struct Record {
    muxed: Vec<u8>,
    block: Block,
}

impl Record {
    /// See [crate::sector::Record::new].
    pub fn new(data: &[u8], is_raw: bool) -> Result<Self, ValidationError> {
        let dmx = if is_raw {
            raw::demux(data, true)
        } else {
            data.to_vec()
        };
        if dmx.len() < RECORD_LENGTH {
            return Err(ValidationError::TooShort {
                what: "QL record",
                len: dmx.len(),
            });
        }
        let block = Block::new(RECORD_FIELDS, dmx);
        let muxed = raw::mux(block.bytes(), true);
        Ok(Record { muxed, block })
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

    /// Whether this record was written during FORMAT and carries the extra
    /// data tail.
    pub fn is_format_record(&self) -> bool {
        self.flags() == FORMAT_FLAGS
            && self.index() == FORMAT_NUMBER
            && self.block.get_u16("headerChecksum") == FORMAT_CHECKSUM
    }

    pub fn calculate_header_checksum(&self) -> u16 {
        checksum(self.block.sum("header"))
    }

    pub fn calculate_data_checksum(&self) -> u16 {
        checksum(self.block.sum("data"))
    }

    pub fn calculate_extra_data_checksum(&self) -> u16 {
        checksum(self.block.sum("extraData"))
    }

    /// The length of the file this record belongs to, taken from the QDOS
    /// file header in the data section of block 0.
    pub fn file_length(&self) -> Option<u32> {
        if self.index() != 0 {
            return None;
        }
        let data = self.block.get_slice("data");
        let bytes = data.get(QDOS_LENGTH..QDOS_LENGTH + 4)?;
        Some(u32::from_be_bytes(bytes.try_into().ok()?))
    }

    /// The name of the file this record belongs to, taken from the QDOS
    /// file header in the data section of block 0.
    pub fn file_name(&self) -> Option<String> {
        if self.index() != 0 {
            return None;
        }
        let data = self.block.get_slice("data");
        let len = data.get(QDOS_NAME_LEN..QDOS_NAME_LEN + 2)?;
        let len = u16::from_be_bytes(len.try_into().ok()?) as usize;
        if len == 0 || len > QDOS_NAME_MAX {
            return None;
        }
        let name = data.get(QDOS_NAME..QDOS_NAME + len)?;
        if !name.iter().all(|b| (0x20..0x7f).contains(b)) {
            return None;
        }
        Some(String::from_utf8_lossy(name).into_owned())
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        let want = self.block.get_u16("headerChecksum");
        let got = self.calculate_header_checksum();
        if want != got && !self.is_format_record() {
            return Err(ValidationError::Checksum {
                what: "record header",
                want,
                got,
            });
        }

        let want = self.block.get_u16("dataChecksum");
        let got = self.calculate_data_checksum();
        if want != got {
            return Err(ValidationError::Checksum {
                what: "record data",
                want,
                got,
            });
        }

        // The FORMAT trio is a heuristic; other records may in principle
        // match it, so a failing extra data tail never invalidates a record
        // whose main data checksum passes.
        if self.is_format_record() {
            let want = self.block.get_u16("extraDataChecksum");
            let got = self.calculate_extra_data_checksum();
            if want != got {
                warn!(
                    "record extra data check sum mismatch, want {}, got {}",
                    want, got
                );
            }
        }

        Ok(())
    }

    pub fn fix_checksums(&mut self) -> Result<(), ValidationError> {
        if !self.is_format_record() {
            let sum = self.calculate_header_checksum();
            self.block.set_u16("headerChecksum", sum)?;
        }
        let sum = self.calculate_data_checksum();
        self.block.set_u16("dataChecksum", sum)?;
        if self.block.len() >= MAX_SECTOR_LENGTH - HEADER_LENGTH {
            let sum = self.calculate_extra_data_checksum();
            self.block.set_u16("extraDataChecksum", sum)?;
        }
        self.muxed = raw::mux(self.block.bytes(), true);
        self.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raw::sync;

    pub(crate) fn demuxed_record(number: u8, fill: u8) -> Vec<u8> {
        let mut buf = vec![0u8; RECORD_LENGTH];
        sync::copy_sync_pattern(&mut buf);
        buf[12] = 0x00;
        buf[13] = number;
        for b in buf[24..536].iter_mut() {
            *b = fill;
        }
        let sum: u32 = buf[12..14].iter().map(|&b| u32::from(b)).sum();
        buf[14..16].copy_from_slice(&checksum(sum).to_le_bytes());
        let sum: u32 = buf[24..536].iter().map(|&b| u32::from(b)).sum();
        buf[536..538].copy_from_slice(&checksum(sum).to_le_bytes());
        buf
    }

    #[test]
    fn parses_and_validates() {
        let rec = Record::new(&demuxed_record(4, 0x21), false).unwrap();
        rec.validate().unwrap();
        assert_eq!(rec.index(), 4);
        assert_eq!(rec.flags(), 0);
        assert!(!rec.is_format_record());
        assert_eq!(rec.muxed().len(), RECORD_LENGTH + 1);
    }

    #[test]
    fn wire_round_trip() {
        let rec = Record::new(&demuxed_record(0, 0x5a), false).unwrap();
        let wire: Vec<u8> = rec
            .muxed()
            .iter()
            .map(|&b| raw::mux::reverse_nibbles(b))
            .collect();
        let back = Record::new(&wire, true).unwrap();
        back.validate().unwrap();
        assert_eq!(back.demuxed(), rec.demuxed());
    }

    #[test]
    fn checksum_mismatch_detected_and_fixed() {
        let mut data = demuxed_record(1, 0x33);
        data[100] ^= 0x0f;
        let mut rec = Record::new(&data, false).unwrap();
        assert!(matches!(
            rec.validate(),
            Err(ValidationError::Checksum { what: "record data", .. })
        ));
        rec.fix_checksums().unwrap();
        rec.validate().unwrap();
    }

    #[test]
    fn format_record_detection_by_length() {
        // a record of maximum length and one of standard length produce
        // different validators: the long one checks its extra data tail
        let mut long = vec![0u8; MAX_SECTOR_LENGTH - HEADER_LENGTH];
        sync::copy_sync_pattern(&mut long);
        long[12] = FORMAT_FLAGS;
        long[13] = FORMAT_NUMBER;
        long[14..16].copy_from_slice(&FORMAT_CHECKSUM.to_le_bytes());
        let mut rec = Record::new(&long, false).unwrap();
        assert!(rec.is_format_record());
        rec.fix_checksums().unwrap();
        rec.validate().unwrap();
        assert_eq!(
            rec.demuxed()[622..624],
            rec.calculate_extra_data_checksum().to_le_bytes()
        );

        let std_rec = Record::new(&demuxed_record(2, 0), false).unwrap();
        assert!(!std_rec.is_format_record());
    }

    #[test]
    fn extra_tail_mismatch_does_not_invalidate() {
        let mut long = vec![0u8; MAX_SECTOR_LENGTH - HEADER_LENGTH];
        sync::copy_sync_pattern(&mut long);
        long[12] = FORMAT_FLAGS;
        long[13] = FORMAT_NUMBER;
        long[14..16].copy_from_slice(&FORMAT_CHECKSUM.to_le_bytes());
        let sum: u32 = long[24..536].iter().map(|&b| u32::from(b)).sum();
        long[536..538].copy_from_slice(&checksum(sum).to_le_bytes());
        long[600] = 0x77; // breaks the extra data sum only
        let rec = Record::new(&long, false).unwrap();
        rec.validate().unwrap();
    }

    #[test]
    fn qdos_file_header_parsed() {
        let mut data = demuxed_record(0, 0);
        data[24..28].copy_from_slice(&1234u32.to_be_bytes());
        data[38..40].copy_from_slice(&4u16.to_be_bytes());
        data[40..44].copy_from_slice(b"demo");
        let rec = Record::new(&data, false).unwrap();
        assert_eq!(rec.file_length(), Some(1234));
        assert_eq!(rec.file_name().unwrap(), "demo");

        // only block 0 carries the file header
        let rec = Record::new(&demuxed_record(1, 0), false).unwrap();
        assert_eq!(rec.file_length(), None);
        assert_eq!(rec.file_name(), None);
    }
}
