/*
    Copyright (C) 2023  OqtaDrive developers

    This file is part of OqtaDrive, a Sinclair Microdrive emulator.

    For the full copyright notice, see the lib.rs file.
*/
use crate::raw::{self, Block, Field, FieldMap};
use crate::sector::ValidationError;

use super::{
    checksum, FORMAT_DATA_CHECKSUM, FORMAT_EXTRA_BYTES, FORMAT_HEADER_CHECKSUM, RECORD_LENGTH,
};

const RECORD_FIELDS: FieldMap = &[
    Field { name: "flags", offset: 12, len: 1 },
    Field { name: "number", offset: 13, len: 1 },
    Field { name: "length", offset: 14, len: 2 },
    Field { name: "name", offset: 16, len: 10 },
    Field { name: "header", offset: 12, len: 14 },
    Field { name: "checksum", offset: 26, len: 1 },
    Field { name: "data", offset: 27, len: 512 },
    Field { name: "dataChecksum", offset: 539, len: 1 },
];

/// An Interface 1 record, the payload part of a sector.
///
/// Records written during FORMAT by early Interface 1 ROMs are
/// [FORMAT_EXTRA_BYTES] longer than standard records and carry fixed
/// checksum values instead of computed sums.
#[derive(Clone, Debug)]
pub struct Record {
    muxed: Vec<u8>,
    block: Block,
}

impl Record {
    /// See [crate::sector::Record::new].
    pub fn new(data: &[u8], is_raw: bool) -> Result<Self, ValidationError> {
        let dmx = if is_raw {
            raw::demux(data, false)
        } else {
            data.to_vec()
        };
        if dmx.len() < RECORD_LENGTH {
            return Err(ValidationError::TooShort {
                what: "IF1 record",
                len: dmx.len(),
            });
        }
        let block = Block::new(RECORD_FIELDS, dmx);
        let muxed = raw::mux(block.bytes(), false);
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

    pub fn length(&self) -> u16 {
        self.block.get_u16("length")
    }

    pub fn name(&self) -> String {
        self.block.get_string("name")
    }

    /// The raw bytes of the name field, as needed for charset translation.
    pub fn name_bytes(&self) -> &[u8] {
        self.block.get_slice("name")
    }

    /// Whether this is a longer record written by an early ROM during FORMAT.
    pub fn is_format_record(&self) -> bool {
        self.block.len() >= RECORD_LENGTH + FORMAT_EXTRA_BYTES
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.is_format_record() {
            return self.validate_format_record();
        }

        let want = self.block.get_byte("checksum");
        let got = checksum(self.block.sum("header"));
        if want != got {
            return Err(ValidationError::Checksum {
                what: "record descriptor",
                want: want.into(),
                got: got.into(),
            });
        }

        let want = self.block.get_byte("dataChecksum");
        let got = checksum(self.block.sum("data"));
        if want != got && self.flags() != 0 {
            // during ERASE there always seems to be a stray bit set
            // somewhere, so an unused record tolerates a data mismatch
            return Err(ValidationError::Checksum {
                what: "record data",
                want: want.into(),
                got: got.into(),
            });
        }

        Ok(())
    }

    fn validate_format_record(&self) -> Result<(), ValidationError> {
        let want = self.block.get_byte("checksum");
        if want != FORMAT_HEADER_CHECKSUM {
            return Err(ValidationError::Checksum {
                what: "format record descriptor",
                want: want.into(),
                got: FORMAT_HEADER_CHECKSUM.into(),
            });
        }
        let want = self.block.get_byte("dataChecksum");
        if want != FORMAT_DATA_CHECKSUM {
            return Err(ValidationError::Checksum {
                what: "format record data",
                want: want.into(),
                got: FORMAT_DATA_CHECKSUM.into(),
            });
        }
        Ok(())
    }

    pub fn fix_checksums(&mut self) -> Result<(), ValidationError> {
        if self.is_format_record() {
            self.block.set_byte("checksum", FORMAT_HEADER_CHECKSUM)?;
            self.block.set_byte("dataChecksum", FORMAT_DATA_CHECKSUM)?;
        } else {
            let sum = checksum(self.block.sum("header"));
            self.block.set_byte("checksum", sum)?;
            let sum = checksum(self.block.sum("data"));
            self.block.set_byte("dataChecksum", sum)?;
        }
        self.muxed = raw::mux(self.block.bytes(), false);
        self.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raw::sync;

    pub(crate) fn demuxed_record(number: u8, name: &[u8; 10], fill: u8) -> Vec<u8> {
        let mut buf = vec![0u8; RECORD_LENGTH];
        sync::copy_sync_pattern(&mut buf);
        buf[12] = 0x06;
        buf[13] = number;
        buf[14..16].copy_from_slice(&512u16.to_le_bytes());
        buf[16..26].copy_from_slice(name);
        for b in buf[27..539].iter_mut() {
            *b = fill;
        }
        let sum: u32 = buf[12..26].iter().map(|&b| u32::from(b)).sum();
        buf[26] = checksum(sum);
        let sum: u32 = buf[27..539].iter().map(|&b| u32::from(b)).sum();
        buf[539] = checksum(sum);
        buf
    }

    #[test]
    fn parses_and_validates() {
        let rec = Record::new(&demuxed_record(3, b"run       ", 0x42), false).unwrap();
        rec.validate().unwrap();
        assert_eq!(rec.index(), 3);
        assert_eq!(rec.flags(), 0x06);
        assert_eq!(rec.length(), 512);
        assert_eq!(rec.name(), "run       ");
        assert!(!rec.is_format_record());
        assert_eq!(rec.muxed().len(), RECORD_LENGTH + 1);
    }

    #[test]
    fn wire_round_trip() {
        let rec = Record::new(&demuxed_record(0, b"M         ", 0x99), false).unwrap();
        let wire: Vec<u8> = rec.muxed().iter().map(|&b| raw::mux::reverse_nibbles(b)).collect();
        let back = Record::new(&wire, true).unwrap();
        back.validate().unwrap();
        assert_eq!(back.demuxed(), rec.demuxed());
    }

    #[test]
    fn data_checksum_tolerated_for_unused_record() {
        let mut data = demuxed_record(1, b"          ", 0);
        data[12] = 0; // unused
        data[100] = 0x80; // stray bit after erase
        let sum: u32 = data[12..26].iter().map(|&b| u32::from(b)).sum();
        data[26] = checksum(sum);
        let rec = Record::new(&data, false).unwrap();
        rec.validate().unwrap();

        // the same mismatch on a used record is an error
        let mut data = demuxed_record(1, b"          ", 0);
        data[100] = 0x80;
        let rec = Record::new(&data, false).unwrap();
        assert!(matches!(
            rec.validate(),
            Err(ValidationError::Checksum { what: "record data", .. })
        ));
    }

    #[test]
    fn fix_checksums_repairs() {
        let mut data = demuxed_record(1, b"S         ", 0x11);
        data[26] = 0xff;
        data[539] = 0xff;
        let mut rec = Record::new(&data, false).unwrap();
        assert!(rec.validate().is_err());
        rec.fix_checksums().unwrap();
        rec.validate().unwrap();
    }

    #[test]
    fn format_record_uses_fixed_checksums() {
        let mut data = vec![0u8; RECORD_LENGTH + FORMAT_EXTRA_BYTES];
        sync::copy_sync_pattern(&mut data);
        let mut rec = Record::new(&data, false).unwrap();
        assert!(rec.is_format_record());
        assert!(rec.validate().is_err());
        rec.fix_checksums().unwrap();
        assert_eq!(rec.demuxed()[26], FORMAT_HEADER_CHECKSUM);
        assert_eq!(rec.demuxed()[539], FORMAT_DATA_CHECKSUM);
    }
}
