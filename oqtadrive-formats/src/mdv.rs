/*
    Copyright (C) 2023  OqtaDrive developers

    This file is part of OqtaDrive, a Sinclair Microdrive emulator.

    For the full copyright notice, see the lib.rs file.
*/
//! **MDV** file format, the cartridge image format of the QL.
//!
//! MDV files contain the sectors in *reverted* replay order, each padded to
//! 686 bytes with 0x5a filler. Strangely, that is longer than what the QL
//! actually writes during a format, which is 652 bytes (cf. Appendix D
//! "Microdrive Format" in "QL Advanced User Guide" by Adrian Dickens).
use std::io::{Read, Write};

use log::{debug, warn};

use oqtadrive_core::raw::sync;
use oqtadrive_core::sector::{Header, Record, Sector};
use oqtadrive_core::{ql, Cartridge, Client};

use crate::{CartridgeFormat, FormatError, ReadExactEx, ReadOptions};

/// Length of one sector in an MDV file.
pub const MDV_SECTOR_LENGTH: usize = 686;

/// Reader/writer for the MDV format.
pub struct Mdv;

impl CartridgeFormat for Mdv {
    fn read(&self, mut rd: &mut dyn Read, opts: &ReadOptions) -> Result<Cartridge, FormatError> {
        let cart = Cartridge::new(Client::Ql)?;
        let mut loaded = 0;

        for ix in 0..cart.sector_count() {
            let mut sector = vec![0u8; MDV_SECTOR_LENGTH];
            if !rd.read_exact_or_none(&mut sector)? {
                break;
            }

            if let Err(e) = sync::read_sync(&mut &sector[..])? {
                debug!("sector {} preamble: {}", ix, e);
            }

            let mut hd = Header::new(Client::Ql, &sector[..ql::HEADER_LENGTH], false)?;
            let mut fault = hd.validate().err();
            if fault.is_some() && opts.repair {
                if hd.fix_checksum().is_ok() {
                    debug!("fixed checksum of header at index {}", ix);
                    fault = None;
                }
            }
            if let Some(source) = fault {
                if opts.strict {
                    return Err(FormatError::Defective { what: "header", index: ix, source });
                }
                warn!("defective header: {}", source);
            }

            let mut rec = Record::new(
                Client::Ql,
                &sector[ql::HEADER_LENGTH..ql::MAX_SECTOR_LENGTH],
                false,
            )?;
            let mut fault = rec.validate().err();
            if fault.is_some() && opts.repair {
                if rec.fix_checksums().is_ok() {
                    debug!("fixed checksums of record at index {}", ix);
                    fault = None;
                }
            }
            if let Some(source) = fault {
                if opts.strict {
                    return Err(FormatError::Defective { what: "record", index: ix, source });
                }
                warn!("defective record: {}", source);
            }

            let sec = Sector::new(hd, rec)?;
            debug!("loaded sector with number {}", sec.index());
            cart.set_previous_sector(sec);
            loaded += 1;
        }

        debug!("{} sectors loaded", loaded);
        cart.set_write_protected(false);
        cart.set_modified(false);

        Ok(cart)
    }

    fn write(&self, cart: &Cartridge, wr: &mut dyn Write) -> Result<(), FormatError> {
        let padding = [0x5au8; 256];

        cart.seek_to_start();
        cart.advance_access_ix(false);

        for ix in 0..cart.sector_count() {
            // walk every slot exactly once, in reverted replay order
            let slot = cart.rewind_access_ix(false);
            let sec = match cart.get_sector_at(slot) {
                Some(sec) => sec,
                // MDV requires all sectors
                None => return Err(FormatError::Corrupt(format!("missing sector {}", ix))),
            };

            let mut missing = MDV_SECTOR_LENGTH;

            let header = sec.header().demuxed();
            wr.write_all(header)?;
            missing -= header.len();

            let record = sec.record().demuxed();
            wr.write_all(record)?;
            missing -= record.len();

            if missing > padding.len() {
                return Err(FormatError::Corrupt(format!(
                    "excessive padding, missing {} bytes",
                    missing
                )));
            }
            wr.write_all(&padding[..missing])?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oqtadrive_core::ql::SECTOR_COUNT;
    use std::io::Cursor;

    fn sector_bytes(number: u8) -> Vec<u8> {
        let mut buf = vec![0u8; MDV_SECTOR_LENGTH];
        for b in buf[ql::MAX_SECTOR_LENGTH..].iter_mut() {
            *b = 0x5a;
        }
        sync::copy_sync_pattern(&mut buf);
        buf[12] = 0xff;
        buf[13] = number;
        buf[14..24].copy_from_slice(b"QLTAPE    ");
        let mut hd = Header::new(Client::Ql, &buf[..ql::HEADER_LENGTH], false).unwrap();
        hd.fix_checksum().unwrap();
        buf[..ql::HEADER_LENGTH].copy_from_slice(hd.demuxed());

        let rec_off = ql::HEADER_LENGTH;
        sync::copy_sync_pattern(&mut buf[rec_off..]);
        buf[rec_off + 12] = 0x00;
        buf[rec_off + 13] = 0x00;
        let mut rec = Record::new(
            Client::Ql,
            &buf[rec_off..ql::MAX_SECTOR_LENGTH],
            false,
        )
        .unwrap();
        rec.fix_checksums().unwrap();
        buf[rec_off..ql::MAX_SECTOR_LENGTH].copy_from_slice(rec.demuxed());
        buf
    }

    fn mdv_image() -> Vec<u8> {
        let mut image = Vec::new();
        // reverted replay order: ascending sector numbers
        for n in 0..SECTOR_COUNT {
            image.extend_from_slice(&sector_bytes(n as u8));
        }
        image
    }

    #[test]
    fn read_preserves_sector_order() {
        let image = mdv_image();
        let cart = Mdv
            .read(&mut Cursor::new(&image), &ReadOptions::strict())
            .unwrap();
        assert!(cart.is_formatted());
        assert!(!cart.is_modified());
        assert!(!cart.is_write_protected());
        assert_eq!(cart.name(), "QLTAPE    ");

        cart.seek_to_start();
        let first = cart.get_next_sector().unwrap();
        assert_eq!(first.index(), (SECTOR_COUNT - 1) as u8);
    }

    #[test]
    fn write_round_trip() {
        let image = mdv_image();
        let cart = Mdv
            .read(&mut Cursor::new(&image), &ReadOptions::strict())
            .unwrap();
        let mut out = Vec::new();
        Mdv.write(&cart, &mut out).unwrap();
        assert_eq!(out, image);
    }

    #[test]
    fn write_fails_on_missing_sector() {
        let cart = Cartridge::new(Client::Ql).unwrap();
        let mut out = Vec::new();
        assert!(matches!(
            Mdv.write(&cart, &mut out),
            Err(FormatError::Corrupt(_))
        ));
    }

    #[test]
    fn partial_sector_is_an_error() {
        let mut image = mdv_image();
        image.truncate(image.len() - 10);
        assert!(Mdv
            .read(&mut Cursor::new(&image), &ReadOptions::strict())
            .is_err());
    }
}
