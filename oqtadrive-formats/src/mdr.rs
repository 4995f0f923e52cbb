/*
    Copyright (C) 2023  OqtaDrive developers

    This file is part of OqtaDrive, a Sinclair Microdrive emulator.

    For the full copyright notice, see the lib.rs file.
*/
//! **MDR** file format, the cartridge image format of the Interface 1.
//!
//! MDR files contain the sectors in replay order, each as the demuxed bytes
//! after the 12 byte sync pattern: a 15 byte header followed by a 528 byte
//! record. The preamble is re-synthesized on read. An optional trailing byte
//! carries the write protection flag.
use std::io::{Read, Write};

use log::{debug, warn};

use oqtadrive_core::raw::sync;
use oqtadrive_core::sector::{Header, Record, Sector, ValidationError};
use oqtadrive_core::{if1, Cartridge, Client};

use crate::repair::repair_order;
use crate::{CartridgeFormat, FormatError, ReadExactEx, ReadOptions};

/// Reader/writer for the MDR format.
pub struct Mdr;

impl CartridgeFormat for Mdr {
    fn read(&self, mut rd: &mut dyn Read, opts: &ReadOptions) -> Result<Cartridge, FormatError> {
        let cart = Cartridge::new(Client::If1)?;
        let mut loaded = 0;

        for r in 0..cart.sector_count() {
            let mut header = vec![0u8; if1::HEADER_LENGTH];
            let ix = sync::copy_sync_pattern(&mut header);

            let read = rd.read_exact_or_to_end(&mut header[ix..])?;
            if read < if1::HEADER_LENGTH - ix {
                match read {
                    0 => {}
                    1 => cart.set_write_protected(header[ix] > 0),
                    n => {
                        warn!("expected one final byte, but got {}", n);
                        cart.set_write_protected(false);
                    }
                }
                break;
            }

            let mut record = vec![0u8; if1::RECORD_LENGTH];
            let ix = sync::copy_sync_pattern(&mut record);
            rd.read_exact(&mut record[ix..])?;

            let hd = checked_header(&header, r, opts)?;
            let rec = checked_record(&record, r, opts)?;

            let sec = Sector::new(hd, rec)?;
            cart.set_next_sector(sec);
            loaded = r + 1;
        }

        if loaded == cart.sector_count() {
            // a full cartridge may still carry the write protect flag
            let mut wp = [0u8];
            if rd.read_exact_or_to_end(&mut wp)? == 1 {
                cart.set_write_protected(wp[0] > 0);
            }
        }

        if opts.repair {
            repair_order(&cart);
        }

        debug!("{} sectors loaded", loaded);
        cart.set_modified(false);

        Ok(cart)
    }

    fn write(&self, cart: &Cartridge, wr: &mut dyn Write) -> Result<(), FormatError> {
        cart.seek_to_start();

        // walk every slot exactly once, in replay order
        for _ in 0..cart.sector_count() {
            let ix = cart.advance_access_ix(false);
            if let Some(sec) = cart.get_sector_at(ix) {
                wr.write_all(&sec.header().demuxed()[sync::SYNC_PATTERN_LENGTH..])?;
                wr.write_all(&sec.record().demuxed()[sync::SYNC_PATTERN_LENGTH..])?;
            }
        }

        let wp: u8 = if cart.is_write_protected() { 0xff } else { 0x00 };
        wr.write_all(&[wp])?;

        Ok(())
    }
}

fn checked_header(
    data: &[u8],
    index: usize,
    opts: &ReadOptions,
) -> Result<Header, FormatError> {
    let mut hd = Header::new(Client::If1, data, false)?;
    let mut fault = hd.validate().err();
    if fault.is_some() && opts.repair {
        match hd.fix_checksum() {
            Ok(()) => {
                debug!("fixed checksum of header at index {}", index);
                fault = None;
            }
            Err(e) => warn!("cannot fix checksum of header at index {}: {}", index, e),
        }
    }
    raise_fault("header", index, fault, opts.strict)?;
    Ok(hd)
}

fn checked_record(
    data: &[u8],
    index: usize,
    opts: &ReadOptions,
) -> Result<Record, FormatError> {
    let mut rec = Record::new(Client::If1, data, false)?;
    let mut fault = rec.validate().err();
    if fault.is_some() && opts.repair {
        match rec.fix_checksums() {
            Ok(()) => {
                debug!("fixed checksums of record at index {}", index);
                fault = None;
            }
            Err(e) => warn!("cannot fix checksums of record at index {}: {}", index, e),
        }
    }
    raise_fault("record", index, fault, opts.strict)?;
    Ok(rec)
}

fn raise_fault(
    what: &'static str,
    index: usize,
    fault: Option<ValidationError>,
    strict: bool,
) -> Result<(), FormatError> {
    if let Some(source) = fault {
        if strict {
            return Err(FormatError::Defective { what, index, source });
        }
        warn!("defective {} at index {}: {}", what, index, source);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn sector_bytes(number: u8, name: &[u8; 10], fill: u8) -> (Vec<u8>, Vec<u8>) {
        let mut hd = vec![0u8; if1::HEADER_LENGTH];
        sync::copy_sync_pattern(&mut hd);
        hd[12] = 0x01;
        hd[13] = number;
        hd[16..26].copy_from_slice(name);
        let mut hd = Header::new(Client::If1, &hd, false).unwrap();
        hd.fix_checksum().unwrap();

        let mut rec = vec![0u8; if1::RECORD_LENGTH];
        sync::copy_sync_pattern(&mut rec);
        rec[12] = 0x06;
        rec[14..16].copy_from_slice(&512u16.to_le_bytes());
        rec[16..26].copy_from_slice(b"somefile  ");
        for b in rec[27..539].iter_mut() {
            *b = fill;
        }
        let mut rec = Record::new(Client::If1, &rec, false).unwrap();
        rec.fix_checksums().unwrap();

        (
            hd.demuxed()[sync::SYNC_PATTERN_LENGTH..].to_vec(),
            rec.demuxed()[sync::SYNC_PATTERN_LENGTH..].to_vec(),
        )
    }

    fn mdr_image(sectors: &[u8], wp: Option<u8>) -> Vec<u8> {
        let mut image = Vec::new();
        for &n in sectors {
            let (hd, rec) = sector_bytes(n, b"DEMOTAPE  ", n);
            image.extend_from_slice(&hd);
            image.extend_from_slice(&rec);
        }
        if let Some(wp) = wp {
            image.push(wp);
        }
        image
    }

    #[test]
    fn read_write_round_trip_is_byte_identical() {
        let image = mdr_image(&[3, 2, 1], Some(0x00));
        let cart = Mdr
            .read(&mut Cursor::new(&image), &ReadOptions::strict())
            .unwrap();
        assert!(cart.is_formatted());
        assert!(!cart.is_modified());
        assert_eq!(cart.name(), "DEMOTAPE  ");

        let mut out = Vec::new();
        Mdr.write(&cart, &mut out).unwrap();
        assert_eq!(out, image);
    }

    #[test]
    fn trailing_byte_sets_write_protect() {
        let image = mdr_image(&[2, 1], Some(0xff));
        let cart = Mdr
            .read(&mut Cursor::new(&image), &ReadOptions::strict())
            .unwrap();
        assert!(cart.is_write_protected());

        let image = mdr_image(&[2, 1], None);
        let cart = Mdr
            .read(&mut Cursor::new(&image), &ReadOptions::strict())
            .unwrap();
        assert!(!cart.is_write_protected());
    }

    #[test]
    fn strict_read_rejects_bad_checksum() {
        let mut image = mdr_image(&[1], None);
        image[14] ^= 0xff; // clobber the header checksum
        let err = match Mdr.read(&mut Cursor::new(&image), &ReadOptions::strict()) {
            Err(e) => e,
            Ok(_) => panic!("expected an error"),
        };
        assert!(matches!(err, FormatError::Defective { what: "header", .. }));
    }

    #[test]
    fn repair_fixes_bad_checksum() {
        let mut image = mdr_image(&[1], None);
        image[14] ^= 0xff;
        let opts = ReadOptions {
            strict: true,
            repair: true,
            name: None,
        };
        let cart = Mdr.read(&mut Cursor::new(&image), &opts).unwrap();
        assert!(cart.is_formatted());
    }

    #[test]
    fn lenient_read_keeps_defective_sectors() {
        let mut image = mdr_image(&[1], None);
        image[14] ^= 0xff;
        let cart = Mdr
            .read(&mut Cursor::new(&image), &ReadOptions::default())
            .unwrap();
        assert!(cart.is_formatted());
    }

    #[test]
    fn random_payloads_survive_the_round_trip() {
        use rand::prelude::*;

        let mut image = Vec::new();
        for n in (1..=8u8).rev() {
            let (hd, _) = sector_bytes(n, b"RANDOM    ", 0);
            let mut rec = vec![0u8; if1::RECORD_LENGTH];
            sync::copy_sync_pattern(&mut rec);
            rec[12] = 0x06;
            rec[14..16].copy_from_slice(&512u16.to_le_bytes());
            rec[16..26].copy_from_slice(b"payload   ");
            thread_rng().fill(&mut rec[27..539]);
            let mut rec = Record::new(Client::If1, &rec, false).unwrap();
            rec.fix_checksums().unwrap();
            image.extend_from_slice(&hd);
            image.extend_from_slice(&rec.demuxed()[sync::SYNC_PATTERN_LENGTH..]);
        }
        image.push(0x00);

        let cart = Mdr
            .read(&mut Cursor::new(&image), &ReadOptions::strict())
            .unwrap();
        let mut out = Vec::new();
        Mdr.write(&cart, &mut out).unwrap();
        assert_eq!(out, image);
    }

    #[test]
    fn preserves_sector_triples() {
        let image = mdr_image(&[5, 4, 3, 2, 1], Some(0));
        let cart = Mdr
            .read(&mut Cursor::new(&image), &ReadOptions::strict())
            .unwrap();
        cart.seek_to_start();
        for expect in [5u8, 4, 3, 2, 1] {
            let sec = cart.get_next_sector().unwrap();
            assert_eq!(sec.index(), expect);
            assert_eq!(sec.name(), "DEMOTAPE  ");
        }
    }
}
