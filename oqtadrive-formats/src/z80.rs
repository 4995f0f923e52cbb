/*
    Copyright (C) 2023  OqtaDrive developers

    This file is part of OqtaDrive, a Sinclair Microdrive emulator.

    For the full copyright notice, see the lib.rs file.
*/
//! **Z80** snapshot loading.
//!
//! An asymmetrical format: it reads v1/v2/v3 Z80 snapshots, converting them
//! on the fly into synthetic Interface 1 cartridges, and writes MDR. The
//! snapshot's RAM is compressed with a modified LZF scheme; its registers,
//! border colour, 128K banking and interrupt mode are captured into a small
//! launcher program. The resulting cartridge carries the files `run`
//! (BASIC loader), `L` (launcher), `S` (screen) and `M` (main block), plus
//! the page files `1` through `5` for 128K snapshots.
//!
//! See the format reference on
//! [World of Spectrum](https://worldofspectrum.org/faq/reference/z80format.htm).
use std::io::{Read, Write};

use oqtadrive_core::Cartridge;

use crate::mdr::Mdr;
use crate::repair::repair_order;
use crate::{CartridgeFormat, FormatError, ReadOptions};

mod compress;
mod launcher;
mod pack;
mod snapshot;

use snapshot::Snapshot;

/// Reader for Z80 snapshots; writes out MDR.
pub struct Z80;

impl CartridgeFormat for Z80 {
    fn read(&self, rd: &mut dyn Read, opts: &ReadOptions) -> Result<Cartridge, FormatError> {
        let mut snap = Snapshot::unpack(rd)
            .map_err(|e| FormatError::Corrupt(format!("error unpacking Z80 snapshot: {}", e)))?;

        snap.set_name(opts.name.as_deref().unwrap_or(""));

        let cart = snap.pack().map_err(|e| {
            FormatError::Corrupt(format!("error storing Z80 snapshot into cartridge: {}", e))
        })?;

        if opts.repair {
            repair_order(&cart);
        }

        cart.set_modified(false);
        Ok(cart)
    }

    fn write(&self, cart: &Cartridge, wr: &mut dyn Write) -> Result<(), FormatError> {
        Mdr.write(cart, wr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    // minimal 48K v1 snapshot with zeroed, uncompressed RAM
    fn v1_snapshot() -> Vec<u8> {
        let mut snap = vec![
            0x42, 0x01, // AF
            0x34, 0x12, // BC
            0x78, 0x56, // HL
            0x00, 0x80, // PC
            0xfe, 0xff, // SP
            0x3f, 0x70, // I, R
            0x06, // border 3, uncompressed
            0x01, 0x02, // DE
            0x03, 0x04, // BC'
            0x05, 0x06, // DE'
            0x07, 0x08, // HL'
            0x09, 0x0a, // A', F'
            0x0b, 0x0c, // IY
            0x0d, 0x0e, // IX
            0x01, 0x00, // EI, IFF2
            0x01, // IM 1
        ];
        snap.extend_from_slice(&vec![0u8; 49152]);
        snap
    }

    #[test]
    fn snapshot_becomes_if1_cartridge() {
        let opts = ReadOptions {
            strict: false,
            repair: false,
            name: Some("PacMan".into()),
        };
        let cart = Z80.read(&mut Cursor::new(v1_snapshot()), &opts).unwrap();

        assert_eq!(cart.client(), oqtadrive_core::Client::If1);
        assert_eq!(cart.name(), "PacMan    ");
        assert!(cart.is_formatted());
        assert!(!cart.is_modified());

        let mut listing = Vec::new();
        cart.list(&mut listing).unwrap();
        let listing = String::from_utf8(listing).unwrap();
        for file in ["run", "L", "S", "M"] {
            assert!(
                listing.lines().any(|l| l.starts_with(file)),
                "file {} missing:\n{}",
                file,
                listing
            );
        }

        // all slots below the starting cursor hold the files plus blank
        // padding
        for ix in 0..cart.sector_count() - 1 {
            assert!(cart.get_sector_at(ix).is_some(), "slot {} empty", ix);
        }
    }

    #[test]
    fn cartridge_exports_as_mdr() {
        let opts = ReadOptions {
            strict: false,
            repair: false,
            name: Some("EXPORT".into()),
        };
        let cart = Z80.read(&mut Cursor::new(v1_snapshot()), &opts).unwrap();
        let mut out = Vec::new();
        Z80.write(&cart, &mut out).unwrap();
        // 253 sectors of 543 bytes plus the write protect byte
        assert_eq!(out.len(), 253 * 543 + 1);

        let back = Mdr
            .read(&mut Cursor::new(&out), &ReadOptions::strict())
            .unwrap();
        assert_eq!(back.name(), "EXPORT    ");
    }

    #[test]
    fn truncated_snapshot_is_an_error() {
        let mut data = v1_snapshot();
        data.truncate(40000);
        assert!(Z80
            .read(&mut Cursor::new(data), &ReadOptions::default())
            .is_err());
    }
}
