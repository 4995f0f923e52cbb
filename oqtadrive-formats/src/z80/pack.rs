/*
    Copyright (C) 2023  OqtaDrive developers

    This file is part of OqtaDrive, a Sinclair Microdrive emulator.

    For the full copyright notice, see the lib.rs file.
*/
//! Packing an unpacked snapshot into a synthetic Interface 1 cartridge.
use log::debug;

use oqtadrive_core::raw::sync;
use oqtadrive_core::sector::{Header, Record, Sector};
use oqtadrive_core::{if1, Cartridge, Client};

use crate::FormatError;

use super::compress::{decompress_check, zxsc};
use super::launcher::*;
use super::snapshot::Snapshot;

// size of the main block behind the screen
const MAIN_BLOCK: usize = 42240;

// lowest point the compressed main block may reach, 0x6100
const MAIN_MAX_SIZE: usize = 40704;

impl Snapshot {
    /// Stores the snapshot on a fresh Interface 1 cartridge as the files
    /// `run` (BASIC loader), `S` (screen), `M` (main block), `L` (launcher)
    /// and, for 128K snapshots, the page files `1` through `5`.
    pub fn pack(mut self) -> Result<Cartridge, FormatError> {
        let cart = Cartridge::new(Client::If1)?;
        cart.set_name(&self.name);

        // the BASIC loader runs from 23813
        let length = self.code.len();
        debug!("run file: {}", length);
        add_to_cartridge(&cart, "run       ", &self.code, length, 23813, 0, 0x00)?;

        // screen, compressed in screen layout order behind its unpacker
        // zxsc worst case adds one control byte per 31 literals
        let mut comp = vec![0u8; 6912 + 256 + SCR_LOAD.len()];
        let mut length = zxsc(&self.main, &mut comp[SCR_LOAD.len()..], 6912, true);
        comp[..SCR_LOAD.len()].copy_from_slice(&SCR_LOAD);
        length += SCR_LOAD.len();
        debug!("screen file: {}", length);
        add_to_cartridge(&cart, "S         ", &comp, length, 25088, 0xffff, 0x03)?;

        if self.otek {
            self.pack_pages(&cart)?;
        }

        // main block: compress, then verify it can decompress in place;
        // the delta tail gets carried by the launcher instead
        let mut comp = vec![0u8; MAIN_BLOCK + MAIN_BLOCK / 31 + 2];
        let mut delta = 3usize;
        let mut length;
        loop {
            length = zxsc(&self.main[6912..], &mut comp, MAIN_BLOCK - delta, false);
            let gap = decompress_check(&comp, length);
            delta += gap;
            if delta > B_GAP {
                return Err(FormatError::Corrupt(format!(
                    "cannot compress main block, delta too large: {} > {}",
                    delta, B_GAP
                )));
            }
            if gap < 1 {
                break;
            }
        }

        if length > MAIN_MAX_SIZE - delta {
            // too big to fit into Spectrum memory
            return Err(FormatError::Corrupt(format!(
                "cannot compress main block, max size exceeded: {} > {}",
                length,
                MAIN_MAX_SIZE - delta
            )));
        }

        let start = 65536 - length;
        debug!("main file: {} (delta: {})", length, delta);
        add_to_cartridge(&cart, "M         ", &comp, length, start, 0xffff, 0x03)?;

        // launcher: patch the compression start and the tail copy, then
        // append the displaced tail bytes
        let comp_start = 65536 - length;
        self.launcher[IX_LCS] = delta as u8;
        self.launcher[IX_CP] = comp_start as u8;
        self.launcher[IX_CP + 1] = (comp_start >> 8) as u8;
        for i in 0..delta {
            self.launcher[LAUNCH_CODE_LEN + i] = self.main[49152 - delta + i];
        }

        let length = LAUNCH_CODE_LEN + delta;
        debug!("launcher file: {}", length);
        add_to_cartridge(&cart, "L         ", &self.launcher, length, 16384, 0xffff, 0x03)?;

        pad_cartridge(&cart)?;

        Ok(cart)
    }

    // the five 128K page files, each behind the page unpacker stub
    fn pack_pages(&self, cart: &Cartridge) -> Result<(), FormatError> {
        let mut comp = vec![0u8; 16384 + 640 + UNPACK.len()];
        let mut length = zxsc(
            &self.main[self.bank[4]..],
            &mut comp[UNPACK.len()..],
            16384,
            false,
        );
        comp[..UNPACK.len()].copy_from_slice(&UNPACK);
        length += UNPACK.len();

        debug!("page file 1: {}", length);
        let start = 32256 - UNPACK.len();
        add_to_cartridge(cart, "1         ", &comp, length, start, 0xffff, 0x03)?;

        // the remaining pages only replace the page number operand, which
        // sits at the very end of the unpacker
        let mut name_count = 1;
        for (bank_ix, page) in [(6usize, 0x13u8), (7, 0x14), (9, 0x16), (10, 0x17)] {
            name_count += 1;
            comp[0] = page;
            let length = zxsc(&self.main[self.bank[bank_ix]..], &mut comp[1..], 16384, false) + 1;
            debug!("page file {}: {}", page & 0x0f, length);
            let file = format!("{:<10}", name_count);
            add_to_cartridge(cart, &file, &comp, length, 32255, 0xffff, 0x03)?;
        }

        Ok(())
    }
}

fn write_u16(b: &mut Vec<u8>, v: usize) {
    b.push(v as u8);
    b.push((v >> 8) as u8);
}

/// Adds one file to the virtual cartridge, spreading it over as many
/// sectors as needed. The first data block carries the 9 byte file header
/// `[type, total length(2), start(2), program length(2), line(2)]`.
fn add_to_cartridge(
    cart: &Cartridge,
    file: &str,
    data: &[u8],
    length: usize,
    start: usize,
    param: usize,
    data_type: u8,
) -> Result<(), FormatError> {
    debug!(
        "adding to cartridge: file {:?}, length {}, start {}, param {}, type {}",
        file, length, start, param, data_type
    );

    let mut data_pos = 0;
    let name = cart.name();

    // +9 for the initial file header
    let num_sec = ((length + 9) / 512) + 1;
    let mut length = length as isize;

    for sequence in 0..num_sec {
        // sector header
        let mut b: Vec<u8> = Vec::with_capacity(if1::RECORD_LENGTH);
        sync::write_sync_pattern(&mut b)?;
        b.push(0x01);
        let sec_ix = cart.advance_access_ix(false);
        b.push((sec_ix + 1) as u8);
        b.push(0x00);
        b.push(0x00);
        b.extend_from_slice(name.as_bytes());
        b.push(0x00);

        let mut hd = Header::new(Client::If1, &b, false)?;
        hd.fix_checksum()?;

        // record descriptor: 0x06 for the end of file block, 0x04 for the
        // blocks before it
        b.clear();
        sync::write_sync_pattern(&mut b)?;
        b.push(if sequence == num_sec - 1 { 0x06 } else { 0x04 });
        b.push(sequence as u8);

        let num = if length > 512 {
            512 // full block until the final part
        } else if num_sec > 1 {
            length
        } else {
            length + 9 // single block files include the file header
        };
        write_u16(&mut b, num as usize);

        b.extend_from_slice(file.as_bytes());
        b.push(0x00);

        let mut s_pos;
        if sequence == 0 {
            // file header: type, total length, start address, program
            // length (or 0xff padding for code), line number
            b.push(data_type);
            write_u16(&mut b, length as usize);
            write_u16(&mut b, start);
            if data_type == 0x00 {
                write_u16(&mut b, length as usize);
                write_u16(&mut b, param);
            } else {
                b.extend_from_slice(&[0xff, 0xff, 0xff, 0xff]);
            }
            s_pos = 36;
        } else {
            s_pos = 27;
        }

        let mut j = length;
        if j > 512 {
            j = 512;
            if sequence == 0 {
                j -= 9;
            }
        }

        for _ in 0..j {
            b.push(data[data_pos]);
            data_pos += 1;
            s_pos += 1;
        }

        while s_pos < if1::RECORD_LENGTH {
            b.push(0x00);
            s_pos += 1;
        }

        length -= if sequence == 0 { 503 } else { 512 };

        let mut rec = Record::new(Client::If1, &b, false)?;
        rec.fix_checksums()?;

        let sec = Sector::new(hd, rec)?;
        cart.set_sector_at(sec_ix, sec);
    }

    Ok(())
}

/// Fills the remaining slots with blank formatted sectors.
fn pad_cartridge(cart: &Cartridge) -> Result<(), FormatError> {
    let name = cart.name();
    let mut ix = cart.access_ix();

    while ix > 0 {
        ix = cart.advance_access_ix(false);

        let mut b: Vec<u8> = Vec::with_capacity(if1::HEADER_LENGTH);
        sync::write_sync_pattern(&mut b)?;
        b.push(0x01);
        b.push((ix + 1) as u8);
        b.push(0x00);
        b.push(0x00);
        b.extend_from_slice(name.as_bytes());
        b.push(0x00);

        let mut hd = Header::new(Client::If1, &b, false)?;
        hd.fix_checksum()?;

        let mut rec = Record::new(Client::If1, &vec![0u8; if1::RECORD_LENGTH], false)?;
        rec.fix_checksums()?;

        let sec = Sector::new(hd, rec)?;
        cart.set_sector_at(ix, sec);
    }

    Ok(())
}
