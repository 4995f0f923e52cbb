/*
    Copyright (C) 2023  OqtaDrive developers

    This file is part of OqtaDrive, a Sinclair Microdrive emulator.

    For the full copyright notice, see the lib.rs file.
*/
//! Z80 snapshot parsing: header fields go into the launcher template,
//! memory blocks get decompressed into a flat RAM image.
use std::io::Read;

use log::debug;

use crate::FormatError;

use super::compress::{decompress_z80, discard, read_u16_le, read_u8};
use super::launcher::*;

// flat RAM image layout:
// 0 - 49152: pages 5, 2 & 0 (main memory)
// 128K only: 49152 page 1, 65536 page 3, 81920 page 4, 98304 page 6,
//            114688 page 7
const MAIN_SIZE_48K: usize = 49152;
const MAIN_SIZE_128K: usize = 131072;

const PAGE_SIZE: usize = 16384;

// unmapped entry in the bank table
const BANK_NONE: usize = usize::MAX;

pub(super) struct Snapshot {
    pub compressed: bool,
    pub otek: bool,
    pub version: u8,
    pub main: Vec<u8>,
    pub launcher: Vec<u8>,
    pub code: Vec<u8>,
    pub bank: [usize; 11],
    pub bank_end: u8,
    pub name: String,
}

impl Snapshot {
    pub fn set_name(&mut self, name: &str) {
        let name = if name.is_empty() { "Z80onMDR" } else { name };
        // sector headers carry the name as 10 raw bytes, so keep it ASCII
        let clean: String = name
            .chars()
            .map(|c| if c.is_ascii_graphic() || c == ' ' { c } else { '_' })
            .collect();
        let mut padded = format!("{:<10}", clean);
        padded.truncate(10);
        self.name = padded;
    }

    /// Reads a v1/v2/v3 Z80 snapshot from `rd`.
    pub fn unpack<R: Read + ?Sized>(rd: &mut R) -> Result<Snapshot, FormatError> {
        let mut snap = Snapshot {
            compressed: false,
            otek: false,
            version: 1,
            main: Vec::new(),
            launcher: vec![0u8; LAUNCH_CODE_LEN + B_GAP],
            code: Vec::new(),
            bank: [BANK_NONE; 11],
            bank_end: 0,
            name: String::new(),
        };
        snap.launcher[..LAUNCH_CODE_LEN].copy_from_slice(&LAUNCH_MDR_FULL);

        // header starts with the register set
        //  0   1    A register
        //  1   1    F register
        //  2   2    BC register pair (LSB, i.e. C, first)
        //  4   2    HL register pair
        //  6   2    Program counter (zero for version 2 or 3)
        //  8   2    Stack pointer
        // 10   1    Interrupt register
        // 11   1    Refresh register (bit 7 is not significant)
        fill(
            rd,
            &mut snap.launcher,
            &[
                IX_A,
                IX_F,
                IX_BC,
                IX_BC + 1,
                IX_HL,
                IX_HL + 1,
                IX_JP,
                IX_JP + 1,
                IX_SP,
                IX_SP + 1,
                IX_I,
                IX_R,
            ],
        )?;

        // R is read back 6 increments later on launch
        snap.launcher[IX_R] = snap.launcher[IX_R].wrapping_sub(6);

        // 12   1    Bit 0: bit 7 of R; bits 1-3: border colour;
        //           bit 5: v1 compressed
        let c = read_u8(rd)?;
        snap.compressed = (c & 32) >> 5 == 1;
        if c & 1 == 1 || c > 127 {
            snap.launcher[IX_R] |= 128;
        } else {
            snap.launcher[IX_R] &= 127;
        }
        let border_col = ((c & 14) >> 1) + 0x30;

        // 13   2    DE register pair
        // 15   2    BC' register pair
        // 17   2    DE' register pair
        // 19   2    HL' register pair
        // 21   1    A' register
        // 22   1    F' register
        // 23   2    IY register (again LSB first)
        // 25   2    IX register
        fill(
            rd,
            &mut snap.launcher,
            &[
                IX_DE,
                IX_DE + 1,
                IX_BC_ALT,
                IX_BC_ALT + 1,
                IX_DE_ALT,
                IX_DE_ALT + 1,
                IX_HL_ALT,
                IX_HL_ALT + 1,
                IX_A_ALT,
                IX_F_ALT,
                IX_IY,
                IX_IY + 1,
                IX_IX,
                IX_IX + 1,
            ],
        )?;

        // 27   1    Interrupt flip flop, 0 = DI, otherwise EI
        let c = read_u8(rd)?;
        snap.launcher[IX_EI] = if c == 0 { 0xf3 } else { 0xfb };

        // 28   1    IFF2 (ignored)
        read_u8(rd)?;

        // 29   1    Bits 0-1: interrupt mode
        let c = read_u8(rd)? & 3;
        snap.launcher[IX_IM] = match c {
            0 => 0x46,
            1 => 0x56,
            _ => 0x5e,
        };

        // version 2 & 3 header extension, present when PC is zero
        let mut add_len = 0; // 0 indicates v1, 23 for v2, otherwise v3
        if snap.launcher[IX_JP] == 0 && snap.launcher[IX_JP + 1] == 0 {
            // 30   2    Length of additional header block
            add_len = read_u16_le(rd)? as usize;

            // 32   2    Program counter
            fill(rd, &mut snap.launcher, &[IX_JP, IX_JP + 1])?;

            // 34   1    Hardware mode
            let c = read_u8(rd)?;
            if c == 2 {
                return Err(FormatError::Corrupt(
                    "SamRAM Z80 snapshots not supported".into(),
                ));
            }
            if add_len == 23 {
                snap.otek = c > 2; // v2: mode > 2 means 128K
            } else {
                snap.otek = c > 3; // v3: mode > 3 means 128K
            }

            // 35   1    In 128 mode, last OUT to 0x7ffd
            let c = read_u8(rd)?;
            if snap.otek {
                snap.launcher[IX_OUT] = c;
            }

            // 36   1    0xff if Interface I rom paged [skipped]
            // 37   1    hardware modify byte [skipped]
            // 38   1    last OUT to port 0xfffd [skipped]
            // 39  16    sound chip registers [skipped]
            discard(rd, 19)?;

            // v3 only: T states, Spectator/MGT/Multiface flags, joystick
            // mappings
            if add_len > 23 {
                discard(rd, 31)?;
            }

            // 86   1    last OUT to port 0x1ffd, only with the 55 byte
            //           extension
            if add_len == 55 {
                let c = read_u8(rd)?;
                if c & 1 == 1 {
                    // special paging of the +3/+2A, earlier 128K machines
                    // cannot reproduce it and Microdrives do not work on
                    // +3/+2A hardware
                    return Err(FormatError::Corrupt(
                        "+3/+2A snapshots with special RAM mode enabled not supported".into(),
                    ));
                }
            }
        }

        let full_size = if snap.otek { MAIN_SIZE_128K } else { MAIN_SIZE_48K };
        snap.main = vec![0u8; full_size];

        if add_len == 0 {
            // version 1, 48K only
            debug!("snapshot version: v1");
            snap.version = 1;
            if snap.compressed {
                decompress_z80(rd, &mut snap.main)?;
            } else {
                rd.read_exact(&mut snap.main)?;
            }
        } else {
            if add_len == 23 {
                debug!("snapshot version: v2");
                snap.version = 2;
            } else {
                debug!("snapshot version: v3");
                snap.version = 3;
            }

            // memory blocks: [length(2), page(1), data]; length 0xffff
            // means 16384 bytes, not compressed
            if snap.otek {
                snap.bank[3] = 32768; // page 0
                snap.bank[4] = 49152; // page 1
                snap.bank[5] = 16384; // page 2
                snap.bank[6] = 65536; // page 3
                snap.bank[7] = 81920; // page 4
                snap.bank[8] = 0; // page 5
                snap.bank[9] = 98304; // page 6
                snap.bank[10] = 114688; // page 7
                snap.bank_end = 10;
            } else {
                snap.bank[4] = 16384; // page 2
                snap.bank[5] = 32768; // page 0
                snap.bank[8] = 0; // page 5
                snap.bank_end = 8;
            }

            let mut c = 0u8;
            while c != snap.bank_end {
                let length = read_u16_le(rd)?;
                c = read_u8(rd)?;

                let addr = snap
                    .bank
                    .get(c as usize)
                    .copied()
                    .unwrap_or(BANK_NONE);

                if addr != BANK_NONE {
                    let target = &mut snap.main[addr..addr + PAGE_SIZE];
                    if length == 65535 {
                        rd.read_exact(target)?;
                    } else {
                        decompress_z80(rd, target)?;
                    }
                } else {
                    // a page this conversion has no use for (ROM dumps,
                    // Multiface); its data still needs consuming
                    let mut scratch = vec![0u8; PAGE_SIZE];
                    if length == 65535 {
                        rd.read_exact(&mut scratch)?;
                    } else {
                        decompress_z80(rd, &mut scratch)?;
                    }
                }
            }
        }

        if snap.otek {
            debug!("snapshot size: 128k");
            snap.code = MDR_BL_128K.to_vec();
            snap.code[IX_128K_BORDER] = border_col;
            snap.code[IX_128K_PAPER] = border_col;
        } else {
            debug!("snapshot size: 48k");
            snap.code = MDR_BL_48K.to_vec();
            snap.code[IX_48K_BORDER] = border_col;
            snap.code[IX_48K_PAPER] = border_col;
        }

        Ok(snap)
    }
}

fn fill<R: Read + ?Sized>(rd: &mut R, target: &mut [u8], indexes: &[usize]) -> Result<(), FormatError> {
    for &ix in indexes {
        if ix >= target.len() {
            return Err(FormatError::Corrupt(format!(
                "fill index out of range: {}",
                ix
            )));
        }
        target[ix] = read_u8(rd)?;
    }
    Ok(())
}
