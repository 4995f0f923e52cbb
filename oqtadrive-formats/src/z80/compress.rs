/*
    Copyright (C) 2023  OqtaDrive developers

    This file is part of OqtaDrive, a Sinclair Microdrive emulator.

    For the full copyright notice, see the lib.rs file.
*/
//! The modified LZF compressor packing snapshot RAM onto the cartridge,
//! plus the Z80 snapshot RLE decompressor.
use std::io::{self, Read};

// match length limits of the storage encoding: lengths 3..=8 fit the
// control byte, longer matches spill into an extension byte
pub(super) const MIN_LENGTH: usize = 3;
pub(super) const MAX_LENGTH: usize = 264;

// maximum offset reachable with the 11 bit offset encoding
const MAX_OFFSET: usize = 7936;

// per byte match bookkeeping: maximum match length and offset, the byte
// itself, and the cost to end used by the backward parser
#[derive(Clone, Copy, Default)]
struct Loj {
    length: usize,
    offset: usize,
    byt: u8,
    cost: f64,
}

/// Decompresses the RLE scheme of Z80 snapshots (`ED ED count value`) into
/// `out`, reading exactly as much input as needed to fill it.
pub(super) fn decompress_z80<R: Read + ?Sized>(rd: &mut R, out: &mut [u8]) -> io::Result<()> {
    let mut pending: Option<u8> = None;
    let mut i = 0;

    while i < out.len() {
        let c = match pending.take() {
            Some(b) => b,
            None => read_u8(rd)?,
        };

        if c == 0xed {
            let next = read_u8(rd)?;
            if next == 0xed {
                let count = read_u8(rd)?;
                let value = read_u8(rd)?;
                if i + count as usize > out.len() {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        "compressed block overruns memory image",
                    ));
                }
                for _ in 0..count {
                    out[i] = value;
                    i += 1;
                }
            } else {
                out[i] = 0xed;
                i += 1;
                pending = Some(next);
            }
        } else {
            out[i] = c;
            i += 1;
        }
    }

    Ok(())
}

pub(super) fn read_u8<R: Read + ?Sized>(rd: &mut R) -> io::Result<u8> {
    let mut b = [0u8];
    rd.read_exact(&mut b)?;
    Ok(b[0])
}

pub(super) fn read_u16_le<R: Read + ?Sized>(rd: &mut R) -> io::Result<u16> {
    let mut b = [0u8; 2];
    rd.read_exact(&mut b)?;
    Ok(u16::from_le_bytes(b))
}

pub(super) fn discard<R: Read + ?Sized>(rd: &mut R, count: usize) -> io::Result<()> {
    io::copy(&mut rd.take(count as u64), &mut io::sink())?;
    Ok(())
}

/// Compresses `file_size` bytes of `fload` into `store` and returns the
/// number of bytes stored.
///
/// With `screen` set, the input is walked in screen layout order (attribute
/// space first, then the matching pixel rows) so the decompressor can
/// stream straight into display memory. Uses a greedy backward parser with
/// cost re-use to pick between literals and matches.
pub(super) fn zxsc(fload: &[u8], store: &mut [u8], file_size: usize, screen: bool) -> usize {
    let mut try_: Vec<Loj> = vec![Loj::default(); file_size];

    // get max length & offset for each byte, this also reorganizes a screen
    // input to a linear sequence
    let mut buffer = if screen { 6144 } else { 0 };
    let mut p = 0;
    try_[p] = Loj {
        length: 0,
        offset: 0,
        cost: 0.0,
        byt: fload[buffer], // first byte is always a literal
    };
    p += 1;

    if screen {
        loop {
            buffer = zx_layout(buffer);
            if buffer >= 6912 {
                break;
            }
            try_[p] = find_match_screen(fload, buffer);
            p += 1;
        }
    } else {
        loop {
            buffer += 1;
            if buffer >= file_size {
                break;
            }
            try_[p] = find_match_linear(fload, buffer, file_size);
            p += 1;
        }
    }

    // calculate cost to end for each byte, backwards with re-use
    let mut p = file_size - 1;
    try_[p].cost = 1.0;

    while p > 1 {
        p -= 1;
        let mut c = p;
        let cost_sum;
        if try_[c].length == 0 {
            let mut cost = 1.0; // literal needs 1 byte
            c += 1;
            // penalize a literal followed by a match by the size of the
            // match, the longer the match the smaller the penalty
            if c < file_size && try_[c].length != 0 {
                cost += (1.0 / try_[c].length as f64) / 10.0;
            }
            cost_sum = cost;
        } else {
            let mut j = try_[c].length;
            if c + j < file_size && j > MIN_LENGTH {
                for i in MIN_LENGTH..try_[c].length {
                    if try_[c + i].cost < try_[c + j].cost {
                        j = i;
                    }
                }
                try_[c].length = j; // adjust if a better route exists
            }
            cost_sum = if try_[c].length < 9 { 2.0 } else { 3.0 };
            c += try_[c].length;
        }

        try_[p].cost = if c < file_size {
            cost_sum + try_[c].cost
        } else {
            cost_sum
        };
    }

    try_[0].cost = 2.0 + try_[1].cost;

    // emit: walk forward, storing literals under control bytes and matches
    // as length/offset pairs
    let mut p = 0;
    let mut store_c = 0; // control byte pointer
    let mut store_l = 1; // literal store pointer
    store[store_c] = 255; // clear initial control byte

    loop {
        if try_[p].length != 0 {
            // look over the full match length for a cheaper alternative
            let mut j = 0;
            for i in 1..try_[p].length {
                if p + i >= file_size {
                    break;
                }
                if i < MIN_LENGTH {
                    if usize::from(store[store_c]) + i > 31 {
                        if try_[p + i].cost + i as f64 + 1.0 < try_[p + j].cost {
                            j = i;
                        }
                    } else if try_[p + i].cost + (i as f64) < try_[p + j].cost {
                        j = i;
                    }
                } else if i < 9 {
                    if try_[p + i].cost + 2.0 < try_[p + j].cost {
                        j = i;
                    }
                } else if try_[p + i].cost + 3.0 < try_[p + j].cost {
                    j = i;
                }
            }
            if j != 0 {
                if j < MIN_LENGTH {
                    for i in 0..j {
                        try_[p + i].length = 0; // change to literals
                    }
                } else {
                    try_[p].length = j;
                }
            }
        }

        if try_[p].length != 0 {
            // store offset + length
            if !screen {
                try_[p].offset -= 1;
            }

            if store[store_c] != 255 {
                store_c = store_l;
                store_l += 1;
            }

            let i = try_[p].length - 1; // jump distance for later
            let mut length = try_[p].length - 2; // 3 -> 1, 8 -> 6 etc.

            if length > 6 {
                // store the second part of the length in the literal store
                length -= 7;
                store[store_l] = length as u8;
                store_l += 1;
                length = 7;
            }

            store[store_c] = ((length as u8) << 5) + (try_[p].offset >> 8) as u8;
            store[store_l] = try_[p].offset as u8;
            store_l += 1;
            store_c = store_l;
            store_l += 1;
            store[store_c] = 255; // clear new control byte
            p += i;
        } else {
            // store a literal; a clear control byte (255) wraps to 0,
            // meaning one literal
            store[store_l] = try_[p].byt;
            store_l += 1;
            store[store_c] = store[store_c].wrapping_add(1);
            if store[store_c] == 31 || p == file_size - 1 {
                store_c = store_l;
                store_l += 1;
                store[store_c] = 255;
            }
        }

        p += 1;
        if p >= file_size {
            break;
        }
    }

    store_l
}

// screen version: attributes first, then pixel rows of the same character
// row, then back to the attributes
fn find_match_screen(buf: &[u8], ix: usize) -> Loj {
    let mut ret = Loj { byt: buf[ix], ..Loj::default() };

    let mut ds = 6144; // dictionary starts at the attribute space

    loop {
        let mut length = 0;
        let mut dc = ds;
        let mut sc = ix;

        while buf[sc] == buf[dc] {
            length += 1;
            if length == MAX_LENGTH {
                break;
            }
            sc = zx_layout(sc);
            if sc == 6912 {
                break;
            }
            // the dictionary may run past its current end, that part gets
            // built up before the decompressor reaches it
            dc = zx_layout(dc);
        }

        if length > 2 && length > ret.length {
            ret.length = length;
            ret.offset = ds;
        }
        if sc == 6912 || length == MAX_LENGTH {
            break;
        }

        ds = zx_layout(ds);
        if ds == ix {
            break;
        }
    }

    ret
}

// linear version
fn find_match_linear(buf: &[u8], ix: usize, file_size: usize) -> Loj {
    let mut ret = Loj { byt: buf[ix], ..Loj::default() };

    let mut ds = ix.saturating_sub(MAX_OFFSET);

    loop {
        let mut length = 0;
        let mut dc = ds;
        let mut sc = ix;

        while buf[sc] == buf[dc] {
            length += 1;
            if length == MAX_LENGTH {
                break;
            }
            sc += 1;
            if sc == file_size {
                break;
            }
            dc += 1;
        }

        if length >= MIN_LENGTH && length > ret.length {
            ret.length = length;
            ret.offset = ix - ds;
        }
        if sc == file_size || length == MAX_LENGTH {
            break;
        }

        ds += 1;
        if ds == ix {
            break;
        }
    }

    ret
}

// follow the screen layout rather than linear memory: attribute bytes
// alternate with the pixel rows of their character cell
pub(super) fn zx_layout(pos: usize) -> usize {
    let p = pos as u16;
    let h = p & 0xff00;

    if h >= 0x1800 {
        // in attr space, rotate hi byte left x3 to move to pixel space
        ((p & 0x00ff) | ((h & 0x0700) << 3)) as usize
    } else {
        // in pixel space, move down one pixel row
        let p = (p & 0x00ff) | (h + 0x0100);
        let mut h = p >> 8;
        if h & 7 == 0 {
            // crossed into the next char, move back to attr space
            h -= 1;
            h >>= 3;
            h &= 3;
            h |= 24;
            (((p & 0x00ff) | (h << 8)) + 1) as usize
        } else {
            p as usize
        }
    }
}

/// Checks whether `comp` can be decompressed in place within Spectrum
/// memory: returns the number of bytes the safety gap is short, or 0 when
/// the compression is decompressible as is.
pub(super) fn decompress_check(comp: &[u8], comp_size: usize) -> usize {
    let mut delta_c = 42240 - comp_size as i64;
    let mut delta_n = 0i64;
    let mut hl = 0usize;

    while hl < comp.len() && comp[hl] != 0xff {
        if comp[hl] < 0x20 {
            // simple literal copy
            let j = comp[hl] as i64 + 1;
            hl += 1;
            delta_c += 1;
            hl += j as usize;
            delta_c += j;
            delta_n += j;
        } else {
            let a = comp[hl] >> 5;
            hl += 1;
            delta_c += 1;
            let mut c = a as i64;
            if a == 7 {
                c += comp[hl] as i64;
                hl += 1;
                delta_c += 1;
            }
            c += 2; // c now holds the real length
            delta_c += 1;
            delta_n += c;
            hl += 1;
            if delta_c < delta_n {
                // decompression caught up with the copy, the gap is too
                // small
                return (delta_n - delta_c) as usize;
            }
        }
    }

    0
}
