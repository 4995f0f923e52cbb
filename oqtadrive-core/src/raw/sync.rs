/*
    Copyright (C) 2023  OqtaDrive developers

    This file is part of OqtaDrive, a Sinclair Microdrive emulator.

    For the full copyright notice, see the lib.rs file.
*/
//! Sync preambles preceding headers and records on the tape.
use std::io::{self, Read, Write};

use thiserror::Error;

/// Length of the standard sync pattern.
pub const SYNC_PATTERN_LENGTH: usize = 12;

/// The standard sync pattern: ten zero bytes followed by two 0xff bytes.
pub const SYNC_PATTERN: [u8; SYNC_PATTERN_LENGTH] =
    [0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0xff, 0xff];

/// Length of the data sync pattern used within QL records.
pub const DATA_SYNC_PATTERN_LENGTH: usize = 8;

/// The data sync pattern used by the QL.
pub const DATA_SYNC_PATTERN: [u8; DATA_SYNC_PATTERN_LENGTH] =
    [0, 0, 0, 0, 0, 0, 0xff, 0xff];

// maximum number of leading bytes in a sync allowed to be faulty
const SYNC_ERROR_TOLERANCE: usize = 3;

#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("invalid sync pattern, starting at index {index}: {pattern:?}")]
pub struct SyncError {
    pub index: usize,
    pub pattern: Vec<u8>,
}

/// Copies the standard sync pattern to the start of `dest` and returns the
/// number of bytes copied.
pub fn copy_sync_pattern(dest: &mut [u8]) -> usize {
    let n = dest.len().min(SYNC_PATTERN_LENGTH);
    dest[..n].copy_from_slice(&SYNC_PATTERN[..n]);
    n
}

pub fn write_sync_pattern<W: Write>(mut wr: W) -> io::Result<()> {
    wr.write_all(&SYNC_PATTERN)
}

/// Copies the data sync pattern to the start of `dest` and returns the
/// number of bytes copied.
pub fn copy_data_sync_pattern(dest: &mut [u8]) -> usize {
    let n = dest.len().min(DATA_SYNC_PATTERN_LENGTH);
    dest[..n].copy_from_slice(&DATA_SYNC_PATTERN[..n]);
    n
}

pub fn write_data_sync_pattern<W: Write>(mut wr: W) -> io::Result<()> {
    wr.write_all(&DATA_SYNC_PATTERN)
}

/// Reads a standard sync pattern from `src`, tolerating up to 3 errored
/// leading bytes.
pub fn read_sync<R: Read>(src: R) -> io::Result<Result<(), SyncError>> {
    read_pattern(src, &SYNC_PATTERN, SYNC_ERROR_TOLERANCE)
}

/// Reads a QL data sync pattern from `src`. No errored bytes are tolerated.
pub fn read_data_sync<R: Read>(src: R) -> io::Result<Result<(), SyncError>> {
    read_pattern(src, &DATA_SYNC_PATTERN, 0)
}

fn read_pattern<R: Read>(
    mut src: R,
    spec: &[u8],
    tolerance: usize,
) -> io::Result<Result<(), SyncError>> {
    let mut pattern = vec![0u8; spec.len()];
    src.read_exact(&mut pattern)?;
    for (p, s) in pattern.iter_mut().zip(spec).take(tolerance) {
        *p = *s;
    }
    for (index, (&have, &want)) in pattern.iter().zip(spec).enumerate() {
        if have != want {
            return Ok(Err(SyncError { index, pattern }));
        }
    }
    Ok(Ok(()))
}
