/*
    Copyright (C) 2023  OqtaDrive developers

    This file is part of OqtaDrive, a Sinclair Microdrive emulator for the
    ZX Spectrum (Interface 1) and the Sinclair QL.

    OqtaDrive is free software: you can redistribute it and/or modify it
    under the terms of the GNU General Public License as published by the
    Free Software Foundation, either version 3 of the License, or (at your
    option) any later version.

    OqtaDrive is distributed in the hope that it will be useful, but WITHOUT
    ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or
    FITNESS FOR A PARTICULAR PURPOSE. See the GNU General Public License for
    more details.
*/
//! Cartridge file format utilities of OqtaDrive.
//!
//! Readers and writers for whole cartridges: **MDR** (Interface 1), **MDV**
//! (QL), the per-drive [autosave] files, and **Z80** snapshots, which load
//! as synthetic Interface 1 cartridges.
use std::io::{self, Read, Write};

use thiserror::Error;

use oqtadrive_core::sector::ValidationError;
use oqtadrive_core::Cartridge;

pub mod autosave;
pub mod mdr;
pub mod mdv;
pub mod repair;
pub mod z80;

pub use autosave::AutoSave;
pub use mdr::Mdr;
pub use mdv::Mdv;
pub use z80::Z80;

/// Error raised by cartridge readers and writers.
#[derive(Debug, Error)]
pub enum FormatError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("defective {what} at index {index}: {source}")]
    Defective {
        what: &'static str,
        index: usize,
        source: ValidationError,
    },
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("unsupported cartridge format: {0}")]
    Unsupported(String),
    #[error("{0}")]
    Corrupt(String),
}

/// Options for reading a cartridge.
#[derive(Clone, Debug, Default)]
pub struct ReadOptions {
    /// Fail on validation errors instead of warning about them.
    pub strict: bool,
    /// Try to fix checksums and sector order while loading.
    pub repair: bool,
    /// Cartridge name, for formats that synthesize one (Z80 snapshots).
    pub name: Option<String>,
}

impl ReadOptions {
    pub fn strict() -> Self {
        ReadOptions {
            strict: true,
            ..ReadOptions::default()
        }
    }
}

/// A reader/writer for one cartridge file format.
pub trait CartridgeFormat: Send + Sync {
    fn read(&self, rd: &mut dyn Read, opts: &ReadOptions) -> Result<Cartridge, FormatError>;
    fn write(&self, cart: &Cartridge, wr: &mut dyn Write) -> Result<(), FormatError>;
}

/// Looks up the format for a type name (`mdr`, `mdv` or `z80`).
pub fn new_format(typ: &str) -> Result<Box<dyn CartridgeFormat>, FormatError> {
    match typ.to_ascii_lowercase().as_str() {
        "mdr" => Ok(Box::new(Mdr)),
        "mdv" => Ok(Box::new(Mdv)),
        "z80" => Ok(Box::new(Z80)),
        other => Err(FormatError::Unsupported(other.to_string())),
    }
}

/// A trait that extends [Read] with methods that ease reading from chunked
/// files.
pub trait ReadExactEx: Read {
    /// Reads the exact number of bytes required to fill `buf` or as many as
    /// are left before EOF, and returns the number of bytes read.
    fn read_exact_or_to_end(&mut self, mut buf: &mut [u8]) -> io::Result<usize> {
        let orig_len = buf.len();
        while !buf.is_empty() {
            match self.read(buf) {
                Ok(0) => break,
                Ok(n) => buf = &mut buf[n..],
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(orig_len - buf.len())
    }

    /// Fills the whole `buf` and returns `Ok(true)`, or returns `Ok(false)`
    /// when exactly zero bytes were read. A partial read is an error of
    /// [io::ErrorKind::UnexpectedEof].
    fn read_exact_or_none(&mut self, buf: &mut [u8]) -> io::Result<bool> {
        let bytes_read = self.read_exact_or_to_end(buf)?;
        if bytes_read == 0 {
            Ok(false)
        } else if bytes_read == buf.len() {
            Ok(true)
        } else {
            Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "failed to fill whole buffer",
            ))
        }
    }
}

impl<R: Read> ReadExactEx for R {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn format_registry() {
        assert!(new_format("mdr").is_ok());
        assert!(new_format("MDV").is_ok());
        assert!(new_format("z80").is_ok());
        assert!(matches!(
            new_format("tap"),
            Err(FormatError::Unsupported(_))
        ));
    }

    #[test]
    fn read_exact_or_to_end_stops_at_eof() {
        let mut rd = Cursor::new([1u8, 2, 3]);
        let mut buf = [0u8; 8];
        assert_eq!(rd.read_exact_or_to_end(&mut buf).unwrap(), 3);
        assert_eq!(&buf[..3], &[1, 2, 3]);
    }

    #[test]
    fn read_exact_or_none_semantics() {
        let mut buf = [0u8; 4];
        assert!(!Cursor::new([]).read_exact_or_none(&mut buf).unwrap());
        assert!(Cursor::new([9u8; 4]).read_exact_or_none(&mut buf).unwrap());
        let err = Cursor::new([9u8; 2])
            .read_exact_or_none(&mut buf)
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }
}
