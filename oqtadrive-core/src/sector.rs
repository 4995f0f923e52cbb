/*
    Copyright (C) 2023  OqtaDrive developers

    This file is part of OqtaDrive, a Sinclair Microdrive emulator.

    For the full copyright notice, see the lib.rs file.
*/
//! Sector components: header and record, in their IF1 and QL variants, and
//! the sector as the pair of both.
//!
//! Headers and records come in two concrete layouts keyed by [Client]. The
//! sum types here carry the common capability set: muxed/demuxed bytes,
//! flags, index, name, validation and checksum repair.
use std::io::{self, Write};

use thiserror::Error;

use crate::client::Client;
use crate::raw::block::BlockError;
use crate::{if1, ql};

/// Error raised when parsing or validating sector components.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("invalid {what} check sum, want {want}, got {got}")]
    Checksum {
        what: &'static str,
        want: u16,
        got: u16,
    },
    #[error("{what} too short: {len} bytes")]
    TooShort { what: &'static str, len: usize },
    #[error("sector header is for {header}, record is for {record}")]
    ClientMismatch { header: Client, record: Client },
    #[error("unsupported client type: {0}")]
    UnsupportedClient(Client),
    #[error(transparent)]
    Field(#[from] BlockError),
}

/// A sector descriptor in one of the per-client layouts.
///
/// On the wire it is prefixed by the 12 byte sync pattern, which is part of
/// the demuxed buffer.
#[derive(Clone, Debug)]
pub enum Header {
    If1(if1::Header),
    Ql(ql::Header),
}

impl Header {
    /// Creates a header for `client` from `data`. With `raw` set, `data`
    /// came off the wire and is demuxed first; otherwise it is already
    /// demuxed and is copied.
    ///
    /// Checksum validation is *not* performed here; call [Header::validate]
    /// so the repair path can still construct defective headers and fix
    /// them.
    pub fn new(client: Client, data: &[u8], raw: bool) -> Result<Self, ValidationError> {
        match client {
            Client::If1 => if1::Header::new(data, raw).map(Header::If1),
            Client::Ql => ql::Header::new(data, raw).map(Header::Ql),
            Client::Unknown => Err(ValidationError::UnsupportedClient(client)),
        }
    }

    pub fn client(&self) -> Client {
        match self {
            Header::If1(_) => Client::If1,
            Header::Ql(_) => Client::Ql,
        }
    }

    /// The muxed bytes of this header as needed for replay.
    pub fn muxed(&self) -> &[u8] {
        match self {
            Header::If1(h) => h.muxed(),
            Header::Ql(h) => h.muxed(),
        }
    }

    /// The plain data bytes of this header, including the preamble.
    pub fn demuxed(&self) -> &[u8] {
        match self {
            Header::If1(h) => h.demuxed(),
            Header::Ql(h) => h.demuxed(),
        }
    }

    pub fn flags(&self) -> u8 {
        match self {
            Header::If1(h) => h.flags(),
            Header::Ql(h) => h.flags(),
        }
    }

    /// The sector number.
    pub fn index(&self) -> u8 {
        match self {
            Header::If1(h) => h.index(),
            Header::Ql(h) => h.index(),
        }
    }

    /// The name of the cartridge this header belongs to.
    pub fn name(&self) -> String {
        match self {
            Header::If1(h) => h.name(),
            Header::Ql(h) => h.name(),
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            Header::If1(h) => h.validate(),
            Header::Ql(h) => h.validate(),
        }
    }

    /// Overwrites the stored checksum with the computed one and re-muxes.
    pub fn fix_checksum(&mut self) -> Result<(), ValidationError> {
        match self {
            Header::If1(h) => h.fix_checksum(),
            Header::Ql(h) => h.fix_checksum(),
        }
    }

    pub fn emit<W: Write>(&self, mut w: W) -> io::Result<()> {
        writeln!(
            w,
            "\nHEADER: {:?} - flags: {:X}, index: {}",
            self.name(),
            self.flags(),
            self.index()
        )?;
        hex_dump(&mut w, self.demuxed())
    }
}

/// A sector payload in one of the per-client layouts.
#[derive(Clone, Debug)]
pub enum Record {
    If1(if1::Record),
    Ql(ql::Record),
}

impl Record {
    /// Creates a record for `client` from `data`. With `raw` set, `data`
    /// came off the wire and is demuxed first; otherwise it is already
    /// demuxed and is copied.
    ///
    /// As with [Header::new], checksums are not verified here.
    pub fn new(client: Client, data: &[u8], raw: bool) -> Result<Self, ValidationError> {
        match client {
            Client::If1 => if1::Record::new(data, raw).map(Record::If1),
            Client::Ql => ql::Record::new(data, raw).map(Record::Ql),
            Client::Unknown => Err(ValidationError::UnsupportedClient(client)),
        }
    }

    pub fn client(&self) -> Client {
        match self {
            Record::If1(_) => Client::If1,
            Record::Ql(_) => Client::Ql,
        }
    }

    /// The muxed bytes of this record as needed for replay.
    pub fn muxed(&self) -> &[u8] {
        match self {
            Record::If1(r) => r.muxed(),
            Record::Ql(r) => r.muxed(),
        }
    }

    /// The plain data bytes of this record, including the preamble.
    pub fn demuxed(&self) -> &[u8] {
        match self {
            Record::If1(r) => r.demuxed(),
            Record::Ql(r) => r.demuxed(),
        }
    }

    pub fn flags(&self) -> u8 {
        match self {
            Record::If1(r) => r.flags(),
            Record::Ql(r) => r.flags(),
        }
    }

    /// The record block sequence number.
    pub fn index(&self) -> u8 {
        match self {
            Record::If1(r) => r.index(),
            Record::Ql(r) => r.index(),
        }
    }

    /// The length of the file data held by this record, if known.
    pub fn length(&self) -> Option<u32> {
        match self {
            Record::If1(r) => Some(u32::from(r.length())),
            Record::Ql(r) => r.file_length(),
        }
    }

    /// The name of the file this record belongs to, if known.
    pub fn name(&self) -> String {
        match self {
            Record::If1(r) => r.name(),
            Record::Ql(r) => r.file_name().unwrap_or_default(),
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            Record::If1(r) => r.validate(),
            Record::Ql(r) => r.validate(),
        }
    }

    /// Overwrites the stored checksums with the computed ones and re-muxes.
    pub fn fix_checksums(&mut self) -> Result<(), ValidationError> {
        match self {
            Record::If1(r) => r.fix_checksums(),
            Record::Ql(r) => r.fix_checksums(),
        }
    }

    pub fn emit<W: Write>(&self, mut w: W) -> io::Result<()> {
        writeln!(
            w,
            "\nRECORD: {:?} - flags: {:X}, index: {}, length: {}",
            self.name(),
            self.flags(),
            self.index(),
            self.length().map_or(-1i64, i64::from)
        )?;
        hex_dump(&mut w, self.demuxed())
    }
}

/// The pair of a [Header] and a [Record] occupying one tape sector.
#[derive(Clone, Debug)]
pub struct Sector {
    header: Header,
    record: Record,
}

impl Sector {
    pub fn new(header: Header, record: Record) -> Result<Self, ValidationError> {
        if header.client() != record.client() {
            return Err(ValidationError::ClientMismatch {
                header: header.client(),
                record: record.client(),
            });
        }
        Ok(Sector { header, record })
    }

    /// The sector number, taken from the header.
    pub fn index(&self) -> u8 {
        self.header.index()
    }

    /// The name of the cartridge this sector belongs to.
    pub fn name(&self) -> String {
        self.header.name()
    }

    pub fn client(&self) -> Client {
        self.header.client()
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn record(&self) -> &Record {
        &self.record
    }

    pub fn set_record(&mut self, record: Record) {
        self.record = record;
    }

    pub fn emit<W: Write>(&self, mut w: W) -> io::Result<()> {
        self.header.emit(&mut w)?;
        self.record.emit(&mut w)
    }
}

/// Writes `data` as a canonical hex dump: offset, 16 hex bytes, ASCII.
pub(crate) fn hex_dump<W: Write>(mut w: W, data: &[u8]) -> io::Result<()> {
    for (off, chunk) in data.chunks(16).enumerate() {
        write!(w, "{:08x}  ", off * 16)?;
        for ix in 0..16 {
            match chunk.get(ix) {
                Some(b) => write!(w, "{:02x} ", b)?,
                None => write!(w, "   ")?,
            }
            if ix == 7 {
                write!(w, " ")?;
            }
        }
        write!(w, " |")?;
        for &b in chunk {
            let c = if (0x20..0x7f).contains(&b) { b as char } else { '.' };
            write!(w, "{}", c)?;
        }
        writeln!(w, "|")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_client_rejected() {
        assert!(matches!(
            Header::new(Client::Unknown, &[0; 32], false),
            Err(ValidationError::UnsupportedClient(Client::Unknown))
        ));
        assert!(matches!(
            Record::new(Client::Unknown, &[0; 600], false),
            Err(ValidationError::UnsupportedClient(Client::Unknown))
        ));
    }

    #[test]
    fn client_mismatch_rejected() {
        let hd = Header::new(Client::If1, &[0u8; 27], false).unwrap();
        let rec = Record::new(Client::Ql, &[0u8; 538], false).unwrap();
        assert!(matches!(
            Sector::new(hd, rec),
            Err(ValidationError::ClientMismatch { .. })
        ));
    }

    #[test]
    fn hex_dump_shape() {
        let mut out = Vec::new();
        hex_dump(&mut out, b"0123456789abcdef0").unwrap();
        let text = String::from_utf8(out).unwrap();
        let mut lines = text.lines();
        let first = lines.next().unwrap();
        assert!(first.starts_with("00000000  30 31 32 33"));
        assert!(first.ends_with("|0123456789abcdef|"));
        assert!(lines.next().unwrap().starts_with("00000010  30"));
    }
}
