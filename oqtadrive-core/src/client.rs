/*
    Copyright (C) 2023  OqtaDrive developers

    This file is part of OqtaDrive, a Sinclair Microdrive emulator.

    For the full copyright notice, see the lib.rs file.
*/
use core::fmt;
use core::str::FromStr;

/// The kind of host computer speaking to the adapter.
///
/// The client drives the sector sizes, the mux track order, the checksum
/// algorithms and the default cartridge file format.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Client {
    If1,
    Ql,
    Unknown,
}

impl Client {
    /// Demuxed header length, including the 12 byte preamble.
    pub fn header_length(self) -> usize {
        match self {
            Client::If1 => crate::if1::HEADER_LENGTH,
            Client::Ql => crate::ql::HEADER_LENGTH,
            Client::Unknown => 0,
        }
    }

    /// Muxed header length as replayed on the wire.
    pub fn header_length_mux(self) -> usize {
        self.header_length() + 1
    }

    /// Demuxed length of a standard record, including the 12 byte preamble.
    pub fn record_length(self) -> usize {
        match self {
            Client::If1 => crate::if1::RECORD_LENGTH,
            Client::Ql => crate::ql::RECORD_LENGTH,
            Client::Unknown => 0,
        }
    }

    /// Muxed length of a standard record as replayed on the wire.
    pub fn record_length_mux(self) -> usize {
        self.record_length() + 1
    }

    /// How much longer a record written during FORMAT is than a standard one.
    pub fn format_extra_bytes(self) -> usize {
        match self {
            Client::If1 => crate::if1::FORMAT_EXTRA_BYTES,
            Client::Ql => crate::ql::FORMAT_EXTRA_BYTES,
            Client::Unknown => 0,
        }
    }

    /// Number of sector slots on an emulated cartridge for this client.
    pub fn sector_count(self) -> usize {
        match self {
            Client::If1 => crate::if1::SECTOR_COUNT,
            Client::Ql => crate::ql::SECTOR_COUNT,
            Client::Unknown => 0,
        }
    }

    /// For the QL, track 1 (DATA1) is ahead of track 2 (DATA2), just the
    /// opposite of the Interface 1, so mux and demux switch tracks.
    pub fn mux_inverted(self) -> bool {
        self == Client::Ql
    }

    /// The cartridge file format used for auto-saving this client's drives.
    pub fn default_format(self) -> &'static str {
        match self {
            Client::If1 => "mdr",
            Client::Ql => "mdv",
            Client::Unknown => "",
        }
    }
}

impl fmt::Display for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Client::If1 => "Interface 1",
            Client::Ql => "QL",
            Client::Unknown => "<unknown>",
        })
    }
}

impl FromStr for Client {
    type Err = UnknownClient;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "if1" => Ok(Client::If1),
            "ql" => Ok(Client::Ql),
            _ => Err(UnknownClient(s.to_string())),
        }
    }
}

/// Error returned when parsing an unrecognized client name.
#[derive(Debug, thiserror::Error)]
#[error("unknown client type: {0}")]
pub struct UnknownClient(pub String);

impl From<u8> for Client {
    fn from(b: u8) -> Self {
        match b {
            0 => Client::If1,
            1 => Client::Ql,
            _ => Client::Unknown,
        }
    }
}

impl From<Client> for u8 {
    fn from(c: Client) -> Self {
        match c {
            Client::If1 => 0,
            Client::Ql => 1,
            Client::Unknown => 2,
        }
    }
}
