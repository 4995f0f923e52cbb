/*
    Copyright (C) 2023  OqtaDrive developers

    This file is part of OqtaDrive, a Sinclair Microdrive emulator.

    For the full copyright notice, see the lib.rs file.
*/
//! The serial conduit: framing on the half-duplex link to the adapter.
use std::io::{self, Read, Write};
use std::time::{Duration, Instant};

use log::{debug, info, trace};
use thiserror::Error;

use oqtadrive_core::{Client, Sector};

use super::command::{Command, CMD_HELLO, COMMAND_LENGTH};
use super::LoopControl;

pub(crate) const SEND_BUFFER_LENGTH: usize = 1024;
const RECEIVE_BUFFER_LENGTH: usize = 1024;

const HEADER_FLAG_INDEX: usize = 12;

// serial link parameters of the adapter
const BAUD_RATE: u32 = 1_000_000;
const PORT_TIMEOUT: Duration = Duration::from_millis(200);

// a hello only counts as the sync point when the line was quiet for this
// long before it
const HELLO_QUIET: Duration = Duration::from_millis(500);

pub(crate) const HELLO_DAEMON: &[u8; 4] = b"hlod";
const HELLO_IF1: &[u8; 4] = b"hloi";
const HELLO_QL: &[u8; 4] = b"hloq";

/// Errors on the serial conduit. Apart from [ConduitError::Stopped] and
/// [ConduitError::Reset], every variant is fatal to the current sync.
#[derive(Debug, Error)]
pub enum ConduitError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("serial port closed")]
    Closed,
    #[error("corrupted block, excessive stop shift '{0}'")]
    StopShift(u8),
    #[error("daemon stopped")]
    Stopped,
    #[error("resync reset requested")]
    Reset,
}

/// Anything that can play the role of the serial port. Production uses the
/// real port; tests drive the conduit with in-memory doubles.
pub(crate) trait Port: Read + Write + Send {}

impl<T: Read + Write + Send> Port for T {}

/// Opens the serial port to the adapter.
pub(crate) fn open_port(device: &str) -> Result<Box<dyn Port>, serialport::Error> {
    let port = serialport::new(device, BAUD_RATE)
        .data_bits(serialport::DataBits::Eight)
        .stop_bits(serialport::StopBits::One)
        .parity(serialport::Parity::None)
        .timeout(PORT_TIMEOUT)
        .open()?;
    Ok(Box::new(port))
}

/// The framed serial link to the adapter.
pub(crate) struct Conduit {
    pub client: Client,
    header_length_mux: usize,
    record_length_mux: usize,
    port: Box<dyn Port>,
    send_buf: [u8; SEND_BUFFER_LENGTH],
}

impl Conduit {
    pub fn new(port: Box<dyn Port>) -> Self {
        Conduit {
            client: Client::Unknown,
            header_length_mux: 0,
            record_length_mux: 0,
            port,
            send_buf: [0; SEND_BUFFER_LENGTH],
        }
    }

    /// Fills `data` completely, polling for interruptions whenever the port
    /// read times out.
    pub fn receive(&mut self, data: &mut [u8], ctl: &LoopControl) -> Result<(), ConduitError> {
        let mut filled = 0;
        while filled < data.len() {
            match self.port.read(&mut data[filled..]) {
                Ok(0) => return Err(ConduitError::Closed),
                Ok(n) => filled += n,
                Err(ref e) if e.kind() == io::ErrorKind::TimedOut => {
                    ctl.interrupted()?;
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    pub fn send(&mut self, data: &[u8]) -> Result<(), ConduitError> {
        self.port.write_all(data)?;
        self.port.flush()?;
        Ok(())
    }

    pub fn receive_command(&mut self, ctl: &LoopControl) -> Result<Command, ConduitError> {
        let mut data = [0u8; COMMAND_LENGTH];
        self.receive(&mut data, ctl)?;
        Ok(Command::new(data))
    }

    /// Establishes sync with the adapter: scans for a hello marker to learn
    /// the client kind, consumes the adapter's hello burst until one hello
    /// arrives after a quiet period, then replies with the daemon hello.
    pub fn sync_on_hello(&mut self, ctl: &LoopControl) -> Result<(), ConduitError> {
        info!("syncing with adapter");
        let mut hello = [0u8; COMMAND_LENGTH];

        loop {
            if self.learn_client(&hello) {
                break;
            }
            hello.rotate_left(1);
            let last = hello.len() - 1;
            let mut tail = [0u8];
            self.receive(&mut tail, ctl)?;
            hello[last] = tail[0];
        }

        // find the last live hello from the adapter
        loop {
            let start = Instant::now();
            let cmd = self.receive_command(ctl)?;
            if cmd.cmd() == CMD_HELLO && start.elapsed() > HELLO_QUIET {
                break;
            }
            debug!("discarding command: {:?}", cmd);
        }

        self.send(HELLO_DAEMON)?;

        info!("synced with {}", self.client);
        Ok(())
    }

    /// Checks `h` against the adapter hello markers; on a match, records
    /// the client kind and its per-client block sizes.
    pub(crate) fn learn_client(&mut self, h: &[u8; COMMAND_LENGTH]) -> bool {
        if h == HELLO_IF1 {
            self.client = Client::If1;
        } else if h == HELLO_QL {
            self.client = Client::Ql;
        } else {
            return false;
        }
        self.header_length_mux = self.client.header_length_mux();
        self.record_length_mux = self.client.record_length_mux();
        true
    }

    /// Copies the muxed bytes of `sector` into the send buffer and returns
    /// the block length.
    pub fn fill_block(&mut self, sector: &Sector) -> usize {
        let header = sector.header().muxed();
        self.send_buf[..header.len()].copy_from_slice(header);

        let record = sector.record().muxed();
        self.send_buf[header.len()..header.len() + record.len()].copy_from_slice(record);

        header.len() + record.len()
    }

    /// Transmits `length` bytes of the send buffer.
    pub fn send_block(&mut self, length: usize) -> Result<(), ConduitError> {
        let Conduit { port, send_buf, .. } = self;
        port.write_all(&send_buf[..length])?;
        port.flush()?;
        Ok(())
    }

    /// Receives one block from the adapter: a header, a record, or a longer
    /// FORMAT record. The returned buffer starts with the locally
    /// synthesized 12 byte preamble; the wire carries the bytes behind it.
    pub fn receive_block(&mut self, ctl: &LoopControl) -> Result<Vec<u8>, ConduitError> {
        let mut raw = vec![0u8; RECEIVE_BUFFER_LENGTH];

        let pre = self.fill_preamble(&mut raw);
        let hlm = self.header_length_mux;
        self.receive(&mut raw[pre..hlm], ctl)?;

        // unknown length, check what is being sent
        let rem = self.remaining_bytes(&raw);
        if rem == 0 {
            trace!("header block received");
            raw.truncate(hlm);
        } else {
            trace!("record block received");
            let end = hlm + rem;
            self.receive(&mut raw[hlm..end], ctl)?;
            raw.truncate(end);
        }

        let mut stop = [0u8; 4];
        self.receive(&mut stop, ctl)?;

        let shift = stop[3];
        if shift > 3 {
            return Err(ConduitError::StopShift(shift));
        } else if shift > 0 {
            self.receive(&mut stop[..shift as usize], ctl)?;
        }

        Ok(raw)
    }

    /// Swaps the underlying port, keeping the learned client state.
    #[cfg(test)]
    pub(crate) fn replace_port(&mut self, port: Box<dyn Port>) {
        self.port = port;
    }

    // The first 12 bytes of a received block are synthesized locally, the
    // wire only carries the bytes behind them.
    fn fill_preamble(&self, raw: &mut [u8]) -> usize {
        if raw.len() < 12 {
            return 0;
        }
        for b in raw[..10].iter_mut() {
            *b = 0;
        }
        raw[10] = if self.client == Client::Ql { 0xf0 } else { 0x0f };
        raw[11] = 0xff;
        12
    }

    // The section flag byte sits at position 12, right after the 12 byte
    // lead-in. For a header section this flag has a particular value,
    // depending on the client. If it's a header, reading is done; a record
    // still needs its data read.
    //
    // The bytes come in with DATA2 bits in the high nibble, DATA1 bits in
    // the low nibble, in reversed bit order.
    fn remaining_bytes(&self, raw: &[u8]) -> usize {
        if self.client == Client::Ql {
            // QL
            // raw byte | 0 | 1 | 2 | 3 | 4 | 5 | 6 | 7 | 8 | 9 | 10| 11| 12| 13|
            //          --------------------------------------------------------
            //   DATA1: |l0 |h0 |l2 |h2 |l4 |h4 |l6 |h6 |l8 |h8 |l10|h10|l12|h12| high
            //   DATA2: |   |l1 |h1 |l3 |h3 |l5 |h5 |l7 |h7 |l9 |h9 |l11|h11|   | low
            //
            // bit order in flag and sum is reversed
            let flag = (raw[HEADER_FLAG_INDEX] & 0xf0) | ((raw[HEADER_FLAG_INDEX + 1] & 0xf0) >> 4);
            if flag == 0xff {
                return 0; // header, nothing more to read
            }

            let mut ret = self.record_length_mux - self.header_length_mux;

            // pos 24  hex:  5f  5a  5a  5a  5a                '_ZZZZ'
            let flag = (raw[24] & 0xf0) | ((raw[25] & 0xf0) >> 4);
            let num = ((raw[25] & 0x0f) << 4) | (raw[26] & 0x0f);
            let ch_l = (raw[26] & 0xf0) | ((raw[27] & 0xf0) >> 4);
            let ch_h = ((raw[27] & 0x0f) << 4) | (raw[28] & 0x0f);

            if flag == 0x55 && num == 0xaa && ch_l == 0x55 && ch_h == 0xaa {
                // 0xAA55 in both flag+number and the two byte checksum of a
                // record header signify a record written during format,
                // which is longer than a standard record
                ret += self.client.format_extra_bytes();
            }
            ret
        } else {
            // IF1
            // raw byte | 0 | 1 | 2 | 3 | 4 | 5 | 6 | 7 | 8 | 9 | 10| 11| 12| 13|
            //          --------------------------------------------------------
            //   DATA1: |   |l1 |h1 |l3 |h3 |l5 |h5 |l7 |h7 |l9 |h9 |l11|h11|   | high
            //   DATA2: |l0 |h0 |l2 |h2 |l4 |h4 |l6 |h6 |l8 |h8 |l10|h10|l12|h12| low
            //
            if raw[HEADER_FLAG_INDEX] & 0x0f == 0x08 {
                return 0; // header, nothing more to read
            }
            self.record_length_mux - self.header_length_mux // record
        }
    }
}
