/*
    Copyright (C) 2023  OqtaDrive developers

    This file is part of OqtaDrive, a Sinclair Microdrive emulator.

    For the full copyright notice, see the lib.rs file.
*/
//! The 4 byte command frames of the adapter protocol and their handlers.
use std::time::{Duration, Instant};

use log::{debug, info};

use oqtadrive_core::sector::{Header, Record};

use super::{Daemon, DaemonError, HardwareMap, DRIVE_COUNT};

pub(crate) const COMMAND_LENGTH: usize = 4;

pub const CMD_HELLO: u8 = b'h'; //     hello (from IF1/QL, resync trigger)
pub const CMD_PING: u8 = b'P'; //      ping/pong (both directions)
pub const CMD_STATUS: u8 = b's'; //    drive state (from IF1/QL)
pub const CMD_GET: u8 = b'g'; //       get sector (from IF1/QL)
pub const CMD_PUT: u8 = b'p'; //       put sector (from IF1/QL)
pub const CMD_TIME_START: u8 = b't'; // start stop watch
pub const CMD_TIME_END: u8 = b'q'; //  stop stop watch
pub const CMD_MAP: u8 = b'm'; //       h/w drive mapping (both directions)
pub const CMD_DEBUG: u8 = b'd'; //     debug message (from IF1/QL)
pub const CMD_RESYNC: u8 = b'r'; //    resync with adapter (to IF1/QL)
pub const CMD_CONFIG: u8 = b'C'; //    adapter configuration (to IF1/QL)

/// Resync mask forcing the Interface 1 client.
pub const MASK_IF1: u8 = 1;
/// Resync mask forcing the QL client.
pub const MASK_QL: u8 = 2;

/// Config item code for the rumble level.
pub const CMD_CONFIG_RUMBLE: u8 = 1;
pub const CMD_CONFIG_RUMBLE_MIN: u8 = 0;
pub const CMD_CONFIG_RUMBLE_MAX: u8 = 255;

const PING: &[u8; 4] = b"Ping";
const PONG: &[u8; 4] = b"Pong";

// a block shorter than this is a header, anything longer a record
const HEADER_MAX_LENGTH: usize = 200;

// state byte flags sent in reply to a STATUS request
const FLAG_LOADED: u8 = 1;
const FLAG_FORMATTED: u8 = 2;
const FLAG_READONLY: u8 = 4;

/// One 4 byte command frame: `cmd, arg0, arg1, arg2`.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Command {
    data: [u8; COMMAND_LENGTH],
}

impl Command {
    pub fn new(data: [u8; COMMAND_LENGTH]) -> Self {
        Command { data }
    }

    pub fn cmd(&self) -> u8 {
        self.data[0]
    }

    fn arg(&self, ix: usize) -> u8 {
        self.data.get(ix + 1).copied().unwrap_or(0)
    }

    // the 1-based drive number carried by this command
    fn drive(&self) -> Result<usize, DaemonError> {
        let drive = self.arg(0) as usize;
        if !(1..=DRIVE_COUNT).contains(&drive) {
            return Err(DaemonError::BadDrive(self.arg(0)));
        }
        Ok(drive)
    }

    pub fn dispatch(&self, d: &mut Daemon) -> Result<(), DaemonError> {
        match self.cmd() {
            CMD_HELLO => {
                d.set_synced(false);
                Ok(())
            }
            CMD_PING => {
                if &self.data == PING {
                    debug!("ping from {}", d.client());
                    d.conduit()?.send(PONG)?;
                    d.process_control();
                }
                Ok(())
            }
            CMD_STATUS => self.status(d),
            CMD_GET => self.get(d),
            CMD_PUT => self.put(d),
            CMD_DEBUG => self.debug(d),
            CMD_TIME_START => self.timer(true, d),
            CMD_TIME_END => self.timer(false, d),
            CMD_MAP => self.drive_map(d),
            _ => Err(DaemonError::UnknownCommand(self.data)),
        }
    }

    // STATUS: on start, report the cartridge state and lock; on stop,
    // auto-save and unlock
    fn status(&self, d: &mut Daemon) -> Result<(), DaemonError> {
        let drive = self.drive();

        let mut state: u8 = 0x80;
        let mut cart = None;
        let mut msg = String::from("<error>");

        if let Ok(dr) = drive {
            cart = d.shared.slot(dr);
            state = 0x00;

            match &cart {
                None => msg = "empty".to_string(),
                Some(c) => {
                    if c.is_formatted() {
                        msg = "formatted".to_string();
                        state = FLAG_LOADED | FLAG_FORMATTED;
                    } else {
                        msg = "blank".to_string();
                        state = FLAG_LOADED;
                    }
                    if c.is_write_protected() {
                        msg += ", write protected";
                        state |= FLAG_READONLY;
                    }
                }
            }
        }

        let started = self.arg(1) == 1;

        d.mru.reset();

        info!(
            "STATUS drive {}, action {}, state: {}",
            self.arg(0),
            if started { "started" } else { "stopped" },
            msg
        );

        if started {
            // drive started, send cartridge state to adapter
            d.conduit()?.send(&[state])?;
            if let Some(c) = &cart {
                if !c.lock_timeout(Duration::from_millis(5)) {
                    return Err(DaemonError::DriveLock(self.arg(0) as usize));
                }
            }
        } else if let Some(c) = &cart {
            if let Err(e) = d.shared.autosave.save(self.arg(0) as usize, c) {
                log::error!("auto-saving drive {} failed: {}", self.arg(0), e);
            }
            c.unlock();
        }

        drive.map(|_| ())
    }

    // GET: send the next sector of the addressed drive
    fn get(&self, d: &mut Daemon) -> Result<(), DaemonError> {
        let drive = self.drive()?;

        if let Some(cart) = d.shared.slot(drive) {
            let sec = cart.get_next_sector();
            d.mru.set_sector(sec.clone());

            if let Some(sec) = sec {
                let to_send = d.conduit()?.fill_block(&sec);

                debug!("GET drive {}, sector {}", drive, sec.index());

                d.debug_start = Instant::now();
                d.conduit()?.send(&[to_send as u8, (to_send >> 8) as u8])?;
                return Ok(d.conduit()?.send_block(to_send)?);
            }
        }

        debug!("GET drive {}, sector (nil)", drive);
        d.conduit()?.send(&[0, 0])?;
        Ok(())
    }

    // PUT: receive a header or record; a record either updates the sector
    // of the preceding GET or completes a new sector
    fn put(&self, d: &mut Daemon) -> Result<(), DaemonError> {
        let drive = self.drive()?;

        if self.arg(2) != 0 {
            // adapter canceled the write
            debug!("PUT canceled, drive {}, code {}", drive, self.arg(2));
            return Ok(());
        }

        let data = {
            let Daemon { conduit, ctl, .. } = d;
            conduit
                .as_mut()
                .ok_or(DaemonError::NotSynced)?
                .receive_block(ctl)?
        };
        let client = d.client();

        if data.len() < HEADER_MAX_LENGTH {
            let hd = Header::new(client, &data, true)?;
            hd.validate()?;
            d.mru.set_header(hd)?;
        } else {
            let rec = Record::new(client, &data, true)?;
            rec.validate()?;
            d.mru.set_record(rec)?;

            if d.mru.is_record_update() {
                let sector = d.mru.sector_index();
                let rec = d
                    .mru
                    .take_record_update()
                    .ok_or(DaemonError::RecordWithoutContext)?;
                match d.shared.slot(drive) {
                    Some(cart) => {
                        if cart.update_record_at_cursor(rec).is_none() {
                            return Err(DaemonError::NoCartridge("updating record"));
                        }
                        debug!("PUT record, drive {}, sector {:?}", drive, sector);
                    }
                    None => return Err(DaemonError::NoCartridge("updating record")),
                }
            }
        }

        if d.mru.is_new_sector() {
            let sec = d.mru.take_new_sector()?;
            match d.shared.slot(drive) {
                Some(cart) => {
                    debug!("PUT sector complete, drive {}, sector {}", drive, sec.index());
                    cart.set_sector_at(cart.access_ix(), sec);
                }
                None => return Err(DaemonError::NoCartridge("creating sector")),
            }
        }

        Ok(())
    }

    // MAP: the adapter reports its hardware drive mapping
    fn drive_map(&self, d: &mut Daemon) -> Result<(), DaemonError> {
        let map = HardwareMap {
            start: i32::from(self.arg(0)),
            end: i32::from(self.arg(1)),
            locked: self.arg(2) == 1,
        };

        info!(
            "MAP start {}, end {}, locked {}",
            map.start, map.end, map.locked
        );

        *d.shared.hw.lock().unwrap() = map;
        Ok(())
    }

    fn debug(&self, d: &mut Daemon) -> Result<(), DaemonError> {
        let now = Instant::now();
        debug!(
            "{}{} {:3}  [ {:08b} ] - {:?}",
            self.arg(0) as char,
            self.arg(1) as char,
            self.arg(2),
            self.arg(2),
            now.duration_since(d.debug_start)
        );
        d.debug_start = now;
        Ok(())
    }

    fn timer(&self, start: bool, d: &mut Daemon) -> Result<(), DaemonError> {
        if start {
            d.debug_start = Instant::now();
        } else {
            debug!("{:?}", d.debug_start.elapsed());
        }
        Ok(())
    }
}
