/*
    Copyright (C) 2023  OqtaDrive developers

    This file is part of OqtaDrive, a Sinclair Microdrive emulator.

    For the full copyright notice, see the lib.rs file.
*/
//! The emulated Microdrive tape cartridge.
//!
//! A cartridge is a fixed ring of sector slots with an access index cursor
//! modeling the physical rotation of the tape loop. Sectors are arranged in
//! decreasing replay order on the slot vector, so advancing the tape
//! *decrements* the cursor.
use std::collections::BTreeMap;
use std::io::{self, Write};
use std::sync::Mutex;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender};
use log::{debug, error, trace};

use crate::client::Client;
use crate::sector::{Record, Sector, ValidationError};
use crate::{if1, ql};

struct State {
    name: String,
    write_protected: bool,
    modified: bool,
    auto_saved: bool,
    sectors: Vec<Option<Sector>>,
    access_ix: usize,
}

/// An emulated Microdrive cartridge.
///
/// All mutable state lives behind an internal mutex, so cartridges can be
/// shared across the serial and API threads. Longer operations additionally
/// take the cartridge's advisory lock, a capacity-1 semaphore with timeout
/// acquisition and idempotent release.
pub struct Cartridge {
    client: Client,
    state: Mutex<State>,
    lock_tx: Sender<()>,
    lock_rx: Receiver<()>,
}

impl Cartridge {
    /// Creates a blank cartridge for `client` with its full complement of
    /// empty sector slots.
    pub fn new(client: Client) -> Result<Self, ValidationError> {
        let count = client.sector_count();
        if count == 0 {
            return Err(ValidationError::UnsupportedClient(client));
        }
        let (lock_tx, lock_rx) = bounded(1);
        Ok(Cartridge {
            client,
            state: Mutex::new(State {
                name: String::new(),
                write_protected: false,
                modified: false,
                auto_saved: false,
                sectors: (0..count).map(|_| None).collect(),
                access_ix: count - 1,
            }),
            lock_tx,
            lock_rx,
        })
    }

    pub fn client(&self) -> Client {
        self.client
    }

    pub fn name(&self) -> String {
        self.state.lock().unwrap().name.clone()
    }

    pub fn set_name(&self, name: &str) {
        self.state.lock().unwrap().name = name.to_string();
    }

    pub fn sector_count(&self) -> usize {
        self.client.sector_count()
    }

    // -- advisory lock ----------------------------------------------------

    /// Tries to acquire the cartridge lock within `timeout`. Returns whether
    /// the lock was acquired.
    pub fn lock_timeout(&self, timeout: Duration) -> bool {
        if self.lock_tx.send_timeout((), timeout).is_ok() {
            debug!("cartridge locked");
            true
        } else {
            debug!("cartridge lock timed out");
            false
        }
    }

    /// Releases the cartridge lock. Unlocking an unlocked cartridge is a
    /// no-op.
    pub fn unlock(&self) {
        if self.lock_rx.try_recv().is_ok() {
            debug!("cartridge unlocked");
        } else {
            debug!("cartridge was already unlocked");
        }
    }

    pub fn is_locked(&self) -> bool {
        self.lock_tx.is_full()
    }

    // -- access cursor ----------------------------------------------------

    pub fn access_ix(&self) -> usize {
        self.state.lock().unwrap().access_ix
    }

    /// Moves the cursor one sector forward (the tape moves to the next
    /// sector, the cursor decreases) and returns the new cursor. With
    /// `skip_empty`, empty slots are skipped on a formatted cartridge.
    pub fn advance_access_ix(&self, skip_empty: bool) -> usize {
        self.state.lock().unwrap().move_access_ix(true, skip_empty)
    }

    /// Moves the cursor one sector backward and returns the new cursor.
    pub fn rewind_access_ix(&self, skip_empty: bool) -> usize {
        self.state.lock().unwrap().move_access_ix(false, skip_empty)
    }

    /// Sets the cursor such that the next [Cartridge::get_next_sector]
    /// yields the sector with the highest sector number. A no-op on an
    /// unformatted cartridge.
    pub fn seek_to_start(&self) {
        let mut state = self.state.lock().unwrap();
        let mut max = 0;
        let mut max_ix = None;
        for (ix, sec) in state.sectors.iter().enumerate() {
            if let Some(sec) = sec {
                if sec.index() > max {
                    max = sec.index();
                    max_ix = Some(ix);
                }
            }
        }
        if let Some(ix) = max_ix {
            state.access_ix = ix;
            state.move_access_ix(false, false);
        }
    }

    /// Reverses the slot vector, used when on-disk file order is opposite
    /// of replay order.
    pub fn revert(&self) {
        self.state.lock().unwrap().sectors.reverse();
    }

    // -- sector access ----------------------------------------------------

    pub fn get_next_sector(&self) -> Option<Sector> {
        let mut state = self.state.lock().unwrap();
        let ix = state.move_access_ix(true, true);
        state.sectors[ix].clone()
    }

    pub fn get_previous_sector(&self) -> Option<Sector> {
        let mut state = self.state.lock().unwrap();
        let ix = state.move_access_ix(false, true);
        state.sectors[ix].clone()
    }

    pub fn get_sector_at(&self, ix: usize) -> Option<Sector> {
        let state = self.state.lock().unwrap();
        state.sectors.get(ix).cloned().flatten()
    }

    /// Sets `sector` at the next access index, whether that slot is
    /// occupied or not. The cursor points to the slot afterwards.
    pub fn set_next_sector(&self, sector: Sector) {
        let mut state = self.state.lock().unwrap();
        let ix = state.move_access_ix(true, false);
        state.put_sector(ix, sector);
    }

    /// Sets `sector` at the previous access index, whether that slot is
    /// occupied or not. The cursor points to the slot afterwards.
    pub fn set_previous_sector(&self, sector: Sector) {
        let mut state = self.state.lock().unwrap();
        let ix = state.move_access_ix(false, false);
        state.put_sector(ix, sector);
    }

    pub fn set_sector_at(&self, ix: usize, sector: Sector) {
        let mut state = self.state.lock().unwrap();
        if ix < state.sectors.len() {
            state.put_sector(ix, sector);
        } else {
            error!("trying to set sector at invalid index {}", ix);
        }
    }

    /// Replaces the record of the sector at the current cursor position,
    /// marking the cartridge modified. Returns the sector number, or `None`
    /// when the slot at the cursor is empty.
    pub fn update_record_at_cursor(&self, record: Record) -> Option<u8> {
        let mut state = self.state.lock().unwrap();
        let ix = state.access_ix;
        let number = match state.sectors[ix].as_mut() {
            Some(sec) => {
                sec.set_record(record);
                Some(sec.index())
            }
            None => None,
        };
        if number.is_some() {
            state.set_modified(true);
        }
        number
    }

    // -- flags ------------------------------------------------------------

    pub fn is_formatted(&self) -> bool {
        self.state.lock().unwrap().is_formatted()
    }

    pub fn is_write_protected(&self) -> bool {
        self.state.lock().unwrap().write_protected
    }

    pub fn set_write_protected(&self, p: bool) {
        self.state.lock().unwrap().write_protected = p;
    }

    pub fn is_modified(&self) -> bool {
        self.state.lock().unwrap().modified
    }

    pub fn set_modified(&self, m: bool) {
        self.state.lock().unwrap().set_modified(m);
    }

    pub fn is_auto_saved(&self) -> bool {
        self.state.lock().unwrap().auto_saved
    }

    pub fn set_auto_saved(&self, a: bool) {
        self.state.lock().unwrap().auto_saved = a;
    }

    // -- output -----------------------------------------------------------

    /// Hex dumps all sectors in replay order, each exactly once.
    pub fn emit<W: Write>(&self, mut w: W) -> io::Result<()> {
        self.seek_to_start();
        for _ in 0..self.sector_count() {
            let ix = self.advance_access_ix(false);
            if let Some(sec) = self.get_sector_at(ix) {
                sec.emit(&mut w)?;
            }
        }
        Ok(())
    }

    /// Writes a human readable table of the files on this cartridge.
    pub fn list<W: Write>(&self, mut w: W) -> io::Result<()> {
        writeln!(w, "\n{}\n", self.name())?;

        let state = self.state.lock().unwrap();
        let count = state.sectors.len();
        let mut dir: BTreeMap<String, u32> = BTreeMap::new();
        let mut used = 0;

        match self.client {
            Client::Ql => {
                used = count;
                for sec in state.sectors.iter().flatten() {
                    if let Record::Ql(rec) = sec.record() {
                        if rec.flags() == ql::RECORD_FLAGS_FREE {
                            used -= 1;
                        }
                        if rec.flags() > 0xf0 || rec.index() > 0 {
                            continue;
                        }
                        if let Some(name) = rec.file_name() {
                            dir.insert(name, rec.file_length().unwrap_or(0));
                        }
                    }
                }
            }
            _ => {
                for sec in state.sectors.iter().flatten() {
                    if let Record::If1(rec) = sec.record() {
                        if rec.flags() & if1::RECORD_FLAGS_USED == 0 {
                            continue;
                        }
                        used += 1;
                        let name = if1::translate(rec.name_bytes());
                        if name.is_empty() {
                            continue;
                        }
                        *dir.entry(name).or_insert(0) += u32::from(rec.length());
                    }
                }
            }
        }
        drop(state);

        for (file, size) in &dir {
            match self.client {
                Client::Ql => writeln!(w, "{:<16}{:>8}", file, size)?,
                _ => writeln!(w, "{:<16}{}", file, size)?,
            }
        }

        writeln!(
            w,
            "\n{} of {} sectors used ({}kb free)\n",
            used,
            count,
            (count - used.min(count)) / 2
        )
    }
}

impl State {
    fn is_formatted(&self) -> bool {
        self.sectors.iter().any(Option::is_some)
    }

    fn set_modified(&mut self, m: bool) {
        self.modified = m;
        if m {
            self.auto_saved = false;
        }
    }

    fn put_sector(&mut self, ix: usize, sector: Sector) {
        trace!("setting sector at index {}", ix);
        let name = sector.name();
        if !name.trim().is_empty() {
            self.name = name;
        }
        self.sectors[ix] = Some(sector);
        self.set_modified(true);
    }

    fn move_access_ix(&mut self, forward: bool, skip_empty: bool) -> usize {
        let count = self.sectors.len();
        let from = self.access_ix;

        if !skip_empty || self.is_formatted() {
            loop {
                self.access_ix = if forward {
                    (self.access_ix + count - 1) % count
                } else {
                    (self.access_ix + 1) % count
                };
                if !skip_empty || self.sectors[self.access_ix].is_some() {
                    break;
                }
            }
        }

        trace!("moving access ix from {} to {}", from, self.access_ix);
        self.access_ix
    }
}
