/*
    Copyright (C) 2023  OqtaDrive developers

    This file is part of OqtaDrive, a Sinclair Microdrive emulator.

    For the full copyright notice, see the lib.rs file.
*/
//! The most-recently-used sector assembler.
//!
//! A tiny state machine reassembling `(header, record)` pairs from the
//! asynchronous stream of adapter commands: a GET parks the sent sector
//! here, so that a following record-only PUT can be recognized as an update
//! of that sector; a header PUT followed by a record PUT assembles into a
//! brand new sector.
use log::{trace, warn};

use oqtadrive_core::sector::{Header, Record, Sector};

use super::DaemonError;

#[derive(Default)]
pub(crate) struct Mru {
    sector: Option<Sector>,
    header: Option<Header>,
    record: Option<Record>,
}

impl Mru {
    pub fn reset(&mut self) {
        trace!("MRU reset");
        self.sector = None;
        self.header = None;
        self.record = None;
    }

    /// Parks the sector just sent in reply to a GET.
    pub fn set_sector(&mut self, sector: Option<Sector>) {
        if self.header.is_some() {
            warn!("processing next sector while pending header present");
            self.header = None;
        }
        if self.record.is_some() {
            warn!("processing next sector while pending record present");
            self.record = None;
        }
        match &sector {
            Some(s) => trace!("MRU sector {}", s.index()),
            None => trace!("MRU sector (nil)"),
        }
        self.sector = sector;
    }

    /// Accepts a header received via PUT; any parked sector is stale now.
    pub fn set_header(&mut self, header: Header) -> Result<(), DaemonError> {
        if self.header.is_some() {
            return Err(DaemonError::PendingHeader("header"));
        }
        if self.record.is_some() {
            return Err(DaemonError::PendingRecord("header"));
        }
        self.sector = None;
        trace!("MRU header {}", header.index());
        self.header = Some(header);
        Ok(())
    }

    /// Accepts a record received via PUT. Without a preceding header there
    /// must be a parked sector for this to update.
    pub fn set_record(&mut self, record: Record) -> Result<(), DaemonError> {
        if self.header.is_none() && self.sector.is_none() {
            return Err(DaemonError::RecordWithoutContext);
        }
        if self.record.is_some() {
            return Err(DaemonError::PendingRecord("record"));
        }
        trace!("MRU record {}", record.index());
        self.record = Some(record);
        Ok(())
    }

    /// A header and a record are assembled and no sector is parked.
    pub fn is_new_sector(&self) -> bool {
        self.sector.is_none() && self.header.is_some() && self.record.is_some()
    }

    /// A record arrived for a parked sector.
    pub fn is_record_update(&self) -> bool {
        self.sector.is_some() && self.header.is_none() && self.record.is_some()
    }

    /// The index of the parked sector, for logging.
    pub fn sector_index(&self) -> Option<u8> {
        self.sector.as_ref().map(Sector::index)
    }

    /// Builds the new sector from the assembled header and record, then
    /// resets.
    pub fn take_new_sector(&mut self) -> Result<Sector, DaemonError> {
        let header = self.header.take().ok_or(DaemonError::RecordWithoutContext)?;
        let record = self.record.take().ok_or(DaemonError::RecordWithoutContext)?;
        self.reset();
        Ok(Sector::new(header, record)?)
    }

    /// Takes the record of a pending record update, then resets.
    pub fn take_record_update(&mut self) -> Option<Record> {
        let record = self.record.take();
        self.reset();
        record
    }
}
