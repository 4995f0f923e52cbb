/*
    Copyright (C) 2023  OqtaDrive developers

    This file is part of OqtaDrive, a Sinclair Microdrive emulator.

    For the full copyright notice, see the lib.rs file.
*/
//! Per-drive persistence of cartridges across daemon restarts.
//!
//! Every drive slot owns an autosave file under the user's state directory,
//! `~/.oqtadrive/<drive>/cart`. The file holds a length prefixed preamble
//! `[version, client, flags]` followed by the cartridge body in the client's
//! default format.
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::PathBuf;
use std::time::Instant;

use bitflags::bitflags;
use log::{debug, info};

use oqtadrive_core::{Cartridge, Client};

use crate::{new_format, FormatError, ReadOptions};

bitflags! {
    /// Cartridge state flags carried in the autosave preamble.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct AutoSaveFlags: u8 {
        const MODIFIED = 0x01;
        const WRITE_PROTECTED = 0x02;
    }
}

/// Autosave file format version; a mismatch is fatal to the load.
pub const AUTO_SAVE_VERSION: u8 = 1;

const IX_VERSION: usize = 0;
const IX_CLIENT: usize = 1;
const IX_FLAGS: usize = 2;

const MAX_PREAMBLE: usize = 64;

/// Handles the per-drive autosave files below one state directory.
///
/// The directory is resolved once at construction; no absolute paths leak
/// out of this component.
pub struct AutoSave {
    base: PathBuf,
}

impl AutoSave {
    /// Uses the default state directory, `~/.oqtadrive`.
    pub fn new() -> io::Result<Self> {
        let home = dirs::home_dir().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, "cannot determine home directory")
        })?;
        Ok(AutoSave {
            base: home.join(".oqtadrive"),
        })
    }

    /// Uses `base` as the state directory.
    pub fn with_base_dir(base: PathBuf) -> Self {
        AutoSave { base }
    }

    fn cart_file(&self, drive: usize) -> PathBuf {
        self.base.join(drive.to_string()).join("cart")
    }

    /// Saves `cart` for `drive`, unless it is unformatted or was saved
    /// already. The write is atomic: a sibling file gets written, synced
    /// and renamed over the previous save.
    pub fn save(&self, drive: usize, cart: &Cartridge) -> Result<(), FormatError> {
        if !cart.is_formatted() || cart.is_auto_saved() {
            return Ok(());
        }

        let start = Instant::now();
        info!("auto-saving drive {}", drive);

        let format = new_format(cart.client().default_format())?;

        let file = self.cart_file(drive);
        let dir = file.parent().expect("cart file always has a parent");
        fs::create_dir_all(dir)?;
        let tmp = file.with_file_name("cart_");

        let fd = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp)?;
        let mut out = BufWriter::new(fd);

        let mut flags = AutoSaveFlags::empty();
        if cart.is_modified() {
            flags |= AutoSaveFlags::MODIFIED;
        }
        if cart.is_write_protected() {
            flags |= AutoSaveFlags::WRITE_PROTECTED;
        }

        let mut preamble = [0u8; 3];
        preamble[IX_VERSION] = AUTO_SAVE_VERSION;
        preamble[IX_CLIENT] = cart.client().into();
        preamble[IX_FLAGS] = flags.bits();
        write_raw(&preamble, &mut out)?;

        format.write(cart, &mut out)?;

        out.flush()?;
        let fd = out.into_inner().map_err(|e| e.into_error())?;
        fd.sync_all()?;
        drop(fd);

        fs::rename(&tmp, &file)?;
        cart.set_auto_saved(true);

        debug!("auto-save took {:?}", start.elapsed());
        Ok(())
    }

    /// Loads the autosaved cartridge for `drive`, `None` when there is no
    /// autosave file.
    pub fn load(&self, drive: usize) -> Result<Option<Cartridge>, FormatError> {
        info!("loading auto-save for drive {}", drive);

        let file = match File::open(self.cart_file(drive)) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!("no auto-save file for drive {}", drive);
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        let mut rd = BufReader::new(file);

        let preamble = read_raw(&mut rd, MAX_PREAMBLE)?;
        if preamble.len() < 3 {
            return Err(FormatError::Corrupt("auto-save preamble too short".into()));
        }

        if preamble[IX_VERSION] != AUTO_SAVE_VERSION {
            return Err(FormatError::Corrupt(format!(
                "incompatible auto-save version, want {}, got {}",
                AUTO_SAVE_VERSION, preamble[IX_VERSION]
            )));
        }

        let client = Client::from(preamble[IX_CLIENT]);
        let format = new_format(client.default_format())?;
        let cart = format.read(&mut rd, &ReadOptions::strict())?;

        let flags = AutoSaveFlags::from_bits_truncate(preamble[IX_FLAGS]);
        cart.set_modified(flags.contains(AutoSaveFlags::MODIFIED));
        cart.set_write_protected(flags.contains(AutoSaveFlags::WRITE_PROTECTED));
        cart.set_auto_saved(true);

        Ok(Some(cart))
    }

    /// Removes the autosave file for `drive`; absent files are fine.
    pub fn remove(&self, drive: usize) -> Result<(), FormatError> {
        match fs::remove_file(self.cart_file(drive)) {
            Ok(()) => {
                info!("removed auto-save for drive {}", drive);
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

fn write_raw<W: Write>(data: &[u8], mut out: W) -> io::Result<()> {
    let len = data.len() as u16;
    out.write_all(&len.to_le_bytes())?;
    out.write_all(data)
}

fn read_raw<R: Read>(mut rd: R, max_len: usize) -> Result<Vec<u8>, FormatError> {
    let mut len = [0u8; 2];
    rd.read_exact(&mut len)?;
    let len = u16::from_le_bytes(len) as usize;
    if len > max_len {
        return Err(FormatError::Corrupt(format!(
            "max length {}, but have {}",
            max_len, len
        )));
    }
    let mut data = vec![0u8; len];
    rd.read_exact(&mut data)?;
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use oqtadrive_core::raw::sync;
    use oqtadrive_core::sector::{Header, Record, Sector};
    use oqtadrive_core::if1;

    fn if1_cart() -> Cartridge {
        let cart = Cartridge::new(Client::If1).unwrap();
        for n in (1..=3u8).rev() {
            let mut buf = vec![0u8; if1::HEADER_LENGTH];
            sync::copy_sync_pattern(&mut buf);
            buf[12] = 0x01;
            buf[13] = n;
            buf[16..26].copy_from_slice(b"AUTOSAVE  ");
            let mut hd = Header::new(Client::If1, &buf, false).unwrap();
            hd.fix_checksum().unwrap();
            let mut buf = vec![0u8; if1::RECORD_LENGTH];
            sync::copy_sync_pattern(&mut buf);
            let mut rec = Record::new(Client::If1, &buf, false).unwrap();
            rec.fix_checksums().unwrap();
            cart.set_next_sector(Sector::new(hd, rec).unwrap());
        }
        cart
    }

    #[test]
    fn save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let saver = AutoSave::with_base_dir(dir.path().to_path_buf());

        let cart = if1_cart();
        cart.set_write_protected(true);
        saver.save(3, &cart).unwrap();
        assert!(cart.is_auto_saved());

        let loaded = saver.load(3).unwrap().unwrap();
        assert_eq!(loaded.client(), Client::If1);
        assert_eq!(loaded.name(), "AUTOSAVE  ");
        assert!(loaded.is_modified());
        assert!(loaded.is_write_protected());
        assert!(loaded.is_auto_saved());
        loaded.seek_to_start();
        assert_eq!(loaded.get_next_sector().unwrap().index(), 3);
    }

    #[test]
    fn unformatted_cartridge_not_saved() {
        let dir = tempfile::tempdir().unwrap();
        let saver = AutoSave::with_base_dir(dir.path().to_path_buf());
        let cart = Cartridge::new(Client::If1).unwrap();
        saver.save(1, &cart).unwrap();
        assert!(saver.load(1).unwrap().is_none());
    }

    #[test]
    fn already_saved_cartridge_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let saver = AutoSave::with_base_dir(dir.path().to_path_buf());
        let cart = if1_cart();
        cart.set_auto_saved(true);
        saver.save(1, &cart).unwrap();
        assert!(saver.load(1).unwrap().is_none());
    }

    #[test]
    fn version_mismatch_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let saver = AutoSave::with_base_dir(dir.path().to_path_buf());
        let cart = if1_cart();
        saver.save(2, &cart).unwrap();

        let file = dir.path().join("2").join("cart");
        let mut bytes = fs::read(&file).unwrap();
        bytes[2] = 99; // version byte, after the length prefix
        fs::write(&file, &bytes).unwrap();

        assert!(matches!(
            saver.load(2),
            Err(FormatError::Corrupt(_))
        ));
    }

    #[test]
    fn remove_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let saver = AutoSave::with_base_dir(dir.path().to_path_buf());
        saver.remove(5).unwrap();
        let cart = if1_cart();
        saver.save(5, &cart).unwrap();
        saver.remove(5).unwrap();
        assert!(saver.load(5).unwrap().is_none());
    }
}
