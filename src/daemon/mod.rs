/*
    Copyright (C) 2023  OqtaDrive developers

    This file is part of OqtaDrive, a Sinclair Microdrive emulator.

    For the full copyright notice, see the lib.rs file.
*/
//! The daemon managing communication with the Interface 1/QL adapter.
//!
//! The serial loop runs on its own thread and owns the conduit exclusively;
//! the eight drive slots are lock-free cells shared with the API threads
//! through a [DaemonHandle]. Control commands that must reach the adapter
//! (mapping, resync, configuration) ride a rendezvous queue and get drained
//! by the serial loop right after a Pong reply, when the line is idle.
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use arc_swap::ArcSwapOption;
use crossbeam_channel::{bounded, Receiver, Sender};
use log::{error, info, warn};
use thiserror::Error;

use oqtadrive_core::sector::ValidationError;
use oqtadrive_core::{Cartridge, Client};
use oqtadrive_formats::{AutoSave, FormatError};

mod command;
mod conduit;
mod mru;

pub use command::{
    CMD_CONFIG, CMD_CONFIG_RUMBLE, CMD_CONFIG_RUMBLE_MAX, CMD_CONFIG_RUMBLE_MIN, CMD_DEBUG,
    CMD_GET, CMD_HELLO, CMD_MAP, CMD_PING, CMD_PUT, CMD_RESYNC, CMD_STATUS, CMD_TIME_END,
    CMD_TIME_START, MASK_IF1, MASK_QL,
};
pub use conduit::ConduitError;

use command::Command;
use conduit::{open_port, Conduit};
use mru::Mru;

/// The number of emulated drive slots.
pub const DRIVE_COUNT: usize = 8;

// timeouts of the control plane
const CTRL_TIMEOUT: Duration = Duration::from_secs(20);
const CTRL_ACK_TIMEOUT: Duration = Duration::from_secs(2);
const CART_LOCK_TIMEOUT: Duration = Duration::from_secs(1);

/// The externally visible status of one drive slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DriveStatus {
    Empty,
    Idle,
    Busy,
    Hardware,
}

impl DriveStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DriveStatus::Empty => "empty",
            DriveStatus::Idle => "idle",
            DriveStatus::Busy => "busy",
            DriveStatus::Hardware => "hardware",
        }
    }
}

impl fmt::Display for DriveStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The hardware drive mapping reported by the adapter: a contiguous range
/// of 1-based slot numbers routed to physical drives. `(0, 0)` means
/// hardware drives are off, `(-1, -1)` that the adapter is not connected.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HardwareMap {
    pub start: i32,
    pub end: i32,
    pub locked: bool,
}

/// Errors of the daemon and its command handlers.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("illegal drive number: {0}")]
    BadDrive(u8),
    #[error("could not lock present cartridge")]
    Busy,
    #[error("present cartridge is modified")]
    Modified,
    #[error("not synced with adapter")]
    NotSynced,
    #[error("hardware drive settings are locked")]
    HwLocked,
    #[error("daemon stopped")]
    Stopped,
    #[error("nothing to unload")]
    NothingToUnload,
    #[error("processing next {0} while pending header present")]
    PendingHeader(&'static str),
    #[error("processing next {0} while pending record present")]
    PendingRecord(&'static str),
    #[error("processing next record without sector or header")]
    RecordWithoutContext,
    #[error("error {0}: no cartridge")]
    NoCartridge(&'static str),
    #[error("could not lock cartridge in drive {0}")]
    DriveLock(usize),
    #[error("unknown command: {0:?}")]
    UnknownCommand([u8; 4]),
    #[error("queuing control command timed out")]
    ControlQueueTimeout,
    #[error("running control command timed out")]
    ControlRunTimeout,
    #[error("illegal start index for hardware drive: {0}")]
    BadHwStart(i32),
    #[error("illegal end index for hardware drive: {0}")]
    BadHwEnd(i32),
    #[error("either both hardware drive indexes are 0 or none: start = {0}, end = {1}")]
    BadHwPair(i32, i32),
    #[error("illegal config item: {0}")]
    BadConfigItem(String),
    #[error(transparent)]
    Conduit(#[from] ConduitError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Format(#[from] FormatError),
}

// control messages relayed to the adapter via the serial loop
#[derive(Clone, Copy, Debug)]
enum Control {
    Map { start: u8, end: u8 },
    Resync { mask: u8 },
    Config { code: u8, arg1: u8, arg2: u8 },
}

struct ControlRequest {
    msg: Control,
    ack: Sender<Result<(), DaemonError>>,
}

// interruption checks polled by the conduit whenever a read times out
pub(crate) struct LoopControl {
    shared: Arc<Shared>,
}

impl LoopControl {
    fn interrupted(&self) -> Result<(), ConduitError> {
        if self.shared.stop.load(Ordering::SeqCst) {
            return Err(ConduitError::Stopped);
        }
        if self.shared.reset_requested.load(Ordering::SeqCst) {
            return Err(ConduitError::Reset);
        }
        Ok(())
    }
}

// state shared between the serial loop and the API threads
struct Shared {
    slots: Vec<ArcSwapOption<Cartridge>>,
    synced: AtomicBool,
    client: AtomicU8,
    hw: Mutex<HardwareMap>,
    stop: AtomicBool,
    reset_requested: AtomicBool,
    force_client: Client,
    autosave: AutoSave,
}

impl Shared {
    fn check_drive(&self, ix: usize) -> Result<(), DaemonError> {
        if (1..=DRIVE_COUNT).contains(&ix) {
            Ok(())
        } else {
            Err(DaemonError::BadDrive(ix as u8))
        }
    }

    // loads the slot reference without locking; wait-free
    fn slot(&self, ix: usize) -> Option<Arc<Cartridge>> {
        if (1..=DRIVE_COUNT).contains(&ix) {
            self.slots[ix - 1].load_full()
        } else {
            None
        }
    }

    fn store_slot(&self, ix: usize, cart: Option<Arc<Cartridge>>) {
        if (1..=DRIVE_COUNT).contains(&ix) {
            self.slots[ix - 1].store(cart);
        }
    }

    fn get_client(&self) -> Client {
        if self.synced.load(Ordering::SeqCst) {
            Client::from(self.client.load(Ordering::SeqCst))
        } else {
            Client::Unknown
        }
    }

    // the last known adapter client, regardless of sync state
    fn raw_client(&self) -> Client {
        Client::from(self.client.load(Ordering::SeqCst))
    }

    fn get_hardware_drives(&self) -> (i32, i32, bool) {
        if self.synced.load(Ordering::SeqCst) {
            let hw = self.hw.lock().unwrap();
            (hw.start, hw.end, hw.locked)
        } else {
            (-1, -1, false)
        }
    }

    fn get_status(&self, ix: usize) -> DriveStatus {
        let (start, end, _) = self.get_hardware_drives();
        let ix_i = ix as i32;
        if start > 0 && start <= ix_i && ix_i <= end {
            return DriveStatus::Hardware;
        }
        match self.slot(ix) {
            Some(cart) => {
                if cart.is_locked() {
                    DriveStatus::Busy
                } else {
                    DriveStatus::Idle
                }
            }
            None => DriveStatus::Empty,
        }
    }

    // locks and returns the cartridge at the slot; empty slots are fine,
    // lock contention is not
    fn get_cartridge(&self, ix: usize) -> Result<Option<Arc<Cartridge>>, DaemonError> {
        self.check_drive(ix)?;
        match self.slot(ix) {
            Some(cart) => {
                if cart.lock_timeout(CART_LOCK_TIMEOUT) {
                    Ok(Some(cart))
                } else {
                    Err(DaemonError::Busy)
                }
            }
            None => Ok(None),
        }
    }

    fn set_cartridge(
        &self,
        ix: usize,
        cart: Option<Arc<Cartridge>>,
        force: bool,
    ) -> Result<(), DaemonError> {
        self.check_drive(ix)?;

        if let Some(present) = self.get_cartridge(ix)? {
            if !force && present.is_modified() {
                present.unlock();
                return Err(DaemonError::Modified);
            }
        }

        self.store_slot(ix, cart.clone());

        match cart {
            Some(c) if c.is_formatted() => {
                if !c.is_auto_saved() {
                    if let Err(e) = self.autosave.save(ix, &c) {
                        error!("auto-saving drive {} failed: {}", ix, e);
                    }
                }
            }
            _ => {
                if let Err(e) = self.autosave.remove(ix) {
                    error!("removing auto-save file for drive {} failed: {}", ix, e);
                }
            }
        }

        Ok(())
    }
}

/// The daemon: owns the serial conduit and runs the outer loop.
pub struct Daemon {
    pub(crate) shared: Arc<Shared>,
    pub(crate) ctl: LoopControl,
    pub(crate) conduit: Option<Conduit>,
    pub(crate) mru: Mru,
    pub(crate) debug_start: Instant,
    device: String,
    synced: bool,
    ctrl_rx: Receiver<ControlRequest>,
    handle: DaemonHandle,
}

/// Cloneable control surface of a running [Daemon], used by the API
/// threads. Reads of client kind and hardware mapping are best-effort
/// consistent with the serial loop, not transactional.
#[derive(Clone)]
pub struct DaemonHandle {
    shared: Arc<Shared>,
    ctrl_tx: Sender<ControlRequest>,
}

impl Daemon {
    pub fn new(device: &str, force_client: Client, autosave: AutoSave) -> (Daemon, DaemonHandle) {
        let shared = Arc::new(Shared {
            slots: (0..DRIVE_COUNT).map(|_| ArcSwapOption::from(None)).collect(),
            synced: AtomicBool::new(false),
            client: AtomicU8::new(Client::Unknown.into()),
            hw: Mutex::new(HardwareMap::default()),
            stop: AtomicBool::new(false),
            reset_requested: AtomicBool::new(false),
            force_client,
            autosave,
        });

        let (ctrl_tx, ctrl_rx) = bounded(0);

        let handle = DaemonHandle {
            shared: Arc::clone(&shared),
            ctrl_tx,
        };

        let daemon = Daemon {
            ctl: LoopControl {
                shared: Arc::clone(&shared),
            },
            shared,
            conduit: None,
            mru: Mru::default(),
            debug_start: Instant::now(),
            device: device.to_string(),
            synced: false,
            ctrl_rx,
            handle: handle.clone(),
        };

        (daemon, handle)
    }

    /// Runs the daemon loop until the stop signal arrives.
    pub fn serve(&mut self) -> Result<(), DaemonError> {
        match self.listen() {
            Err(DaemonError::Stopped) => {
                info!("daemon stopped");
                Ok(())
            }
            other => other,
        }
    }

    fn listen(&mut self) -> Result<(), DaemonError> {
        self.load_cartridges();
        self.reset_conduit()?;
        self.fill_empty_drives();

        loop {
            if self.shared.stop.load(Ordering::SeqCst) {
                if self.conduit.take().is_some() {
                    info!("closing serial port");
                }
                return Err(DaemonError::Stopped);
            }

            if self.shared.reset_requested.swap(false, Ordering::SeqCst) {
                info!("resetting conduit on resync request");
                self.mru.reset();
                self.reset_conduit()?;
                continue;
            }

            let mut failed = false;

            if self.synced {
                let received = {
                    let Daemon { conduit, ctl, .. } = self;
                    conduit.as_mut().expect("conduit open while synced").receive_command(ctl)
                };
                match received {
                    Ok(cmd) => {
                        if let Err(e) = cmd.dispatch(self) {
                            match e {
                                DaemonError::Stopped
                                | DaemonError::Conduit(ConduitError::Stopped)
                                | DaemonError::Conduit(ConduitError::Reset) => continue,
                                e => {
                                    error!("error dispatching command: {}", e);
                                    self.set_synced(false);
                                    failed = true;
                                }
                            }
                        }
                    }
                    Err(ConduitError::Stopped) | Err(ConduitError::Reset) => continue,
                    Err(e) => {
                        error!("error receiving command: {}", e);
                        self.set_synced(false);
                        failed = true;
                    }
                }
            } else {
                let res = {
                    let Daemon { conduit, ctl, .. } = self;
                    conduit.as_mut().expect("conduit open in daemon loop").sync_on_hello(ctl)
                };
                match res {
                    Ok(()) => {
                        let client = self.client();
                        self.shared.client.store(client.into(), Ordering::SeqCst);
                        self.set_synced(true);

                        // release stale locks held across the previous
                        // disconnect
                        for ix in 1..=DRIVE_COUNT {
                            if let Some(cart) = self.shared.slot(ix) {
                                cart.unlock();
                            }
                        }

                        self.fill_empty_drives();

                        let force = self.shared.force_client;
                        if force != Client::Unknown && client != force {
                            info!("resyncing with adapter to force client type {}", force);
                            let handle = self.handle.clone();
                            thread::spawn(move || {
                                if let Err(e) = handle.resync(force, false) {
                                    error!("error forcing client type: {}", e);
                                }
                            });
                        }
                    }
                    Err(ConduitError::Stopped) | Err(ConduitError::Reset) => continue,
                    Err(e) => {
                        error!("error syncing with adapter: {}", e);
                        failed = true;
                    }
                }
            }

            if failed {
                self.mru.reset();
                self.reset_conduit()?;
            }
        }
    }

    // (re)opens the serial port with backoff; any previous conduit gets
    // dropped first
    fn reset_conduit(&mut self) -> Result<(), DaemonError> {
        self.set_synced(false);
        if self.conduit.take().is_some() {
            info!("closing serial port");
        }
        *self.shared.hw.lock().unwrap() = HardwareMap::default();

        info!("opening serial port {}", self.device);
        let max_backoff = Duration::from_secs(15);
        let mut backoff = Duration::from_millis(1);
        let mut quiet = false;

        loop {
            if self.shared.stop.load(Ordering::SeqCst) {
                return Err(DaemonError::Stopped);
            }
            match open_port(&self.device) {
                Ok(port) => {
                    info!("serial port opened");
                    self.conduit = Some(Conduit::new(port));
                    return Ok(());
                }
                Err(e) => {
                    if !quiet {
                        warn!("cannot open serial port: {}", e);
                    }
                    if backoff < max_backoff {
                        backoff = backoff * 5 / 4;
                    } else if !quiet {
                        warn!("repeatedly failed to open serial port, will keep trying but stop logging about it");
                        quiet = true;
                    }
                    let deadline = Instant::now() + backoff.max(Duration::from_secs(1));
                    while Instant::now() < deadline {
                        if self.shared.stop.load(Ordering::SeqCst) {
                            return Err(DaemonError::Stopped);
                        }
                        thread::sleep(Duration::from_millis(100));
                    }
                }
            }
        }
    }

    fn load_cartridges(&mut self) {
        for ix in 1..=DRIVE_COUNT {
            match self.shared.autosave.load(ix) {
                Ok(Some(cart)) => {
                    if let Err(e) = self.shared.set_cartridge(ix, Some(Arc::new(cart)), true) {
                        error!("failed loading auto-saved cartridge for drive {}: {}", ix, e);
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    error!("failed loading auto-saved cartridge for drive {}: {}", ix, e)
                }
            }
        }
    }

    // any still-empty slot gets a blank cartridge for the current client
    fn fill_empty_drives(&mut self) {
        let client = self.client();
        for ix in 1..=DRIVE_COUNT {
            if self.shared.slot(ix).is_none() {
                if let Ok(cart) = Cartridge::new(client) {
                    let _ = self.shared.set_cartridge(ix, Some(Arc::new(cart)), true);
                }
            }
        }
    }

    pub(crate) fn client(&self) -> Client {
        self.conduit
            .as_ref()
            .map(|c| c.client)
            .unwrap_or(Client::Unknown)
    }

    pub(crate) fn conduit(&mut self) -> Result<&mut Conduit, DaemonError> {
        self.conduit.as_mut().ok_or(DaemonError::NotSynced)
    }

    pub(crate) fn set_synced(&mut self, synced: bool) {
        self.synced = synced;
        self.shared.synced.store(synced, Ordering::SeqCst);
    }

    // drains one queued control command; called right after a Pong reply,
    // when the serial line is idle
    pub(crate) fn process_control(&mut self) {
        let req = match self.ctrl_rx.try_recv() {
            Ok(req) => req,
            Err(_) => {
                log::trace!("no control command");
                return;
            }
        };

        log::debug!("running control command");
        let res = self.run_control(req.msg);

        if req.ack.send_timeout(res, CTRL_ACK_TIMEOUT).is_err() {
            warn!("control command client went away");
        }
    }

    fn run_control(&mut self, msg: Control) -> Result<(), DaemonError> {
        if !self.synced {
            return Err(DaemonError::NotSynced);
        }
        let conduit = self.conduit()?;
        match msg {
            Control::Map { start, end } => conduit.send(&[CMD_MAP, start, end, 0])?,
            Control::Resync { mask } => conduit.send(&[CMD_RESYNC, mask, 0, 0])?,
            Control::Config { code, arg1, arg2 } => {
                conduit.send(&[CMD_CONFIG, code, arg1, arg2])?
            }
        }
        Ok(())
    }
}

impl DaemonHandle {
    /// Signals the daemon to stop; the serial loop exits at the next
    /// opportunity.
    pub fn stop(&self) {
        info!("daemon stopping...");
        self.shared.stop.store(true, Ordering::SeqCst);
    }

    /// The client kind of the currently connected adapter.
    pub fn get_client(&self) -> Client {
        self.shared.get_client()
    }

    /// The status of the drive slot `ix` (1-based).
    pub fn get_status(&self, ix: usize) -> Result<DriveStatus, DaemonError> {
        self.shared.check_drive(ix)?;
        Ok(self.shared.get_status(ix))
    }

    /// Locks and returns the cartridge in slot `ix` (1-based). The caller
    /// must unlock it.
    pub fn get_cartridge(&self, ix: usize) -> Result<Option<Arc<Cartridge>>, DaemonError> {
        self.shared.get_cartridge(ix)
    }

    /// Replaces the cartridge in slot `ix` (1-based). Without `force`, a
    /// modified cartridge in the slot makes this fail.
    pub fn set_cartridge(
        &self,
        ix: usize,
        cart: Cartridge,
        force: bool,
    ) -> Result<(), DaemonError> {
        self.shared.set_cartridge(ix, Some(Arc::new(cart)), force)
    }

    /// Replaces the cartridge in slot `ix` with a blank one for the current
    /// adapter client.
    pub fn unload_cartridge(&self, ix: usize, force: bool) -> Result<(), DaemonError> {
        self.shared.check_drive(ix)?;
        let client = self.shared.raw_client();
        if client == Client::Unknown {
            return Err(DaemonError::NothingToUnload);
        }
        let cart = Cartridge::new(client)?;
        self.shared.set_cartridge(ix, Some(Arc::new(cart)), force)
    }

    /// The hardware drive mapping, `(-1, -1, false)` when not synced.
    pub fn get_hardware_drives(&self) -> (i32, i32, bool) {
        self.shared.get_hardware_drives()
    }

    /// Requests the adapter to route the 1-based range `start..=end` to
    /// physical drives. `(0, 0)` disables hardware drives.
    pub fn map_hardware_drives(&self, start: i32, end: i32) -> Result<(), DaemonError> {
        let (_, _, locked) = self.shared.get_hardware_drives();
        if self.shared.synced.load(Ordering::SeqCst) && locked {
            return Err(DaemonError::HwLocked);
        }

        if start < 0 || start > DRIVE_COUNT as i32 {
            return Err(DaemonError::BadHwStart(start));
        }
        if end < 0 || end > DRIVE_COUNT as i32 || end < start {
            return Err(DaemonError::BadHwEnd(end));
        }
        if (start > 0 && end == 0) || (end > 0 && start == 0) {
            return Err(DaemonError::BadHwPair(start, end));
        }

        self.queue_control(Control::Map {
            start: start as u8,
            end: end as u8,
        })
    }

    /// Triggers a resync with the adapter, optionally forcing the client
    /// kind, optionally resetting the conduit first.
    pub fn resync(&self, client: Client, reset: bool) -> Result<(), DaemonError> {
        if !self.shared.synced.load(Ordering::SeqCst) {
            return Err(DaemonError::NotSynced);
        }

        let mut client = client;
        let force = self.shared.force_client;
        if force != Client::Unknown && client != force {
            warn!(
                "daemon was started with forced client type '{}', cannot override",
                force
            );
            client = force;
        }

        let mask = match client {
            Client::If1 => MASK_IF1,
            Client::Ql => MASK_QL,
            Client::Unknown => 0,
        };

        if reset {
            self.shared.reset_requested.store(true, Ordering::SeqCst);
            if mask == 0 {
                return Ok(());
            }
        }

        self.queue_control(Control::Resync { mask })
    }

    /// Sends a configuration item to the adapter.
    pub fn configure(&self, item: &str, arg1: u8, arg2: u8) -> Result<(), DaemonError> {
        let code = match item {
            "rumble" => CMD_CONFIG_RUMBLE,
            other => return Err(DaemonError::BadConfigItem(other.to_string())),
        };
        self.queue_control(Control::Config { code, arg1, arg2 })
    }

    // places a control message on the rendezvous queue and waits for the
    // serial loop to run it
    fn queue_control(&self, msg: Control) -> Result<(), DaemonError> {
        let (ack_tx, ack_rx) = bounded(1);
        self.ctrl_tx
            .send_timeout(ControlRequest { msg, ack: ack_tx }, CTRL_TIMEOUT)
            .map_err(|_| DaemonError::ControlQueueTimeout)?;
        log::debug!("control command queued");

        match ack_rx.recv_timeout(CTRL_TIMEOUT) {
            Ok(res) => {
                log::debug!("control command finished");
                res
            }
            Err(_) => Err(DaemonError::ControlRunTimeout),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conduit::Port;
    use oqtadrive_core::raw::{mux, sync};
    use oqtadrive_core::sector::{Header, Record, Sector};
    use oqtadrive_core::if1;
    use std::collections::VecDeque;
    use std::io::{self, Read, Write};
    use std::sync::Mutex as StdMutex;

    // a scripted serial port double: serves segments of input, sleeping
    // before each to simulate line quiet, and records everything written
    struct ScriptedPort {
        script: VecDeque<(Duration, Vec<u8>)>,
        current: Option<(Vec<u8>, usize)>,
        sent: Arc<StdMutex<Vec<u8>>>,
    }

    impl ScriptedPort {
        fn new(script: Vec<(Duration, Vec<u8>)>) -> (Self, Arc<StdMutex<Vec<u8>>>) {
            let sent = Arc::new(StdMutex::new(Vec::new()));
            (
                ScriptedPort {
                    script: script.into(),
                    current: None,
                    sent: Arc::clone(&sent),
                },
                sent,
            )
        }
    }

    impl Read for ScriptedPort {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            loop {
                if let Some((data, pos)) = &mut self.current {
                    if *pos < data.len() {
                        let n = buf.len().min(data.len() - *pos);
                        buf[..n].copy_from_slice(&data[*pos..*pos + n]);
                        *pos += n;
                        return Ok(n);
                    }
                    self.current = None;
                }
                match self.script.pop_front() {
                    Some((delay, data)) => {
                        if !delay.is_zero() {
                            thread::sleep(delay);
                        }
                        self.current = Some((data, 0));
                    }
                    None => return Ok(0), // line dead
                }
            }
        }
    }

    impl Write for ScriptedPort {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.sent.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn test_daemon(port: Box<dyn Port>) -> (Daemon, DaemonHandle, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let autosave = AutoSave::with_base_dir(dir.path().to_path_buf());
        let (mut daemon, handle) = Daemon::new("/dev/null", Client::Unknown, autosave);
        daemon.conduit = Some(Conduit::new(port));
        (daemon, handle, dir)
    }

    fn if1_sector(number: u8) -> Sector {
        let mut buf = vec![0u8; if1::HEADER_LENGTH];
        sync::copy_sync_pattern(&mut buf);
        buf[12] = 0x01;
        buf[13] = number;
        buf[16..26].copy_from_slice(b"DAEMONTAPE");
        let mut hd = Header::new(Client::If1, &buf, false).unwrap();
        hd.fix_checksum().unwrap();

        let mut buf = vec![0u8; if1::RECORD_LENGTH];
        sync::copy_sync_pattern(&mut buf);
        buf[12] = 0x06;
        buf[16..26].copy_from_slice(b"somefile  ");
        let mut rec = Record::new(Client::If1, &buf, false).unwrap();
        rec.fix_checksums().unwrap();

        Sector::new(hd, rec).unwrap()
    }

    // bytes as they arrive from the adapter: the muxed data in reversed
    // nibble bit order, without the locally synthesized preamble
    fn wire_bytes(muxed: &[u8]) -> Vec<u8> {
        muxed[12..].iter().map(|&b| mux::reverse_nibbles(b)).collect()
    }

    #[test]
    fn sync_handshake_detects_client_and_replies() {
        let (port, sent) = ScriptedPort::new(vec![
            (Duration::ZERO, vec![0x00, 0x00, 0x00, 0x00]),
            (Duration::ZERO, b"hloq".to_vec()),
            (Duration::from_millis(100), vec![CMD_HELLO, 0, 0, 0]),
            (Duration::from_millis(600), vec![CMD_HELLO, 0, 0, 0]),
        ]);
        let (mut daemon, _handle, _dir) = test_daemon(Box::new(port));

        let Daemon { conduit, ctl, .. } = &mut daemon;
        conduit.as_mut().unwrap().sync_on_hello(ctl).unwrap();

        assert_eq!(daemon.client(), Client::Ql);
        assert_eq!(sent.lock().unwrap().as_slice(), b"hlod");
    }

    #[test]
    fn get_then_record_update() {
        // preload slot 1 with a cartridge holding sectors 10, 9, 8
        let (port, sent) = ScriptedPort::new(vec![]);
        let (mut daemon, _handle, _dir) = test_daemon(Box::new(port));
        let hello: [u8; 4] = *b"hloi";
        assert!(daemon.conduit.as_mut().unwrap().learn_client(&hello));

        let cart = Cartridge::new(Client::If1).unwrap();
        for n in [10u8, 9, 8] {
            cart.set_next_sector(if1_sector(n));
        }
        cart.set_modified(false);
        cart.seek_to_start();
        daemon.shared.store_slot(1, Some(Arc::new(cart)));
        daemon.set_synced(true);

        // GET: expect the length prefix and a full IF1 block
        Command::new([CMD_GET, 1, 0, 0]).dispatch(&mut daemon).unwrap();
        {
            let sent = sent.lock().unwrap();
            let expect = if1::HEADER_LENGTH_MUX + if1::RECORD_LENGTH_MUX;
            assert_eq!(sent.len(), 2 + expect);
            assert_eq!(
                u16::from_le_bytes([sent[0], sent[1]]) as usize,
                expect
            );
        }
        let cart = daemon.shared.slot(1).unwrap();
        assert_eq!(cart.get_sector_at(cart.access_ix()).unwrap().index(), 10);

        // PUT a record for that sector
        let mut buf = vec![0u8; if1::RECORD_LENGTH];
        sync::copy_sync_pattern(&mut buf);
        buf[12] = 0x06;
        buf[16..26].copy_from_slice(b"updated   ");
        let mut rec = Record::new(Client::If1, &buf, false).unwrap();
        rec.fix_checksums().unwrap();

        let mut script = wire_bytes(rec.muxed());
        script.extend_from_slice(&[0, 0, 0, 0]); // stop trailer, no shift
        daemon.conduit.as_mut().unwrap().replace_port(Box::new(
            ScriptedPort::new(vec![(Duration::ZERO, script)]).0,
        ));

        Command::new([CMD_PUT, 1, 0, 0]).dispatch(&mut daemon).unwrap();

        let cart = daemon.shared.slot(1).unwrap();
        assert!(cart.is_modified());
        let sec = cart.get_sector_at(cart.access_ix()).unwrap();
        assert_eq!(sec.index(), 10);
        assert_eq!(sec.record().name(), "updated   ");
    }

    #[test]
    fn canceled_put_is_ignored() {
        let (port, _sent) = ScriptedPort::new(vec![]);
        let (mut daemon, _handle, _dir) = test_daemon(Box::new(port));
        let hello: [u8; 4] = *b"hloi";
        assert!(daemon.conduit.as_mut().unwrap().learn_client(&hello));
        Command::new([CMD_PUT, 1, 0, 9]).dispatch(&mut daemon).unwrap();
    }

    #[test]
    fn bad_drive_number_is_an_argument_error() {
        let (port, _sent) = ScriptedPort::new(vec![]);
        let (mut daemon, handle, _dir) = test_daemon(Box::new(port));
        assert!(matches!(
            Command::new([CMD_GET, 0, 0, 0]).dispatch(&mut daemon),
            Err(DaemonError::BadDrive(0))
        ));
        assert!(matches!(
            Command::new([CMD_GET, 9, 0, 0]).dispatch(&mut daemon),
            Err(DaemonError::BadDrive(9))
        ));
        assert!(matches!(
            handle.get_status(0),
            Err(DaemonError::BadDrive(0))
        ));
        assert!(matches!(
            handle.get_cartridge(9),
            Err(DaemonError::BadDrive(9))
        ));
    }

    #[test]
    fn locked_hardware_map_rejects_reconfiguration() {
        let (port, _sent) = ScriptedPort::new(vec![]);
        let (mut daemon, handle, _dir) = test_daemon(Box::new(port));
        daemon.set_synced(true);

        Command::new([CMD_MAP, 5, 6, 1]).dispatch(&mut daemon).unwrap();
        assert_eq!(handle.get_hardware_drives(), (5, 6, true));

        assert!(matches!(
            handle.map_hardware_drives(1, 2),
            Err(DaemonError::HwLocked)
        ));
    }

    #[test]
    fn hardware_map_argument_checks() {
        let (port, _sent) = ScriptedPort::new(vec![]);
        let (_daemon, handle, _dir) = test_daemon(Box::new(port));
        assert!(matches!(
            handle.map_hardware_drives(-2, 3),
            Err(DaemonError::BadHwStart(-2))
        ));
        assert!(matches!(
            handle.map_hardware_drives(1, 9),
            Err(DaemonError::BadHwEnd(9))
        ));
        assert!(matches!(
            handle.map_hardware_drives(3, 1),
            Err(DaemonError::BadHwEnd(1))
        ));
        assert!(matches!(
            handle.map_hardware_drives(0, 2),
            Err(DaemonError::BadHwPair(0, 2))
        ));
    }

    #[test]
    fn status_mirrors_slots_and_hardware_range() {
        let (port, _sent) = ScriptedPort::new(vec![]);
        let (mut daemon, handle, _dir) = test_daemon(Box::new(port));
        daemon.set_synced(true);

        assert_eq!(handle.get_status(1).unwrap(), DriveStatus::Empty);

        let cart = Cartridge::new(Client::If1).unwrap();
        daemon.shared.store_slot(1, Some(Arc::new(cart)));
        assert_eq!(handle.get_status(1).unwrap(), DriveStatus::Idle);

        let cart = daemon.shared.slot(1).unwrap();
        assert!(cart.lock_timeout(Duration::from_millis(5)));
        assert_eq!(handle.get_status(1).unwrap(), DriveStatus::Busy);
        cart.unlock();

        Command::new([CMD_MAP, 1, 2, 0]).dispatch(&mut daemon).unwrap();
        assert_eq!(handle.get_status(1).unwrap(), DriveStatus::Hardware);
        assert_eq!(handle.get_status(3).unwrap(), DriveStatus::Empty);
    }

    #[test]
    fn modified_cartridge_needs_force() {
        let (port, _sent) = ScriptedPort::new(vec![]);
        let (daemon, handle, _dir) = test_daemon(Box::new(port));
        let cart = Cartridge::new(Client::If1).unwrap();
        cart.set_next_sector(if1_sector(1));
        assert!(cart.is_modified());
        daemon.shared.store_slot(2, Some(Arc::new(cart)));

        let fresh = Cartridge::new(Client::If1).unwrap();
        assert!(matches!(
            handle.set_cartridge(2, fresh, false),
            Err(DaemonError::Modified)
        ));
        let fresh = Cartridge::new(Client::If1).unwrap();
        handle.set_cartridge(2, fresh, true).unwrap();
        assert!(!daemon.shared.slot(2).unwrap().is_formatted());
    }

    #[test]
    fn unload_requires_known_client() {
        let (port, _sent) = ScriptedPort::new(vec![]);
        let (daemon, handle, _dir) = test_daemon(Box::new(port));
        assert!(matches!(
            handle.unload_cartridge(1, true),
            Err(DaemonError::NothingToUnload)
        ));
        daemon
            .shared
            .client
            .store(Client::Ql.into(), Ordering::SeqCst);
        handle.unload_cartridge(1, true).unwrap();
        assert_eq!(daemon.shared.slot(1).unwrap().client(), Client::Ql);
    }
}
