/*
    Copyright (C) 2023  OqtaDrive developers

    This file is part of OqtaDrive, a Sinclair Microdrive emulator.

    For the full copyright notice, see the lib.rs file.
*/
//! The long-poll change watcher: a single background task polling the
//! daemon and broadcasting deltas to all pending long-pollers.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use log::info;

use crate::daemon::DaemonHandle;

use super::api::get_cartridges;
use super::types::{CartridgeInfo, Change};

// how often the watcher compares the daemon state
const POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Runs the watcher until `running` turns false. Long-pollers enqueue their
/// reply channels on the paired sender; the watcher drains that queue
/// non-blockingly on each change tick, so a stalled poller can never block
/// it.
pub(super) fn watch_daemon(
    handle: DaemonHandle,
    pollers: Receiver<Sender<Change>>,
    running: Arc<AtomicBool>,
) {
    info!("start watching for daemon changes");

    let mut client = String::new();
    let mut list: Option<Vec<CartridgeInfo>> = None;

    while running.load(Ordering::SeqCst) {
        thread::sleep(POLL_INTERVAL);

        let mut change = Change::default();

        let l = get_cartridges(&handle);
        if list.as_ref() != Some(&l) {
            change.drives = Some(l.clone());
            list = Some(l);
        }

        let c = handle.get_client().to_string();
        if c != client {
            change.client = Some(c.clone());
            client = c;
        }

        if change.is_empty() {
            continue;
        }

        info!("daemon changes");

        while let Ok(poller) = pollers.try_recv() {
            info!("notifying long poll client");
            let _ = poller.try_send(change.clone());
        }
    }

    info!("stopped watching for daemon changes");
}

/// Clamps a long-poll timeout request to the allowed range; anything
/// unparseable or out of range falls back to the default.
pub(super) fn clamp_watch_timeout(arg: Option<&str>) -> Duration {
    let timeout = arg
        .and_then(|t| t.parse::<i64>().ok())
        .filter(|t| (0..=1800).contains(t))
        .unwrap_or(600);
    Duration::from_secs(timeout as u64)
}
