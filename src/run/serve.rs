/*
    Copyright (C) 2023  OqtaDrive developers

    This file is part of OqtaDrive, a Sinclair Microdrive emulator.

    For the full copyright notice, see the lib.rs file.
*/
//! The `serve` action: daemon plus API server, with graceful shutdown.
use std::thread;

use anyhow::Context;
use crossbeam_channel::{bounded, select};
use log::{error, info, warn};

use oqtadrive_core::Client;
use oqtadrive_formats::AutoSave;

use crate::control::ApiServer;
use crate::daemon::Daemon;

use super::ServeArgs;

pub(super) fn run(args: ServeArgs) -> anyhow::Result<()> {
    let force = match &args.client {
        Some(c) => c.parse::<Client>()?,
        None => Client::Unknown,
    };

    let autosave = AutoSave::new().context("cannot resolve state directory")?;
    let (mut daemon, handle) = Daemon::new(&args.device, force, autosave);

    let api = ApiServer::bind(&args.address.address, args.repo.clone(), handle.clone())?;
    let stopper = api.stopper();

    let daemon_thread = thread::spawn(move || {
        if let Err(e) = daemon.serve() {
            error!("daemon closed with error: {}", e);
        }
    });

    let api_thread = thread::spawn(move || {
        if let Err(e) = api.serve() {
            error!("API server closed with error: {}", e);
        } else {
            info!("API server stopped");
        }
    });

    let (sig_tx, sig_rx) = bounded(4);
    ctrlc::set_handler(move || {
        let _ = sig_tx.try_send(());
    })
    .context("cannot install signal handler")?;

    // first interrupt: graceful shutdown
    sig_rx.recv().ok();
    info!("shutting down, hit Ctrl-C twice to force exit...");
    stopper.stop();
    handle.stop();

    let (done_tx, done_rx) = bounded(1);
    thread::spawn(move || {
        let _ = daemon_thread.join();
        let _ = api_thread.join();
        let _ = done_tx.send(());
    });

    let mut signals = 1;
    loop {
        select! {
            recv(sig_rx) -> _ => {
                signals += 1;
                if signals == 2 {
                    warn!("shutdown in progress, hit Ctrl-C again to force exit");
                } else {
                    warn!("forcing daemon to stop immediately");
                    std::process::exit(1);
                }
            }
            recv(done_rx) -> _ => {
                info!("OqtaDrive stopped");
                return Ok(());
            }
        }
    }
}
