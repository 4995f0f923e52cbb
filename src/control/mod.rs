/*
    Copyright (C) 2023  OqtaDrive developers

    This file is part of OqtaDrive, a Sinclair Microdrive emulator.

    For the full copyright notice, see the lib.rs file.
*/
//! The control plane: an HTTP API translating external requests into daemon
//! and cartridge operations, plus the long-poll change watcher.
mod api;
mod types;
mod watch;

pub use api::{ApiServer, ApiStopper};
pub use types::{CartridgeInfo, Change, Status};
