/*
    Copyright (C) 2023  OqtaDrive developers

    This file is part of OqtaDrive, a Sinclair Microdrive emulator for the
    ZX Spectrum (Interface 1) and the Sinclair QL.

    OqtaDrive is free software: you can redistribute it and/or modify it
    under the terms of the GNU General Public License as published by the
    Free Software Foundation, either version 3 of the License, or (at your
    option) any later version.

    OqtaDrive is distributed in the hope that it will be useful, but WITHOUT
    ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or
    FITNESS FOR A PARTICULAR PURPOSE. See the GNU General Public License for
    more details.

    You should have received a copy of the GNU General Public License along
    with OqtaDrive. If not, see <http://www.gnu.org/licenses/>.
*/
//! OqtaDrive emulates Sinclair Microdrive storage for the ZX Spectrum (via
//! Interface 1) and the Sinclair QL. A hardware adapter replays
//! bit-streamed sector data onto the Microdrive bus; this crate is the
//! host-side daemon that speaks to that adapter over a serial link, holds
//! up to eight emulated cartridges in memory, and exposes control to local
//! clients through an HTTP API.
//!
//! The sector model lives in `oqtadrive-core`, the cartridge file formats
//! in `oqtadrive-formats`; both are re-exported here.
pub use oqtadrive_core as core;
pub use oqtadrive_formats as formats;

pub mod control;
pub mod daemon;
pub mod repo;
pub mod run;
