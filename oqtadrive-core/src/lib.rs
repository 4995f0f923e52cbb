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
*/
//! The core components of OqtaDrive: the Microdrive sector model.
//!
//! This crate knows how Microdrive sectors look on the wire and in memory:
//! the two-track nibble interleaving ([raw::mux]), the named-field view over
//! sector buffers ([raw::block]), the sync preambles ([raw::sync]), the
//! per-client header and record layouts ([if1], [ql]) and the emulated tape
//! cartridge itself ([cartridge]).
pub mod cartridge;
pub mod client;
pub mod if1;
pub mod ql;
pub mod raw;
pub mod sector;

pub use cartridge::Cartridge;
pub use client::Client;
pub use sector::{Header, Record, Sector, ValidationError};
