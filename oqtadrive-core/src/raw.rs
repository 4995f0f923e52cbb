/*
    Copyright (C) 2023  OqtaDrive developers

    This file is part of OqtaDrive, a Sinclair Microdrive emulator.

    For the full copyright notice, see the lib.rs file.
*/
//! Raw byte level utilities: two-track interleaving, field-mapped buffers
//! and sync preambles.
pub mod block;
pub mod mux;
pub mod sync;

pub use block::{Block, Field, FieldMap};
pub use mux::{demux, mux};
