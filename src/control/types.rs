/*
    Copyright (C) 2023  OqtaDrive developers

    This file is part of OqtaDrive, a Sinclair Microdrive emulator.

    For the full copyright notice, see the lib.rs file.
*/
//! JSON types of the control API.
use std::fmt;

use serde::{Deserialize, Serialize};

use oqtadrive_core::Cartridge;

use crate::daemon::DriveStatus;

/// Per-slot status vector plus the adapter client kind.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Status {
    pub client: String,
    pub drives: Vec<String>,
}

impl Status {
    pub fn add(&mut self, status: &str) {
        self.drives.push(status.to_string());
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "\nclient: {}", self.client)?;
        for (ix, d) in self.drives.iter().enumerate() {
            writeln!(f, "{}: {}", ix + 1, d)?;
        }
        Ok(())
    }
}

/// The externally visible state of one drive's cartridge.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartridgeInfo {
    pub name: String,
    pub status: String,
    pub formatted: bool,
    pub write_protected: bool,
    pub modified: bool,
}

impl CartridgeInfo {
    pub fn fill(&mut self, cart: &Cartridge) {
        self.name = cart.name().trim().to_string();
        self.formatted = cart.is_formatted();
        self.write_protected = cart.is_write_protected();
        self.modified = cart.is_modified();
    }
}

impl fmt::Display for CartridgeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.status != DriveStatus::Idle.as_str() {
            return write!(f, "<{}>", self.status);
        }
        let name = if self.name.is_empty() {
            "<no name>"
        } else {
            self.name.as_str()
        };
        let format = if self.formatted { 'f' } else { 'b' };
        let write = if self.write_protected { 'r' } else { 'w' };
        let modified = if self.modified { '*' } else { ' ' };
        write!(f, "{:<16}{}{}{}", name, format, write, modified)
    }
}

/// A state delta published to long-poll watchers.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Change {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub drives: Option<Vec<CartridgeInfo>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client: Option<String>,
}

impl Change {
    pub fn is_empty(&self) -> bool {
        self.drives.is_none() && self.client.is_none()
    }
}
