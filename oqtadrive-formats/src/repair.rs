/*
    Copyright (C) 2023  OqtaDrive developers

    This file is part of OqtaDrive, a Sinclair Microdrive emulator.

    For the full copyright notice, see the lib.rs file.
*/
//! Cartridge repair passes applied after loading.
use log::debug;

use oqtadrive_core::Cartridge;

/// Restores replay order when the sectors of a loaded cartridge are stored
/// in ascending index order: sector indices must on average decrease along
/// the replay direction, otherwise the slot vector gets reverted.
pub fn repair_order(cart: &Cartridge) {
    let mut cmp = 0i32;

    cart.seek_to_start();
    let mut last: Option<u8> = None;

    for _ in 0..cart.sector_count() {
        let sec = match cart.get_next_sector() {
            Some(sec) => sec,
            None => continue,
        };
        if let Some(last) = last {
            if sec.index() > last {
                cmp += 1;
            }
            if sec.index() < last {
                cmp -= 1;
            }
        }
        last = Some(sec.index());
    }

    if cmp < 0 {
        return;
    }

    debug!("reverting sector order");
    cart.revert();
}
