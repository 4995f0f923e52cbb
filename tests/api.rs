/*
    Copyright (C) 2023  OqtaDrive developers

    This file is part of OqtaDrive, a Sinclair Microdrive emulator.

    For the full copyright notice, see the lib.rs file.
*/
//! End to end tests of the control API against a daemon without an adapter.
use std::io::Read;
use std::thread;
use std::time::{Duration, Instant};

use oqtadrive::control::ApiServer;
use oqtadrive::core::raw::sync;
use oqtadrive::core::sector::{Header, Record};
use oqtadrive::core::{if1, Client};
use oqtadrive::daemon::Daemon;
use oqtadrive::formats::AutoSave;

struct Api {
    base: String,
    _dir: tempfile::TempDir,
}

fn start_api() -> (Api, oqtadrive::daemon::DaemonHandle) {
    let dir = tempfile::tempdir().unwrap();
    let autosave = AutoSave::with_base_dir(dir.path().to_path_buf());
    let (_daemon, handle) = Daemon::new("/dev/null", Client::Unknown, autosave);

    let api = ApiServer::bind("127.0.0.1:0", None, handle.clone()).unwrap();
    let base = format!("http://{}", api.address());
    thread::spawn(move || api.serve().unwrap());

    (Api { base, _dir: dir }, handle)
}

fn mdr_image(sectors: &[u8], name: &[u8; 10]) -> Vec<u8> {
    let mut image = Vec::new();
    for &n in sectors {
        let mut buf = vec![0u8; if1::HEADER_LENGTH];
        sync::copy_sync_pattern(&mut buf);
        buf[12] = 0x01;
        buf[13] = n;
        buf[16..26].copy_from_slice(name);
        let mut hd = Header::new(Client::If1, &buf, false).unwrap();
        hd.fix_checksum().unwrap();

        let mut buf = vec![0u8; if1::RECORD_LENGTH];
        sync::copy_sync_pattern(&mut buf);
        buf[12] = 0x06;
        buf[16..26].copy_from_slice(b"somefile  ");
        let mut rec = Record::new(Client::If1, &buf, false).unwrap();
        rec.fix_checksums().unwrap();

        image.extend_from_slice(&hd.demuxed()[12..]);
        image.extend_from_slice(&rec.demuxed()[12..]);
    }
    image.push(0x00);
    image
}

fn v1_snapshot() -> Vec<u8> {
    let mut snap = vec![
        0x42, 0x01, 0x34, 0x12, 0x78, 0x56, 0x00, 0x80, 0xfe, 0xff, 0x3f, 0x70,
        0x06, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0a, 0x0b,
        0x0c, 0x0d, 0x0e, 0x01, 0x00, 0x01,
    ];
    snap.extend_from_slice(&vec![0u8; 49152]);
    snap
}

#[test]
fn load_then_save_round_trips_byte_identical() {
    let (api, _handle) = start_api();

    let image = mdr_image(&[3, 2, 1], b"DEMOTAPE  ");
    let resp = ureq::put(&format!("{}/drive/3?type=mdr", api.base))
        .send_bytes(&image)
        .unwrap();
    assert_eq!(resp.status(), 200);

    // the slot reports idle and carries the trimmed cartridge name
    let status: serde_json::Value = ureq::get(&format!("{}/status", api.base))
        .set("Content-Type", "application/json")
        .call()
        .unwrap()
        .into_json()
        .unwrap();
    assert_eq!(status["drives"][2], "idle");

    let list: serde_json::Value = ureq::get(&format!("{}/list", api.base))
        .set("Content-Type", "application/json")
        .call()
        .unwrap()
        .into_json()
        .unwrap();
    assert_eq!(list[2]["name"], "DEMOTAPE");
    assert_eq!(list[2]["formatted"], true);

    // export yields a byte identical MDR
    let resp = ureq::get(&format!("{}/drive/3?type=mdr", api.base))
        .call()
        .unwrap();
    let mut out = Vec::new();
    resp.into_reader().read_to_end(&mut out).unwrap();
    assert_eq!(out, image);
}

#[test]
fn busy_drive_replies_423_within_a_second() {
    let (api, handle) = start_api();

    let image = mdr_image(&[2, 1], b"BUSYTAPE  ");
    ureq::put(&format!("{}/drive/2?type=mdr", api.base))
        .send_bytes(&image)
        .unwrap();

    // hold the cartridge lock, as a long running dump would
    let cart = handle.get_cartridge(2).unwrap().unwrap();

    let start = Instant::now();
    let err = ureq::put(&format!("{}/drive/2?type=mdr&force=true", api.base))
        .send_bytes(&image)
        .unwrap_err();
    match err {
        ureq::Error::Status(code, _) => assert_eq!(code, 423),
        other => panic!("unexpected error: {}", other),
    }
    assert!(start.elapsed() < Duration::from_secs(2));

    cart.unlock();
}

#[test]
fn modified_cartridge_conflicts_without_force() {
    let (api, handle) = start_api();

    let image = mdr_image(&[2, 1], b"MODTAPE   ");
    ureq::put(&format!("{}/drive/4?type=mdr", api.base))
        .send_bytes(&image)
        .unwrap();

    let cart = handle.get_cartridge(4).unwrap().unwrap();
    cart.set_modified(true);
    cart.unlock();

    let err = ureq::put(&format!("{}/drive/4?type=mdr", api.base))
        .send_bytes(&image)
        .unwrap_err();
    match err {
        ureq::Error::Status(code, _) => assert_eq!(code, 409),
        other => panic!("unexpected error: {}", other),
    }

    // with force, the load goes through
    let resp = ureq::put(&format!("{}/drive/4?type=mdr&force=true", api.base))
        .send_bytes(&image)
        .unwrap();
    assert_eq!(resp.status(), 200);
}

#[test]
fn bad_arguments_reply_422() {
    let (api, _handle) = start_api();

    for url in [
        format!("{}/drive/3", api.base),          // missing type
        format!("{}/drive/3?type=tap", api.base), // unknown type
    ] {
        let err = ureq::put(&url).send_bytes(b"x").unwrap_err();
        match err {
            ureq::Error::Status(code, _) => assert_eq!(code, 422, "{}", url),
            other => panic!("unexpected error: {}", other),
        }
    }

    let err = ureq::put(&format!("{}/map?start=1&end=9", api.base))
        .send_bytes(b"")
        .unwrap_err();
    match err {
        ureq::Error::Status(code, _) => assert_eq!(code, 422),
        other => panic!("unexpected error: {}", other),
    }
}

#[test]
fn z80_snapshot_loads_as_if1_cartridge() {
    let (api, _handle) = start_api();

    let resp = ureq::put(&format!("{}/drive/1?type=z80&name=PacMan", api.base))
        .send_bytes(&v1_snapshot())
        .unwrap();
    assert_eq!(resp.status(), 200);

    let list: serde_json::Value = ureq::get(&format!("{}/list", api.base))
        .set("Content-Type", "application/json")
        .call()
        .unwrap()
        .into_json()
        .unwrap();
    assert_eq!(list[0]["name"], "PacMan");

    let files = ureq::get(&format!("{}/drive/1/list", api.base))
        .call()
        .unwrap()
        .into_string()
        .unwrap();
    for file in ["run", "L", "S", "M"] {
        assert!(
            files.lines().any(|l| l.starts_with(file)),
            "file {} missing:\n{}",
            file,
            files
        );
    }
}

#[test]
fn unconnected_adapter_reports_unknown_client_and_no_hardware() {
    let (api, _handle) = start_api();

    let status: serde_json::Value = ureq::get(&format!("{}/status", api.base))
        .set("Content-Type", "application/json")
        .call()
        .unwrap()
        .into_json()
        .unwrap();
    assert_eq!(status["client"], "<unknown>");

    let map = ureq::get(&format!("{}/map", api.base))
        .call()
        .unwrap()
        .into_string()
        .unwrap();
    assert!(map.contains("no hardware drives"));

    let err = ureq::put(&format!("{}/resync", api.base))
        .send_bytes(b"")
        .unwrap_err();
    match err {
        ureq::Error::Status(code, _) => assert_eq!(code, 422),
        other => panic!("unexpected error: {}", other),
    }
}
