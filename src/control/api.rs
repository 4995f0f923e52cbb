/*
    Copyright (C) 2023  OqtaDrive developers

    This file is part of OqtaDrive, a Sinclair Microdrive emulator.

    For the full copyright notice, see the lib.rs file.
*/
//! The HTTP API server.
use std::collections::HashMap;
use std::io::Read;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::anyhow;
use crossbeam_channel::{bounded, unbounded, Sender};
use log::{debug, error, info};
use tiny_http::{Header, Method, Request, Response, Server};

use oqtadrive_formats::{new_format, ReadOptions};

use crate::daemon::{DaemonError, DaemonHandle, DriveStatus, DRIVE_COUNT};
use crate::repo;

use super::types::{CartridgeInfo, Change, Status};
use super::watch::{clamp_watch_timeout, watch_daemon};

// request bodies carrying cartridges are capped at this size
const MAX_BODY: u64 = 1_048_576;

const RECV_POLL: Duration = Duration::from_millis(500);

/// The OqtaDrive control API server.
pub struct ApiServer {
    ctx: Arc<Context>,
    server: Arc<Server>,
    running: Arc<AtomicBool>,
    pollers: Sender<Sender<Change>>,
}

/// Stops a running [ApiServer] from another thread.
#[derive(Clone)]
pub struct ApiStopper {
    server: Arc<Server>,
    running: Arc<AtomicBool>,
}

impl ApiStopper {
    pub fn stop(&self) {
        info!("API server stopping...");
        self.running.store(false, Ordering::SeqCst);
        self.server.unblock();
    }
}

struct Context {
    daemon: DaemonHandle,
    repository: Option<PathBuf>,
}

impl ApiServer {
    /// Binds the listener. An address without a port gets the default port
    /// 8888 appended.
    pub fn bind(
        address: &str,
        repository: Option<PathBuf>,
        daemon: DaemonHandle,
    ) -> anyhow::Result<ApiServer> {
        let addr = normalize_address(address);
        info!("OqtaDrive API starts listening on {}", addr);

        let server = Server::http(&addr).map_err(|e| anyhow!("cannot bind {}: {}", addr, e))?;
        let (pollers, pollers_rx) = unbounded();
        let running = Arc::new(AtomicBool::new(true));

        let watcher_daemon = daemon.clone();
        let watcher_running = Arc::clone(&running);
        thread::spawn(move || watch_daemon(watcher_daemon, pollers_rx, watcher_running));

        Ok(ApiServer {
            ctx: Arc::new(Context { daemon, repository }),
            server: Arc::new(server),
            running,
            pollers,
        })
    }

    pub fn stopper(&self) -> ApiStopper {
        ApiStopper {
            server: Arc::clone(&self.server),
            running: Arc::clone(&self.running),
        }
    }

    /// The address the listener is bound to.
    pub fn address(&self) -> String {
        self.server.server_addr().to_string()
    }

    /// Serves requests until stopped; each request gets its own handler
    /// thread so long-polls cannot starve the listener.
    pub fn serve(&self) -> anyhow::Result<()> {
        while self.running.load(Ordering::SeqCst) {
            match self.server.recv_timeout(RECV_POLL) {
                Ok(Some(request)) => {
                    let ctx = Arc::clone(&self.ctx);
                    let pollers = self.pollers.clone();
                    thread::spawn(move || handle_request(ctx, pollers, request));
                }
                Ok(None) => {}
                Err(e) => {
                    if self.running.load(Ordering::SeqCst) {
                        return Err(anyhow!("API server failed: {}", e));
                    }
                    break;
                }
            }
        }
        Ok(())
    }
}

fn normalize_address(address: &str) -> String {
    let address = if address.is_empty() {
        "0.0.0.0"
    } else {
        address
    };
    if address.contains(':') {
        address.to_string()
    } else {
        format!("{}:8888", address)
    }
}

fn handle_request(ctx: Arc<Context>, pollers: Sender<Sender<Change>>, mut request: Request) {
    let start = Instant::now();
    let url = request.url().to_string();
    let method = request.method().clone();
    debug!("API BEGIN | {} {}", method, url);

    let (path, query) = match url.split_once('?') {
        Some((p, q)) => (p, q),
        None => (url.as_str(), ""),
    };
    let args = parse_query(query);
    let json = wants_json(&request);

    let segments: Vec<String> = path
        .trim_matches('/')
        .split('/')
        .map(str::to_string)
        .collect();
    let segments: Vec<&str> = segments.iter().map(String::as_str).collect();

    let reply = match (&method, segments.as_slice()) {
        (Method::Get, ["status"]) => status(&ctx, &args, json),
        (Method::Get, ["watch"]) => watch(&pollers, &args),
        (Method::Get, ["list"]) => list(&ctx, &args, json),
        (Method::Put, ["drive", n]) => load(&ctx, n, &args, &mut request),
        (Method::Get, ["drive", n]) => save(&ctx, n, &args),
        (Method::Get, ["drive", n, "unload"]) => unload(&ctx, n, &args),
        (Method::Get, ["drive", n, "dump"]) => drive_info(&ctx, n, Info::Dump),
        (Method::Get, ["drive", n, "list"]) => drive_info(&ctx, n, Info::Ls),
        (Method::Get, ["map"]) => get_drive_map(&ctx),
        (Method::Put, ["map"]) => set_drive_map(&ctx, &args),
        (Method::Put, ["resync"]) => resync(&ctx, &args),
        (Method::Put, ["config"]) => config(&ctx, &args),
        _ => Reply::text(404, "not found\n".to_string()),
    };

    let code = reply.code;
    if let Err(e) = reply.respond(request) {
        error!("problem sending reply: {}", e);
    }

    debug!(
        "API END   | {} {} - {} after {:?}",
        method,
        url,
        code,
        start.elapsed()
    );
}

// an assembled API response
#[derive(Debug)]
struct Reply {
    code: u16,
    body: Vec<u8>,
    json: bool,
}

impl Reply {
    fn text(code: u16, body: String) -> Reply {
        Reply {
            code,
            body: body.into_bytes(),
            json: false,
        }
    }

    fn ok(body: String) -> Reply {
        Reply::text(200, body + "\n")
    }

    fn json<T: serde::Serialize>(obj: &T) -> Reply {
        match serde_json::to_vec(obj) {
            Ok(body) => Reply {
                code: 200,
                body,
                json: true,
            },
            Err(e) => Reply::text(500, format!("{}\n", e)),
        }
    }

    fn data(body: Vec<u8>) -> Reply {
        Reply {
            code: 200,
            body,
            json: false,
        }
    }

    fn error(code: u16, e: impl std::fmt::Display) -> Reply {
        error!("{}", e);
        Reply::text(code, format!("{}\n", e))
    }

    fn respond(self, request: Request) -> std::io::Result<()> {
        let content_type = if self.json {
            "application/json; charset=UTF-8"
        } else {
            "text/plain; charset=UTF-8"
        };
        let header = Header::from_bytes(&b"Content-Type"[..], content_type.as_bytes())
            .expect("static header is valid");
        request.respond(
            Response::from_data(self.body)
                .with_status_code(self.code)
                .with_header(header),
        )
    }
}

// -- handlers -------------------------------------------------------------

fn status(ctx: &Context, _args: &Args, json: bool) -> Reply {
    let mut stat = Status {
        client: ctx.daemon.get_client().to_string(),
        drives: Vec::new(),
    };
    for drive in 1..=DRIVE_COUNT {
        match ctx.daemon.get_status(drive) {
            Ok(s) => stat.add(s.as_str()),
            Err(_) => stat.add(DriveStatus::Empty.as_str()),
        }
    }

    if json {
        Reply::json(&stat)
    } else {
        Reply::ok(stat.to_string())
    }
}

fn watch(pollers: &Sender<Sender<Change>>, args: &Args) -> Reply {
    let timeout = clamp_watch_timeout(args.get("timeout").map(String::as_str));
    info!("starting watch, timeout {:?}", timeout);

    let (update_tx, update_rx) = bounded(1);
    if pollers.send_timeout(update_tx, timeout).is_err() {
        info!("closing watch after timeout");
        return Reply::text(408, String::new());
    }

    match update_rx.recv_timeout(timeout) {
        Ok(change) => {
            info!("sending daemon change");
            Reply::json(&change)
        }
        Err(_) => {
            info!("closing watch after timeout");
            Reply::text(408, String::new())
        }
    }
}

fn list(ctx: &Context, _args: &Args, json: bool) -> Reply {
    let list = get_cartridges(&ctx.daemon);

    if json {
        Reply::json(&list)
    } else {
        let mut text = String::from("\nDRIVE CARTRIDGE       STATE");
        for (ix, c) in list.iter().enumerate() {
            text += &format!("\n  {}   {}", ix + 1, c);
        }
        Reply::ok(text)
    }
}

/// Collects the per-drive cartridge infos, briefly locking each idle
/// cartridge.
pub(super) fn get_cartridges(daemon: &DaemonHandle) -> Vec<CartridgeInfo> {
    let mut ret = Vec::with_capacity(DRIVE_COUNT);

    for drive in 1..=DRIVE_COUNT {
        let status = daemon
            .get_status(drive)
            .unwrap_or(DriveStatus::Empty);
        let mut info = CartridgeInfo {
            status: status.as_str().to_string(),
            ..CartridgeInfo::default()
        };

        if status == DriveStatus::Idle {
            match daemon.get_cartridge(drive) {
                Ok(Some(cart)) => {
                    info.fill(&cart);
                    cart.unlock();
                }
                Ok(None) => {}
                Err(_) => info.status = DriveStatus::Busy.as_str().to_string(),
            }
        }

        ret.push(info);
    }

    ret
}

fn load(ctx: &Context, drive: &str, args: &Args, request: &mut Request) -> Reply {
    let drive = match parse_drive(drive) {
        Ok(d) => d,
        Err(r) => return r,
    };

    let format = match args.get("type").map(String::as_str) {
        Some(t) => match new_format(t) {
            Ok(f) => f,
            Err(e) => return Reply::error(422, e),
        },
        None => return Reply::error(422, "missing cartridge type"),
    };

    let opts = ReadOptions {
        strict: true,
        repair: flag_set(args, "repair"),
        name: args.get("name").cloned(),
    };

    let cart = if flag_set(args, "ref") {
        let mut reference = String::new();
        if let Err(e) = request
            .as_reader()
            .take(MAX_BODY)
            .read_to_string(&mut reference)
        {
            return Reply::error(422, format!("cannot read reference: {}", e));
        }
        let mut source = match repo::resolve(reference.trim(), ctx.repository.as_deref()) {
            Ok(s) => s,
            Err(e) => return Reply::error(406, e),
        };
        format.read(&mut source, &opts)
    } else {
        format.read(&mut request.as_reader().take(MAX_BODY), &opts)
    };

    let cart = match cart {
        Ok(c) => c,
        Err(e) => return Reply::error(422, format!("cartridge corrupted: {}", e)),
    };

    match ctx.daemon.set_cartridge(drive, cart, flag_set(args, "force")) {
        Ok(()) => Reply::ok(format!("loaded data into drive {}", drive)),
        Err(DaemonError::Busy) => Reply::error(423, format!("drive {} busy", drive)),
        Err(DaemonError::Modified) => {
            Reply::error(409, format!("cartridge in drive {} is modified", drive))
        }
        Err(e) => Reply::error(500, e),
    }
}

fn unload(ctx: &Context, drive: &str, args: &Args) -> Reply {
    let drive = match parse_drive(drive) {
        Ok(d) => d,
        Err(r) => return r,
    };

    match ctx.daemon.unload_cartridge(drive, flag_set(args, "force")) {
        Ok(()) => Reply::ok(format!("unloaded drive {}", drive)),
        Err(DaemonError::Busy) => Reply::error(423, format!("drive {} busy", drive)),
        Err(DaemonError::Modified) => {
            Reply::error(409, format!("cartridge in drive {} is modified", drive))
        }
        Err(e) => Reply::error(500, e),
    }
}

fn save(ctx: &Context, drive: &str, args: &Args) -> Reply {
    let drive = match parse_drive(drive) {
        Ok(d) => d,
        Err(r) => return r,
    };

    let cart = match ctx.daemon.get_cartridge(drive) {
        Ok(Some(cart)) => cart,
        Ok(None) => return Reply::error(422, format!("no cartridge in drive {}", drive)),
        Err(_) => return Reply::error(423, format!("drive {} busy", drive)),
    };

    let format = match args.get("type").map(String::as_str) {
        Some(t) => match new_format(t) {
            Ok(f) => f,
            Err(e) => {
                cart.unlock();
                return Reply::error(422, e);
            }
        },
        None => {
            cart.unlock();
            return Reply::error(422, "missing cartridge type");
        }
    };

    let mut out = Vec::new();
    let res = format.write(&cart, &mut out);
    if let Err(e) = res {
        cart.unlock();
        return Reply::error(500, e);
    }

    cart.set_modified(false);
    cart.unlock();
    Reply::data(out)
}

enum Info {
    Dump,
    Ls,
}

fn drive_info(ctx: &Context, drive: &str, info: Info) -> Reply {
    let drive = match parse_drive(drive) {
        Ok(d) => d,
        Err(r) => return r,
    };

    if matches!(ctx.daemon.get_status(drive), Ok(DriveStatus::Hardware)) {
        return Reply::ok(format!("hardware drive mapped to slot {}", drive));
    }

    let cart = match ctx.daemon.get_cartridge(drive) {
        Ok(Some(cart)) => cart,
        Ok(None) => return Reply::error(422, format!("no cartridge in drive {}", drive)),
        Err(_) => return Reply::error(423, format!("drive {} busy", drive)),
    };

    let mut out = Vec::new();
    let res = match info {
        Info::Dump => cart.emit(&mut out),
        Info::Ls => cart.list(&mut out),
    };
    cart.unlock();

    match res {
        Ok(()) => Reply::data(out),
        Err(e) => Reply::error(500, e),
    }
}

fn get_drive_map(ctx: &Context) -> Reply {
    let (start, end, locked) = ctx.daemon.get_hardware_drives();

    let mut msg = if start == -1 || end == -1 {
        "no hardware drives".to_string()
    } else if start == 0 && end == 0 {
        "hardware drives are off".to_string()
    } else {
        format!("hardware drives: start={}, end={}", start, end)
    };
    if locked && start >= 0 {
        msg += " (locked)";
    }

    Reply::ok(msg)
}

fn set_drive_map(ctx: &Context, args: &Args) -> Reply {
    let start = match int_arg(args, "start") {
        Ok(v) => v,
        Err(r) => return r,
    };
    let end = match int_arg(args, "end") {
        Ok(v) => v,
        Err(r) => return r,
    };

    match ctx.daemon.map_hardware_drives(start, end) {
        Ok(()) => Reply::ok(format!("mapped hardware drives: start={}, end={}", start, end)),
        Err(e) => Reply::error(422, e),
    }
}

fn resync(ctx: &Context, args: &Args) -> Reply {
    let client = match args.get("client").map(String::as_str) {
        Some("") | None => oqtadrive_core::Client::Unknown,
        Some(c) => match c.parse() {
            Ok(cl) => cl,
            Err(e) => return Reply::error(422, e),
        },
    };

    let reset = flag_set(args, "reset");
    if let Err(e) = ctx.daemon.resync(client, reset) {
        return Reply::error(422, e);
    }

    Reply::ok(if reset {
        "resetting adapter".to_string()
    } else {
        "re-syncing with adapter".to_string()
    })
}

fn config(ctx: &Context, args: &Args) -> Reply {
    let item = match args.get("item") {
        Some(i) => i.clone(),
        None => return Reply::error(422, "missing config item"),
    };

    let arg1 = match int_arg(args, "arg1") {
        Ok(v) => v,
        Err(r) => return r,
    };
    let arg2 = int_arg(args, "arg2").unwrap_or(0);

    let (arg1, arg2) = match (u8::try_from(arg1), u8::try_from(arg2)) {
        (Ok(a1), Ok(a2)) => (a1, a2),
        _ => return Reply::error(422, "config arguments must be between 0 and 255"),
    };

    match ctx.daemon.configure(&item, arg1, arg2) {
        Ok(()) => Reply::ok("configuring".to_string()),
        Err(e) => Reply::error(422, e),
    }
}

// -- request helpers ------------------------------------------------------

type Args = HashMap<String, String>;

fn parse_drive(s: &str) -> Result<usize, Reply> {
    match s.parse::<usize>() {
        Ok(d) if (1..=DRIVE_COUNT).contains(&d) => Ok(d),
        _ => Err(Reply::error(422, format!("illegal drive number: {}", s))),
    }
}

fn int_arg(args: &Args, name: &str) -> Result<i32, Reply> {
    match args.get(name) {
        Some(v) => v
            .parse::<i32>()
            .map_err(|_| Reply::error(422, format!("illegal value for {}: {}", name, v))),
        None => Err(Reply::error(422, format!("missing argument: {}", name))),
    }
}

fn flag_set(args: &Args, name: &str) -> bool {
    args.get(name).map(String::as_str) == Some("true")
}

fn wants_json(request: &Request) -> bool {
    request
        .headers()
        .iter()
        .any(|h| {
            h.field.as_str().as_str().eq_ignore_ascii_case("content-type")
                && h.value.as_str().starts_with("application/json")
        })
}

fn parse_query(query: &str) -> Args {
    let mut args = HashMap::new();
    for pair in query.split('&') {
        if pair.is_empty() {
            continue;
        }
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        args.insert(percent_decode(key), percent_decode(value));
    }
    args
}

fn percent_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut ix = 0;
    while ix < bytes.len() {
        match bytes[ix] {
            b'%' if ix + 2 < bytes.len() => {
                let decoded = std::str::from_utf8(&bytes[ix + 1..ix + 3])
                    .ok()
                    .and_then(|h| u8::from_str_radix(h, 16).ok());
                match decoded {
                    Some(b) => {
                        out.push(b);
                        ix += 3;
                        continue;
                    }
                    None => out.push(b'%'),
                }
            }
            b'+' => out.push(b' '),
            b => out.push(b),
        }
        ix += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_normalization() {
        assert_eq!(normalize_address(""), "0.0.0.0:8888");
        assert_eq!(normalize_address("localhost"), "localhost:8888");
        assert_eq!(normalize_address("127.0.0.1:9000"), "127.0.0.1:9000");
    }

    #[test]
    fn query_parsing() {
        let args = parse_query("type=mdr&force=true&name=hello%20world&x=a+b");
        assert_eq!(args.get("type").unwrap(), "mdr");
        assert!(flag_set(&args, "force"));
        assert!(!flag_set(&args, "repair"));
        assert_eq!(args.get("name").unwrap(), "hello world");
        assert_eq!(args.get("x").unwrap(), "a b");
    }

    #[test]
    fn drive_parsing() {
        assert_eq!(parse_drive("3").unwrap(), 3);
        assert!(parse_drive("0").is_err());
        assert!(parse_drive("9").is_err());
        assert!(parse_drive("x").is_err());
    }
}
