/*
    Copyright (C) 2023  OqtaDrive developers

    This file is part of OqtaDrive, a Sinclair Microdrive emulator.

    For the full copyright notice, see the lib.rs file.
*/
//! HTTP client side of the non-serve actions.
use std::fs;
use std::io::Read;

use anyhow::{anyhow, bail, Context};

use crate::repo;

use super::{
    ConfigArgs, DumpArgs, LoadArgs, LsArgs, MapArgs, ResyncArgs, SaveArgs, UnloadArgs,
};

fn base_url(address: &str) -> String {
    let address = address.trim_end_matches('/');
    if address.contains("://") {
        address.to_string()
    } else {
        format!("http://{}", address)
    }
}

// runs the request, turning HTTP error statuses into readable errors
fn call_text(req: ureq::Request) -> anyhow::Result<String> {
    match req.call() {
        Ok(resp) => Ok(resp.into_string()?),
        Err(ureq::Error::Status(code, resp)) => {
            let body = resp.into_string().unwrap_or_default();
            bail!("daemon replied {}: {}", code, body.trim())
        }
        Err(e) => Err(anyhow!(e)),
    }
}

fn send_text(req: ureq::Request, body: &[u8]) -> anyhow::Result<String> {
    match req.send_bytes(body) {
        Ok(resp) => Ok(resp.into_string()?),
        Err(ureq::Error::Status(code, resp)) => {
            let body = resp.into_string().unwrap_or_default();
            bail!("daemon replied {}: {}", code, body.trim())
        }
        Err(e) => Err(anyhow!(e)),
    }
}

fn percent_encode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char)
            }
            _ => out.push_str(&format!("%{:02X}", b)),
        }
    }
    out
}

// the cartridge format implied by a file name
fn format_type(file: &str) -> anyhow::Result<&'static str> {
    let lower = file.to_ascii_lowercase();
    if lower.ends_with(".mdr") {
        Ok("mdr")
    } else if lower.ends_with(".mdv") {
        Ok("mdv")
    } else if lower.ends_with(".z80") {
        Ok("z80")
    } else {
        bail!("cannot determine cartridge format of {}", file)
    }
}

pub(super) fn load(args: LoadArgs) -> anyhow::Result<()> {
    let typ = format_type(&args.input)?;

    let mut url = format!(
        "{}/drive/{}?type={}&force={}&repair={}",
        base_url(&args.address.address),
        args.drive,
        typ,
        args.force,
        args.repair
    );
    if let Some(name) = &args.name {
        url += &format!("&name={}", percent_encode(name));
    }

    let reply = if repo::is_reference(&args.input) {
        url += "&ref=true";
        send_text(ureq::put(&url), args.input.as_bytes())?
    } else {
        let data = fs::read(&args.input)
            .with_context(|| format!("cannot read {}", args.input))?;
        send_text(ureq::put(&url), &data)?
    };

    print!("{}", reply);
    Ok(())
}

pub(super) fn unload(args: UnloadArgs) -> anyhow::Result<()> {
    let url = format!(
        "{}/drive/{}/unload?force={}",
        base_url(&args.address.address),
        args.drive,
        args.force
    );
    print!("{}", call_text(ureq::get(&url))?);
    Ok(())
}

pub(super) fn save(args: SaveArgs) -> anyhow::Result<()> {
    let file = args
        .output
        .to_str()
        .ok_or_else(|| anyhow!("output file name is not valid UTF-8"))?;
    let typ = format_type(file)?;

    let url = format!(
        "{}/drive/{}?type={}",
        base_url(&args.address.address),
        args.drive,
        typ
    );

    let resp = match ureq::get(&url).call() {
        Ok(resp) => resp,
        Err(ureq::Error::Status(code, resp)) => {
            let body = resp.into_string().unwrap_or_default();
            bail!("daemon replied {}: {}", code, body.trim())
        }
        Err(e) => return Err(anyhow!(e)),
    };

    let mut data = Vec::new();
    resp.into_reader().read_to_end(&mut data)?;
    fs::write(&args.output, &data)
        .with_context(|| format!("cannot write {}", args.output.display()))?;
    println!("saved drive {} to {}", args.drive, args.output.display());
    Ok(())
}

pub(super) fn ls(args: LsArgs) -> anyhow::Result<()> {
    let base = base_url(&args.address.address);
    let url = match args.drive {
        Some(drive) => format!("{}/drive/{}/list", base, drive),
        None => format!("{}/list", base),
    };
    print!("{}", call_text(ureq::get(&url))?);
    Ok(())
}

pub(super) fn dump(args: DumpArgs) -> anyhow::Result<()> {
    let url = format!(
        "{}/drive/{}/dump",
        base_url(&args.address.address),
        args.drive
    );
    print!("{}", call_text(ureq::get(&url))?);
    Ok(())
}

pub(super) fn map(args: MapArgs) -> anyhow::Result<()> {
    let base = base_url(&args.address.address);

    let reply = if args.off {
        call_text(ureq::put(&format!("{}/map?start=0&end=0", base)))?
    } else {
        match (args.start, args.end) {
            (Some(start), Some(end)) => {
                call_text(ureq::put(&format!("{}/map?start={}&end={}", base, start, end)))?
            }
            (None, None) => call_text(ureq::get(&format!("{}/map", base)))?,
            _ => bail!("specify either both --start and --end, or neither"),
        }
    };

    print!("{}", reply);
    Ok(())
}

pub(super) fn resync(args: ResyncArgs) -> anyhow::Result<()> {
    let mut url = format!(
        "{}/resync?reset={}",
        base_url(&args.address.address),
        args.reset
    );
    if let Some(client) = &args.client {
        url += &format!("&client={}", percent_encode(client));
    }
    print!("{}", call_text(ureq::put(&url))?);
    Ok(())
}

pub(super) fn config(args: ConfigArgs) -> anyhow::Result<()> {
    let rumble = match args.rumble {
        Some(level) => level,
        None => bail!("specify a configuration item, e.g. --rumble"),
    };
    let url = format!(
        "{}/config?item=rumble&arg1={}",
        base_url(&args.address.address),
        rumble
    );
    print!("{}", call_text(ureq::put(&url))?);
    Ok(())
}
