/*
    Copyright (C) 2023  OqtaDrive developers

    This file is part of OqtaDrive, a Sinclair Microdrive emulator.

    For the full copyright notice, see the lib.rs file.
*/
//! The `oqtactl` command line: `serve` runs the daemon and API server, the
//! remaining actions are thin HTTP clients of a running daemon.
//!
//! Logging can be configured with these environment variables:
//!
//! - `LOG_FORMAT`: set to `json` for JSON logging
//! - `LOG_FORCE_COLORS`: set non-empty for forcing colorized log entries
//! - `LOG_METHODS`: set non-empty for including code locations in the log
//! - `LOG_LEVEL`: `error`, `warn`, `info`, `debug`, `trace`
use std::io::Write;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

mod client;
mod serve;

#[derive(Parser)]
#[command(
    name = "oqtactl",
    version,
    about = "OqtaDrive - Sinclair Microdrive emulator for ZX Spectrum & QL"
)]
pub struct Cli {
    #[command(subcommand)]
    pub action: Action,
}

#[derive(Subcommand)]
pub enum Action {
    /// Run the adapter daemon & API server
    Serve(ServeArgs),
    /// Load a cartridge into a drive
    Load(LoadArgs),
    /// Unload the cartridge of a drive
    Unload(UnloadArgs),
    /// Save the cartridge of a drive
    Save(SaveArgs),
    /// List the drives, or the contents of one cartridge
    Ls(LsArgs),
    /// Hex dump the cartridge of a drive
    Dump(DumpArgs),
    /// Get or set the hardware drive mapping
    Map(MapArgs),
    /// Resync daemon and adapter
    Resync(ResyncArgs),
    /// Send a configuration item to the adapter
    Config(ConfigArgs),
    /// Print the version
    Version,
}

#[derive(Args, Clone)]
pub struct AddressArg {
    /// Address of the daemon's API, `host[:port]`
    #[arg(short, long, env = "OQTADRIVE_ADDRESS", default_value = "localhost:8888")]
    pub address: String,
}

#[derive(Args)]
pub struct ServeArgs {
    /// Serial port device of the adapter
    #[arg(short, long, env = "OQTADRIVE_DEVICE")]
    pub device: String,
    /// Force the client type, `if1` or `ql`
    #[arg(short, long)]
    pub client: Option<String>,
    /// Cartridge repo base folder; when omitted, loading cartridges from
    /// the daemon host's file system is prohibited
    #[arg(short, long)]
    pub repo: Option<PathBuf>,
    #[command(flatten)]
    pub address: AddressArg,
}

#[derive(Args)]
pub struct LoadArgs {
    /// Drive number, 1 through 8
    #[arg(short, long)]
    pub drive: u8,
    /// Cartridge file to load (`.mdr`, `.mdv` or `.z80`), or a
    /// `repo://path` reference
    #[arg(short, long)]
    pub input: String,
    /// Replace the present cartridge even when modified
    #[arg(short, long)]
    pub force: bool,
    /// Fix checksums and sector order while loading
    #[arg(long)]
    pub repair: bool,
    /// Cartridge name, for snapshot formats
    #[arg(short, long)]
    pub name: Option<String>,
    #[command(flatten)]
    pub address: AddressArg,
}

#[derive(Args)]
pub struct UnloadArgs {
    /// Drive number, 1 through 8
    #[arg(short, long)]
    pub drive: u8,
    /// Unload even when the present cartridge is modified
    #[arg(short, long)]
    pub force: bool,
    #[command(flatten)]
    pub address: AddressArg,
}

#[derive(Args)]
pub struct SaveArgs {
    /// Drive number, 1 through 8
    #[arg(short, long)]
    pub drive: u8,
    /// Output file; its extension selects the format
    #[arg(short, long)]
    pub output: PathBuf,
    #[command(flatten)]
    pub address: AddressArg,
}

#[derive(Args)]
pub struct LsArgs {
    /// Drive number; without it, all drives get listed
    #[arg(short, long)]
    pub drive: Option<u8>,
    #[command(flatten)]
    pub address: AddressArg,
}

#[derive(Args)]
pub struct DumpArgs {
    /// Drive number, 1 through 8
    #[arg(short, long)]
    pub drive: u8,
    #[command(flatten)]
    pub address: AddressArg,
}

#[derive(Args)]
pub struct MapArgs {
    /// First hardware drive slot
    #[arg(long)]
    pub start: Option<i32>,
    /// Last hardware drive slot
    #[arg(long)]
    pub end: Option<i32>,
    /// Turn hardware drives off
    #[arg(long)]
    pub off: bool,
    #[command(flatten)]
    pub address: AddressArg,
}

#[derive(Args)]
pub struct ResyncArgs {
    /// Force the client type, `if1` or `ql`
    #[arg(short, long)]
    pub client: Option<String>,
    /// Reset the adapter connection before resyncing
    #[arg(long)]
    pub reset: bool,
    #[command(flatten)]
    pub address: AddressArg,
}

#[derive(Args)]
pub struct ConfigArgs {
    /// Rumble level for drive start/stop feedback, 0 through 255
    #[arg(long)]
    pub rumble: Option<u8>,
    #[command(flatten)]
    pub address: AddressArg,
}

/// Runs the selected action.
pub fn execute(cli: Cli) -> anyhow::Result<()> {
    match cli.action {
        Action::Serve(args) => serve::run(args),
        Action::Load(args) => client::load(args),
        Action::Unload(args) => client::unload(args),
        Action::Save(args) => client::save(args),
        Action::Ls(args) => client::ls(args),
        Action::Dump(args) => client::dump(args),
        Action::Map(args) => client::map(args),
        Action::Resync(args) => client::resync(args),
        Action::Config(args) => client::config(args),
        Action::Version => {
            println!("OqtaDrive {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Initializes logging from the `LOG_*` environment variables.
pub fn init_logging() {
    let env = env_logger::Env::new().filter_or("LOG_LEVEL", "info");
    let mut builder = env_logger::Builder::from_env(env);

    if std::env::var("LOG_FORCE_COLORS").map_or(false, |v| !v.is_empty()) {
        builder.write_style(env_logger::WriteStyle::Always);
    }

    if std::env::var("LOG_FORMAT").as_deref() == Ok("json") {
        builder.format(|buf, record| {
            writeln!(
                buf,
                "{}",
                serde_json::json!({
                    "level": record.level().to_string().to_lowercase(),
                    "target": record.target(),
                    "msg": record.args().to_string(),
                })
            )
        });
    } else if std::env::var("LOG_METHODS").map_or(false, |v| !v.is_empty()) {
        builder.format(|buf, record| {
            writeln!(
                buf,
                "[{:<5}] {}:{} {}",
                record.level(),
                record.target(),
                record.line().unwrap_or(0),
                record.args()
            )
        });
    }

    builder.init();
}
