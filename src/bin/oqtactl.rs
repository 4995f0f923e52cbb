/*
    Copyright (C) 2023  OqtaDrive developers

    This file is part of OqtaDrive, a Sinclair Microdrive emulator.

    For the full copyright notice, see the lib.rs file.
*/
use clap::Parser;

use oqtadrive::run::{self, Cli};

fn main() {
    let cli = Cli::parse();
    run::init_logging();

    if let Err(e) = run::execute(cli) {
        eprintln!("{:#}", e);
        std::process::exit(1);
    }
}
