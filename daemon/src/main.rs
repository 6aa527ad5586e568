/*
 * main.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of Staffetta, a Nostr relay bouncer.
 *
 * Staffetta is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Staffetta is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Staffetta.  If not, see <http://www.gnu.org/licenses/>.
 */

//! Process bootstrap: parse flags, load the config file, run the accept
//! loop until the process is killed.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use staffetta_core::bouncer;
use staffetta_core::config::{self, BouncerConfig};

/// A Nostr relay bouncer: one client websocket, many upstream relays.
#[derive(Parser)]
#[command(name = "staffetta", version, about)]
struct Args {
    /// Config file (default: ~/.staffetta/config.xml).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Listen address, overriding the config file.
    #[arg(long)]
    listen: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let mut config = match load(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("[bouncer] {}", e);
            return ExitCode::FAILURE;
        }
    };
    if let Some(listen) = args.listen {
        config.listen = listen;
    }
    if config.relays.is_empty() {
        eprintln!("[bouncer] no upstream relays configured; REQs will go nowhere");
    }

    match bouncer::serve(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("[bouncer] {}", e);
            ExitCode::FAILURE
        }
    }
}

/// An explicitly named config file must exist; the default path is
/// optional and silently falls back to defaults.
fn load(args: &Args) -> Result<BouncerConfig, String> {
    match &args.config {
        Some(path) => config::load_config(path),
        None => match config::default_config_path() {
            Some(path) if path.exists() => config::load_config(&path),
            _ => Ok(BouncerConfig::default()),
        },
    }
}
