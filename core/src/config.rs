/*
 * config.rs
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

//! Configuration: the listen address and the ordered upstream relay
//! list, from ~/.staffetta/config.xml. All XML goes through the
//! quick_xml reader; no regex or hand parsing. The relay list is
//! immutable for the life of a session: EOSE aggregation counts
//! against its length, so it must not move underneath the sessions.
//!
//! ```xml
//! <?xml version="1.0" encoding="UTF-8"?>
//! <bouncer>
//!   <listen>127.0.0.1:8080</listen>
//!   <relay>wss://relay.damus.io</relay>
//!   <relay>wss://nos.lol</relay>
//!   <seen-limit>500</seen-limit>
//!   <reconnect-seconds>5</reconnect-seconds>
//! </bouncer>
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use quick_xml::events::Event;
use quick_xml::reader::Reader;

/// Everything a session needs to know at birth.
#[derive(Debug, Clone)]
pub struct BouncerConfig {
    /// Address the downstream listener binds.
    pub listen: String,
    /// Upstream relay URLs (ws:// or wss://), in configuration order.
    /// May be empty, in which case REQs go nowhere and no EOSE is ever
    /// synthesized.
    pub relays: Vec<String>,
    /// Per-subscription dedup bound: after this many distinct events
    /// with EOSE still pending, EOSE is forced.
    pub seen_limit: usize,
    /// Fixed delay between upstream redials.
    pub reconnect_delay: Duration,
}

impl Default for BouncerConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:8080".to_string(),
            relays: Vec::new(),
            seen_limit: 500,
            reconnect_delay: Duration::from_secs(5),
        }
    }
}

/// Default config directory: ~/.staffetta.
pub fn default_config_dir() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .map(|h| h.join(".staffetta"))
}

/// Default config path: ~/.staffetta/config.xml.
pub fn default_config_path() -> Option<PathBuf> {
    default_config_dir().map(|d| d.join("config.xml"))
}

/// Load configuration from a file.
pub fn load_config(path: &Path) -> Result<BouncerConfig, String> {
    let content =
        fs::read_to_string(path).map_err(|e| format!("read {}: {}", path.display(), e))?;
    parse_config(&content)
}

/// Parse configuration XML.
pub fn parse_config(xml: &str) -> Result<BouncerConfig, String> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut config = BouncerConfig::default();
    let mut current: Option<&'static str> = None;
    let mut saw_root = false;

    loop {
        match reader.read_event() {
            Err(e) => return Err(format!("XML parse error: {}", e)),
            Ok(Event::Eof) => break,
            Ok(Event::Start(e)) => {
                current = match e.name().as_ref() {
                    b"bouncer" => {
                        saw_root = true;
                        None
                    }
                    b"listen" => Some("listen"),
                    b"relay" => Some("relay"),
                    b"seen-limit" => Some("seen-limit"),
                    b"reconnect-seconds" => Some("reconnect-seconds"),
                    _ => None,
                };
            }
            Ok(Event::Text(e)) => {
                let element = match current {
                    Some(el) => el,
                    None => continue,
                };
                let text = e
                    .unescape()
                    .map_err(|e| e.to_string())?
                    .trim()
                    .to_string();
                match element {
                    "listen" => config.listen = text,
                    "relay" => {
                        if !text.is_empty() {
                            config.relays.push(text);
                        }
                    }
                    "seen-limit" => {
                        config.seen_limit = text
                            .parse()
                            .map_err(|_| format!("invalid seen-limit: {}", text))?;
                    }
                    "reconnect-seconds" => {
                        let secs: u64 = text
                            .parse()
                            .map_err(|_| format!("invalid reconnect-seconds: {}", text))?;
                        config.reconnect_delay = Duration::from_secs(secs);
                    }
                    _ => {}
                }
            }
            Ok(Event::End(_)) => current = None,
            _ => {}
        }
    }

    if !saw_root {
        return Err("missing <bouncer> root element".to_string());
    }
    if config.seen_limit == 0 {
        return Err("seen-limit must be at least 1".to_string());
    }
    Ok(config)
}
