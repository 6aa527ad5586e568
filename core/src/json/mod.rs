/*
 * mod.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of Staffetta, a Nostr relay bouncer.
 *
 * Staffetta is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This file is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with this file.  If not, see <http://www.gnu.org/licenses/>.
 */

//! Push-model JSON: a document parser that emits events on a content
//! handler, and a streaming writer. Every Nostr frame is one complete
//! JSON document carried in one websocket text frame, so the parser
//! works on whole documents; there is no incremental byte feeding.

mod parser;
mod writer;

pub use parser::{parse_document, JsonContentHandler, MAX_DEPTH};
pub use writer::JsonWriter;

use std::fmt;

/// Error during JSON parsing or writing. Carries the byte offset where
/// parsing stopped when known.
#[derive(Debug)]
pub struct JsonError {
    message: String,
    offset: Option<usize>,
}

impl JsonError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self {
            message: msg.into(),
            offset: None,
        }
    }

    pub fn at(msg: impl Into<String>, offset: usize) -> Self {
        Self {
            message: msg.into(),
            offset: Some(offset),
        }
    }
}

impl fmt::Display for JsonError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.offset {
            Some(off) => write!(f, "{} (at byte {})", self.message, off),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for JsonError {}

/// A JSON number: integer when it fits, floating-point otherwise.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum JsonNumber {
    I64(i64),
    F64(f64),
}

impl JsonNumber {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            JsonNumber::I64(n) => Some(*n),
            JsonNumber::F64(f) => {
                if f.fract() == 0.0 && *f >= i64::MIN as f64 && *f <= i64::MAX as f64 {
                    Some(*f as i64)
                } else {
                    None
                }
            }
        }
    }

    pub fn as_f64(&self) -> f64 {
        match self {
            JsonNumber::I64(n) => *n as f64,
            JsonNumber::F64(f) => *f,
        }
    }
}
