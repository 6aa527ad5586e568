/*
 * writer.rs
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

//! Streaming JSON writer: build a document via write_* calls, collect
//! the bytes from a BytesMut. Used for the frames the bouncer
//! synthesizes itself (OK, NOTICE, CLOSED, EOSE); frames from the wire
//! are forwarded verbatim and never re-serialized.

use bytes::{BufMut, BytesMut};

use crate::json::JsonNumber;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Init,
    AfterValue,
    AfterKey,
    InArray,
    InObject,
}

/// JSON writer appending to a BytesMut. Compact output only; the wire
/// protocol has no use for indentation.
pub struct JsonWriter {
    buf: BytesMut,
    state: State,
}

impl JsonWriter {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(256),
            state: State::Init,
        }
    }

    /// Take the buffer, leaving the writer empty for reuse.
    pub fn take_buffer(&mut self) -> BytesMut {
        self.state = State::Init;
        std::mem::take(&mut self.buf)
    }

    /// Finish and return the document as a String. The writer only ever
    /// appends valid UTF-8.
    pub fn into_string(mut self) -> String {
        let buf = self.take_buffer();
        String::from_utf8(buf.to_vec()).expect("writer produced invalid UTF-8")
    }

    fn value_separator(&mut self) {
        if self.state == State::AfterValue {
            self.buf.put_u8(b',');
        }
    }

    pub fn write_start_object(&mut self) {
        self.value_separator();
        self.buf.put_u8(b'{');
        self.state = State::InObject;
    }

    pub fn write_end_object(&mut self) {
        self.buf.put_u8(b'}');
        self.state = State::AfterValue;
    }

    pub fn write_start_array(&mut self) {
        self.value_separator();
        self.buf.put_u8(b'[');
        self.state = State::InArray;
    }

    pub fn write_end_array(&mut self) {
        self.buf.put_u8(b']');
        self.state = State::AfterValue;
    }

    pub fn write_key(&mut self, key: &str) {
        if self.state == State::AfterValue {
            self.buf.put_u8(b',');
        }
        write_escaped_string(&mut self.buf, key);
        self.buf.put_u8(b':');
        self.state = State::AfterKey;
    }

    pub fn write_string(&mut self, value: &str) {
        self.value_separator();
        write_escaped_string(&mut self.buf, value);
        self.state = State::AfterValue;
    }

    pub fn write_number(&mut self, num: JsonNumber) {
        self.value_separator();
        match num {
            JsonNumber::I64(n) => self.buf.extend_from_slice(format!("{}", n).as_bytes()),
            JsonNumber::F64(f) => self.buf.extend_from_slice(format!("{}", f).as_bytes()),
        }
        self.state = State::AfterValue;
    }

    pub fn write_bool(&mut self, value: bool) {
        self.value_separator();
        self.buf.put_slice(if value { b"true" } else { b"false" });
        self.state = State::AfterValue;
    }

    pub fn write_null(&mut self) {
        self.value_separator();
        self.buf.put_slice(b"null");
        self.state = State::AfterValue;
    }
}

impl Default for JsonWriter {
    fn default() -> Self {
        Self::new()
    }
}

fn write_escaped_string(buf: &mut BytesMut, s: &str) {
    buf.put_u8(b'"');
    for ch in s.chars() {
        match ch {
            '"' => buf.extend_from_slice(b"\\\""),
            '\\' => buf.extend_from_slice(b"\\\\"),
            '\u{8}' => buf.extend_from_slice(b"\\b"),
            '\u{c}' => buf.extend_from_slice(b"\\f"),
            '\n' => buf.extend_from_slice(b"\\n"),
            '\r' => buf.extend_from_slice(b"\\r"),
            '\t' => buf.extend_from_slice(b"\\t"),
            c if c.is_ascii_control() => {
                buf.extend_from_slice(format!("\\u{:04x}", c as u32).as_bytes());
            }
            c => {
                let mut utf8 = [0u8; 4];
                buf.extend_from_slice(c.encode_utf8(&mut utf8).as_bytes());
            }
        }
    }
    buf.put_u8(b'"');
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ok_frame_shape() {
        let mut w = JsonWriter::new();
        w.write_start_array();
        w.write_string("OK");
        w.write_string("abc123");
        w.write_bool(true);
        w.write_string("");
        w.write_end_array();
        assert_eq!(w.into_string(), r#"["OK","abc123",true,""]"#);
    }

    #[test]
    fn escaping() {
        let mut w = JsonWriter::new();
        w.write_start_array();
        w.write_string("a\"b\\c\nd\te\u{1}");
        w.write_end_array();
        assert_eq!(w.into_string(), "[\"a\\\"b\\\\c\\nd\\te\\u0001\"]");
    }

    #[test]
    fn object_with_numbers() {
        let mut w = JsonWriter::new();
        w.write_start_object();
        w.write_key("count");
        w.write_number(JsonNumber::I64(5));
        w.write_key("ratio");
        w.write_number(JsonNumber::F64(0.5));
        w.write_key("none");
        w.write_null();
        w.write_end_object();
        assert_eq!(w.into_string(), r#"{"count":5,"ratio":0.5,"none":null}"#);
    }

    #[test]
    fn non_ascii_passthrough() {
        let mut w = JsonWriter::new();
        w.write_start_array();
        w.write_string("héllo \u{1f600}");
        w.write_end_array();
        assert_eq!(w.into_string(), "[\"héllo \u{1f600}\"]");
    }
}
