/*
 * parser.rs
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

//! Document JSON parser: one complete document in, events out on a
//! `JsonContentHandler`. Handlers accumulate whatever shape they need
//! while the document is walked; the bouncer's frame scanners extract a
//! tag, a subscription id and an event id this way without building a
//! value tree.

use crate::json::{JsonError, JsonNumber};

/// Nesting limit for objects and arrays. Relay frames are shallow; a
/// document deeper than this is rejected rather than risking the stack.
pub const MAX_DEPTH: usize = 64;

/// Handler for JSON parse events. The parser calls these methods as the
/// document is walked. String and key data is valid only for the
/// duration of the call.
pub trait JsonContentHandler {
    fn start_object(&mut self);
    fn end_object(&mut self);
    fn start_array(&mut self);
    fn end_array(&mut self);
    /// Key (property name) in an object; a value event always follows.
    fn key(&mut self, key: &str);
    fn string_value(&mut self, value: &str);
    fn number_value(&mut self, number: JsonNumber);
    fn boolean_value(&mut self, value: bool);
    fn null_value(&mut self);
}

/// Parse one complete JSON document, delivering events to the handler.
/// Trailing non-whitespace after the document is an error.
pub fn parse_document<H: JsonContentHandler + ?Sized>(
    input: &str,
    handler: &mut H,
) -> Result<(), JsonError> {
    let mut p = Parser {
        data: input.as_bytes(),
        pos: 0,
        depth: 0,
    };
    p.skip_whitespace();
    p.parse_value(handler)?;
    p.skip_whitespace();
    if p.pos != p.data.len() {
        return Err(JsonError::at("trailing data after document", p.pos));
    }
    Ok(())
}

struct Parser<'a> {
    data: &'a [u8],
    pos: usize,
    depth: usize,
}

impl<'a> Parser<'a> {
    fn skip_whitespace(&mut self) {
        while let Some(&b) = self.data.get(self.pos) {
            match b {
                b' ' | b'\t' | b'\n' | b'\r' => self.pos += 1,
                _ => break,
            }
        }
    }

    fn peek(&self) -> Option<u8> {
        self.data.get(self.pos).copied()
    }

    fn parse_value<H: JsonContentHandler + ?Sized>(
        &mut self,
        handler: &mut H,
    ) -> Result<(), JsonError> {
        match self.peek() {
            Some(b'{') => self.parse_object(handler),
            Some(b'[') => self.parse_array(handler),
            Some(b'"') => {
                let s = self.parse_string()?;
                handler.string_value(&s);
                Ok(())
            }
            Some(b't') => {
                self.expect_literal(b"true")?;
                handler.boolean_value(true);
                Ok(())
            }
            Some(b'f') => {
                self.expect_literal(b"false")?;
                handler.boolean_value(false);
                Ok(())
            }
            Some(b'n') => {
                self.expect_literal(b"null")?;
                handler.null_value();
                Ok(())
            }
            Some(b'-') | Some(b'0'..=b'9') => {
                let num = self.parse_number()?;
                handler.number_value(num);
                Ok(())
            }
            Some(b) => Err(JsonError::at(
                format!("unexpected character '{}'", b as char),
                self.pos,
            )),
            None => Err(JsonError::at("unexpected end of document", self.pos)),
        }
    }

    fn parse_object<H: JsonContentHandler + ?Sized>(
        &mut self,
        handler: &mut H,
    ) -> Result<(), JsonError> {
        self.enter()?;
        self.pos += 1; // '{'
        handler.start_object();
        self.skip_whitespace();
        if self.peek() == Some(b'}') {
            self.pos += 1;
            handler.end_object();
            self.leave();
            return Ok(());
        }
        loop {
            self.skip_whitespace();
            if self.peek() != Some(b'"') {
                return Err(JsonError::at("expected object key", self.pos));
            }
            let key = self.parse_string()?;
            handler.key(&key);
            self.skip_whitespace();
            if self.peek() != Some(b':') {
                return Err(JsonError::at("expected ':' after key", self.pos));
            }
            self.pos += 1;
            self.skip_whitespace();
            self.parse_value(handler)?;
            self.skip_whitespace();
            match self.peek() {
                Some(b',') => self.pos += 1,
                Some(b'}') => {
                    self.pos += 1;
                    handler.end_object();
                    self.leave();
                    return Ok(());
                }
                _ => return Err(JsonError::at("expected ',' or '}'", self.pos)),
            }
        }
    }

    fn parse_array<H: JsonContentHandler + ?Sized>(
        &mut self,
        handler: &mut H,
    ) -> Result<(), JsonError> {
        self.enter()?;
        self.pos += 1; // '['
        handler.start_array();
        self.skip_whitespace();
        if self.peek() == Some(b']') {
            self.pos += 1;
            handler.end_array();
            self.leave();
            return Ok(());
        }
        loop {
            self.skip_whitespace();
            self.parse_value(handler)?;
            self.skip_whitespace();
            match self.peek() {
                Some(b',') => self.pos += 1,
                Some(b']') => {
                    self.pos += 1;
                    handler.end_array();
                    self.leave();
                    return Ok(());
                }
                _ => return Err(JsonError::at("expected ',' or ']'", self.pos)),
            }
        }
    }

    fn enter(&mut self) -> Result<(), JsonError> {
        if self.depth >= MAX_DEPTH {
            return Err(JsonError::at("document too deeply nested", self.pos));
        }
        self.depth += 1;
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    /// Parse a string starting at the opening quote. Returns the
    /// unescaped content. The input is already valid UTF-8 (it came out
    /// of a websocket text frame), so only escapes need decoding.
    fn parse_string(&mut self) -> Result<String, JsonError> {
        debug_assert_eq!(self.peek(), Some(b'"'));
        self.pos += 1;
        let start = self.pos;
        // Fast path: scan to the closing quote; take the span whole if
        // no escape was seen.
        let mut i = self.pos;
        while i < self.data.len() {
            match self.data[i] {
                b'"' => {
                    let s = std::str::from_utf8(&self.data[start..i])
                        .map_err(|_| JsonError::at("invalid UTF-8 in string", start))?;
                    if s.bytes().any(|b| b < 0x20) {
                        return Err(JsonError::at("unescaped control character", start));
                    }
                    self.pos = i + 1;
                    return Ok(s.to_string());
                }
                b'\\' => break,
                _ => i += 1,
            }
        }
        // Slow path: escape sequences present.
        let mut out = String::new();
        out.push_str(
            std::str::from_utf8(&self.data[start..i])
                .map_err(|_| JsonError::at("invalid UTF-8 in string", start))?,
        );
        if out.bytes().any(|b| b < 0x20) {
            return Err(JsonError::at("unescaped control character", start));
        }
        self.pos = i;
        loop {
            match self.peek() {
                Some(b'"') => {
                    self.pos += 1;
                    return Ok(out);
                }
                Some(b'\\') => {
                    self.pos += 1;
                    self.parse_escape(&mut out)?;
                }
                Some(b) if b < 0x20 => {
                    return Err(JsonError::at("unescaped control character", self.pos));
                }
                Some(_) => {
                    let rest = std::str::from_utf8(&self.data[self.pos..])
                        .map_err(|_| JsonError::at("invalid UTF-8 in string", self.pos))?;
                    let ch = rest.chars().next().unwrap();
                    out.push(ch);
                    self.pos += ch.len_utf8();
                }
                None => return Err(JsonError::at("unclosed string", self.pos)),
            }
        }
    }

    fn parse_escape(&mut self, out: &mut String) -> Result<(), JsonError> {
        let b = self
            .peek()
            .ok_or_else(|| JsonError::at("unclosed escape", self.pos))?;
        self.pos += 1;
        match b {
            b'"' => out.push('"'),
            b'\\' => out.push('\\'),
            b'/' => out.push('/'),
            b'b' => out.push('\u{8}'),
            b'f' => out.push('\u{c}'),
            b'n' => out.push('\n'),
            b'r' => out.push('\r'),
            b't' => out.push('\t'),
            b'u' => {
                let high = self.parse_hex4()?;
                // Surrogate pair: a high surrogate must be followed by a
                // \u-escaped low surrogate (RFC 8259 §7).
                if (0xd800..0xdc00).contains(&high) {
                    if self.peek() != Some(b'\\') {
                        return Err(JsonError::at("unpaired surrogate", self.pos));
                    }
                    self.pos += 1;
                    if self.peek() != Some(b'u') {
                        return Err(JsonError::at("unpaired surrogate", self.pos));
                    }
                    self.pos += 1;
                    let low = self.parse_hex4()?;
                    if !(0xdc00..0xe000).contains(&low) {
                        return Err(JsonError::at("invalid low surrogate", self.pos));
                    }
                    let cp = 0x10000 + ((high - 0xd800) << 10) + (low - 0xdc00);
                    let ch = char::from_u32(cp)
                        .ok_or_else(|| JsonError::at("invalid code point", self.pos))?;
                    out.push(ch);
                } else {
                    let ch = char::from_u32(high)
                        .ok_or_else(|| JsonError::at("invalid code point", self.pos))?;
                    out.push(ch);
                }
            }
            _ => {
                return Err(JsonError::at(
                    format!("invalid escape '\\{}'", b as char),
                    self.pos - 1,
                ))
            }
        }
        Ok(())
    }

    fn parse_hex4(&mut self) -> Result<u32, JsonError> {
        if self.pos + 4 > self.data.len() {
            return Err(JsonError::at("incomplete \\u escape", self.pos));
        }
        let hex = std::str::from_utf8(&self.data[self.pos..self.pos + 4])
            .map_err(|_| JsonError::at("invalid \\u escape", self.pos))?;
        let v = u32::from_str_radix(hex, 16)
            .map_err(|_| JsonError::at("invalid \\u escape", self.pos))?;
        self.pos += 4;
        Ok(v)
    }

    fn expect_literal(&mut self, lit: &[u8]) -> Result<(), JsonError> {
        if self.pos + lit.len() > self.data.len()
            || &self.data[self.pos..self.pos + lit.len()] != lit
        {
            return Err(JsonError::at("invalid literal", self.pos));
        }
        self.pos += lit.len();
        Ok(())
    }

    fn parse_number(&mut self) -> Result<JsonNumber, JsonError> {
        let start = self.pos;
        if self.peek() == Some(b'-') {
            self.pos += 1;
        }
        match self.peek() {
            Some(b'0') => {
                self.pos += 1;
                if matches!(self.peek(), Some(b'0'..=b'9')) {
                    return Err(JsonError::at("leading zero in number", start));
                }
            }
            Some(b'1'..=b'9') => {
                while matches!(self.peek(), Some(b'0'..=b'9')) {
                    self.pos += 1;
                }
            }
            _ => return Err(JsonError::at("invalid number", start)),
        }
        let mut is_float = false;
        if self.peek() == Some(b'.') {
            is_float = true;
            self.pos += 1;
            if !matches!(self.peek(), Some(b'0'..=b'9')) {
                return Err(JsonError::at("digit required after '.'", self.pos));
            }
            while matches!(self.peek(), Some(b'0'..=b'9')) {
                self.pos += 1;
            }
        }
        if matches!(self.peek(), Some(b'e') | Some(b'E')) {
            is_float = true;
            self.pos += 1;
            if matches!(self.peek(), Some(b'+') | Some(b'-')) {
                self.pos += 1;
            }
            if !matches!(self.peek(), Some(b'0'..=b'9')) {
                return Err(JsonError::at("digit required in exponent", self.pos));
            }
            while matches!(self.peek(), Some(b'0'..=b'9')) {
                self.pos += 1;
            }
        }
        let text = std::str::from_utf8(&self.data[start..self.pos])
            .map_err(|_| JsonError::at("invalid number", start))?;
        if is_float {
            let f: f64 = text
                .parse()
                .map_err(|_| JsonError::at("unparseable number", start))?;
            Ok(JsonNumber::F64(f))
        } else {
            match text.parse::<i64>() {
                Ok(n) => Ok(JsonNumber::I64(n)),
                // Integer out of i64 range: fall back to float.
                Err(_) => {
                    let f: f64 = text
                        .parse()
                        .map_err(|_| JsonError::at("unparseable number", start))?;
                    Ok(JsonNumber::F64(f))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        events: Vec<String>,
    }

    impl JsonContentHandler for Recorder {
        fn start_object(&mut self) {
            self.events.push("{".into());
        }
        fn end_object(&mut self) {
            self.events.push("}".into());
        }
        fn start_array(&mut self) {
            self.events.push("[".into());
        }
        fn end_array(&mut self) {
            self.events.push("]".into());
        }
        fn key(&mut self, key: &str) {
            self.events.push(format!("k:{}", key));
        }
        fn string_value(&mut self, value: &str) {
            self.events.push(format!("s:{}", value));
        }
        fn number_value(&mut self, number: JsonNumber) {
            self.events.push(format!("n:{:?}", number));
        }
        fn boolean_value(&mut self, value: bool) {
            self.events.push(format!("b:{}", value));
        }
        fn null_value(&mut self) {
            self.events.push("null".into());
        }
    }

    fn events(input: &str) -> Vec<String> {
        let mut r = Recorder::default();
        parse_document(input, &mut r).unwrap();
        r.events
    }

    #[test]
    fn relay_frame_shape() {
        let ev = events(r#"["EVENT","sub1",{"id":"abc","kind":1}]"#);
        assert_eq!(
            ev,
            vec!["[", "s:EVENT", "s:sub1", "{", "k:id", "s:abc", "k:kind", "n:I64(1)", "}", "]"]
        );
    }

    #[test]
    fn scalars_and_whitespace() {
        let ev = events(" [ true , false , null , -2.5 , 0 ] ");
        assert_eq!(
            ev,
            vec!["[", "b:true", "b:false", "null", "n:F64(-2.5)", "n:I64(0)", "]"]
        );
    }

    #[test]
    fn string_escapes() {
        let ev = events(r#"["a\"b\\c\n\t\u00e9"]"#);
        assert_eq!(ev, vec!["[", "s:a\"b\\c\n\t\u{e9}", "]"]);
    }

    #[test]
    fn surrogate_pair_escape() {
        let ev = events(r#"["\ud83d\ude00"]"#);
        assert_eq!(ev, vec!["[", "s:\u{1f600}", "]"]);
    }

    #[test]
    fn unpaired_surrogate_rejected() {
        let mut r = Recorder::default();
        assert!(parse_document(r#"["\ud83d"]"#, &mut r).is_err());
    }

    #[test]
    fn trailing_data_rejected() {
        let mut r = Recorder::default();
        assert!(parse_document(r#"[1] x"#, &mut r).is_err());
    }

    #[test]
    fn truncated_document_rejected() {
        let mut r = Recorder::default();
        assert!(parse_document(r#"["EVENT","s""#, &mut r).is_err());
    }

    #[test]
    fn trailing_comma_rejected() {
        let mut r = Recorder::default();
        assert!(parse_document(r#"[1,]"#, &mut r).is_err());
        let mut r = Recorder::default();
        assert!(parse_document(r#"{"a":1,}"#, &mut r).is_err());
    }

    #[test]
    fn leading_zero_rejected() {
        let mut r = Recorder::default();
        assert!(parse_document(r#"[01]"#, &mut r).is_err());
    }

    #[test]
    fn depth_limit_enforced() {
        let deep = "[".repeat(MAX_DEPTH + 1) + &"]".repeat(MAX_DEPTH + 1);
        let mut r = Recorder::default();
        assert!(parse_document(&deep, &mut r).is_err());
        let ok = "[".repeat(MAX_DEPTH) + &"]".repeat(MAX_DEPTH);
        let mut r = Recorder::default();
        assert!(parse_document(&ok, &mut r).is_ok());
    }

    #[test]
    fn huge_integer_falls_back_to_float() {
        let ev = events("[99999999999999999999]");
        assert_eq!(ev, vec!["[", "n:F64(1e20)", "]"]);
    }
}
