/*
 * frames.rs
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

//! Frame scanning and synthesis. Scanning walks a frame once with the
//! JSON push parser and keeps only what routing needs: the tag, the
//! subscription id, and the event id directly inside a top-level event
//! object. Everything else (filters, tags, signatures) passes through
//! the bouncer untouched.

use crate::json::{
    parse_document, JsonContentHandler, JsonError, JsonNumber, JsonWriter,
};

/// A frame from the downstream client, reduced to what the dispatcher
/// routes on.
#[derive(Debug, PartialEq, Eq)]
pub enum ClientFrame {
    Req { subid: String },
    Close { subid: String },
    /// EVENT with a well-formed event object. `event_id` is None when
    /// the object has no "id" member, which earns the client a NOTICE.
    Event { event_id: Option<String> },
    /// Unknown tag, wrong shape, or wrong element types: dropped.
    Ignored,
}

/// A frame from an upstream relay.
#[derive(Debug, PartialEq, Eq)]
pub enum RelayFrame {
    Event { subid: String, event_id: String },
    Eose { subid: String },
    /// Not an array, or an array with nothing in it. The read loop
    /// treats this as end of stream.
    Empty,
    /// Recognized shape problems and foreign tags: dropped.
    Ignored,
}

/// Scan a downstream frame. A parse error means a malformed frame; the
/// dispatcher drops it and keeps the session alive.
pub fn scan_client_frame(text: &str) -> Result<ClientFrame, JsonError> {
    let shape = FrameShape::scan(text)?;
    if !shape.root_is_array {
        return Ok(ClientFrame::Ignored);
    }
    match shape.tag.as_deref() {
        Some("REQ") => match shape.second_string {
            Some(subid) => Ok(ClientFrame::Req { subid }),
            None => Ok(ClientFrame::Ignored),
        },
        Some("CLOSE") => match shape.second_string {
            Some(subid) => Ok(ClientFrame::Close { subid }),
            None => Ok(ClientFrame::Ignored),
        },
        Some("EVENT") => {
            // ["EVENT", {event}]: the event object is element 1.
            if !shape.object_elems.contains(&1) {
                return Ok(ClientFrame::Ignored);
            }
            let event_id = match shape.event_id {
                Some((1, id)) => Some(id),
                _ => None,
            };
            Ok(ClientFrame::Event { event_id })
        }
        _ => Ok(ClientFrame::Ignored),
    }
}

/// Scan an upstream frame. A parse error is reported to the caller: the
/// relay worker treats undecodable input as a dead connection.
pub fn scan_relay_frame(text: &str) -> Result<RelayFrame, JsonError> {
    let shape = FrameShape::scan(text)?;
    if !shape.root_is_array || shape.element_count == 0 {
        return Ok(RelayFrame::Empty);
    }
    match shape.tag.as_deref() {
        Some("EVENT") => {
            // ["EVENT", subid, {event}]: subid is element 1, the event
            // object element 2.
            let subid = match shape.second_string {
                Some(s) => s,
                None => return Ok(RelayFrame::Ignored),
            };
            if !shape.object_elems.contains(&2) {
                return Ok(RelayFrame::Ignored);
            }
            match shape.event_id {
                Some((2, id)) => Ok(RelayFrame::Event {
                    subid,
                    event_id: id,
                }),
                _ => Ok(RelayFrame::Ignored),
            }
        }
        Some("EOSE") => match shape.second_string {
            Some(subid) => Ok(RelayFrame::Eose { subid }),
            None => Ok(RelayFrame::Ignored),
        },
        _ => Ok(RelayFrame::Ignored),
    }
}

/// `["OK", <event_id>, true, ""]`: the optimistic publish ack.
pub fn ok_frame(event_id: &str) -> String {
    let mut w = JsonWriter::new();
    w.write_start_array();
    w.write_string("OK");
    w.write_string(event_id);
    w.write_bool(true);
    w.write_string("");
    w.write_end_array();
    w.into_string()
}

/// `["NOTICE", <message>]`.
pub fn notice_frame(message: &str) -> String {
    let mut w = JsonWriter::new();
    w.write_start_array();
    w.write_string("NOTICE");
    w.write_string(message);
    w.write_end_array();
    w.into_string()
}

/// `["CLOSED", <subid>, ""]`.
pub fn closed_frame(subid: &str) -> String {
    let mut w = JsonWriter::new();
    w.write_start_array();
    w.write_string("CLOSED");
    w.write_string(subid);
    w.write_string("");
    w.write_end_array();
    w.into_string()
}

/// `["EOSE", <subid>]`: the synthesized end-of-stored-events signal.
pub fn eose_frame(subid: &str) -> String {
    let mut w = JsonWriter::new();
    w.write_start_array();
    w.write_string("EOSE");
    w.write_string(subid);
    w.write_end_array();
    w.into_string()
}

/// What one walk of a frame collects. Depths are relative to the root
/// array: its elements sit at depth 1, members of a top-level event
/// object at depth 2. Anything deeper belongs to filters or event
/// content and is ignored.
#[derive(Default)]
struct FrameShape {
    root_is_array: bool,
    /// Number of elements in the root array.
    element_count: usize,
    /// First element, when it is a string.
    tag: Option<String>,
    /// Second element, when it is a string.
    second_string: Option<String>,
    /// Indexes of root elements that are objects.
    object_elems: Vec<usize>,
    /// First "id" member directly inside a root object element, with
    /// that element's index.
    event_id: Option<(usize, String)>,
}

struct ShapeScanner {
    shape: FrameShape,
    depth: usize,
    started: bool,
    current_elem: usize,
    current_field: Option<String>,
}

impl FrameShape {
    fn scan(text: &str) -> Result<FrameShape, JsonError> {
        let mut scanner = ShapeScanner {
            shape: FrameShape::default(),
            depth: 0,
            started: false,
            current_elem: 0,
            current_field: None,
        };
        parse_document(text, &mut scanner)?;
        Ok(scanner.shape)
    }
}

impl ShapeScanner {
    /// Called when a new root element begins (any value at depth 1).
    fn begin_element(&mut self) {
        self.current_elem = self.shape.element_count;
        self.shape.element_count += 1;
    }
}

impl JsonContentHandler for ShapeScanner {
    fn start_object(&mut self) {
        if self.depth == 1 && self.shape.root_is_array {
            self.begin_element();
            self.shape.object_elems.push(self.current_elem);
        }
        self.depth += 1;
        self.started = true;
    }

    fn end_object(&mut self) {
        self.depth -= 1;
    }

    fn start_array(&mut self) {
        if !self.started {
            self.shape.root_is_array = true;
        } else if self.depth == 1 && self.shape.root_is_array {
            self.begin_element();
        }
        self.depth += 1;
        self.started = true;
    }

    fn end_array(&mut self) {
        self.depth -= 1;
    }

    fn key(&mut self, key: &str) {
        if self.depth == 2 {
            self.current_field = Some(key.to_string());
        }
    }

    fn string_value(&mut self, value: &str) {
        if self.depth == 1 && self.shape.root_is_array {
            self.begin_element();
            match self.current_elem {
                0 => self.shape.tag = Some(value.to_string()),
                1 => self.shape.second_string = Some(value.to_string()),
                _ => {}
            }
        } else if self.depth == 2
            && self.shape.event_id.is_none()
            && self.shape.object_elems.contains(&self.current_elem)
            && self.current_field.as_deref() == Some("id")
        {
            self.shape.event_id = Some((self.current_elem, value.to_string()));
        }
        self.started = true;
    }

    fn number_value(&mut self, _number: JsonNumber) {
        if self.depth == 1 && self.shape.root_is_array {
            self.begin_element();
        }
        self.started = true;
    }

    fn boolean_value(&mut self, _value: bool) {
        if self.depth == 1 && self.shape.root_is_array {
            self.begin_element();
        }
        self.started = true;
    }

    fn null_value(&mut self) {
        if self.depth == 1 && self.shape.root_is_array {
            self.begin_element();
        }
        self.started = true;
    }
}
