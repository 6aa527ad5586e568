/*
 * frame.rs
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

//! WebSocket frame format (RFC 6455 §5): role-aware push parser and
//! encoder. Inbound masking is enforced per role: a server requires
//! masked frames and unmasks in place, a client rejects masked frames.

use bytes::{Buf, BufMut, BytesMut};
use std::io;

use crate::protocol::websocket::Role;

// Opcodes
pub const OP_CONTINUATION: u8 = 0;
pub const OP_TEXT: u8 = 1;
pub const OP_BINARY: u8 = 2;
pub const OP_CLOSE: u8 = 8;
pub const OP_PING: u8 = 9;
pub const OP_PONG: u8 = 10;

/// Max payload we accept for a single data frame, and for an assembled
/// fragmented message. Nostr events run large (long-form content,
/// embedded media descriptors), so this is generous. Control frames are
/// capped at 125 by the RFC.
pub const MAX_MESSAGE_SIZE: usize = 1 << 20;

/// Callback for completed frames on the receive path.
pub trait FrameSink {
    fn frame(&mut self, opcode: u8, fin: bool, data: &[u8]);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParseState {
    Header,
    Length16,
    Length64,
    MaskKey,
    Payload,
}

/// Push parser for websocket frames. Feed bytes with `receive`; each
/// completed frame is delivered to the sink, unmasked.
pub struct FrameParser {
    role: Role,
    state: ParseState,
    fin: bool,
    opcode: u8,
    masked: bool,
    mask_key: [u8; 4],
    payload_len: usize,
}

impl FrameParser {
    pub fn new(role: Role) -> Self {
        Self {
            role,
            state: ParseState::Header,
            fin: false,
            opcode: 0,
            masked: false,
            mask_key: [0; 4],
            payload_len: 0,
        }
    }

    /// Consume as many complete frames from `buf` as are available.
    /// Partial frame data is left in the buffer for the next call.
    pub fn receive<S: FrameSink>(&mut self, buf: &mut BytesMut, sink: &mut S) -> io::Result<()> {
        loop {
            match self.state {
                ParseState::Header => {
                    if buf.len() < 2 {
                        return Ok(());
                    }
                    let b0 = buf.get_u8();
                    let b1 = buf.get_u8();
                    self.fin = (b0 & 0x80) != 0;
                    if (b0 & 0x70) != 0 {
                        return Err(io::Error::new(
                            io::ErrorKind::InvalidData,
                            "reserved bits set (no extension negotiated)",
                        ));
                    }
                    self.opcode = b0 & 0x0f;
                    self.masked = (b1 & 0x80) != 0;
                    match (self.role, self.masked) {
                        (Role::Client, true) => {
                            return Err(io::Error::new(
                                io::ErrorKind::InvalidData,
                                "server frame must not be masked",
                            ));
                        }
                        (Role::Server, false) => {
                            return Err(io::Error::new(
                                io::ErrorKind::InvalidData,
                                "client frame must be masked",
                            ));
                        }
                        _ => {}
                    }
                    let len7 = b1 & 0x7f;
                    if self.is_control() && (len7 > 125 || !self.fin) {
                        return Err(io::Error::new(
                            io::ErrorKind::InvalidData,
                            "control frame too long or fragmented",
                        ));
                    }
                    match len7 {
                        126 => self.state = ParseState::Length16,
                        127 => self.state = ParseState::Length64,
                        n => {
                            self.payload_len = n as usize;
                            self.state = self.after_length();
                        }
                    }
                }
                ParseState::Length16 => {
                    if buf.len() < 2 {
                        return Ok(());
                    }
                    self.payload_len = buf.get_u16() as usize;
                    self.check_length()?;
                    self.state = self.after_length();
                }
                ParseState::Length64 => {
                    if buf.len() < 8 {
                        return Ok(());
                    }
                    let len = buf.get_u64();
                    if len > MAX_MESSAGE_SIZE as u64 {
                        return Err(io::Error::new(
                            io::ErrorKind::InvalidData,
                            "frame payload too long",
                        ));
                    }
                    self.payload_len = len as usize;
                    self.state = self.after_length();
                }
                ParseState::MaskKey => {
                    if buf.len() < 4 {
                        return Ok(());
                    }
                    buf.copy_to_slice(&mut self.mask_key);
                    self.state = ParseState::Payload;
                }
                ParseState::Payload => {
                    if buf.len() < self.payload_len {
                        return Ok(());
                    }
                    let mut payload = buf.split_to(self.payload_len);
                    if self.masked {
                        for (i, b) in payload.iter_mut().enumerate() {
                            *b ^= self.mask_key[i % 4];
                        }
                    }
                    sink.frame(self.opcode, self.fin, &payload);
                    self.state = ParseState::Header;
                }
            }
        }
    }

    fn is_control(&self) -> bool {
        self.opcode >= OP_CLOSE
    }

    fn after_length(&self) -> ParseState {
        if self.masked {
            ParseState::MaskKey
        } else {
            ParseState::Payload
        }
    }

    fn check_length(&self) -> io::Result<()> {
        if self.payload_len > MAX_MESSAGE_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "frame payload too long",
            ));
        }
        Ok(())
    }
}

/// Encode one frame. `mask_key` is Some for the client role (outbound
/// frames XOR-masked per RFC 6455 §5.3) and None for the server role.
pub fn encode_frame(
    opcode: u8,
    payload: &[u8],
    mask_key: Option<[u8; 4]>,
    out: &mut BytesMut,
) -> io::Result<()> {
    if payload.len() > MAX_MESSAGE_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "payload too long",
        ));
    }
    if opcode >= OP_CLOSE && payload.len() > 125 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "control payload max 125 bytes",
        ));
    }
    out.put_u8(0x80 | (opcode & 0x0f));
    let mask_bit = if mask_key.is_some() { 0x80u8 } else { 0 };
    let len = payload.len();
    if len < 126 {
        out.put_u8(mask_bit | (len as u8));
    } else if len < 65536 {
        out.put_u8(mask_bit | 126);
        out.put_u16(len as u16);
    } else {
        out.put_u8(mask_bit | 127);
        out.put_u64(len as u64);
    }
    match mask_key {
        Some(key) => {
            out.put_slice(&key);
            for (i, &b) in payload.iter().enumerate() {
                out.put_u8(b ^ key[i % 4]);
            }
        }
        None => out.put_slice(payload),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Collect {
        frames: Vec<(u8, bool, Vec<u8>)>,
    }

    impl FrameSink for Collect {
        fn frame(&mut self, opcode: u8, fin: bool, data: &[u8]) {
            self.frames.push((opcode, fin, data.to_vec()));
        }
    }

    #[test]
    fn client_to_server_roundtrip() {
        let mut wire = BytesMut::new();
        encode_frame(OP_TEXT, b"[\"EOSE\",\"s\"]", Some([1, 2, 3, 4]), &mut wire).unwrap();
        let mut parser = FrameParser::new(Role::Server);
        let mut sink = Collect::default();
        parser.receive(&mut wire, &mut sink).unwrap();
        assert_eq!(sink.frames, vec![(OP_TEXT, true, b"[\"EOSE\",\"s\"]".to_vec())]);
        assert!(wire.is_empty());
    }

    #[test]
    fn server_to_client_roundtrip() {
        let mut wire = BytesMut::new();
        encode_frame(OP_TEXT, b"hello", None, &mut wire).unwrap();
        let mut parser = FrameParser::new(Role::Client);
        let mut sink = Collect::default();
        parser.receive(&mut wire, &mut sink).unwrap();
        assert_eq!(sink.frames, vec![(OP_TEXT, true, b"hello".to_vec())]);
    }

    #[test]
    fn extended_16bit_length() {
        let payload = vec![0x5a; 300];
        let mut wire = BytesMut::new();
        encode_frame(OP_BINARY, &payload, None, &mut wire).unwrap();
        // 2 header bytes + 2 length bytes + payload
        assert_eq!(wire.len(), 4 + 300);
        let mut parser = FrameParser::new(Role::Client);
        let mut sink = Collect::default();
        parser.receive(&mut wire, &mut sink).unwrap();
        assert_eq!(sink.frames[0].2, payload);
    }

    #[test]
    fn extended_64bit_length() {
        let payload = vec![7u8; 70000];
        let mut wire = BytesMut::new();
        encode_frame(OP_BINARY, &payload, Some([9, 9, 9, 9]), &mut wire).unwrap();
        assert_eq!(wire.len(), 2 + 8 + 4 + 70000);
        let mut parser = FrameParser::new(Role::Server);
        let mut sink = Collect::default();
        parser.receive(&mut wire, &mut sink).unwrap();
        assert_eq!(sink.frames[0].2.len(), 70000);
    }

    #[test]
    fn incremental_feed() {
        let mut wire = BytesMut::new();
        encode_frame(OP_TEXT, b"abcdef", None, &mut wire).unwrap();
        let mut parser = FrameParser::new(Role::Client);
        let mut sink = Collect::default();
        let mut fed = BytesMut::new();
        // Feed one byte at a time; the parser must never lose position.
        while !wire.is_empty() {
            fed.extend_from_slice(&wire.split_to(1));
            parser.receive(&mut fed, &mut sink).unwrap();
        }
        assert_eq!(sink.frames, vec![(OP_TEXT, true, b"abcdef".to_vec())]);
    }

    #[test]
    fn unmasked_frame_rejected_by_server() {
        let mut wire = BytesMut::new();
        encode_frame(OP_TEXT, b"x", None, &mut wire).unwrap();
        let mut parser = FrameParser::new(Role::Server);
        let mut sink = Collect::default();
        assert!(parser.receive(&mut wire, &mut sink).is_err());
    }

    #[test]
    fn masked_frame_rejected_by_client() {
        let mut wire = BytesMut::new();
        encode_frame(OP_TEXT, b"x", Some([0, 0, 0, 0]), &mut wire).unwrap();
        let mut parser = FrameParser::new(Role::Client);
        let mut sink = Collect::default();
        assert!(parser.receive(&mut wire, &mut sink).is_err());
    }

    #[test]
    fn oversized_control_frame_rejected() {
        let mut wire = BytesMut::new();
        assert!(encode_frame(OP_PING, &[0u8; 126], None, &mut wire).is_err());
    }

    #[test]
    fn two_frames_in_one_buffer() {
        let mut wire = BytesMut::new();
        encode_frame(OP_TEXT, b"one", None, &mut wire).unwrap();
        encode_frame(OP_PING, b"pp", None, &mut wire).unwrap();
        let mut parser = FrameParser::new(Role::Client);
        let mut sink = Collect::default();
        parser.receive(&mut wire, &mut sink).unwrap();
        assert_eq!(sink.frames.len(), 2);
        assert_eq!(sink.frames[1].0, OP_PING);
    }
}
