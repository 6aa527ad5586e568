/*
 * connection.rs
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

//! WebSocket connection after a successful handshake. A connection
//! splits into a reader half and a writer half: in the bouncer the
//! reader is pumped by one task while other tasks write through the
//! writer (the session serializes those writes behind its own locks).
//! The reader assembles fragmented messages; control frames are
//! delivered to the caller, who owns the write half and can answer
//! pings itself.

use bytes::BytesMut;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;

use crate::protocol::websocket::frame::{
    encode_frame, FrameParser, FrameSink, MAX_MESSAGE_SIZE, OP_BINARY, OP_CLOSE, OP_CONTINUATION,
    OP_PING, OP_PONG, OP_TEXT,
};
use crate::protocol::websocket::Role;

/// Unified stream: plain TCP (downstream clients, ws:// upstreams) or
/// TLS (wss:// upstreams).
pub enum WsStream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl AsyncRead for WsStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match &mut *self {
            WsStream::Plain(s) => Pin::new(s).poll_read(cx, buf),
            WsStream::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for WsStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match &mut *self {
            WsStream::Plain(s) => Pin::new(s).poll_write(cx, buf),
            WsStream::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut *self {
            WsStream::Plain(s) => Pin::new(s).poll_flush(cx),
            WsStream::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut *self {
            WsStream::Plain(s) => Pin::new(s).poll_shutdown(cx),
            WsStream::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

/// One complete websocket message on the receive path.
#[derive(Debug, PartialEq, Eq)]
pub enum Message {
    Text(String),
    Binary(Vec<u8>),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    Close(Option<u16>, String),
}

/// Connection handed out by the client connect / server accept paths.
/// `leftover` carries any bytes that followed the handshake head.
pub struct WsConnection {
    stream: WsStream,
    role: Role,
    leftover: BytesMut,
}

impl WsConnection {
    pub(crate) fn new(stream: WsStream, role: Role, leftover: BytesMut) -> Self {
        Self {
            stream,
            role,
            leftover,
        }
    }

    /// Split into independently owned reader and writer halves.
    pub fn split(self) -> (WsReader, WsWriter) {
        let (read, write) = tokio::io::split(self.stream);
        (
            WsReader {
                inner: read,
                buf: self.leftover,
                parser: FrameParser::new(self.role),
                queue: std::collections::VecDeque::new(),
                fragment: None,
                fragment_error: None,
            },
            WsWriter {
                inner: write,
                role: self.role,
            },
        )
    }
}

/// Raw frames collected from the parser before message assembly.
#[derive(Default)]
struct FrameQueue {
    frames: std::collections::VecDeque<(u8, bool, Vec<u8>)>,
}

impl FrameSink for FrameQueue {
    fn frame(&mut self, opcode: u8, fin: bool, data: &[u8]) {
        self.frames.push_back((opcode, fin, data.to_vec()));
    }
}

/// Read half: pulls complete messages off the wire.
pub struct WsReader {
    inner: ReadHalf<WsStream>,
    buf: BytesMut,
    parser: FrameParser,
    queue: std::collections::VecDeque<Message>,
    /// In-progress fragmented message: first frame's opcode + payload
    /// accumulated so far.
    fragment: Option<(u8, Vec<u8>)>,
    fragment_error: Option<io::Error>,
}

impl WsReader {
    /// Next complete message. `Ok(None)` means a clean end of stream.
    pub async fn next(&mut self) -> io::Result<Option<Message>> {
        loop {
            if let Some(msg) = self.queue.pop_front() {
                return Ok(Some(msg));
            }
            if let Some(e) = self.fragment_error.take() {
                return Err(e);
            }
            // Drain what is already buffered (handshake leftover or the
            // tail of a previous read) before touching the socket.
            if !self.buf.is_empty() {
                let mut frames = FrameQueue::default();
                self.parser.receive(&mut self.buf, &mut frames)?;
                if !frames.frames.is_empty() {
                    for (opcode, fin, data) in frames.frames {
                        self.assemble(opcode, fin, data);
                    }
                    continue;
                }
            }
            let mut tmp = [0u8; 8192];
            let n = self.inner.read(&mut tmp).await?;
            if n == 0 {
                return Ok(None);
            }
            self.buf.extend_from_slice(&tmp[..n]);
        }
    }

    /// Fold one frame into the message queue, assembling fragments.
    /// Assembly errors are parked and surfaced on the next poll so that
    /// already-queued messages are not lost.
    fn assemble(&mut self, opcode: u8, fin: bool, data: Vec<u8>) {
        if self.fragment_error.is_some() {
            return;
        }
        match opcode {
            OP_TEXT | OP_BINARY => {
                if self.fragment.is_some() {
                    self.fragment_error = Some(io::Error::new(
                        io::ErrorKind::InvalidData,
                        "new data frame inside fragmented message",
                    ));
                    return;
                }
                if fin {
                    self.finish_message(opcode, data);
                } else {
                    self.fragment = Some((opcode, data));
                }
            }
            OP_CONTINUATION => match self.fragment.take() {
                Some((first, mut acc)) => {
                    if acc.len() + data.len() > MAX_MESSAGE_SIZE {
                        self.fragment_error = Some(io::Error::new(
                            io::ErrorKind::InvalidData,
                            "fragmented message too long",
                        ));
                        return;
                    }
                    acc.extend_from_slice(&data);
                    if fin {
                        self.finish_message(first, acc);
                    } else {
                        self.fragment = Some((first, acc));
                    }
                }
                None => {
                    self.fragment_error = Some(io::Error::new(
                        io::ErrorKind::InvalidData,
                        "continuation frame without start",
                    ));
                }
            },
            OP_PING => self.queue.push_back(Message::Ping(data)),
            OP_PONG => self.queue.push_back(Message::Pong(data)),
            OP_CLOSE => {
                let (code, reason) = if data.len() >= 2 {
                    let code = u16::from_be_bytes([data[0], data[1]]);
                    let reason = String::from_utf8_lossy(&data[2..]).into_owned();
                    (Some(code), reason)
                } else {
                    (None, String::new())
                };
                self.queue.push_back(Message::Close(code, reason));
            }
            // Reserved opcodes: drop the frame.
            _ => {}
        }
    }

    fn finish_message(&mut self, opcode: u8, data: Vec<u8>) {
        if opcode == OP_TEXT {
            match String::from_utf8(data) {
                Ok(text) => self.queue.push_back(Message::Text(text)),
                Err(_) => {
                    self.fragment_error = Some(io::Error::new(
                        io::ErrorKind::InvalidData,
                        "text message not valid UTF-8",
                    ));
                }
            }
        } else {
            self.queue.push_back(Message::Binary(data));
        }
    }
}

/// Write half. Client-role writers mask every frame with a fresh random
/// key; server-role writers never mask.
pub struct WsWriter {
    inner: WriteHalf<WsStream>,
    role: Role,
}

impl WsWriter {
    pub async fn send_text(&mut self, data: &str) -> io::Result<()> {
        self.send_frame(OP_TEXT, data.as_bytes()).await
    }

    pub async fn send_ping(&mut self, data: &[u8]) -> io::Result<()> {
        self.send_frame(OP_PING, data).await
    }

    pub async fn send_pong(&mut self, data: &[u8]) -> io::Result<()> {
        self.send_frame(OP_PONG, data).await
    }

    /// Send a close frame. Code is optional (1000 = normal closure).
    pub async fn send_close(&mut self, code: Option<u16>, reason: &str) -> io::Result<()> {
        let mut payload = Vec::new();
        if let Some(c) = code {
            payload.extend_from_slice(&c.to_be_bytes());
        }
        payload.extend_from_slice(reason.as_bytes());
        self.send_frame(OP_CLOSE, &payload).await
    }

    /// Shut the transport down. Blocked reads on the peer half observe
    /// end of stream; a second shutdown is a harmless error.
    pub async fn shutdown(&mut self) -> io::Result<()> {
        self.inner.shutdown().await
    }

    async fn send_frame(&mut self, opcode: u8, payload: &[u8]) -> io::Result<()> {
        let mask_key = match self.role {
            Role::Client => {
                let mut key = [0u8; 4];
                getrandom::getrandom(&mut key)
                    .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
                Some(key)
            }
            Role::Server => None,
        };
        let mut out = BytesMut::with_capacity(14 + payload.len());
        encode_frame(opcode, payload, mask_key, &mut out)?;
        self.inner.write_all(&out).await?;
        self.inner.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn tcp_pair() -> (TcpStream, TcpStream) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (client, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
        (client.unwrap(), accepted.unwrap().0)
    }

    async fn ws_pair() -> (WsReader, WsWriter, WsReader, WsWriter) {
        let (c, s) = tcp_pair().await;
        let (cr, cw) = WsConnection::new(WsStream::Plain(c), Role::Client, BytesMut::new()).split();
        let (sr, sw) = WsConnection::new(WsStream::Plain(s), Role::Server, BytesMut::new()).split();
        (cr, cw, sr, sw)
    }

    fn detached_reader(stream: TcpStream) -> WsReader {
        let (reader, _writer) =
            WsConnection::new(WsStream::Plain(stream), Role::Client, BytesMut::new()).split();
        reader
    }

    #[tokio::test]
    async fn text_roundtrip_both_roles() {
        let (mut cr, mut cw, mut sr, mut sw) = ws_pair().await;
        cw.send_text("[\"REQ\",\"s\",{}]").await.unwrap();
        assert_eq!(
            sr.next().await.unwrap(),
            Some(Message::Text("[\"REQ\",\"s\",{}]".into()))
        );
        sw.send_text("[\"EOSE\",\"s\"]").await.unwrap();
        assert_eq!(
            cr.next().await.unwrap(),
            Some(Message::Text("[\"EOSE\",\"s\"]".into()))
        );
    }

    #[tokio::test]
    async fn ping_pong_roundtrip() {
        let (mut cr, mut cw, mut sr, mut sw) = ws_pair().await;
        cw.send_ping(b"hb").await.unwrap();
        assert_eq!(sr.next().await.unwrap(), Some(Message::Ping(b"hb".to_vec())));
        sw.send_pong(b"hb").await.unwrap();
        assert_eq!(cr.next().await.unwrap(), Some(Message::Pong(b"hb".to_vec())));
    }

    #[tokio::test]
    async fn close_frame_decoded() {
        let (mut cr, _cw, _sr, mut sw) = ws_pair().await;
        sw.send_close(Some(1000), "done").await.unwrap();
        assert_eq!(
            cr.next().await.unwrap(),
            Some(Message::Close(Some(1000), "done".into()))
        );
    }

    #[tokio::test]
    async fn shutdown_ends_stream() {
        let (_cr, mut cw, mut sr, _sw) = ws_pair().await;
        cw.shutdown().await.unwrap();
        assert_eq!(sr.next().await.unwrap(), None);
    }

    #[tokio::test]
    async fn leftover_handshake_bytes_are_first_frames() {
        let (c, s) = tcp_pair().await;
        // Server pushed a frame right behind its 101; the client's
        // handshake read over-read it into leftover.
        let mut leftover = BytesMut::new();
        encode_frame(OP_TEXT, b"early", None, &mut leftover).unwrap();
        let (mut cr, _cw) =
            WsConnection::new(WsStream::Plain(c), Role::Client, leftover).split();
        drop(s);
        assert_eq!(cr.next().await.unwrap(), Some(Message::Text("early".into())));
        assert_eq!(cr.next().await.unwrap(), None);
    }

    #[tokio::test]
    async fn fragmented_text_assembles() {
        let (c, s) = tcp_pair().await;
        let mut reader = detached_reader(c);
        // fin=0 text "EV", then fin=1 continuation "ENT", unmasked
        // (server to client direction), written raw.
        let mut raw = Vec::new();
        raw.extend_from_slice(&[0x01, 0x02]);
        raw.extend_from_slice(b"EV");
        raw.extend_from_slice(&[0x80, 0x03]);
        raw.extend_from_slice(b"ENT");
        use tokio::io::AsyncWriteExt as _;
        let mut s = s;
        s.write_all(&raw).await.unwrap();
        assert_eq!(
            reader.next().await.unwrap(),
            Some(Message::Text("EVENT".into()))
        );
    }

    #[tokio::test]
    async fn control_frame_between_fragments() {
        let (c, s) = tcp_pair().await;
        let mut reader = detached_reader(c);
        let mut raw = Vec::new();
        raw.extend_from_slice(&[0x01, 0x03]);
        raw.extend_from_slice(b"par");
        raw.extend_from_slice(&[0x89, 0x02]); // ping, fin=1
        raw.extend_from_slice(b"hb");
        raw.extend_from_slice(&[0x80, 0x04]);
        raw.extend_from_slice(b"tial");
        use tokio::io::AsyncWriteExt as _;
        let mut s = s;
        s.write_all(&raw).await.unwrap();
        assert_eq!(reader.next().await.unwrap(), Some(Message::Ping(b"hb".to_vec())));
        assert_eq!(
            reader.next().await.unwrap(),
            Some(Message::Text("partial".into()))
        );
    }

    #[tokio::test]
    async fn stray_continuation_is_error() {
        let (c, s) = tcp_pair().await;
        let mut reader = detached_reader(c);
        use tokio::io::AsyncWriteExt as _;
        let mut s = s;
        s.write_all(&[0x80, 0x01, b'x']).await.unwrap();
        assert!(reader.next().await.is_err());
    }

    #[tokio::test]
    async fn invalid_utf8_text_is_error() {
        let (c, s) = tcp_pair().await;
        let mut reader = detached_reader(c);
        use tokio::io::AsyncWriteExt as _;
        let mut s = s;
        s.write_all(&[0x81, 0x02, 0xff, 0xfe]).await.unwrap();
        assert!(reader.next().await.is_err());
    }
}
