//! Test fixtures: a length-prefixed codec, instrumented dialers and loopback
//! servers.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::core::{Decoder, Framer, FramerBuilder, ResponseFrame, TransportError, TransportResult};
use crate::transport::{Conn, DialOptions, Dialer};

/// Frame layout: `[len: u32 BE][request id: u32 BE][payload]`, where `len`
/// covers the id and the payload.
pub(crate) fn encode_frame(id: u32, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + payload.len());
    out.extend_from_slice(&(4 + payload.len() as u32).to_be_bytes());
    out.extend_from_slice(&id.to_be_bytes());
    out.extend_from_slice(payload);
    out
}

/// A frame whose length field is too short to hold a request id.
pub(crate) const MALFORMED_FRAME: [u8; 5] = [0, 0, 0, 1, 0xff];

fn split_frame(src: &mut BytesMut) -> io::Result<Option<Bytes>> {
    if src.len() < 4 {
        return Ok(None);
    }
    let len = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;
    if len < 4 {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "frame shorter than its header"));
    }
    if src.len() < 4 + len {
        return Ok(None);
    }
    Ok(Some(src.split_to(4 + len).freeze()))
}

fn parse_frame(mut frame: Bytes) -> ResponseFrame {
    frame.advance(4);
    let id = frame.get_u32();
    ResponseFrame::new(id, frame)
}

/// Length-prefixed codec; both the builder and the framer.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct LengthPrefixed;

impl FramerBuilder for LengthPrefixed {
    fn build(&self) -> Box<dyn Framer> {
        Box::new(LengthPrefixed)
    }
}

impl Framer for LengthPrefixed {
    fn read_frame(&mut self, src: &mut BytesMut) -> io::Result<Option<Bytes>> {
        split_frame(src)
    }

    fn as_decoder(&mut self) -> Option<&mut dyn Decoder> {
        Some(self)
    }
}

impl Decoder for LengthPrefixed {
    fn decode(&mut self, src: &mut BytesMut) -> io::Result<Option<ResponseFrame>> {
        Ok(split_frame(src)?.map(parse_frame))
    }
}

/// Framer without the decoder extension.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct PlainFramer;

impl FramerBuilder for PlainFramer {
    fn build(&self) -> Box<dyn Framer> {
        Box::new(PlainFramer)
    }
}

impl Framer for PlainFramer {
    fn read_frame(&mut self, src: &mut BytesMut) -> io::Result<Option<Bytes>> {
        split_frame(src)
    }
}

/// Counts dial attempts, optionally delaying each one.
pub(crate) struct CountingDialer<D> {
    inner: D,
    delay: Duration,
    dials: AtomicUsize,
}

impl<D: Dialer> CountingDialer<D> {
    pub(crate) fn new(inner: D) -> Self {
        Self::with_delay(inner, Duration::ZERO)
    }

    pub(crate) fn with_delay(inner: D, delay: Duration) -> Self {
        Self {
            inner,
            delay,
            dials: AtomicUsize::new(0),
        }
    }

    pub(crate) fn dials(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<D: Dialer> Dialer for CountingDialer<D> {
    async fn dial(&self, opts: &DialOptions) -> TransportResult<Conn> {
        self.dials.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.inner.dial(opts).await
    }
}

/// Refuses every dial.
#[derive(Debug, Default)]
pub(crate) struct FailingDialer {
    attempts: AtomicUsize,
}

impl FailingDialer {
    pub(crate) fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Dialer for FailingDialer {
    async fn dial(&self, _opts: &DialOptions) -> TransportResult<Conn> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(TransportError::Io(io::Error::new(io::ErrorKind::ConnectionRefused, "refused")))
    }
}

/// TCP server echoing raw bytes back.
pub(crate) async fn spawn_tcp_echo() -> (String, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let handle = tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let (mut rd, mut wr) = stream.into_split();
                let _ = tokio::io::copy(&mut rd, &mut wr).await;
            });
        }
    });
    (addr, handle)
}

/// TCP server that accepts every connection and closes it at once.
pub(crate) async fn spawn_tcp_hangup() -> (String, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let handle = tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            drop(stream);
        }
    });
    (addr, handle)
}

/// What the frame servers do with a request payload.
enum Reply {
    Echo,
    Hold(Duration),
    Poison,
    Trailing,
    Silent,
}

fn reply_for(payload: &[u8]) -> Reply {
    match payload {
        b"poison" => Reply::Poison,
        b"trailing" => Reply::Trailing,
        b"silent" => Reply::Silent,
        p => match std::str::from_utf8(p).ok().and_then(|s| s.strip_prefix("hold:")) {
            Some(ms) => Reply::Hold(Duration::from_millis(ms.parse().unwrap_or(0))),
            None => Reply::Echo,
        },
    }
}

/// TCP server speaking the length-prefixed codec.
///
/// Echoes each request frame. `hold:<ms>` delays the echo, `poison` answers
/// with a malformed frame, `silent` never answers. Replies are written
/// concurrently, so they can overtake each other.
pub(crate) async fn spawn_tcp_frame_server() -> (String, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let handle = tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let (mut rd, wr) = stream.into_split();
                let wr = Arc::new(Mutex::new(wr));
                let mut buf = BytesMut::with_capacity(4096);
                loop {
                    while let Ok(Some(frame)) = split_frame(&mut buf) {
                        let request = parse_frame(frame);
                        let wr = Arc::clone(&wr);
                        tokio::spawn(async move {
                            let out = match reply_for(request.payload()) {
                                Reply::Silent => return,
                                Reply::Poison => MALFORMED_FRAME.to_vec(),
                                Reply::Hold(delay) => {
                                    tokio::time::sleep(delay).await;
                                    encode_frame(request.request_id(), request.payload())
                                }
                                Reply::Echo | Reply::Trailing => encode_frame(request.request_id(), request.payload()),
                            };
                            let _ = wr.lock().await.write_all(&out).await;
                        });
                    }
                    match rd.read_buf(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(_) => {}
                    }
                }
            });
        }
    });
    (addr, handle)
}

/// UDP server speaking the length-prefixed codec, one frame per datagram.
///
/// Echoes each request. `poison` first sends a malformed datagram and
/// `trailing` first sends a frame followed by stray bytes; the echo follows
/// either way. `silent` never answers.
pub(crate) async fn spawn_udp_frame_server() -> (String, JoinHandle<()>) {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap().to_string();
    let handle = tokio::spawn(async move {
        let mut raw = vec![0u8; 65535];
        while let Ok((n, peer)) = socket.recv_from(&mut raw).await {
            let mut packet = BytesMut::from(&raw[..n]);
            let Ok(Some(frame)) = split_frame(&mut packet) else {
                continue;
            };
            let request = parse_frame(frame);
            let echo = encode_frame(request.request_id(), request.payload());
            match reply_for(request.payload()) {
                Reply::Silent => continue,
                Reply::Poison => {
                    let _ = socket.send_to(&MALFORMED_FRAME, peer).await;
                }
                Reply::Trailing => {
                    let mut junk = echo.clone();
                    junk.extend_from_slice(b"xx");
                    let _ = socket.send_to(&junk, peer).await;
                }
                Reply::Hold(delay) => tokio::time::sleep(delay).await,
                Reply::Echo => {}
            }
            let _ = socket.send_to(&echo, peer).await;
        }
    });
    (addr, handle)
}
