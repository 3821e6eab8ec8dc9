//! Codec boundary between connmux and the protocol it carries.
//!
//! connmux never interprets payload bytes. The caller supplies a
//! [`FramerBuilder`] that produces one [`Framer`] per physical connection;
//! the connection feeds raw bytes into it and gets whole frames back. The
//! multiplexer additionally needs the framer to be a [`Decoder`] so it can
//! learn which request each response belongs to.

use std::io;

use bytes::{Bytes, BytesMut};

/// A decoded response: the request id it answers plus the raw frame bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseFrame {
    request_id: u32,
    payload: Bytes,
}

impl ResponseFrame {
    /// Create a response frame.
    pub fn new(request_id: u32, payload: Bytes) -> Self {
        Self {
            request_id,
            payload,
        }
    }

    /// Request id carried by the frame.
    pub fn request_id(&self) -> u32 {
        self.request_id
    }

    /// Raw bytes handed to the waiting caller.
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Consume the frame, returning its bytes.
    pub fn into_payload(self) -> Bytes {
        self.payload
    }
}

/// Builds a [`Framer`] for each new physical connection.
///
/// Framers hold per-connection parse state, so a builder is shared while
/// framers never are.
pub trait FramerBuilder: Send + Sync + 'static {
    /// Create a framer for a freshly dialed connection.
    fn build(&self) -> Box<dyn Framer>;
}

/// Splits a byte stream (or a single datagram) into discrete frames.
pub trait Framer: Send + 'static {
    /// Extract the next complete frame from `src`.
    ///
    /// Returns `Ok(None)` when `src` does not yet hold a whole frame. The
    /// consumed bytes must be removed from `src`.
    fn read_frame(&mut self, src: &mut BytesMut) -> io::Result<Option<Bytes>>;

    /// Whether frames returned by this framer stay valid after the next call.
    ///
    /// When `false`, connmux copies every frame before handing it to the
    /// caller so it does not pin (or alias) the connection's read buffer.
    fn is_safe(&self) -> bool {
        false
    }

    /// Downcast to the multiplexing extension, if implemented.
    fn as_decoder(&mut self) -> Option<&mut dyn Decoder> {
        None
    }
}

/// Multiplexing extension of [`Framer`]: decodes a frame together with its
/// request id.
pub trait Decoder: Framer {
    /// Decode the next response from `src`, or `Ok(None)` if incomplete.
    fn decode(&mut self, src: &mut BytesMut) -> io::Result<Option<ResponseFrame>>;

    /// Copy response metadata into the caller's message before hand-off.
    fn update_msg(&mut self, frame: &ResponseFrame, msg: &dyn Msg) {
        let _ = (frame, msg);
    }
}

/// Carrier of the request id that correlates a call with its response.
///
/// Request ids must be unique among the calls concurrently in flight on one
/// physical connection.
pub trait Msg: Send + Sync + 'static {
    /// Request id of the outbound call.
    fn request_id(&self) -> u32;
}

impl Msg for u32 {
    fn request_id(&self) -> u32 {
        *self
    }
}

/// Detach a frame from the connection buffer unless the framer is safe.
pub(crate) fn detach(frame: Bytes, safe: bool) -> Bytes {
    if safe {
        frame
    } else {
        Bytes::copy_from_slice(&frame)
    }
}
