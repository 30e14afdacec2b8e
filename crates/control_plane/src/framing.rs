//! `<...>` framing for stream transports
//!
//! Bytes are buffered until a complete `<...>` span is present. Everything up
//! to and including the `>` of a returned frame is discarded; bytes outside
//! any frame are dropped. Partial frames stay buffered across reads.

use bytes::{Buf, BytesMut};
use contracts::{FRAME_END, FRAME_START};

/// Largest partial frame kept before the buffer is treated as garbage.
pub const MAX_FRAME_LEN: usize = 64 * 1024;

/// Reassembles frames from a byte stream
#[derive(Debug, Default)]
pub struct FrameBuffer {
    buf: BytesMut,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes read from the stream.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Buffered bytes not yet consumed.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Pop the next complete frame's contents.
    pub fn next_frame(&mut self) -> Option<String> {
        let Some(start) = self.buf.iter().position(|&b| b == FRAME_START) else {
            self.buf.clear();
            return None;
        };
        self.buf.advance(start);

        let delimiter = self
            .buf
            .iter()
            .skip(1)
            .position(|&b| b == FRAME_START || b == FRAME_END)
            .map(|i| i + 1);

        match delimiter {
            // A '<' inside an unterminated frame restarts the frame.
            Some(i) if self.buf[i] == FRAME_START => {
                self.buf.advance(i);
                self.next_frame()
            }
            Some(end) => {
                let frame = self.buf.split_to(end + 1);
                Some(String::from_utf8_lossy(&frame[1..end]).into_owned())
            }
            None => {
                if self.buf.len() > MAX_FRAME_LEN {
                    tracing::warn!(len = self.buf.len(), "discarding oversized partial frame");
                    self.buf.clear();
                }
                None
            }
        }
    }
}
