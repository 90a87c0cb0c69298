//! Frame reassembly over a byte stream.
//!
//! A socket read can end in the middle of a frame. Because frames have no
//! length field, a frame is known to be complete once the next marker shows
//! up; the last frame in the buffer is decoded on trial and kept for the
//! next read if it does not decode yet.

use tracing::{debug, warn};

use crate::codec::{decode_frame, find_marker};
use crate::key::SharedKey;
use crate::{FRAME_MARKER, MAX_BUFFERED_BYTES};

/// Accumulates raw bytes and yields decoded payloads.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    buf: Vec<u8>,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends bytes received from the socket.
    ///
    /// If the buffer would exceed [`MAX_BUFFERED_BYTES`] the pending bytes
    /// are discarded first.
    pub fn push(&mut self, bytes: &[u8]) {
        if self.buf.len() + bytes.len() > MAX_BUFFERED_BYTES {
            warn!(
                pending = self.buf.len(),
                incoming = bytes.len(),
                "frame buffer overflow, discarding pending bytes"
            );
            self.buf.clear();
        }
        self.buf.extend_from_slice(bytes);
    }

    /// Number of bytes waiting for a frame to complete.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Decodes and removes every complete frame, in arrival order.
    pub fn drain(&mut self, key: Option<&SharedKey>) -> Vec<Vec<u8>> {
        let marker_len = FRAME_MARKER.len();
        let mut payloads = Vec::new();

        let Some(first) = find_marker(&self.buf, 0) else {
            // Keep a possible partial marker at the end.
            let keep = self.buf.len().min(marker_len - 1);
            let discard = self.buf.len() - keep;
            if discard > 0 {
                debug!(discard, "discarding bytes without frame marker");
                self.buf.drain(..discard);
            }
            return payloads;
        };
        if first > 0 {
            debug!(discard = first, "discarding bytes before frame marker");
            self.buf.drain(..first);
        }

        let mut start = marker_len;
        while let Some(next) = find_marker(&self.buf, start) {
            if next > start {
                match decode_frame(&self.buf[start..next], key) {
                    Ok(payload) => payloads.push(payload),
                    Err(e) => debug!(len = next - start, "dropping undecodable frame: {e}"),
                }
            }
            start = next + marker_len;
        }

        let tail = &self.buf[start..];
        if !tail.is_empty() {
            if let Ok(payload) = decode_frame(tail, key) {
                payloads.push(payload);
                self.buf.clear();
                return payloads;
            }
        }

        // Keep the trailing marker and its (possibly partial) frame.
        self.buf.drain(..start - marker_len);
        payloads
    }
}
