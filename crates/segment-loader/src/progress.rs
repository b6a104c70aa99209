use bytes::{Bytes, BytesMut};

use crate::segment::{Fmp4State, Segment};

/// Builds up a progressively delivered media payload.
///
/// Every payload byte is handed out exactly once: newly arrived bytes as a
/// partial append while the body is still streaming, and whatever lies past
/// [`Segment::last_reached_char`] once the request completes.
#[derive(Debug, Default)]
pub(crate) struct ProgressiveAccumulator {
    buffer: BytesMut,
}

impl ProgressiveAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a received chunk. Returns the bytes to forward as a partial append, if any.
    pub fn push(&mut self, segment: &mut Segment, chunk: &[u8]) -> Option<Bytes> {
        if segment.is_encrypted() || chunk.is_empty() {
            return None;
        }
        self.buffer.extend_from_slice(chunk);

        if segment.lock_fmp4(&self.buffer) == Fmp4State::Fmp4 {
            return None;
        }

        let start = segment.last_reached_char.min(self.buffer.len());
        if start == self.buffer.len() {
            return None;
        }
        let fresh = Bytes::copy_from_slice(&self.buffer[start..]);
        segment.last_reached_char = self.buffer.len();
        Some(fresh)
    }

    /// The part of the complete payload that has not been forwarded yet.
    pub fn finish(segment: &mut Segment, payload: &Bytes) -> Bytes {
        segment.lock_fmp4(payload);

        let start = segment.last_reached_char.min(payload.len());
        segment.last_reached_char = payload.len();
        payload.slice(start..)
    }
}
