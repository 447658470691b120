//! Capture ring buffer with encoder hand-off cursors
//!
//! A frame-indexed circular byte buffer sitting between the capture stream
//! and the encoder pipe. Three cursors track its regions: `producer` is the
//! next frame the capture drain fills, `consumer` is the next frame owed to
//! the encoder, and `committed` bounds how far the encoder may read (it is
//! advanced past frames in which sound was detected, and by the lead-out
//! tail at shutdown). A residual byte count carries a partially written
//! frame across non-blocking pipe writes.
//!
//! One guard frame distinguishes a full buffer from an empty one, so the
//! usable capacity is exactly the requested frame count.

/// Circular PCM buffer owned by the recording engine.
///
/// Frames are stored as raw little-endian bytes, ready for the encoder pipe.
/// Cyclically, `consumer <= committed <= producer` whenever there is an
/// encoder attached; the pre-roll ratchet in the waiting state only ever
/// moves `consumer` toward `producer`.
pub struct CaptureRing {
    buf: Vec<u8>,
    frame_bytes: usize,
    /// Usable capacity in frames (one extra guard slot is allocated).
    frames: usize,
    producer: usize,
    consumer: usize,
    committed: usize,
    residual: usize,
}

impl CaptureRing {
    /// Create a ring holding `frames` frames of `frame_bytes` bytes each.
    pub fn with_capacity(frames: usize, frame_bytes: usize) -> Self {
        assert!(frames > 0 && frame_bytes > 0);
        Self {
            buf: vec![0u8; (frames + 1) * frame_bytes],
            frame_bytes,
            frames,
            producer: 0,
            consumer: 0,
            committed: 0,
            residual: 0,
        }
    }

    fn slots(&self) -> usize {
        self.frames + 1
    }

    /// Usable capacity in frames.
    pub fn capacity(&self) -> usize {
        self.frames
    }

    /// Bytes per frame.
    pub fn frame_bytes(&self) -> usize {
        self.frame_bytes
    }

    /// Frames captured but not yet drained to the encoder.
    pub fn pending_frames(&self) -> usize {
        (self.producer + self.slots() - self.consumer) % self.slots()
    }

    /// Number of frames that can be written at `producer` without wrapping
    /// and without touching undrained data. Zero means the buffer is full:
    /// the capture drain must treat that as an overrun.
    pub fn contiguous_free(&self) -> usize {
        if self.consumer > self.producer {
            self.consumer - self.producer - 1
        } else if self.consumer == 0 {
            self.slots() - self.producer - 1
        } else {
            self.slots() - self.producer
        }
    }

    /// Copy interleaved samples into the producer region.
    ///
    /// The caller must have bounded the sample count by `contiguous_free()`;
    /// the cursor is not moved until `advance_producer`.
    pub fn write_frames(&mut self, samples: &[i16]) {
        debug_assert_eq!(samples.len() * 2 % self.frame_bytes, 0);
        debug_assert!(samples.len() * 2 / self.frame_bytes <= self.contiguous_free());
        let mut o = self.producer * self.frame_bytes;
        for s in samples {
            self.buf[o..o + 2].copy_from_slice(&s.to_le_bytes());
            o += 2;
        }
    }

    /// Advance the producer cursor after a capture drain.
    pub fn advance_producer(&mut self, frames: usize) {
        self.producer = (self.producer + frames) % self.slots();
    }

    /// Record that sound was detected `offset` frames into the region
    /// currently being produced.
    pub fn mark_committed(&mut self, offset: usize) {
        self.committed = (self.producer + offset) % self.slots();
    }

    /// Whether any committed frames await the encoder.
    pub fn has_payload(&self) -> bool {
        self.consumer != self.committed
    }

    /// The contiguous byte span owed to the encoder, starting mid-frame when
    /// a previous write stopped partway through one.
    pub fn payload(&self) -> &[u8] {
        if self.consumer == self.committed {
            return &[];
        }
        let frames_ahead = if self.consumer < self.committed {
            self.committed - self.consumer
        } else {
            self.slots() - self.consumer
        };
        let start = self.consumer * self.frame_bytes + self.residual;
        let len = frames_ahead * self.frame_bytes - self.residual;
        &self.buf[start..start + len]
    }

    /// Account for `bytes` written to the encoder pipe: the consumer cursor
    /// advances by whole frames and the remainder becomes the residual.
    pub fn advance_consumer(&mut self, bytes: usize) {
        let total = self.residual + bytes;
        self.consumer = (self.consumer + total / self.frame_bytes) % self.slots();
        self.residual = total % self.frame_bytes;
    }

    /// Pre-roll ratchet: drop captured frames so that at most `max_frames`
    /// precede the producer cursor. Used while waiting for the trigger, when
    /// nothing has been handed to an encoder yet.
    pub fn retain_latest(&mut self, max_frames: usize) {
        debug_assert_eq!(self.residual, 0);
        if self.pending_frames() > max_frames {
            self.consumer = (self.producer + self.slots() - max_frames) % self.slots();
        }
    }

    /// Lead-out tail: move `committed` forward by up to `frames`, never past
    /// the producer cursor.
    pub fn extend_committed(&mut self, frames: usize) {
        let gap = (self.producer + self.slots() - self.committed) % self.slots();
        self.committed = (self.committed + frames.min(gap)) % self.slots();
    }

    #[cfg(test)]
    fn cursors(&self) -> (usize, usize, usize) {
        (self.consumer, self.committed, self.producer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Produce `n` frames of the given mono sample, committing each one.
    fn produce_committed(ring: &mut CaptureRing, n: usize, value: i16) {
        let mut left = n;
        while left > 0 {
            let take = left.min(ring.contiguous_free());
            assert!(take > 0, "ring full while producing");
            ring.write_frames(&vec![value; take]);
            ring.mark_committed(take - 1);
            ring.advance_producer(take);
            left -= take;
        }
    }

    fn drain(ring: &mut CaptureRing, max_bytes: usize) -> usize {
        let n = ring.payload().len().min(max_bytes);
        ring.advance_consumer(n);
        n
    }

    #[test]
    fn empty_ring_has_full_free_span() {
        let ring = CaptureRing::with_capacity(8, 2);
        assert_eq!(ring.capacity(), 8);
        assert_eq!(ring.contiguous_free(), 8);
        assert_eq!(ring.pending_frames(), 0);
        assert!(!ring.has_payload());
        assert!(ring.payload().is_empty());
    }

    #[test]
    fn write_then_drain_round_trip() {
        let mut ring = CaptureRing::with_capacity(8, 2);
        ring.write_frames(&[100, -100, 200]);
        ring.mark_committed(2);
        ring.advance_producer(3);

        assert_eq!(ring.pending_frames(), 3);
        // committed points at the last loud frame, so two frames are payload
        let payload = ring.payload().to_vec();
        assert_eq!(payload, vec![100, 0, 156, 255]); // 100, -100 as LE bytes
        ring.advance_consumer(payload.len());
        assert!(!ring.has_payload());
    }

    #[test]
    fn residual_accounting_across_partial_writes() {
        let mut ring = CaptureRing::with_capacity(8, 4);
        ring.write_frames(&[1, 2, 3, 4, 5, 6]); // 3 stereo frames
        ring.mark_committed(2);
        ring.advance_producer(3);

        // 2 committed frames = 8 bytes; drain 3, then 5
        assert_eq!(ring.payload().len(), 8);
        ring.advance_consumer(3);
        assert_eq!(ring.payload().len(), 5);
        ring.advance_consumer(5);
        assert_eq!(ring.payload().len(), 0);
        assert_eq!(ring.pending_frames(), 1);
    }

    #[test]
    fn full_buffer_reports_no_free_span() {
        let mut ring = CaptureRing::with_capacity(4, 2);
        produce_committed(&mut ring, 4, 7);
        assert_eq!(ring.pending_frames(), 4);
        assert_eq!(ring.contiguous_free(), 0);
    }

    #[test]
    fn retain_latest_caps_pending_frames() {
        let mut ring = CaptureRing::with_capacity(10, 2);
        ring.write_frames(&[0; 7]);
        ring.advance_producer(7);
        ring.retain_latest(3);
        assert_eq!(ring.pending_frames(), 3);
        // a smaller backlog is left alone
        ring.retain_latest(5);
        assert_eq!(ring.pending_frames(), 3);
    }

    #[test]
    fn retain_latest_across_wrap() {
        let mut ring = CaptureRing::with_capacity(6, 2);
        // wind the cursors forward so the next writes wrap
        produce_committed(&mut ring, 5, 1);
        while drain(&mut ring, 64) > 0 {}
        ring.retain_latest(0);
        produce_committed(&mut ring, 4, 1);
        // consumer now behind a wrapped producer
        ring.retain_latest(2);
        assert_eq!(ring.pending_frames(), 2);
    }

    #[test]
    fn extend_committed_clamps_to_producer() {
        let mut ring = CaptureRing::with_capacity(10, 2);
        ring.write_frames(&[0; 6]);
        ring.mark_committed(1); // sound in frame 1 only
        ring.advance_producer(6);

        ring.extend_committed(100);
        // committed may never pass the producer
        let (_, fe, fj) = ring.cursors();
        assert_eq!(fe, fj);
        assert_eq!(ring.payload().len(), 6 * 2);
    }

    #[test]
    fn extend_committed_partial_tail() {
        let mut ring = CaptureRing::with_capacity(10, 2);
        ring.write_frames(&[0; 8]);
        ring.mark_committed(3);
        ring.advance_producer(8);

        ring.extend_committed(2);
        assert_eq!(ring.payload().len(), 5 * 2); // frames 0..5 committed
    }

    // The three cursors can land in any rotational arrangement once the ring
    // wraps; these walks pin the span arithmetic in each of the six cyclic
    // orderings of (consumer, committed, producer).

    #[test]
    fn ordering_consumer_committed_producer() {
        let mut ring = CaptureRing::with_capacity(8, 2);
        ring.write_frames(&[1; 6]);
        ring.mark_committed(3);
        ring.advance_producer(6);
        let (fi, fe, fj) = ring.cursors();
        assert!(fi < fe && fe < fj);
        assert_eq!(ring.payload().len(), 3 * 2);
        assert_eq!(ring.contiguous_free(), 2);
    }

    #[test]
    fn ordering_committed_producer_consumer() {
        let mut ring = CaptureRing::with_capacity(8, 2);
        // march everything near the end, drain fully, then wrap committed
        produce_committed(&mut ring, 7, 1);
        while drain(&mut ring, 64) > 0 {}
        produce_committed(&mut ring, 3, 1); // producer and committed wrap past 0
        let (fi, fe, fj) = ring.cursors();
        assert!(fe <= fj && fj < fi);
        // payload runs from consumer to the physical end, then wraps
        let first = ring.payload().len();
        assert!(first > 0);
        ring.advance_consumer(first);
        let rest = ring.payload().len();
        assert_eq!((first + rest) / 2, 3); // the last produced frame is not yet committed
    }

    #[test]
    fn ordering_producer_consumer_committed() {
        let mut ring = CaptureRing::with_capacity(8, 2);
        produce_committed(&mut ring, 6, 1);
        ring.advance_consumer(4 * 2); // consumer mid-ring
        produce_committed(&mut ring, 4, 1); // producer wraps to the low end
        let (fi, fe, fj) = ring.cursors();
        assert!(fj < fi || fe < fi); // wrapped arrangement reached
        // drain everything; total must equal what was committed
        let mut total = 0;
        loop {
            let n = drain(&mut ring, 64);
            if n == 0 {
                break;
            }
            total += n;
        }
        assert_eq!(total % 2, 0);
        assert!(!ring.has_payload());
    }

    #[test]
    fn wrapped_payload_is_split_in_two_spans() {
        let mut ring = CaptureRing::with_capacity(6, 2);
        produce_committed(&mut ring, 5, 9);
        while drain(&mut ring, 64) > 0 {}
        // five more frames straddle the physical end
        produce_committed(&mut ring, 5, 9);
        let first = ring.payload().len();
        ring.advance_consumer(first);
        let second = ring.payload().len();
        assert!(second > 0, "payload should wrap");
        assert_eq!((first + second) / 2, 5);
    }

    #[test]
    fn producer_never_overwrites_pending_data() {
        let mut ring = CaptureRing::with_capacity(4, 2);
        ring.write_frames(&[42; 3]);
        ring.mark_committed(2);
        ring.advance_producer(3);
        assert_eq!(ring.contiguous_free(), 1);
        ring.write_frames(&[43; 1]);
        ring.mark_committed(0);
        ring.advance_producer(1);
        assert_eq!(ring.contiguous_free(), 0);
        // earlier payload still intact
        assert_eq!(&ring.payload()[..2], &42i16.to_le_bytes());
    }
}
