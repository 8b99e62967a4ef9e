//! Single-buffer PCM ring path
//!
//! The non-threaded bridge: a bounded SPSC ring of interleaved f32 samples
//! between the control-side render step and the device callback. Writes
//! that would overflow are truncated (bounded latency wins over
//! completeness); reads that starve zero-fill the remainder so the device
//! callback never blocks.

use crate::types::{Frame, FrameBuffer, Sample};

/// Control-side half of the PCM ring.
pub struct RingWriter {
    producer: rtrb::Producer<Sample>,
    /// Recycled render block, handed out by `begin_block`
    scratch: Option<FrameBuffer>,
    block_frames: usize,
}

/// Device-side half of the PCM ring.
pub struct RingReader {
    consumer: rtrb::Consumer<Sample>,
}

/// Create a PCM ring holding `capacity_samples` interleaved samples.
pub fn ring_channel(capacity_samples: usize, block_frames: usize) -> (RingWriter, RingReader) {
    let (producer, consumer) = rtrb::RingBuffer::new(capacity_samples);
    (
        RingWriter {
            producer,
            scratch: Some(FrameBuffer::silence(block_frames)),
            block_frames,
        },
        RingReader { consumer },
    )
}

impl RingWriter {
    /// Take the recycled block to render into, sized to `frames`.
    pub fn begin_block(&mut self, frames: usize) -> FrameBuffer {
        let mut block = self
            .scratch
            .take()
            .unwrap_or_else(|| FrameBuffer::silence(self.block_frames));
        block.set_len_from_capacity(frames);
        block.fill_silence();
        block
    }

    /// Append a rendered block; whatever doesn't fit is dropped.
    /// Returns the number of frames accepted.
    ///
    /// Whole frames only: a lone left sample in the ring would pair with
    /// the next block's first sample and shift every later read off by one.
    pub fn submit(&mut self, block: FrameBuffer) -> usize {
        let mut written = 0;
        for frame in block.iter() {
            if self.producer.slots() < 2 {
                break;
            }
            if self.producer.push(frame.left).is_err() || self.producer.push(frame.right).is_err()
            {
                break;
            }
            written += 1;
        }
        self.scratch = Some(block);
        written
    }

    /// Frames the ring can still accept.
    pub fn free_frames(&self) -> usize {
        self.producer.slots() / 2
    }
}

impl RingReader {
    /// Fill `out` from the ring; frames past what's buffered are silence.
    /// Returns the number of real frames delivered.
    pub fn read(&mut self, out: &mut [Frame]) -> usize {
        let mut filled = 0;
        for frame in out.iter_mut() {
            // A concurrent submit can expose a half-written frame; it is
            // not available until both samples are in
            if self.consumer.slots() < 2 {
                break;
            }
            let (left, right) = match (self.consumer.pop(), self.consumer.pop()) {
                (Ok(left), Ok(right)) => (left, right),
                _ => break,
            };
            *frame = Frame::new(left, right);
            filled += 1;
        }
        for frame in out.iter_mut().skip(filled) {
            *frame = Frame::silence();
        }
        filled
    }

    /// Frames currently buffered.
    pub fn pending_frames(&self) -> usize {
        self.consumer.slots() / 2
    }
}
