//! Realtime bridge - PCM handoff between control and render domains
//!
//! Two fixed-at-init operating modes:
//! - [`BridgeMode::RingBuffer`]: a bounded ring of interleaved samples;
//!   overflow truncates, starvation zero-fills.
//! - [`BridgeMode::Threaded`]: whole blocks move by ownership transfer with
//!   a counter the control side can block-wait on (with timeout) for
//!   backpressure.
//!
//! Either way the device callback never blocks; any failure to produce
//! data degrades to silence instead of stalling the audio clock.

mod ring;
mod state;
mod threaded;

pub use ring::{ring_channel, RingReader, RingWriter};
pub use state::{
    SharedState, STATE_FRAMES_CONSUMED, STATE_FRAMES_PENDING, STATE_RUNNING,
};
pub use threaded::{block_channel, BlockReader, BlockWriter, SUBMIT_TIMEOUT};

use serde::{Deserialize, Serialize};

use crate::types::{Frame, FrameBuffer};

/// How PCM crosses from the control domain to the device callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BridgeMode {
    /// Bounded sample ring, no dedicated render thread required
    #[default]
    RingBuffer,
    /// Block ownership transfer with blocking backpressure
    Threaded,
}

/// Control-side half of the bridge, either mode.
pub enum BridgeWriter {
    Ring(RingWriter),
    Threaded(BlockWriter),
}

/// Device-side half of the bridge, either mode.
pub enum BridgeReader {
    Ring(RingReader),
    Threaded(BlockReader),
}

/// Create both halves for the given mode.
///
/// `capacity_blocks` bounds how many blocks may sit in the bridge; latency
/// scales with it in both modes.
pub fn bridge_channel(
    mode: BridgeMode,
    block_frames: usize,
    capacity_blocks: usize,
) -> (BridgeWriter, BridgeReader) {
    match mode {
        BridgeMode::RingBuffer => {
            let capacity_samples = block_frames * capacity_blocks.max(1) * 2;
            let (writer, reader) = ring_channel(capacity_samples, block_frames);
            (BridgeWriter::Ring(writer), BridgeReader::Ring(reader))
        }
        BridgeMode::Threaded => {
            let (writer, reader) = block_channel(block_frames, capacity_blocks.max(1));
            (BridgeWriter::Threaded(writer), BridgeReader::Threaded(reader))
        }
    }
}

impl BridgeWriter {
    /// Take a block to render into, sized to `frames`.
    pub fn begin_block(&mut self, frames: usize) -> FrameBuffer {
        match self {
            BridgeWriter::Ring(writer) => writer.begin_block(frames),
            BridgeWriter::Threaded(writer) => writer.begin_block(frames),
        }
    }

    /// Submit a rendered block; returns the number of frames accepted.
    pub fn submit(&mut self, block: FrameBuffer) -> usize {
        match self {
            BridgeWriter::Ring(writer) => writer.submit(block),
            BridgeWriter::Threaded(writer) => {
                let frames = block.len();
                if writer.submit(block) {
                    frames
                } else {
                    0
                }
            }
        }
    }

    /// Frames the bridge will accept without dropping or blocking.
    pub fn free_frames(&self) -> usize {
        match self {
            BridgeWriter::Ring(writer) => writer.free_frames(),
            BridgeWriter::Threaded(writer) => {
                let in_flight = writer.in_flight_frames().max(0);
                (writer.max_pending_frames() - in_flight).max(0) as usize
            }
        }
    }
}

impl BridgeReader {
    /// Fill `out`, zero-filling past what's buffered. Never blocks.
    pub fn read(&mut self, out: &mut [Frame]) -> usize {
        match self {
            BridgeReader::Ring(reader) => reader.read(out),
            BridgeReader::Threaded(reader) => reader.read(out),
        }
    }

    /// Mark the device callback live or stopped (threaded mode signal;
    /// a no-op for the ring path).
    pub fn set_running(&self, running: bool) {
        if let BridgeReader::Threaded(reader) = self {
            reader.set_running(running);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_both_modes_round_trip() {
        for mode in [BridgeMode::RingBuffer, BridgeMode::Threaded] {
            let (mut writer, mut reader) = bridge_channel(mode, 4, 2);

            let mut block = writer.begin_block(4);
            for (i, frame) in block.iter_mut().enumerate() {
                *frame = Frame::new(i as f32, -(i as f32));
            }
            assert_eq!(writer.submit(block), 4, "{:?}", mode);

            let mut out = [Frame::silence(); 6];
            assert_eq!(reader.read(&mut out), 4, "{:?}", mode);
            assert_eq!(out[2], Frame::new(2.0, -2.0));
            assert_eq!(out[4], Frame::silence());
        }
    }

    #[test]
    fn test_mode_serde_names() {
        let yaml = serde_yaml::to_string(&BridgeMode::Threaded).unwrap();
        assert!(yaml.contains("threaded"));
        let back: BridgeMode = serde_yaml::from_str("ring_buffer").unwrap();
        assert_eq!(back, BridgeMode::RingBuffer);
    }
}
