//! Threaded bridge path
//!
//! When rendering runs against a dedicated real-time callback, whole blocks
//! cross the domain boundary by ownership transfer instead of sample
//! copies: the control side submits filled [`FrameBuffer`]s through an SPSC
//! queue and blocks (with a timeout) on the consumed-frames counter when the
//! queue is saturated; the render side pops blocks, counts frames off as it
//! consumes them, and sends spent buffers back on a recycle queue so neither
//! side allocates in steady state.
//!
//! A timed-out submit drops the block rather than stalling the control
//! domain; a starved read zero-fills rather than stalling the device clock.

use std::sync::Arc;
use std::time::Duration;

use crate::bridge::state::{
    SharedState, STATE_FRAMES_CONSUMED, STATE_FRAMES_PENDING, STATE_RUNNING,
};
use crate::types::{Frame, FrameBuffer};

/// Default bound on control-side waits for queue space.
pub const SUBMIT_TIMEOUT: Duration = Duration::from_millis(200);

/// Control-side half of the threaded bridge.
pub struct BlockWriter {
    tx: rtrb::Producer<FrameBuffer>,
    recycle_rx: rtrb::Consumer<FrameBuffer>,
    state: Arc<SharedState>,
    block_frames: usize,
    /// In-flight ceiling, in frames
    max_pending: i32,
    timeout: Duration,
}

/// Render-side half of the threaded bridge.
pub struct BlockReader {
    rx: rtrb::Consumer<FrameBuffer>,
    recycle_tx: rtrb::Producer<FrameBuffer>,
    state: Arc<SharedState>,
    /// Partially consumed block carried across callbacks
    current: Option<(FrameBuffer, usize)>,
}

/// Create a threaded bridge holding up to `depth_blocks` blocks of
/// `block_frames` frames in flight.
pub fn block_channel(block_frames: usize, depth_blocks: usize) -> (BlockWriter, BlockReader) {
    let depth = depth_blocks.max(1);
    let (tx, rx) = rtrb::RingBuffer::new(depth);
    let (recycle_tx, recycle_rx) = rtrb::RingBuffer::new(depth + 1);
    let state = Arc::new(SharedState::new());

    (
        BlockWriter {
            tx,
            recycle_rx,
            state: Arc::clone(&state),
            block_frames,
            max_pending: (depth * block_frames) as i32,
            timeout: SUBMIT_TIMEOUT,
        },
        BlockReader {
            rx,
            recycle_tx,
            state,
            current: None,
        },
    )
}

impl BlockWriter {
    /// Take a recycled block to render into, sized to `frames`.
    pub fn begin_block(&mut self, frames: usize) -> FrameBuffer {
        let mut block = self
            .recycle_rx
            .pop()
            .unwrap_or_else(|_| FrameBuffer::silence(self.block_frames));
        block.set_len_from_capacity(frames);
        block.fill_silence();
        block
    }

    /// Hand a rendered block to the render side.
    ///
    /// Blocks until the in-flight frame count leaves room, up to the
    /// timeout; on timeout the block is dropped and `false` returned so the
    /// control loop can carry on.
    pub fn submit(&mut self, block: FrameBuffer) -> bool {
        let frames = block.len() as i32;
        loop {
            let consumed = self.state.get(STATE_FRAMES_CONSUMED);
            let pending = self.state.get(STATE_FRAMES_PENDING);
            if pending.wrapping_sub(consumed) + frames <= self.max_pending {
                break;
            }
            let observed = self.state.wait(STATE_FRAMES_CONSUMED, consumed, self.timeout);
            if observed == consumed {
                log::warn!("bridge submit timed out, dropping {} frames", frames);
                return false;
            }
        }
        match self.tx.push(block) {
            Ok(()) => {
                self.state.add(STATE_FRAMES_PENDING, frames);
                true
            }
            Err(rtrb::PushError::Full(_)) => {
                // Counter said there was room but the queue disagrees;
                // treat it like a timeout
                log::warn!("bridge queue full, dropping {} frames", frames);
                false
            }
        }
    }

    /// Whether the device callback is currently live.
    pub fn is_running(&self) -> bool {
        self.state.get(STATE_RUNNING) != 0
    }

    /// In-flight ceiling, in frames.
    pub fn max_pending_frames(&self) -> i32 {
        self.max_pending
    }

    /// Frames submitted but not yet consumed.
    pub fn in_flight_frames(&self) -> i32 {
        self.state
            .get(STATE_FRAMES_PENDING)
            .wrapping_sub(self.state.get(STATE_FRAMES_CONSUMED))
    }

    #[cfg(test)]
    fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl BlockReader {
    /// Fill `out` from queued blocks; the remainder past what's available
    /// is silence. Returns the number of real frames delivered.
    ///
    /// Runs on the render callback: pops and atomic adds only, never waits.
    pub fn read(&mut self, out: &mut [Frame]) -> usize {
        let mut filled = 0;
        while filled < out.len() {
            let (block, offset) = match self.current.take() {
                Some(current) => current,
                None => match self.rx.pop() {
                    Ok(block) => (block, 0),
                    Err(_) => break,
                },
            };

            let available = block.len() - offset;
            let take = available.min(out.len() - filled);
            out[filled..filled + take]
                .copy_from_slice(&block.as_slice()[offset..offset + take]);
            filled += take;
            self.state.add(STATE_FRAMES_CONSUMED, take as i32);

            if offset + take < block.len() {
                self.current = Some((block, offset + take));
            } else {
                // Sized to hold every block in circulation, so this only
                // fails when the writer side is already gone
                let _ = self.recycle_tx.push(block);
            }
        }
        for frame in out.iter_mut().skip(filled) {
            *frame = Frame::silence();
        }
        filled
    }

    /// Mark the device callback live or stopped.
    pub fn set_running(&self, running: bool) {
        self.state.set(STATE_RUNNING, i32::from(running));
    }
}
