//! Output device layer
//!
//! Wraps the host audio API behind a small driver surface: open an output
//! stream, hand its callback the device-side half of the bridge, and report
//! state changes. Everything above this module is device-agnostic.

mod cpal_driver;

pub use cpal_driver::{output_device_names, CpalInput, CpalOutput};

/// Lifecycle state of an output stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    /// Stream exists but is not being pulled
    Suspended,
    /// Callback is live
    Running,
    /// Stream is gone; fatal to the session, not the process
    Closed,
}

/// An open output stream pulling mixed PCM through the bridge.
pub trait OutputDriver {
    /// Actual device sample rate; may differ from the configured rate.
    fn mix_rate(&self) -> u32;

    /// Callback block size in frames.
    fn block_frames(&self) -> u32;

    fn state(&self) -> DeviceState;

    /// Suspend the stream without tearing it down.
    fn suspend(&mut self) -> crate::error::AudioResult<()>;

    /// Resume a suspended stream.
    fn resume(&mut self) -> crate::error::AudioResult<()>;

    /// Tear the stream down. Terminal.
    fn close(&mut self);
}
