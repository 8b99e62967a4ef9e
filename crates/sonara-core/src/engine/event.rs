//! Engine event queue
//!
//! Cross-domain notifications never call back into the host directly; they
//! are queued and drained by the control domain on its own schedule. The
//! device callback pushes through a lock-free SPSC queue; events raised on
//! the control domain itself go straight into the server's local queue.

use crate::device::DeviceState;

/// Capacity of the device-to-control event queue. Events are tiny and the
/// host is expected to poll every frame or two; 256 is generous.
pub const EVENT_QUEUE_CAPACITY: usize = 256;

/// Notifications delivered to the host via [`crate::engine::AudioServer::poll_events`].
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// A non-looping voice reached end-of-stream and was auto-stopped
    VoiceEnded { id: String },
    /// Periodic output latency estimate, informational only
    LatencyUpdate { seconds: f32 },
    /// The output device changed state
    StateChanged(DeviceState),
    /// Render-path fault report; the audio already degraded to silence
    Diagnostic(String),
}

/// Producer half held by the device callback.
pub struct EventSender {
    producer: rtrb::Producer<EngineEvent>,
}

impl EventSender {
    /// Push an event. If the host has stopped draining, the event is
    /// dropped rather than blocking the callback.
    pub fn send(&mut self, event: EngineEvent) -> bool {
        match self.producer.push(event) {
            Ok(()) => true,
            Err(rtrb::PushError::Full(event)) => {
                log::warn!("event queue full, dropping {:?}", event);
                false
            }
        }
    }
}

/// Create the device-to-control event queue.
pub fn event_channel() -> (EventSender, rtrb::Consumer<EngineEvent>) {
    let (producer, consumer) = rtrb::RingBuffer::new(EVENT_QUEUE_CAPACITY);
    (EventSender { producer }, consumer)
}
