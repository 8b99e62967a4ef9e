//! Engine context - owns the stores, the graph, and the render step
//!
//! [`AudioServer`] is the process-wide state the host talks to: sample
//! registry, bus graph, voice manager, and the control-side half of the
//! realtime bridge. One instance per engine; create several for independent
//! engines, drop for deterministic teardown.
//!
//! The render step runs here, on the control domain: voices are sampled,
//! routed through their per-bus remaps, cascaded down the bus graph, and
//! the finished block is submitted to the bridge. The device callback only
//! ever pulls finished PCM.

mod event;

pub use event::{event_channel, EngineEvent, EventSender, EVENT_QUEUE_CAPACITY};

use std::collections::VecDeque;

use crate::bridge::{bridge_channel, BridgeReader, BridgeWriter};
use crate::config::EngineConfig;
use crate::error::{AudioError, AudioResult};
use crate::graph::BusGraph;
use crate::sample::{SampleDescriptor, SampleStore};
use crate::types::FrameBuffer;
use crate::voice::{StartOptions, VoiceManager};

/// Seconds between informational latency reports.
const LATENCY_REPORT_INTERVAL: f64 = 1.0;

/// The engine context.
pub struct AudioServer {
    mix_rate: u32,
    block_frames: usize,
    bridge_blocks: usize,

    store: SampleStore,
    graph: BusGraph,
    voices: VoiceManager,

    writer: BridgeWriter,
    device_events: rtrb::Consumer<EngineEvent>,
    local_events: VecDeque<EngineEvent>,

    /// Raw voice output for the block being rendered
    scratch: FrameBuffer,
    /// Per-bus-slot mixing accumulators, indexed by `BusId::slot`
    accumulators: Vec<FrameBuffer>,

    frames_rendered: u64,
    last_latency_report: f64,
}

impl AudioServer {
    /// Create a server plus the two handles the device layer needs: the
    /// bridge reader for the output callback and the event sender for the
    /// stream's fault path.
    pub fn new(config: &EngineConfig) -> (Self, BridgeReader, EventSender) {
        let mix_rate = config.resolved_mix_rate();
        let block_frames = config.block_size.frames() as usize;
        let bridge_blocks = config.ring_blocks.max(1) as usize;

        let (writer, reader) = bridge_channel(config.bridge_mode, block_frames, bridge_blocks);
        let (event_tx, device_events) = event_channel();

        log::info!(
            "engine context: {}Hz, {} frame blocks, {:?} bridge x{}",
            mix_rate,
            block_frames,
            config.bridge_mode,
            bridge_blocks
        );

        let server = Self {
            mix_rate,
            block_frames,
            bridge_blocks,
            store: SampleStore::new(),
            graph: BusGraph::new(),
            voices: VoiceManager::new(),
            writer,
            device_events,
            local_events: VecDeque::new(),
            scratch: FrameBuffer::silence(block_frames),
            accumulators: Vec::new(),
            frames_rendered: 0,
            last_latency_report: 0.0,
        };
        (server, reader, event_tx)
    }

    /// Adopt the rate the device actually opened at, when it differs from
    /// the configured one. Call before any rendering.
    pub fn set_mix_rate(&mut self, rate: u32) {
        if rate != self.mix_rate {
            log::info!("mix rate adjusted {} -> {}", self.mix_rate, rate);
            self.mix_rate = rate;
        }
    }

    pub fn mix_rate(&self) -> u32 {
        self.mix_rate
    }

    /// Engine clock in seconds of rendered audio.
    pub fn now(&self) -> f64 {
        self.frames_rendered as f64 / f64::from(self.mix_rate)
    }

    // --- samples ---

    pub fn register_sample(&mut self, desc: SampleDescriptor<'_>) -> AudioResult<()> {
        self.store.register(desc)
    }

    pub fn unregister_sample(&mut self, id: &str) {
        self.store.unregister(id);
    }

    pub fn is_sample_registered(&self, id: &str) -> bool {
        self.store.is_registered(id)
    }

    pub fn sample_count(&self) -> usize {
        self.store.len()
    }

    // --- voices ---

    /// Start (or implicitly replace) a voice playing `sample_id` into the
    /// bus at `bus_index`.
    pub fn start_voice(
        &mut self,
        voice_id: &str,
        sample_id: &str,
        bus_index: usize,
        options: StartOptions,
    ) -> AudioResult<()> {
        let bus = self.graph.at(bus_index)?;
        let sample = self.store.get(sample_id)?.clone();
        let now = self.now();
        self.voices.start(voice_id, &sample, bus, options, now)
    }

    /// Stop a voice. Idempotent.
    pub fn stop_voice(&mut self, id: &str) {
        if self.voices.stop(id) {
            log::debug!("voice {:?} stopped", id);
        }
    }

    pub fn set_voice_pause(&mut self, id: &str, enable: bool) -> AudioResult<()> {
        let now = self.now();
        self.voices.set_pause(id, enable, now)
    }

    pub fn set_voice_playback_rate(&mut self, id: &str, rate: f32) {
        self.voices.set_playback_rate(id, rate);
    }

    pub fn set_voice_pitch_scale(&mut self, id: &str, scale: f32) {
        self.voices.set_pitch_scale(id, scale);
    }

    /// Distribute a flat gain vector (8 entries per bus) across buses.
    pub fn set_voice_volumes(
        &mut self,
        id: &str,
        bus_indices: &[usize],
        flat: &[f32],
    ) -> AudioResult<()> {
        let mut handles = Vec::with_capacity(bus_indices.len());
        for &index in bus_indices {
            handles.push(self.graph.at(index)?);
        }
        self.voices.set_volumes(id, &handles, flat)
    }

    pub fn is_voice_active(&self, id: &str) -> bool {
        self.voices.is_active(id)
    }

    pub fn voice_count(&self) -> usize {
        self.voices.len()
    }

    // --- buses ---

    pub fn set_bus_count(&mut self, count: usize) -> AudioResult<()> {
        self.graph.set_count(count)
    }

    pub fn bus_count(&self) -> usize {
        self.graph.count()
    }

    pub fn insert_bus(&mut self, at: usize) -> AudioResult<()> {
        self.graph.insert(at).map(|_| ())
    }

    pub fn move_bus(&mut self, from: usize, to: usize) -> AudioResult<()> {
        self.graph.move_bus(from, to)
    }

    pub fn remove_bus(&mut self, index: usize) -> AudioResult<()> {
        self.graph.remove(index)
    }

    pub fn set_bus_send(&mut self, index: usize, target: Option<usize>) -> AudioResult<()> {
        self.graph.set_send(index, target)
    }

    pub fn set_bus_solo(&mut self, index: usize, enable: bool) -> AudioResult<()> {
        self.graph.set_solo(index, enable)
    }

    pub fn set_bus_mute(&mut self, index: usize, enable: bool) -> AudioResult<()> {
        self.graph.set_mute(index, enable)
    }

    pub fn set_bus_volume_db(&mut self, index: usize, db: f32) -> AudioResult<()> {
        self.graph.set_volume_db(index, db)
    }

    // --- rendering ---

    /// Render blocks until the bridge is full. Call from the control loop
    /// on its own schedule (ring mode) or once per wakeup (threaded mode,
    /// where `render_block` applies backpressure by itself).
    pub fn pump(&mut self) {
        while self.writer.free_frames() >= self.block_frames {
            self.render_block();
        }
    }

    /// Render one block through the voice and bus stages and submit it to
    /// the bridge.
    pub fn render_block(&mut self) {
        let frames = self.block_frames;

        // Accumulators track the slot arena, which only ever grows
        let slots = self.graph.slot_count();
        if self.accumulators.len() < slots {
            let capacity = frames;
            self.accumulators
                .resize_with(slots, || FrameBuffer::silence(capacity));
        }
        for acc in &mut self.accumulators {
            acc.set_len_from_capacity(frames);
            acc.fill_silence();
        }
        self.scratch.set_len_from_capacity(frames);

        // Voice stage: raw frames through each live route's remap into the
        // target bus accumulator. Routes to removed buses drop silently.
        let mix_rate = self.mix_rate;
        for voice in self.voices.voices_mut() {
            voice.render_block(mix_rate, &mut self.scratch);
            for (bus, remap) in voice.routes() {
                if remap.is_silent() || self.graph.bus(*bus).is_none() {
                    continue;
                }
                let acc = &mut self.accumulators[bus.slot()];
                for (dst, src) in acc.iter_mut().zip(self.scratch.iter()) {
                    *dst += remap.apply(*src);
                }
            }
        }

        // Bus stage: walk in topological order, applying each bus's three
        // gain stages at its output edge. The root lands in the device block.
        let mut master = self.writer.begin_block(frames);
        for &id in self.graph.render_order() {
            let slot = id.slot();
            let Some(bus) = self.graph.bus(id) else {
                continue;
            };
            let gain = bus.atomics().effective_gain();
            match bus.send() {
                Some(target) => {
                    let src = std::mem::take(&mut self.accumulators[slot]);
                    self.accumulators[target.slot()].add_scaled(&src, gain);
                    self.accumulators[slot] = src;
                }
                None => {
                    for (dst, src) in master.iter_mut().zip(self.accumulators[slot].iter()) {
                        *dst = *src * gain;
                    }
                }
            }
        }

        self.frames_rendered += frames as u64;

        let accepted = self.writer.submit(master);
        if accepted < frames {
            let fault = AudioError::ResourceExhausted(format!(
                "bridge overflow, dropped {} frames",
                frames - accepted
            ));
            self.local_events
                .push_back(EngineEvent::Diagnostic(fault.to_string()));
        }

        for id in self.voices.reap_ended() {
            log::debug!("voice {:?} reached end of stream", id);
            self.local_events.push_back(EngineEvent::VoiceEnded { id });
        }

        let now = self.now();
        if now - self.last_latency_report >= LATENCY_REPORT_INTERVAL {
            self.last_latency_report = now;
            let capacity = self.block_frames * self.bridge_blocks;
            let buffered = capacity.saturating_sub(self.writer.free_frames());
            let seconds = (buffered + self.block_frames) as f32 / self.mix_rate as f32;
            self.local_events
                .push_back(EngineEvent::LatencyUpdate { seconds });
        }
    }

    /// Drain pending notifications, locally raised and device-raised alike.
    pub fn poll_events(&mut self) -> Vec<EngineEvent> {
        let mut events: Vec<EngineEvent> = self.local_events.drain(..).collect();
        while let Ok(event) = self.device_events.pop() {
            if let EngineEvent::StateChanged(state) = &event {
                log::info!("device state changed: {:?}", state);
            }
            events.push(event);
        }
        events
    }
}
