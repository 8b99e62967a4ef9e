//! Voice manager - per-playback-instance state machines
//!
//! A voice is one active playback of a registered sample. It owns a shared
//! reference to the sample PCM, a fractional read cursor driven by the
//! combined rate `playback_rate * pitch_scale`, and one [`ChannelRemap`] per
//! bus it feeds. Voices are created on start, replaced implicitly when an id
//! is reused, and removed on stop or when a non-looping voice runs out of
//! frames.
//!
//! All mutation happens on the control domain; the render step only walks
//! the voices it already owns.

mod remap;

pub use remap::ChannelRemap;

use std::collections::HashMap;

use basedrop::Shared;

use crate::error::{AudioError, AudioResult};
use crate::graph::BusId;
use crate::sample::{LoopMode, Sample, SamplePcm};
use crate::types::{Frame, FrameBuffer, MAX_CHANNELS};

/// Spatialization hint carried by the host. Stored for diagnostics; the
/// actual positioning arrives through the per-bus volume vectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PositionMode {
    #[default]
    None,
    TwoD,
    ThreeD,
}

/// Options accepted by [`VoiceManager::start`].
#[derive(Debug, Clone)]
pub struct StartOptions {
    /// Start offset into the sample, in seconds
    pub offset: f64,
    pub playback_rate: f32,
    pub pitch_scale: f32,
    /// Overrides the sample's registered loop mode when set
    pub loop_mode: Option<LoopMode>,
    pub position_mode: PositionMode,
    /// Engine-clock start time; zero means "now"
    pub start_time: f64,
    /// Initial volume vector for the starting bus, engine channel order
    pub volume: [f32; MAX_CHANNELS],
}

impl Default for StartOptions {
    fn default() -> Self {
        let mut volume = [0.0; MAX_CHANNELS];
        volume[0] = 1.0;
        volume[1] = 1.0;
        Self {
            offset: 0.0,
            playback_rate: 1.0,
            pitch_scale: 1.0,
            loop_mode: None,
            position_mode: PositionMode::None,
            start_time: 0.0,
            volume,
        }
    }
}

/// One active playback instance.
pub struct Voice {
    id: String,
    sample_id: String,
    pcm: Shared<SamplePcm>,
    sample_rate: u32,
    loop_mode: LoopMode,
    loop_begin: f64,
    loop_end: f64,
    playback_rate: f32,
    pitch_scale: f32,
    position_mode: PositionMode,
    /// Start offset in seconds, kept for the resume re-seek
    offset: f64,
    start_time: f64,
    pause_offset: f64,
    paused: bool,
    /// Fractional read cursor, in source frames
    cursor: f64,
    /// +1 or -1; flips in backward/ping-pong loop modes
    direction: f64,
    ended: bool,
    routes: Vec<(BusId, ChannelRemap)>,
}

impl Voice {
    fn new(id: &str, sample: &Sample, bus: BusId, options: &StartOptions) -> AudioResult<Self> {
        let mut remap = ChannelRemap::silent();
        remap.set_volumes(&options.volume)?;

        let loop_mode = options.loop_mode.unwrap_or(sample.loop_mode);
        Ok(Self {
            id: id.to_string(),
            sample_id: sample.id.clone(),
            pcm: sample.pcm(),
            sample_rate: sample.sample_rate,
            loop_mode,
            loop_begin: sample.loop_begin as f64,
            loop_end: sample.resolved_loop_end() as f64,
            playback_rate: options.playback_rate,
            pitch_scale: options.pitch_scale,
            position_mode: options.position_mode,
            offset: options.offset,
            start_time: options.start_time,
            pause_offset: 0.0,
            paused: false,
            cursor: options.offset * f64::from(sample.sample_rate),
            direction: 1.0,
            ended: false,
            routes: vec![(bus, remap)],
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn sample_id(&self) -> &str {
        &self.sample_id
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn position_mode(&self) -> PositionMode {
        self.position_mode
    }

    /// Whether a non-looping voice has exhausted its frames.
    pub fn has_ended(&self) -> bool {
        self.ended
    }

    /// Current read position in source seconds.
    pub fn position_seconds(&self) -> f64 {
        self.cursor / f64::from(self.sample_rate)
    }

    /// Buses this voice feeds and the gains it feeds them with.
    pub fn routes(&self) -> &[(BusId, ChannelRemap)] {
        &self.routes
    }

    fn pause(&mut self, now: f64) {
        if self.paused {
            return;
        }
        self.pause_offset = (now - self.start_time) / f64::from(self.playback_rate);
        self.paused = true;
    }

    /// Resume from a recorded pause offset.
    ///
    /// A voice that was never paused has a zero offset and resuming it is a
    /// no-op; this mirrors how a zero offset is indistinguishable from "not
    /// recorded" in the elapsed-time bookkeeping.
    ///
    /// `start_time` is set once at start and never rewritten; the next
    /// pause measures its offset against the original start, so repeated
    /// pause cycles keep accumulating position instead of restarting the
    /// elapsed-time clock.
    fn resume(&mut self) {
        if self.pause_offset == 0.0 {
            return;
        }
        self.cursor = (self.offset + self.pause_offset) * f64::from(self.sample_rate);
        self.direction = 1.0;
        self.paused = false;
    }

    /// Cursor advance per output frame at the given mix rate.
    fn step(&self, mix_rate: u32) -> f64 {
        f64::from(self.playback_rate) * f64::from(self.pitch_scale) * f64::from(self.sample_rate)
            / f64::from(mix_rate)
    }

    /// Sample the PCM at the current cursor with linear interpolation.
    #[inline]
    fn sample_frame(&self) -> Frame {
        let frames = self.pcm.frames();
        if frames == 0 {
            return Frame::silence();
        }
        let clamped = self.cursor.clamp(0.0, (frames - 1) as f64);
        let i0 = clamped as usize;
        let i1 = (i0 + 1).min(frames - 1);
        let frac = (clamped - i0 as f64) as f32;
        let left = self.pcm.left();
        let right = self.pcm.right();
        Frame {
            left: left[i0] + (left[i1] - left[i0]) * frac,
            right: right[i0] + (right[i1] - right[i0]) * frac,
        }
    }

    /// Advance the cursor one output frame, applying the loop mode.
    fn advance(&mut self, step: f64) {
        let frames = self.pcm.frames() as f64;
        let loops = self.loop_end > self.loop_begin;

        match self.loop_mode {
            LoopMode::Disabled => {
                self.cursor += step;
                if self.cursor >= frames {
                    self.ended = true;
                }
            }
            LoopMode::Forward => {
                self.cursor += step;
                if loops && self.cursor >= self.loop_end {
                    self.cursor = self.loop_begin + (self.cursor - self.loop_end);
                } else if !loops && self.cursor >= frames {
                    self.ended = true;
                }
            }
            LoopMode::Backward => {
                self.cursor += step * self.direction;
                if !loops {
                    if self.cursor >= frames {
                        self.ended = true;
                    }
                    return;
                }
                if self.direction > 0.0 && self.cursor >= self.loop_end {
                    // Entering the loop region flips the travel direction
                    self.direction = -1.0;
                    self.cursor = self.loop_end - (self.cursor - self.loop_end);
                } else if self.direction < 0.0 && self.cursor < self.loop_begin {
                    self.cursor = self.loop_end - (self.loop_begin - self.cursor);
                }
            }
            LoopMode::PingPong => {
                self.cursor += step * self.direction;
                if !loops {
                    if self.cursor >= frames {
                        self.ended = true;
                    }
                    return;
                }
                if self.direction > 0.0 && self.cursor >= self.loop_end {
                    self.direction = -1.0;
                    self.cursor = self.loop_end - (self.cursor - self.loop_end);
                } else if self.direction < 0.0 && self.cursor <= self.loop_begin {
                    self.direction = 1.0;
                    self.cursor = self.loop_begin + (self.loop_begin - self.cursor);
                }
            }
        }
    }

    /// Fill `out` with this voice's raw (pre-remap) frames.
    ///
    /// Paused voices produce silence but stay alive. When a non-looping
    /// voice runs out mid-block the remainder is zero-filled and the voice
    /// is marked ended.
    pub fn render_block(&mut self, mix_rate: u32, out: &mut FrameBuffer) {
        if self.paused || self.ended {
            out.fill_silence();
            return;
        }
        let step = self.step(mix_rate);
        for frame in out.iter_mut() {
            if self.ended {
                *frame = Frame::silence();
                continue;
            }
            *frame = self.sample_frame();
            self.advance(step);
        }
    }

    fn set_volumes(&mut self, buses: &[BusId], flat: &[f32]) -> AudioResult<()> {
        if flat.len() != buses.len() * MAX_CHANNELS {
            return Err(AudioError::InvalidArgument(format!(
                "expected {} volume entries for {} buses, got {}",
                buses.len() * MAX_CHANNELS,
                buses.len(),
                flat.len()
            )));
        }
        for (i, &bus) in buses.iter().enumerate() {
            let slice = &flat[i * MAX_CHANNELS..(i + 1) * MAX_CHANNELS];
            let at = match self.routes.iter().position(|(b, _)| *b == bus) {
                Some(at) => at,
                None => {
                    // Lazily routed the first time volumes arrive for a bus
                    self.routes.push((bus, ChannelRemap::silent()));
                    self.routes.len() - 1
                }
            };
            self.routes[at].1.set_volumes(slice)?;
        }
        Ok(())
    }
}

/// Registry of live voices, owned by the engine context.
pub struct VoiceManager {
    voices: HashMap<String, Voice>,
}

impl VoiceManager {
    pub fn new() -> Self {
        Self {
            voices: HashMap::new(),
        }
    }

    /// Start a voice. Reusing an id stops the previous voice first.
    pub fn start(
        &mut self,
        id: &str,
        sample: &Sample,
        bus: BusId,
        options: StartOptions,
        now: f64,
    ) -> AudioResult<()> {
        let mut options = options;
        if options.start_time == 0.0 {
            options.start_time = now;
        }
        let voice = Voice::new(id, sample, bus, &options)?;
        if self.voices.insert(id.to_string(), voice).is_some() {
            log::debug!("voice {:?} replaced an existing playback", id);
        }
        Ok(())
    }

    /// Stop a voice and release its routes. No-op if the id is unknown.
    pub fn stop(&mut self, id: &str) -> bool {
        self.voices.remove(id).is_some()
    }

    pub fn set_pause(&mut self, id: &str, enable: bool, now: f64) -> AudioResult<()> {
        let voice = self.voice_mut(id)?;
        if enable {
            voice.pause(now);
        } else {
            voice.resume();
        }
        Ok(())
    }

    /// Adjust playback rate. Silently ignores unknown ids; rate updates
    /// arrive on a fire-and-forget path where the voice may already be gone.
    pub fn set_playback_rate(&mut self, id: &str, rate: f32) {
        if let Some(voice) = self.voices.get_mut(id) {
            voice.playback_rate = rate;
        }
    }

    /// Adjust pitch scale. Same fire-and-forget contract as
    /// [`VoiceManager::set_playback_rate`].
    pub fn set_pitch_scale(&mut self, id: &str, scale: f32) {
        if let Some(voice) = self.voices.get_mut(id) {
            voice.pitch_scale = scale;
        }
    }

    /// Distribute a flat gain vector across a list of buses.
    ///
    /// `flat` holds 8 entries per bus, in bus-list order. A bus not yet
    /// routed from this voice gets a remap created on the spot.
    pub fn set_volumes(&mut self, id: &str, buses: &[BusId], flat: &[f32]) -> AudioResult<()> {
        self.voice_mut(id)?.set_volumes(buses, flat)
    }

    pub fn is_active(&self, id: &str) -> bool {
        self.voices.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&Voice> {
        self.voices.get(id)
    }

    pub fn len(&self) -> usize {
        self.voices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.voices.is_empty()
    }

    pub fn voices_mut(&mut self) -> impl Iterator<Item = &mut Voice> {
        self.voices.values_mut()
    }

    /// Remove voices that reached natural end-of-stream, returning their
    /// ids so the engine can emit end notifications.
    pub fn reap_ended(&mut self) -> Vec<String> {
        let ended: Vec<String> = self
            .voices
            .values()
            .filter(|v| v.has_ended())
            .map(|v| v.id.clone())
            .collect();
        for id in &ended {
            self.voices.remove(id);
        }
        ended
    }

    pub fn clear(&mut self) {
        self.voices.clear();
    }

    fn voice_mut(&mut self, id: &str) -> AudioResult<&mut Voice> {
        self.voices
            .get_mut(id)
            .ok_or_else(|| AudioError::NotFound(format!("voice {:?}", id)))
    }
}

impl Default for VoiceManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::{SampleDescriptor, SampleStore};

    const RATE: u32 = 48_000;

    fn store_with(id: &str, frames: usize, loop_mode: LoopMode) -> SampleStore {
        let mut store = SampleStore::new();
        let pcm: Vec<f32> = (0..frames)
            .flat_map(|i| {
                let v = (i + 1) as f32 / frames as f32;
                [v, v]
            })
            .collect();
        store
            .register(SampleDescriptor {
                id,
                pcm: &pcm,
                channel_count: 2,
                sample_rate: RATE,
                loop_mode,
                loop_begin: 0,
                loop_end: 0,
            })
            .unwrap();
        store
    }

    fn bus(index: u32) -> BusId {
        BusId {
            index,
            generation: 0,
        }
    }

    #[test]
    fn test_start_and_implicit_replace() {
        let store = store_with("s", 16, LoopMode::Disabled);
        let sample = store.get("s").unwrap();
        let mut voices = VoiceManager::new();

        voices
            .start("v", sample, bus(0), StartOptions::default(), 0.0)
            .unwrap();
        assert!(voices.is_active("v"));
        assert_eq!(voices.len(), 1);

        // Same id replaces, never duplicates
        voices
            .start("v", sample, bus(0), StartOptions::default(), 1.0)
            .unwrap();
        assert_eq!(voices.len(), 1);
    }

    #[test]
    fn test_stop_is_idempotent() {
        let store = store_with("s", 8, LoopMode::Disabled);
        let mut voices = VoiceManager::new();
        voices
            .start("v", store.get("s").unwrap(), bus(0), StartOptions::default(), 0.0)
            .unwrap();

        assert!(voices.stop("v"));
        assert!(!voices.stop("v"));
        assert!(!voices.is_active("v"));
    }

    #[test]
    fn test_bad_start_volume_rejected_without_state_change() {
        let store = store_with("s", 8, LoopMode::Disabled);
        let mut voices = VoiceManager::new();
        voices
            .start("v", store.get("s").unwrap(), bus(0), StartOptions::default(), 0.0)
            .unwrap();

        let err = voices.set_volumes("v", &[bus(0)], &[1.0; 4]);
        assert!(matches!(err, Err(AudioError::InvalidArgument(_))));
        assert!(matches!(
            voices.set_volumes("ghost", &[bus(0)], &[1.0; 8]),
            Err(AudioError::NotFound(_))
        ));
    }

    #[test]
    fn test_set_volumes_adds_routes_lazily() {
        let store = store_with("s", 8, LoopMode::Disabled);
        let mut voices = VoiceManager::new();
        voices
            .start("v", store.get("s").unwrap(), bus(0), StartOptions::default(), 0.0)
            .unwrap();

        let flat: Vec<f32> = vec![0.5; 16];
        voices.set_volumes("v", &[bus(0), bus(1)], &flat).unwrap();
        assert_eq!(voices.get("v").unwrap().routes().len(), 2);
    }

    #[test]
    fn test_non_looping_voice_ends() {
        let store = store_with("s", 4, LoopMode::Disabled);
        let mut voices = VoiceManager::new();
        voices
            .start("v", store.get("s").unwrap(), bus(0), StartOptions::default(), 0.0)
            .unwrap();

        let mut block = FrameBuffer::silence(16);
        for voice in voices.voices_mut() {
            voice.render_block(RATE, &mut block);
        }
        // 4 real frames then zero-fill
        assert!(block[0].left > 0.0);
        assert_eq!(block[8], Frame::silence());

        let ended = voices.reap_ended();
        assert_eq!(ended, vec!["v".to_string()]);
        assert!(voices.is_empty());
    }

    #[test]
    fn test_forward_loop_never_ends() {
        let store = store_with("s", 4, LoopMode::Forward);
        let mut voices = VoiceManager::new();
        voices
            .start("v", store.get("s").unwrap(), bus(0), StartOptions::default(), 0.0)
            .unwrap();

        let mut block = FrameBuffer::silence(64);
        for voice in voices.voices_mut() {
            voice.render_block(RATE, &mut block);
        }
        assert!(block[63].left > 0.0);
        assert!(voices.reap_ended().is_empty());
    }

    #[test]
    fn test_ping_pong_bounces() {
        let store = store_with("s", 8, LoopMode::PingPong);
        let mut voices = VoiceManager::new();
        voices
            .start("v", store.get("s").unwrap(), bus(0), StartOptions::default(), 0.0)
            .unwrap();

        // Sample values ramp 1/8..=1.0; after bouncing off the end the
        // signal must come back down instead of wrapping to the start.
        let mut block = FrameBuffer::silence(12);
        for voice in voices.voices_mut() {
            voice.render_block(RATE, &mut block);
        }
        assert!(block[10].left < block[7].left);
        assert!(block[11].left < block[10].left);
        assert!(voices.reap_ended().is_empty());
    }

    #[test]
    fn test_playback_rate_doubles_the_step() {
        let store = store_with("s", 32, LoopMode::Disabled);
        let mut voices = VoiceManager::new();
        let options = StartOptions {
            playback_rate: 2.0,
            ..Default::default()
        };
        voices
            .start("v", store.get("s").unwrap(), bus(0), options, 0.0)
            .unwrap();

        let mut block = FrameBuffer::silence(8);
        for voice in voices.voices_mut() {
            voice.render_block(RATE, &mut block);
        }
        let pos = voices.get("v").unwrap().position_seconds();
        assert!((pos - 16.0 / f64::from(RATE)).abs() < 1e-9);
    }

    #[test]
    fn test_pause_produces_silence_and_resume_restores_position() {
        let store = store_with("s", 480, LoopMode::Disabled);
        let mut voices = VoiceManager::new();
        voices
            .start("v", store.get("s").unwrap(), bus(0), StartOptions::default(), 0.0)
            .unwrap();

        let mut block = FrameBuffer::silence(48);
        for voice in voices.voices_mut() {
            voice.render_block(RATE, &mut block);
        }

        // Pause after 48 frames = 1ms of engine time
        voices.set_pause("v", true, 0.001).unwrap();
        for voice in voices.voices_mut() {
            voice.render_block(RATE, &mut block);
        }
        assert_eq!(block[0], Frame::silence());

        voices.set_pause("v", false, 0.002).unwrap();
        let voice = voices.get("v").unwrap();
        assert!(!voice.is_paused());
        assert!((voice.position_seconds() - 0.001).abs() < 1e-9);
    }

    #[test]
    fn test_second_pause_cycle_keeps_the_position() {
        let store = store_with("s", 480, LoopMode::Disabled);
        let mut voices = VoiceManager::new();
        voices
            .start("v", store.get("s").unwrap(), bus(0), StartOptions::default(), 0.0)
            .unwrap();

        // 48 frames = 1ms of engine time per rendered block
        let mut block = FrameBuffer::silence(48);
        for voice in voices.voices_mut() {
            voice.render_block(RATE, &mut block);
        }
        voices.set_pause("v", true, 0.001).unwrap();
        voices.set_pause("v", false, 0.001).unwrap();
        for voice in voices.voices_mut() {
            voice.render_block(RATE, &mut block);
        }
        let before = voices.get("v").unwrap().position_seconds();
        assert!((before - 0.002).abs() < 1e-9);

        // A second cycle must not rewind to the first cycle's offset
        voices.set_pause("v", true, 0.002).unwrap();
        voices.set_pause("v", false, 0.002).unwrap();
        let after = voices.get("v").unwrap().position_seconds();
        assert!((after - before).abs() < 1e-9);
    }

    #[test]
    fn test_resume_without_pause_is_a_no_op() {
        let store = store_with("s", 480, LoopMode::Disabled);
        let mut voices = VoiceManager::new();
        voices
            .start("v", store.get("s").unwrap(), bus(0), StartOptions::default(), 0.0)
            .unwrap();

        let mut block = FrameBuffer::silence(48);
        for voice in voices.voices_mut() {
            voice.render_block(RATE, &mut block);
        }
        let before = voices.get("v").unwrap().position_seconds();
        voices.set_pause("v", false, 5.0).unwrap();
        assert_eq!(voices.get("v").unwrap().position_seconds(), before);
    }

    #[test]
    fn test_voices_on_one_sample_keep_independent_cursors() {
        let store = store_with("s", 64, LoopMode::Disabled);
        let sample = store.get("s").unwrap();
        let mut voices = VoiceManager::new();
        voices
            .start("a", sample, bus(0), StartOptions::default(), 0.0)
            .unwrap();
        let fast = StartOptions {
            playback_rate: 2.0,
            ..Default::default()
        };
        voices.start("b", sample, bus(0), fast, 0.0).unwrap();

        let mut block = FrameBuffer::silence(8);
        for voice in voices.voices_mut() {
            voice.render_block(RATE, &mut block);
        }
        let a = voices.get("a").unwrap().position_seconds();
        let b = voices.get("b").unwrap().position_seconds();
        assert!((b - 2.0 * a).abs() < 1e-12);
    }

    #[test]
    fn test_pause_unknown_voice_is_not_found() {
        let mut voices = VoiceManager::new();
        assert!(matches!(
            voices.set_pause("ghost", true, 0.0),
            Err(AudioError::NotFound(_))
        ));
    }
}
