//! Sample store - registry of decoded audio assets
//!
//! Samples are registered once in device format (stereo, engine-owned PCM)
//! and shared immutably by any number of voices. PCM lives behind
//! `basedrop::Shared` so a last reference dropped late (while the render
//! step still holds clones) defers the deallocation to a collector thread
//! instead of freeing a large buffer inline.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use basedrop::{Collector, Handle, Shared};

use crate::error::{AudioError, AudioResult};
use crate::types::Sample as Pcm;

/// Loop behavior for a registered sample (a voice may override it at start).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoopMode {
    #[default]
    Disabled,
    Forward,
    Backward,
    PingPong,
}

/// Stereo-normalized planar PCM for one sample.
///
/// Immutable once registered. Voices keep their own cursor/direction; the
/// data itself is never mutated, so concurrent voices can read it freely.
#[derive(Debug)]
pub struct SamplePcm {
    left: Vec<Pcm>,
    right: Vec<Pcm>,
}

impl SamplePcm {
    /// Number of frames.
    #[inline]
    pub fn frames(&self) -> usize {
        self.left.len()
    }

    #[inline]
    pub fn left(&self) -> &[Pcm] {
        &self.left
    }

    #[inline]
    pub fn right(&self) -> &[Pcm] {
        &self.right
    }
}

/// A registered audio asset.
#[derive(Clone)]
pub struct Sample {
    pub id: String,
    /// Channel count of the source material, before normalization
    pub source_channels: u32,
    /// Sample rate of the stored PCM
    pub sample_rate: u32,
    pub loop_mode: LoopMode,
    pub loop_begin: u64,
    pub loop_end: u64,
    pcm: Shared<SamplePcm>,
}

impl Sample {
    /// Shared reference to the stored PCM (cheap clone, deferred drop).
    pub fn pcm(&self) -> Shared<SamplePcm> {
        self.pcm.clone()
    }

    /// Total frames of stored audio.
    pub fn frames(&self) -> usize {
        self.pcm.frames()
    }

    /// Loop end resolved against the stored length (0 means "to the end").
    pub fn resolved_loop_end(&self) -> u64 {
        if self.loop_end == 0 {
            self.frames() as u64
        } else {
            self.loop_end.min(self.frames() as u64)
        }
    }
}

/// Parameters for registering a sample.
pub struct SampleDescriptor<'a> {
    pub id: &'a str,
    /// Interleaved source PCM
    pub pcm: &'a [Pcm],
    pub channel_count: u32,
    pub sample_rate: u32,
    pub loop_mode: LoopMode,
    pub loop_begin: u64,
    pub loop_end: u64,
}

/// Registry of registered samples, owned by the engine context.
///
/// Registration and lookup happen only on the control thread, so no
/// concurrency control is needed here.
pub struct SampleStore {
    samples: HashMap<String, Sample>,
    gc: GcThread,
}

impl SampleStore {
    pub fn new() -> Self {
        Self {
            samples: HashMap::new(),
            gc: GcThread::spawn(),
        }
    }

    /// Register a sample, normalizing the source PCM to the engine's stereo
    /// device format.
    pub fn register(&mut self, desc: SampleDescriptor<'_>) -> AudioResult<()> {
        if self.samples.contains_key(desc.id) {
            return Err(AudioError::DuplicateId(desc.id.to_string()));
        }
        if desc.channel_count == 0 {
            return Err(AudioError::InvalidArgument(
                "sample channel count must be nonzero".to_string(),
            ));
        }
        if desc.pcm.len() % desc.channel_count as usize != 0 {
            return Err(AudioError::InvalidArgument(format!(
                "pcm length {} is not a multiple of channel count {}",
                desc.pcm.len(),
                desc.channel_count
            )));
        }

        let pcm = normalize_to_stereo(desc.pcm, desc.channel_count as usize);
        log::debug!(
            "registered sample {:?}: {} frames, {} source channels @ {}Hz",
            desc.id,
            pcm.frames(),
            desc.channel_count,
            desc.sample_rate
        );

        let sample = Sample {
            id: desc.id.to_string(),
            source_channels: desc.channel_count,
            sample_rate: desc.sample_rate,
            loop_mode: desc.loop_mode,
            loop_begin: desc.loop_begin,
            loop_end: desc.loop_end,
            pcm: Shared::new(&self.gc.handle, pcm),
        };
        self.samples.insert(desc.id.to_string(), sample);
        Ok(())
    }

    /// Remove a sample. No-op if absent; voices already holding the PCM keep
    /// playing their shared reference until they stop.
    pub fn unregister(&mut self, id: &str) {
        self.samples.remove(id);
    }

    pub fn get(&self, id: &str) -> AudioResult<&Sample> {
        self.samples
            .get(id)
            .ok_or_else(|| AudioError::NotFound(format!("sample {:?}", id)))
    }

    pub fn is_registered(&self, id: &str) -> bool {
        self.samples.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

impl Default for SampleStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Fold interleaved source PCM down (or up) to stereo.
///
/// Mono duplicates into both sides. Surround sources use the common
/// fold-down: channel 2 is treated as center (1/sqrt(2) into both sides),
/// channel 3 as LFE (dropped), and remaining channels alternate
/// left/right at 1/sqrt(2).
fn normalize_to_stereo(pcm: &[Pcm], channels: usize) -> SamplePcm {
    let frames = pcm.len() / channels;
    let mut left = Vec::with_capacity(frames);
    let mut right = Vec::with_capacity(frames);
    const W: Pcm = std::f32::consts::FRAC_1_SQRT_2;

    for frame in pcm.chunks_exact(channels) {
        match channels {
            1 => {
                left.push(frame[0]);
                right.push(frame[0]);
            }
            2 => {
                left.push(frame[0]);
                right.push(frame[1]);
            }
            _ => {
                let mut l = frame[0];
                let mut r = frame[1];
                if channels > 2 {
                    l += frame[2] * W;
                    r += frame[2] * W;
                }
                // frame[3] (LFE) is dropped
                for (i, &ch) in frame.iter().enumerate().skip(4) {
                    if (i - 4) % 2 == 0 {
                        l += ch * W;
                    } else {
                        r += ch * W;
                    }
                }
                left.push(l);
                right.push(r);
            }
        }
    }

    SamplePcm { left, right }
}

/// Deferred-deallocation collector owned by the store.
///
/// `Shared<SamplePcm>` drops enqueue the pointer; this thread frees them
/// where latency doesn't matter. Owned (not a process-wide singleton) so
/// multiple engine instances and deterministic shutdown both work.
struct GcThread {
    handle: Handle,
    running: Arc<AtomicBool>,
    join: Option<thread::JoinHandle<()>>,
}

impl GcThread {
    fn spawn() -> Self {
        let running = Arc::new(AtomicBool::new(true));
        let running_in = Arc::clone(&running);
        let (tx, rx) = mpsc::channel();

        let join = thread::Builder::new()
            .name("sonara-gc".to_string())
            .spawn(move || {
                // Collector is !Sync; it lives on this thread
                let mut collector = Collector::new();
                tx.send(collector.handle()).expect("gc handle send failed");

                while running_in.load(Ordering::Relaxed) {
                    collector.collect();
                    thread::sleep(Duration::from_millis(25));
                }
                collector.collect();
            })
            .expect("failed to spawn gc thread");

        let handle = rx.recv().expect("gc handle recv failed");
        Self {
            handle,
            running,
            join: Some(join),
        }
    }
}

impl Drop for GcThread {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}
