//! CPAL output driver
//!
//! Opens an output stream on the configured (or default) device and wires
//! the device callback to a [`BridgeReader`]. The callback only pulls
//! already-mixed PCM; it never touches the graph or voices and never
//! blocks, so a stalled control domain degrades to silence instead of
//! stalling the audio clock.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize as CpalBufferSize, SampleFormat, Stream, StreamConfig};

use crate::bridge::{ring_channel, BridgeReader, RingReader};
use crate::config::{EngineConfig, MAX_BLOCK_FRAMES};
use crate::device::{DeviceState, OutputDriver};
use crate::engine::{EngineEvent, EventSender};
use crate::error::{AudioError, AudioResult};
use crate::types::Frame;

/// Names of all output devices on the default host.
pub fn output_device_names() -> Vec<String> {
    let host = cpal::default_host();
    match host.output_devices() {
        Ok(devices) => devices.filter_map(|d| d.name().ok()).collect(),
        Err(e) => {
            log::warn!("could not enumerate output devices: {}", e);
            Vec::new()
        }
    }
}

/// An open CPAL output stream.
pub struct CpalOutput {
    stream: Option<Stream>,
    mix_rate: u32,
    block_frames: u32,
    state: DeviceState,
}

impl CpalOutput {
    /// Open the configured output device and start pulling from `reader`.
    ///
    /// `events` is handed to the stream's error path; device faults arrive
    /// at the host as [`EngineEvent::StateChanged`] / `Diagnostic` instead
    /// of a callback into host code.
    pub fn start(
        config: &EngineConfig,
        reader: BridgeReader,
        events: EventSender,
    ) -> AudioResult<Self> {
        let host = cpal::default_host();
        let device = match &config.output_device {
            Some(name) => find_output_device(&host, name)?,
            None => host.default_output_device().ok_or_else(|| {
                AudioError::DeviceUnavailable("no default output device".to_string())
            })?,
        };
        log::info!(
            "opening output device {:?}",
            device.name().unwrap_or_else(|_| "<unnamed>".to_string())
        );

        let (stream_config, block_frames) = select_output_config(&device, config)?;
        let mix_rate = stream_config.sample_rate.0;
        log::info!(
            "output stream: {} channels @ {}Hz, {} frame blocks",
            stream_config.channels,
            mix_rate,
            block_frames
        );

        let stream = build_output_stream(&device, &stream_config, reader, events)?;
        stream
            .play()
            .map_err(|e| AudioError::DeviceUnavailable(format!("stream start failed: {}", e)))?;

        Ok(Self {
            stream: Some(stream),
            mix_rate,
            block_frames,
            state: DeviceState::Running,
        })
    }
}

impl OutputDriver for CpalOutput {
    fn mix_rate(&self) -> u32 {
        self.mix_rate
    }

    fn block_frames(&self) -> u32 {
        self.block_frames
    }

    fn state(&self) -> DeviceState {
        self.state
    }

    fn suspend(&mut self) -> AudioResult<()> {
        if let Some(stream) = &self.stream {
            stream
                .pause()
                .map_err(|e| AudioError::DeviceUnavailable(format!("pause failed: {}", e)))?;
            self.state = DeviceState::Suspended;
        }
        Ok(())
    }

    fn resume(&mut self) -> AudioResult<()> {
        if let Some(stream) = &self.stream {
            stream
                .play()
                .map_err(|e| AudioError::DeviceUnavailable(format!("resume failed: {}", e)))?;
            self.state = DeviceState::Running;
        }
        Ok(())
    }

    fn close(&mut self) {
        self.stream = None;
        self.state = DeviceState::Closed;
        log::info!("output stream closed");
    }
}

/// An open capture stream pushing device input into a PCM ring.
///
/// Capture is independent of the output bridge: the callback folds the
/// device's input channels to stereo and appends to its own ring, and the
/// control domain drains it through the returned [`RingReader`]. Overflow
/// truncates, same contract as the output direction.
pub struct CpalInput {
    stream: Option<Stream>,
    mix_rate: u32,
    state: DeviceState,
}

impl CpalInput {
    /// Open the default input device and start capturing.
    ///
    /// `events` is handed to the stream's error path, same as the output
    /// direction.
    pub fn start(
        config: &EngineConfig,
        mut events: EventSender,
    ) -> AudioResult<(Self, RingReader)> {
        let host = cpal::default_host();
        let device = host.default_input_device().ok_or_else(|| {
            AudioError::DeviceUnavailable("no default input device".to_string())
        })?;
        log::info!(
            "opening input device {:?}",
            device.name().unwrap_or_else(|_| "<unnamed>".to_string())
        );

        let input_config = device.default_input_config().map_err(|e| {
            AudioError::DeviceUnavailable(format!("input config query failed: {}", e))
        })?;
        let stream_config: StreamConfig = input_config.into();
        let channels = stream_config.channels as usize;
        let mix_rate = stream_config.sample_rate.0;

        let block_frames = config.block_size.frames() as usize;
        let capacity = block_frames * config.ring_blocks.max(1) as usize * 2;
        let (mut writer, reader) = ring_channel(capacity, block_frames);

        let stream = device
            .build_input_stream(
                &stream_config,
                move |data: &[f32], _info: &cpal::InputCallbackInfo| {
                    for chunk in data.chunks(channels * block_frames) {
                        let frames = chunk.len() / channels;
                        let mut block = writer.begin_block(frames);
                        for (i, frame) in chunk.chunks(channels).enumerate() {
                            let left = frame[0];
                            let right = if channels > 1 { frame[1] } else { frame[0] };
                            block[i] = Frame::new(left, right);
                        }
                        if writer.submit(block) < frames {
                            log::trace!("capture ring full, dropping input");
                        }
                    }
                },
                move |err| {
                    log::error!("input stream error: {}", err);
                    events.send(EngineEvent::Diagnostic(format!("input stream error: {}", err)));
                    events.send(EngineEvent::StateChanged(DeviceState::Closed));
                },
                None,
            )
            .map_err(|e| {
                AudioError::DeviceUnavailable(format!("input stream build failed: {}", e))
            })?;
        stream.play().map_err(|e| {
            AudioError::DeviceUnavailable(format!("input stream start failed: {}", e))
        })?;

        Ok((
            Self {
                stream: Some(stream),
                mix_rate,
                state: DeviceState::Running,
            },
            reader,
        ))
    }

    pub fn mix_rate(&self) -> u32 {
        self.mix_rate
    }

    pub fn state(&self) -> DeviceState {
        self.state
    }

    pub fn close(&mut self) {
        self.stream = None;
        self.state = DeviceState::Closed;
        log::info!("input stream closed");
    }
}

/// Find a named device on the host.
fn find_output_device(host: &cpal::Host, name: &str) -> AudioResult<cpal::Device> {
    let devices = host.output_devices().map_err(|e| {
        AudioError::DeviceUnavailable(format!("device enumeration failed: {}", e))
    })?;
    for device in devices {
        if device.name().map(|n| n == name).unwrap_or(false) {
            return Ok(device);
        }
    }
    Err(AudioError::DeviceUnavailable(format!(
        "output device {:?} not found",
        name
    )))
}

/// Pick the best supported stream configuration for the device.
///
/// Prefers f32 stereo at the configured mix rate, then falls back by
/// relaxing one constraint at a time. Returns the stream config and the
/// resolved block size in frames.
fn select_output_config(
    device: &cpal::Device,
    config: &EngineConfig,
) -> AudioResult<(StreamConfig, u32)> {
    let supported: Vec<_> = device
        .supported_output_configs()
        .map_err(|e| AudioError::DeviceUnavailable(format!("config query failed: {}", e)))?
        .collect();

    if supported.is_empty() {
        return Err(AudioError::DeviceUnavailable(
            "no supported output configurations".to_string(),
        ));
    }

    let target_rate = config.resolved_mix_rate();

    let best = supported
        .iter()
        .filter(|c| c.sample_format() == SampleFormat::F32)
        .filter(|c| c.channels() >= 2)
        .find(|c| target_rate >= c.min_sample_rate().0 && target_rate <= c.max_sample_rate().0)
        .or_else(|| supported.iter().find(|c| c.channels() >= 2))
        .or_else(|| supported.first())
        .ok_or_else(|| {
            AudioError::DeviceUnavailable("no suitable output configuration".to_string())
        })?;

    let rate = if target_rate >= best.min_sample_rate().0 && target_rate <= best.max_sample_rate().0
    {
        cpal::SampleRate(target_rate)
    } else {
        let fallback = best.max_sample_rate();
        log::warn!(
            "device doesn't support {}Hz, falling back to {}Hz",
            target_rate,
            fallback.0
        );
        fallback
    };

    let block_frames = config.block_size.frames();
    let mut stream_config: StreamConfig = best.clone().with_sample_rate(rate).into();
    stream_config.buffer_size = CpalBufferSize::Fixed(block_frames);

    Ok((stream_config, block_frames))
}

fn build_output_stream(
    device: &cpal::Device,
    config: &StreamConfig,
    mut reader: BridgeReader,
    mut events: EventSender,
) -> AudioResult<Stream> {
    let channels = config.channels as usize;
    reader.set_running(true);

    // Scratch for callbacks on devices with more than two channels
    let mut scratch = vec![Frame::silence(); MAX_BLOCK_FRAMES];

    let stream = device
        .build_output_stream(
            config,
            move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                if channels == 2 {
                    // f32 pairs reinterpret directly as frames
                    let out: &mut [Frame] = bytemuck::cast_slice_mut(data);
                    reader.read(out);
                    return;
                }
                let frames = data.len() / channels;
                let take = frames.min(scratch.len());
                reader.read(&mut scratch[..take]);
                for (i, chunk) in data.chunks_mut(channels).enumerate() {
                    let frame = if i < take { scratch[i] } else { Frame::silence() };
                    chunk[0] = frame.left;
                    if channels > 1 {
                        chunk[1] = frame.right;
                    }
                    for extra in chunk.iter_mut().skip(2) {
                        *extra = 0.0;
                    }
                }
            },
            move |err| {
                log::error!("output stream error: {}", err);
                events.send(EngineEvent::Diagnostic(format!("stream error: {}", err)));
                events.send(EngineEvent::StateChanged(DeviceState::Closed));
            },
            None,
        )
        .map_err(|e| AudioError::DeviceUnavailable(format!("stream build failed: {}", e)))?;

    Ok(stream)
}
