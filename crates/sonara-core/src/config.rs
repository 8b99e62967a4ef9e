//! Engine configuration
//!
//! Configuration for the engine context and device layer, plus generic
//! YAML load/save helpers so hosts can persist settings.

use std::path::Path;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::bridge::BridgeMode;

/// Maximum block size to pre-allocate (covers typical device configurations:
/// 64, 128, 256, 512, 1024, 2048, 4096 frames). Pre-allocating to this size
/// eliminates allocations on the render path.
pub const MAX_BLOCK_FRAMES: usize = 8192;

/// Default block size when no preference is specified (frames).
/// 512 frames is a safe default that works on most systems.
pub const DEFAULT_BLOCK_FRAMES: u32 = 512;

/// Default mix rate for the engine (48kHz).
/// If the audio device doesn't support 48kHz the device layer falls back to
/// the device's preferred rate and reports it to the engine at init.
pub const DEFAULT_MIX_RATE: u32 = 48_000;

/// Default PCM ring capacity, in blocks, for the non-threaded bridge.
pub const DEFAULT_RING_BLOCKS: u32 = 4;

/// Preferred render block size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BlockSize {
    /// Let the device layer choose
    #[default]
    Default,
    /// Request a specific size in frames (may be adjusted by the device)
    Fixed(u32),
    /// Smallest size known to be stable across systems
    LowLatency,
}

impl BlockSize {
    /// Resolve to a concrete frame count.
    pub fn frames(&self) -> u32 {
        match self {
            BlockSize::Default => DEFAULT_BLOCK_FRAMES,
            BlockSize::Fixed(frames) => (*frames).clamp(64, MAX_BLOCK_FRAMES as u32),
            BlockSize::LowLatency => 256,
        }
    }

    /// One-way latency of this block size at the given mix rate, in seconds.
    pub fn latency_seconds(&self, mix_rate: u32) -> f32 {
        self.frames() as f32 / mix_rate as f32
    }
}

/// Configuration for an [`crate::engine::AudioServer`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Mix rate in Hz (None = accept the device default)
    pub mix_rate: Option<u32>,

    /// Preferred render block size
    pub block_size: BlockSize,

    /// How PCM crosses from the control domain to the device callback.
    /// Fixed for the lifetime of the session.
    pub bridge_mode: BridgeMode,

    /// Capacity of the bridge ring, in blocks
    #[serde(default = "default_ring_blocks")]
    pub ring_blocks: u32,

    /// Output device name (None = system default)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_device: Option<String>,

    /// Whether to open an input capture stream alongside the output
    #[serde(default)]
    pub capture: bool,
}

fn default_ring_blocks() -> u32 {
    DEFAULT_RING_BLOCKS
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            mix_rate: Some(DEFAULT_MIX_RATE),
            block_size: BlockSize::default(),
            bridge_mode: BridgeMode::default(),
            ring_blocks: DEFAULT_RING_BLOCKS,
            output_device: None,
            capture: false,
        }
    }
}

impl EngineConfig {
    /// Config using the single-buffer ring path (no dedicated render thread).
    pub fn ring_buffer() -> Self {
        Self {
            bridge_mode: BridgeMode::RingBuffer,
            ..Default::default()
        }
    }

    /// Config using the threaded bridge with backpressure.
    pub fn threaded() -> Self {
        Self {
            bridge_mode: BridgeMode::Threaded,
            ..Default::default()
        }
    }

    pub fn with_mix_rate(mut self, rate: u32) -> Self {
        self.mix_rate = Some(rate);
        self
    }

    pub fn with_block_frames(mut self, frames: u32) -> Self {
        self.block_size = BlockSize::Fixed(frames);
        self
    }

    /// Resolved mix rate (config preference or the engine default).
    pub fn resolved_mix_rate(&self) -> u32 {
        self.mix_rate.unwrap_or(DEFAULT_MIX_RATE)
    }

    /// Bridge ring capacity in samples (interleaved stereo).
    pub fn ring_capacity_samples(&self) -> usize {
        self.block_size.frames() as usize * self.ring_blocks.max(1) as usize * 2
    }
}

/// Load configuration from a YAML file.
///
/// A missing or unparseable file logs and falls back to defaults; config
/// problems should never prevent the engine from starting.
pub fn load_config<T>(path: &Path) -> T
where
    T: DeserializeOwned + Default,
{
    if !path.exists() {
        log::info!("config file {:?} doesn't exist, using defaults", path);
        return T::default();
    }

    match std::fs::read_to_string(path) {
        Ok(contents) => match serde_yaml::from_str::<T>(&contents) {
            Ok(config) => config,
            Err(e) => {
                log::warn!("failed to parse config {:?}: {}, using defaults", path, e);
                T::default()
            }
        },
        Err(e) => {
            log::warn!("failed to read config {:?}: {}, using defaults", path, e);
            T::default()
        }
    }
}

/// Save configuration to a YAML file, creating parent directories.
pub fn save_config<T>(config: &T, path: &Path) -> Result<()>
where
    T: Serialize,
{
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create config directory {:?}", parent))?;
    }

    let yaml = serde_yaml::to_string(config).context("failed to serialize config")?;
    std::fs::write(path, yaml).with_context(|| format!("failed to write config {:?}", path))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_size_resolution() {
        assert_eq!(BlockSize::Default.frames(), DEFAULT_BLOCK_FRAMES);
        assert_eq!(BlockSize::Fixed(1024).frames(), 1024);
        // Clamped to the pre-allocation ceiling
        assert_eq!(BlockSize::Fixed(1 << 20).frames(), MAX_BLOCK_FRAMES as u32);
        assert_eq!(BlockSize::Fixed(8).frames(), 64);
    }

    #[test]
    fn test_ring_capacity() {
        let config = EngineConfig::ring_buffer().with_block_frames(256);
        assert_eq!(config.ring_capacity_samples(), 256 * 4 * 2);
    }

    #[test]
    fn test_load_nonexistent_returns_default() {
        let config: EngineConfig = load_config(Path::new("/nonexistent/path/config.yaml"));
        assert_eq!(config.resolved_mix_rate(), DEFAULT_MIX_RATE);
    }

    #[test]
    fn test_config_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.yaml");

        let config = EngineConfig::threaded()
            .with_mix_rate(44_100)
            .with_block_frames(128);
        save_config(&config, &path).unwrap();

        let loaded: EngineConfig = load_config(&path);
        assert_eq!(loaded.mix_rate, Some(44_100));
        assert_eq!(loaded.block_size, BlockSize::Fixed(128));
        assert_eq!(loaded.bridge_mode, BridgeMode::Threaded);
    }
}
