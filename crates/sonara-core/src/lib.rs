//! Sonara Core - Real-time audio mixing and routing engine

pub mod bridge;
pub mod config;
pub mod device;
pub mod engine;
pub mod error;
pub mod graph;
pub mod sample;
pub mod types;
pub mod voice;

pub use config::EngineConfig;
pub use engine::{AudioServer, EngineEvent};
pub use error::{AudioError, AudioResult};
pub use types::*;
