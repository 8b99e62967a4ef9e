//! Per-(voice, bus) channel remapping
//!
//! A voice carries one [`ChannelRemap`] per bus it feeds. The host supplies
//! an 8-entry volume vector in engine channel order; the remap keeps the six
//! gains the bus layout recognizes (L, R, SL, SR, C, LFE) and folds them
//! down onto the stereo frames the mixer works in. Rear left/right have no
//! bus leg and are ignored.

use std::f32::consts::FRAC_1_SQRT_2;

use crate::error::{AudioError, AudioResult};
use crate::types::{EngineChannel, Frame, MAX_CHANNELS};

/// Down-mix weight for the center, LFE and surround legs.
const FOLD_WEIGHT: f32 = FRAC_1_SQRT_2;

/// Six independent per-channel gains for one voice-to-bus route.
#[derive(Debug, Clone, Copy)]
pub struct ChannelRemap {
    l: f32,
    r: f32,
    sl: f32,
    sr: f32,
    c: f32,
    lfe: f32,
}

impl ChannelRemap {
    /// All channels silent. A route stays inaudible until volumes arrive.
    pub fn silent() -> Self {
        Self {
            l: 0.0,
            r: 0.0,
            sl: 0.0,
            sr: 0.0,
            c: 0.0,
            lfe: 0.0,
        }
    }

    /// Straight stereo pass-through at `gain`.
    pub fn stereo(gain: f32) -> Self {
        Self {
            l: gain,
            r: gain,
            ..Self::silent()
        }
    }

    /// Load gains from an 8-entry engine-order volume vector.
    ///
    /// Entries for channels with no bus leg (rear left/right) are dropped.
    pub fn set_volumes(&mut self, volume: &[f32]) -> AudioResult<()> {
        if volume.len() != MAX_CHANNELS {
            return Err(AudioError::InvalidArgument(format!(
                "volume vector must have {} entries, got {}",
                MAX_CHANNELS,
                volume.len()
            )));
        }
        self.l = volume[EngineChannel::L as usize];
        self.r = volume[EngineChannel::R as usize];
        self.sl = volume[EngineChannel::Sl as usize];
        self.sr = volume[EngineChannel::Sr as usize];
        self.c = volume[EngineChannel::C as usize];
        self.lfe = volume[EngineChannel::Lfe as usize];
        Ok(())
    }

    /// Route one stereo frame through the six gain legs and fold the result
    /// back to stereo.
    ///
    /// L and R pass straight through their gains. The center and LFE legs
    /// are fed the mono fold of the frame, the surround legs the matching
    /// side, all weighted by `1/sqrt(2)` as a constant-power down-mix.
    #[inline]
    pub fn apply(&self, frame: Frame) -> Frame {
        let mono = frame.mono();
        let fold = mono * (self.c + self.lfe) * FOLD_WEIGHT;
        Frame {
            left: frame.left * self.l + frame.left * self.sl * FOLD_WEIGHT + fold,
            right: frame.right * self.r + frame.right * self.sr * FOLD_WEIGHT + fold,
        }
    }

    /// Whether every leg is zero. Lets the mixer skip the route entirely.
    pub fn is_silent(&self) -> bool {
        self.l == 0.0
            && self.r == 0.0
            && self.sl == 0.0
            && self.sr == 0.0
            && self.c == 0.0
            && self.lfe == 0.0
    }
}

impl Default for ChannelRemap {
    fn default() -> Self {
        Self::silent()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_wrong_vector_length() {
        let mut remap = ChannelRemap::silent();
        assert!(matches!(
            remap.set_volumes(&[1.0; 6]),
            Err(AudioError::InvalidArgument(_))
        ));
        assert!(remap.set_volumes(&[1.0; 8]).is_ok());
    }

    #[test]
    fn test_left_only_vector_carries_only_left() {
        let mut remap = ChannelRemap::silent();
        let mut volume = [0.0f32; 8];
        volume[0] = 1.0;
        remap.set_volumes(&volume).unwrap();

        let out = remap.apply(Frame::new(0.5, 0.5));
        assert_eq!(out.left, 0.5);
        assert_eq!(out.right, 0.0);
    }

    #[test]
    fn test_rear_channels_are_ignored() {
        let mut remap = ChannelRemap::silent();
        let mut volume = [0.0f32; 8];
        volume[EngineChannel::Rl as usize] = 1.0;
        volume[EngineChannel::Rr as usize] = 1.0;
        remap.set_volumes(&volume).unwrap();

        assert!(remap.is_silent());
        let out = remap.apply(Frame::new(1.0, 1.0));
        assert_eq!(out.left, 0.0);
        assert_eq!(out.right, 0.0);
    }

    #[test]
    fn test_center_leg_folds_mono_to_both_sides() {
        let mut remap = ChannelRemap::silent();
        let mut volume = [0.0f32; 8];
        volume[EngineChannel::C as usize] = 1.0;
        remap.set_volumes(&volume).unwrap();

        let out = remap.apply(Frame::new(1.0, 0.0));
        let expected = 0.5 * FOLD_WEIGHT;
        assert!((out.left - expected).abs() < 1e-6);
        assert!((out.right - expected).abs() < 1e-6);
    }

    #[test]
    fn test_stereo_constructor_passes_through() {
        let remap = ChannelRemap::stereo(1.0);
        let out = remap.apply(Frame::new(0.25, -0.75));
        assert_eq!(out.left, 0.25);
        assert_eq!(out.right, -0.75);
    }
}
