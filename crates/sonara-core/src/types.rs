//! Common audio types for sonara
//!
//! Fundamental types shared by every module: the sample scalar, the fixed
//! channel layouts, stereo frames, and the frame buffer used for block
//! rendering.

use std::ops::{Index, IndexMut};

/// Audio sample type (32-bit float throughout the engine)
pub type Sample = f32;

/// Length of the logical per-voice volume vector accepted by the host API.
pub const MAX_CHANNELS: usize = 8;

/// Number of input channels on every mixing bus.
pub const BUS_CHANNELS: usize = 6;

/// Logical engine channel order for per-voice volume vectors.
///
/// Rear-left/rear-right are distinct from the side channels here even
/// though the 6-channel bus layout has no slot for them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum EngineChannel {
    L = 0,
    R = 1,
    C = 2,
    Lfe = 3,
    Rl = 4,
    Rr = 5,
    Sl = 6,
    Sr = 7,
}

/// Fixed bus input layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum BusChannel {
    L = 0,
    R = 1,
    Sl = 2,
    Sr = 3,
    C = 4,
    Lfe = 5,
}

/// `e^(db * DB_TO_LINEAR_FACTOR)` = `10^(db/20)`
const DB_TO_LINEAR_FACTOR: f64 = 0.115_129_254_649_702_28;
const LINEAR_TO_DB_FACTOR: f64 = 8.685_889_638_065_037;

/// Convert decibels to a linear gain multiplier.
#[inline]
pub fn db_to_linear(db: f32) -> f32 {
    (f64::from(db) * DB_TO_LINEAR_FACTOR).exp() as f32
}

/// Convert a linear gain multiplier to decibels.
#[inline]
pub fn linear_to_db(linear: f32) -> f32 {
    (f64::from(linear).ln() * LINEAR_TO_DB_FACTOR) as f32
}

/// A single stereo frame.
///
/// `#[repr(C)]` guarantees the `[left, right]` layout so a `&[Frame]` can be
/// viewed as interleaved `&[f32]` with bytemuck, avoiding per-frame format
/// conversions at the device boundary.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Frame {
    pub left: Sample,
    pub right: Sample,
}

impl Frame {
    #[inline]
    pub fn new(left: Sample, right: Sample) -> Self {
        Self { left, right }
    }

    #[inline]
    pub fn silence() -> Self {
        Self::default()
    }

    /// Mid signal, used when folding center/LFE contributions.
    #[inline]
    pub fn mono(&self) -> Sample {
        (self.left + self.right) * 0.5
    }
}

impl std::ops::Add for Frame {
    type Output = Self;

    #[inline]
    fn add(self, other: Self) -> Self {
        Self {
            left: self.left + other.left,
            right: self.right + other.right,
        }
    }
}

impl std::ops::AddAssign for Frame {
    #[inline]
    fn add_assign(&mut self, other: Self) {
        self.left += other.left;
        self.right += other.right;
    }
}

impl std::ops::Mul<Sample> for Frame {
    type Output = Self;

    #[inline]
    fn mul(self, factor: Sample) -> Self {
        Self {
            left: self.left * factor,
            right: self.right * factor,
        }
    }
}

impl std::ops::MulAssign<Sample> for Frame {
    #[inline]
    fn mul_assign(&mut self, factor: Sample) {
        self.left *= factor;
        self.right *= factor;
    }
}

/// A buffer of stereo frames.
///
/// The primary block-rendering buffer. Pre-allocate to the maximum block
/// size once, then adjust the working length with
/// [`FrameBuffer::set_len_from_capacity`] inside the render path.
#[derive(Debug, Clone, Default)]
pub struct FrameBuffer {
    frames: Vec<Frame>,
}

impl FrameBuffer {
    /// Create a buffer filled with silence.
    pub fn silence(len: usize) -> Self {
        Self {
            frames: vec![Frame::silence(); len],
        }
    }

    /// Create a buffer from interleaved samples `[L, R, L, R, ...]`.
    pub fn from_interleaved(interleaved: &[Sample]) -> Self {
        assert!(
            interleaved.len() % 2 == 0,
            "interleaved buffer must have even length"
        );
        let frames = interleaved
            .chunks_exact(2)
            .map(|chunk| Frame::new(chunk[0], chunk[1]))
            .collect();
        Self { frames }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Set the working length of a pre-allocated buffer (real-time safe).
    ///
    /// Newly exposed frames are zeroed. Debug-asserts that the capacity
    /// already covers `new_len`; only the length field changes.
    #[inline]
    pub fn set_len_from_capacity(&mut self, new_len: usize) {
        if new_len > self.frames.len() {
            debug_assert!(
                new_len <= self.frames.capacity(),
                "set_len_from_capacity called with len > capacity"
            );
            self.frames.resize(new_len, Frame::silence());
        } else {
            self.frames.truncate(new_len);
        }
    }

    pub fn fill_silence(&mut self) {
        self.frames.fill(Frame::silence());
    }

    #[inline]
    pub fn as_slice(&self) -> &[Frame] {
        &self.frames
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [Frame] {
        &mut self.frames
    }

    /// Zero-copy view of the frames as interleaved f32 `[L, R, L, R, ...]`.
    #[inline]
    pub fn as_interleaved(&self) -> &[Sample] {
        bytemuck::cast_slice(&self.frames)
    }

    /// Zero-copy mutable view of the frames as interleaved f32.
    #[inline]
    pub fn as_interleaved_mut(&mut self) -> &mut [Sample] {
        bytemuck::cast_slice_mut(&mut self.frames)
    }

    /// Sum `other * gain` into this buffer. Lengths must match.
    pub fn add_scaled(&mut self, other: &FrameBuffer, gain: Sample) {
        assert_eq!(self.len(), other.len(), "buffer lengths must match");
        for (dst, src) in self.frames.iter_mut().zip(other.frames.iter()) {
            *dst += *src * gain;
        }
    }

    /// Scale every frame by a factor.
    pub fn scale(&mut self, factor: Sample) {
        for frame in &mut self.frames {
            *frame *= factor;
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Frame> {
        self.frames.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Frame> {
        self.frames.iter_mut()
    }

    /// Peak amplitude across the buffer.
    pub fn peak(&self) -> Sample {
        self.frames
            .iter()
            .map(|f| f.left.abs().max(f.right.abs()))
            .fold(0.0, Sample::max)
    }
}

impl Index<usize> for FrameBuffer {
    type Output = Frame;

    #[inline]
    fn index(&self, index: usize) -> &Self::Output {
        &self.frames[index]
    }
}

impl IndexMut<usize> for FrameBuffer {
    #[inline]
    fn index_mut(&mut self, index: usize) -> &mut Self::Output {
        &mut self.frames[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_operations() {
        let a = Frame::new(1.0, 2.0);
        let b = Frame::new(0.5, 0.5);

        let sum = a + b;
        assert_eq!(sum.left, 1.5);
        assert_eq!(sum.right, 2.5);

        let scaled = a * 0.5;
        assert_eq!(scaled.left, 0.5);
        assert_eq!(scaled.right, 1.0);

        assert_eq!(a.mono(), 1.5);
    }

    #[test]
    fn test_interleaved_round_trip() {
        let buffer = FrameBuffer::from_interleaved(&[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer[1].left, 3.0);
        assert_eq!(buffer.as_interleaved(), &[1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_db_conversions() {
        assert!((db_to_linear(0.0) - 1.0).abs() < 1e-6);
        assert!((db_to_linear(-6.0) - 0.501_187).abs() < 1e-4);
        assert!((db_to_linear(6.0) - 1.995_26).abs() < 1e-4);
        assert!(linear_to_db(1.0).abs() < 1e-6);
        assert!((linear_to_db(0.5) + 6.0206).abs() < 1e-3);
    }

    #[test]
    fn test_add_scaled() {
        let mut out = FrameBuffer::silence(2);
        let src = FrameBuffer::from_interleaved(&[1.0, 1.0, 2.0, 2.0]);
        out.add_scaled(&src, 0.5);
        assert_eq!(out[0], Frame::new(0.5, 0.5));
        assert_eq!(out[1], Frame::new(1.0, 1.0));
    }

    #[test]
    fn test_set_len_from_capacity() {
        let mut buf = FrameBuffer::silence(8);
        buf.set_len_from_capacity(4);
        assert_eq!(buf.len(), 4);
        buf.set_len_from_capacity(8);
        assert_eq!(buf.len(), 8);
        assert_eq!(buf[7], Frame::silence());
    }
}
