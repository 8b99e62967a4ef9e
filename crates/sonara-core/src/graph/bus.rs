//! Bus - a mixing channel with cascaded gain stages and a send route

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::types::db_to_linear;

/// Stable bus handle.
///
/// `index` addresses the graph's slot arena and `generation` guards against
/// reuse, so a handle held across `move`/`remove` either resolves to the
/// same bus or to nothing - never to a different bus that took the slot.
/// Ordering position is a separate, presentation-only attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BusId {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

impl BusId {
    /// Slot index, usable as a dense accumulator index during rendering.
    #[inline]
    pub fn slot(&self) -> usize {
        self.index as usize
    }
}

/// Live gain multipliers for one bus.
///
/// The audible signal is the product of three independently updated stages:
/// raw gain (from dB), solo gate, mute gate. Splitting them means solo/mute/
/// volume updates never recompute a combined coefficient, and the render
/// step reads each scalar snapshot-style with no locks.
///
/// Values are f32 bit patterns in `AtomicU32`s, `Ordering::Relaxed` since
/// only visibility is needed (same pattern as lock-free UI state elsewhere).
pub struct BusAtomics {
    gain: AtomicU32,
    solo_gain: AtomicU32,
    mute_gain: AtomicU32,
}

impl BusAtomics {
    pub fn new() -> Self {
        Self {
            gain: AtomicU32::new(1.0f32.to_bits()),
            solo_gain: AtomicU32::new(1.0f32.to_bits()),
            mute_gain: AtomicU32::new(1.0f32.to_bits()),
        }
    }

    #[inline]
    pub fn gain(&self) -> f32 {
        f32::from_bits(self.gain.load(Ordering::Relaxed))
    }

    #[inline]
    pub fn solo_gain(&self) -> f32 {
        f32::from_bits(self.solo_gain.load(Ordering::Relaxed))
    }

    #[inline]
    pub fn mute_gain(&self) -> f32 {
        f32::from_bits(self.mute_gain.load(Ordering::Relaxed))
    }

    /// Combined multiplier applied to the bus output.
    #[inline]
    pub fn effective_gain(&self) -> f32 {
        self.gain() * self.solo_gain() * self.mute_gain()
    }

    #[inline]
    pub(crate) fn set_gain(&self, value: f32) {
        self.gain.store(value.to_bits(), Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn set_solo_gain(&self, value: f32) {
        self.solo_gain.store(value.to_bits(), Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn set_mute_gain(&self, value: f32) {
        self.mute_gain.store(value.to_bits(), Ordering::Relaxed);
    }
}

impl Default for BusAtomics {
    fn default() -> Self {
        Self::new()
    }
}

/// One mixing bus.
///
/// `send` is the routing edge to another bus; `None` marks the root bus,
/// whose output goes to the device.
pub struct Bus {
    pub(crate) send: Option<BusId>,
    pub(crate) solo: bool,
    pub(crate) muted: bool,
    gain_db: f32,
    atomics: Arc<BusAtomics>,
}

impl Bus {
    pub(crate) fn new(send: Option<BusId>) -> Self {
        Self {
            send,
            solo: false,
            muted: false,
            gain_db: 0.0,
            atomics: Arc::new(BusAtomics::new()),
        }
    }

    #[inline]
    pub fn send(&self) -> Option<BusId> {
        self.send
    }

    #[inline]
    pub fn is_solo(&self) -> bool {
        self.solo
    }

    #[inline]
    pub fn is_muted(&self) -> bool {
        self.muted
    }

    #[inline]
    pub fn volume_db(&self) -> f32 {
        self.gain_db
    }

    pub fn atomics(&self) -> Arc<BusAtomics> {
        Arc::clone(&self.atomics)
    }

    pub(crate) fn set_volume_db(&mut self, db: f32) {
        self.gain_db = db;
        self.atomics.set_gain(db_to_linear(db));
    }

    pub(crate) fn set_muted(&mut self, enable: bool) {
        self.muted = enable;
        self.atomics.set_mute_gain(if enable { 0.0 } else { 1.0 });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_atomics_defaults_to_unity() {
        let atomics = BusAtomics::new();
        assert_eq!(atomics.gain(), 1.0);
        assert_eq!(atomics.solo_gain(), 1.0);
        assert_eq!(atomics.mute_gain(), 1.0);
        assert_eq!(atomics.effective_gain(), 1.0);
    }

    #[test]
    fn test_volume_db_drives_gain_stage() {
        let mut bus = Bus::new(None);
        bus.set_volume_db(-6.0);
        assert!((bus.atomics().gain() - 0.501_187).abs() < 1e-4);
        assert_eq!(bus.volume_db(), -6.0);
    }

    #[test]
    fn test_mute_gates_independently() {
        let mut bus = Bus::new(None);
        bus.set_volume_db(6.0);
        bus.set_muted(true);
        let atomics = bus.atomics();
        assert_eq!(atomics.mute_gain(), 0.0);
        // Raw gain stage unaffected by the mute gate
        assert!(atomics.gain() > 1.9);
        assert_eq!(atomics.effective_gain(), 0.0);
    }
}
