//! Bus graph - ordered collection of mixing buses
//!
//! Buses live in a slot arena and are addressed by generation-counted
//! [`BusId`] handles; the ordered sequence the host sees is a separate
//! presentation attribute. Reordering or removing buses therefore never
//! leaves a voice pointing at the wrong bus - a stale handle simply stops
//! resolving.
//!
//! Invariants maintained by every operation:
//! - the bus at position 0 (the root) sends to the device and nothing else,
//! - every other bus reaches the root through an acyclic send chain,
//! - at most one bus holds solo process-wide.

mod bus;

pub use bus::{Bus, BusAtomics, BusId};

use std::sync::Arc;

use crate::error::{AudioError, AudioResult};

struct Slot {
    generation: u32,
    bus: Option<Bus>,
}

/// The mixing bus graph. Mutated only from the control domain.
pub struct BusGraph {
    slots: Vec<Slot>,
    /// Presentation order; position 0 is the root
    order: Vec<BusId>,
    solo_holder: Option<BusId>,
    /// Topological render order: every sender before its target, root last
    render_order: Vec<BusId>,
}

impl BusGraph {
    /// Create a graph with the root bus only.
    pub fn new() -> Self {
        let mut graph = Self {
            slots: Vec::new(),
            order: Vec::new(),
            solo_holder: None,
            render_order: Vec::new(),
        };
        let root = graph.alloc(Bus::new(None));
        graph.order.push(root);
        graph.recompute_render_order();
        graph
    }

    pub fn count(&self) -> usize {
        self.order.len()
    }

    /// Handle of the root bus (position 0).
    pub fn root(&self) -> BusId {
        self.order[0]
    }

    /// Handle at an ordering position.
    pub fn handle_at(&self, position: usize) -> Option<BusId> {
        self.order.get(position).copied()
    }

    /// Current ordering position of a bus.
    pub fn position_of(&self, id: BusId) -> Option<usize> {
        self.order.iter().position(|&b| b == id)
    }

    pub fn bus(&self, id: BusId) -> Option<&Bus> {
        let slot = self.slots.get(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.bus.as_ref()
    }

    /// Live gain stages for a bus; `None` if the handle is stale.
    pub fn atomics(&self, id: BusId) -> Option<Arc<BusAtomics>> {
        self.bus(id).map(Bus::atomics)
    }

    /// Number of slots ever allocated; accumulator arrays size to this.
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Buses in render order.
    pub fn render_order(&self) -> &[BusId] {
        &self.render_order
    }

    /// Grow or shrink the ordered sequence to exactly `n` buses.
    ///
    /// New buses send to the root. Shrinking drops trailing buses; voices
    /// routed to them are disconnected silently (documented gap, the routes
    /// just stop resolving).
    pub fn set_count(&mut self, n: usize) -> AudioResult<()> {
        if n == 0 {
            return Err(AudioError::InvalidArgument(
                "bus count must be at least 1".to_string(),
            ));
        }
        while self.order.len() > n {
            let id = self.order[self.order.len() - 1];
            self.remove_id(id);
        }
        while self.order.len() < n {
            let root = self.root();
            let id = self.alloc(Bus::new(Some(root)));
            self.order.push(id);
        }
        self.recompute_render_order();
        Ok(())
    }

    /// Create a bus and splice it into the order at `at` (clamped).
    ///
    /// Inserting at position 0 makes the new bus the root; the previous root
    /// is re-pointed at it so exactly one bus keeps the device edge.
    pub fn insert(&mut self, at: usize) -> AudioResult<BusId> {
        let at = at.min(self.order.len());
        let id = if at == 0 {
            let old_root = self.root();
            let id = self.alloc(Bus::new(None));
            if let Some(bus) = self.bus_mut(old_root) {
                bus.send = Some(id);
            }
            id
        } else {
            let root = self.root();
            self.alloc(Bus::new(Some(root)))
        };
        self.order.insert(at, id);
        self.recompute_render_order();
        Ok(id)
    }

    /// Relocate a bus in the ordered sequence. `to` is clamped.
    ///
    /// Handles and voice connections are unaffected. If the move changes
    /// which bus sits at position 0, the device edge follows position 0:
    /// the new first bus becomes the root and the old root sends to it.
    pub fn move_bus(&mut self, from: usize, to: usize) -> AudioResult<()> {
        if from >= self.order.len() {
            return Err(AudioError::NotFound(format!("bus {}", from)));
        }
        let to = to.min(self.order.len() - 1);
        let id = self.order.remove(from);
        self.order.insert(to, id);
        self.ensure_root_at_front();
        self.recompute_render_order();
        Ok(())
    }

    /// Remove the bus at `index` from the sequence.
    ///
    /// Buses that sent to it are redirected to the root; voices routed to it
    /// are dropped (their handles stop resolving). The last bus cannot be
    /// removed.
    pub fn remove(&mut self, index: usize) -> AudioResult<()> {
        if self.order.len() == 1 {
            return Err(AudioError::InvalidArgument(
                "cannot remove the last bus".to_string(),
            ));
        }
        let id = self.at(index)?;
        self.remove_id(id);
        self.recompute_render_order();
        Ok(())
    }

    /// Re-route a bus's send edge.
    ///
    /// `target = None` is only valid for the root (it already owns the
    /// device edge); for any other bus it would strand the subtree. A target
    /// whose send chain leads back to `index` is rejected as a cycle. On
    /// error nothing is mutated.
    pub fn set_send(&mut self, index: usize, target: Option<usize>) -> AudioResult<()> {
        let id = self.at(index)?;
        match target {
            None => {
                if index != 0 {
                    return Err(AudioError::InvalidRouting(format!(
                        "bus {} cannot send to the device (only bus 0 does)",
                        index
                    )));
                }
                // Root already sends to the device
                Ok(())
            }
            Some(t) => {
                if index == 0 {
                    return Err(AudioError::InvalidRouting(
                        "bus 0 sends to the device and cannot be re-routed".to_string(),
                    ));
                }
                let target_id = self.at(t)?;
                if self.reaches(target_id, id) {
                    return Err(AudioError::InvalidRouting(format!(
                        "send {} -> {} would create a cycle",
                        index, t
                    )));
                }
                if let Some(bus) = self.bus_mut(id) {
                    bus.send = Some(target_id);
                }
                self.recompute_render_order();
                Ok(())
            }
        }
    }

    /// Enable or disable solo on a bus.
    ///
    /// At most one bus is soloed; enabling steals solo from the previous
    /// holder. The solo gate is unity on the soloed bus and zero on every
    /// other, so all mixing stays a product of live multipliers.
    pub fn set_solo(&mut self, index: usize, enable: bool) -> AudioResult<()> {
        let id = self.at(index)?;
        if enable {
            if self.solo_holder == Some(id) {
                return Ok(());
            }
            if let Some(prev) = self.solo_holder.take() {
                if let Some(bus) = self.bus_mut(prev) {
                    bus.solo = false;
                }
            }
            self.solo_holder = Some(id);
            for pos in 0..self.order.len() {
                let other = self.order[pos];
                if let Some(bus) = self.bus_mut(other) {
                    bus.solo = other == id;
                    bus.atomics().set_solo_gain(if other == id { 1.0 } else { 0.0 });
                }
            }
        } else {
            if self.solo_holder != Some(id) {
                return Ok(());
            }
            self.solo_holder = None;
            for pos in 0..self.order.len() {
                let other = self.order[pos];
                if let Some(bus) = self.bus_mut(other) {
                    bus.solo = false;
                    bus.atomics().set_solo_gain(1.0);
                }
            }
        }
        Ok(())
    }

    pub fn set_mute(&mut self, index: usize, enable: bool) -> AudioResult<()> {
        let id = self.at(index)?;
        if let Some(bus) = self.bus_mut(id) {
            bus.set_muted(enable);
        }
        Ok(())
    }

    pub fn set_volume_db(&mut self, index: usize, db: f32) -> AudioResult<()> {
        let id = self.at(index)?;
        if let Some(bus) = self.bus_mut(id) {
            bus.set_volume_db(db);
        }
        Ok(())
    }

    /// Resolve an ordering position to a handle.
    pub fn at(&self, index: usize) -> AudioResult<BusId> {
        self.handle_at(index)
            .ok_or_else(|| AudioError::NotFound(format!("bus {}", index)))
    }

    fn bus_mut(&mut self, id: BusId) -> Option<&mut Bus> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.bus.as_mut()
    }

    fn alloc(&mut self, bus: Bus) -> BusId {
        if let Some(index) = self.slots.iter().position(|s| s.bus.is_none()) {
            let slot = &mut self.slots[index];
            slot.bus = Some(bus);
            BusId {
                index: index as u32,
                generation: slot.generation,
            }
        } else {
            self.slots.push(Slot {
                generation: 0,
                bus: Some(bus),
            });
            BusId {
                index: (self.slots.len() - 1) as u32,
                generation: 0,
            }
        }
    }

    /// Remove a bus by handle: redirect its senders, promote a new root if
    /// needed, free the slot (bumping the generation).
    fn remove_id(&mut self, id: BusId) {
        let Some(position) = self.position_of(id) else {
            return;
        };
        self.order.remove(position);

        if self.solo_holder == Some(id) {
            // Dropping the soloed bus restores unity everywhere
            self.solo_holder = None;
            for pos in 0..self.order.len() {
                let other = self.order[pos];
                if let Some(bus) = self.bus_mut(other) {
                    bus.solo = false;
                    bus.atomics().set_solo_gain(1.0);
                }
            }
        }

        let was_root = position == 0;
        if was_root && !self.order.is_empty() {
            let new_root = self.order[0];
            if let Some(bus) = self.bus_mut(new_root) {
                bus.send = None;
            }
        }
        let root = if self.order.is_empty() {
            None
        } else {
            Some(self.order[0])
        };
        for pos in 0..self.order.len() {
            let other = self.order[pos];
            if let Some(bus) = self.bus_mut(other) {
                if bus.send == Some(id) {
                    bus.send = if Some(other) == root { None } else { root };
                }
            }
        }

        if let Some(slot) = self.slots.get_mut(id.index as usize) {
            slot.bus = None;
            slot.generation = slot.generation.wrapping_add(1);
        }
    }

    /// After a reorder, keep the device edge on position 0.
    fn ensure_root_at_front(&mut self) {
        let first = self.order[0];
        let first_is_root = self.bus(first).map(|b| b.send.is_none()).unwrap_or(false);
        if first_is_root {
            return;
        }
        let old_root = self
            .order
            .iter()
            .copied()
            .find(|&id| self.bus(id).map(|b| b.send.is_none()).unwrap_or(false));
        if let Some(bus) = self.bus_mut(first) {
            bus.send = None;
        }
        if let Some(old) = old_root {
            if let Some(bus) = self.bus_mut(old) {
                bus.send = Some(first);
            }
        }
    }

    /// Whether `from`'s send chain reaches `to`.
    fn reaches(&self, from: BusId, to: BusId) -> bool {
        let mut cursor = Some(from);
        let mut hops = 0;
        while let Some(id) = cursor {
            if id == to {
                return true;
            }
            cursor = self.bus(id).and_then(|b| b.send);
            hops += 1;
            if hops > self.order.len() {
                // Defensive bound; the graph is kept acyclic
                return true;
            }
        }
        false
    }

    /// Kahn's algorithm over send edges: senders before targets.
    fn recompute_render_order(&mut self) {
        let mut indegree = vec![0usize; self.slots.len()];
        for &id in &self.order {
            if let Some(target) = self.bus(id).and_then(|b| b.send) {
                indegree[target.slot()] += 1;
            }
        }
        let mut queue: Vec<BusId> = self
            .order
            .iter()
            .copied()
            .filter(|id| indegree[id.slot()] == 0)
            .collect();
        let mut result = Vec::with_capacity(self.order.len());
        let mut head = 0;
        while head < queue.len() {
            let id = queue[head];
            head += 1;
            result.push(id);
            if let Some(target) = self.bus(id).and_then(|b| b.send) {
                indegree[target.slot()] -= 1;
                if indegree[target.slot()] == 0 {
                    queue.push(target);
                }
            }
        }
        debug_assert_eq!(result.len(), self.order.len(), "bus graph must be acyclic");
        self.render_order = result;
    }
}

impl Default for BusGraph {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_graph_has_device_root() {
        let graph = BusGraph::new();
        assert_eq!(graph.count(), 1);
        assert!(graph.bus(graph.root()).unwrap().send().is_none());
    }

    #[test]
    fn test_set_count_grows_with_root_sends() {
        let mut graph = BusGraph::new();
        graph.set_count(4).unwrap();
        assert_eq!(graph.count(), 4);
        let root = graph.root();
        for pos in 1..4 {
            let id = graph.handle_at(pos).unwrap();
            assert_eq!(graph.bus(id).unwrap().send(), Some(root));
        }
        assert!(graph.bus(root).unwrap().send().is_none());
    }

    #[test]
    fn test_set_count_shrinks_from_the_end() {
        let mut graph = BusGraph::new();
        graph.set_count(4).unwrap();
        let kept = graph.handle_at(1).unwrap();
        let dropped = graph.handle_at(3).unwrap();
        graph.set_count(2).unwrap();
        assert_eq!(graph.count(), 2);
        assert!(graph.bus(kept).is_some());
        // Handle to a truncated bus no longer resolves
        assert!(graph.bus(dropped).is_none());
        assert!(graph.atomics(dropped).is_none());
    }

    #[test]
    fn test_set_count_zero_rejected() {
        let mut graph = BusGraph::new();
        assert!(matches!(
            graph.set_count(0),
            Err(AudioError::InvalidArgument(_))
        ));
        assert_eq!(graph.count(), 1);
    }

    #[test]
    fn test_volume_db_scenario() {
        // setCount(2); setSend(1, 0); setVolumeDb(0, -6) => ~0.501 linear
        let mut graph = BusGraph::new();
        graph.set_count(2).unwrap();
        graph.set_send(1, Some(0)).unwrap();
        graph.set_volume_db(0, -6.0).unwrap();
        let gain = graph.atomics(graph.root()).unwrap().gain();
        assert!((gain - 0.501).abs() < 1e-3);
    }

    #[test]
    fn test_solo_is_exclusive_across_toggles() {
        let mut graph = BusGraph::new();
        graph.set_count(3).unwrap();

        let solo_gains = |g: &BusGraph| -> Vec<f32> {
            (0..3)
                .map(|i| g.atomics(g.handle_at(i).unwrap()).unwrap().solo_gain())
                .collect()
        };

        graph.set_solo(1, true).unwrap();
        assert_eq!(solo_gains(&graph), vec![0.0, 1.0, 0.0]);

        // Enabling another solo steals it
        graph.set_solo(2, true).unwrap();
        assert_eq!(solo_gains(&graph), vec![0.0, 0.0, 1.0]);
        assert!(!graph.bus(graph.handle_at(1).unwrap()).unwrap().is_solo());

        graph.set_solo(2, false).unwrap();
        assert_eq!(solo_gains(&graph), vec![1.0, 1.0, 1.0]);

        // Disabling a non-holder is a no-op
        graph.set_solo(1, true).unwrap();
        graph.set_solo(0, false).unwrap();
        assert_eq!(solo_gains(&graph), vec![0.0, 1.0, 0.0]);
    }

    #[test]
    fn test_send_null_on_non_root_rejected() {
        let mut graph = BusGraph::new();
        graph.set_count(2).unwrap();
        assert!(matches!(
            graph.set_send(1, None),
            Err(AudioError::InvalidRouting(_))
        ));
    }

    #[test]
    fn test_send_cycle_rejected() {
        let mut graph = BusGraph::new();
        graph.set_count(3).unwrap();
        graph.set_send(1, Some(2)).unwrap();
        // 2 -> 1 would close the loop 1 -> 2 -> 1
        assert!(matches!(
            graph.set_send(2, Some(1)),
            Err(AudioError::InvalidRouting(_))
        ));
        // Prior edge untouched
        let b1 = graph.handle_at(1).unwrap();
        assert_eq!(graph.bus(b1).unwrap().send(), graph.handle_at(2));
    }

    #[test]
    fn test_render_order_is_topological() {
        let mut graph = BusGraph::new();
        graph.set_count(3).unwrap();
        graph.set_send(1, Some(2)).unwrap();

        let order = graph.render_order();
        let pos = |id: BusId| order.iter().position(|&b| b == id).unwrap();
        let b1 = graph.handle_at(1).unwrap();
        let b2 = graph.handle_at(2).unwrap();
        assert!(pos(b1) < pos(b2));
        assert_eq!(*order.last().unwrap(), graph.root());
    }

    #[test]
    fn test_move_keeps_handles_and_device_edge() {
        let mut graph = BusGraph::new();
        graph.set_count(3).unwrap();
        let b2 = graph.handle_at(2).unwrap();
        graph.set_volume_db(2, -12.0).unwrap();

        graph.move_bus(2, 0).unwrap();

        // Same bus, same state, new position
        assert_eq!(graph.position_of(b2), Some(0));
        assert_eq!(graph.bus(b2).unwrap().volume_db(), -12.0);
        // Device edge follows position 0
        assert!(graph.bus(b2).unwrap().send().is_none());
        let old_root = graph.handle_at(1).unwrap();
        assert_eq!(graph.bus(old_root).unwrap().send(), Some(b2));
    }

    #[test]
    fn test_move_clamps_target() {
        let mut graph = BusGraph::new();
        graph.set_count(2).unwrap();
        let b1 = graph.handle_at(1).unwrap();
        graph.move_bus(1, 99).unwrap();
        assert_eq!(graph.position_of(b1), Some(1));
    }

    #[test]
    fn test_remove_redirects_senders() {
        let mut graph = BusGraph::new();
        graph.set_count(3).unwrap();
        graph.set_send(1, Some(2)).unwrap();

        graph.remove(2).unwrap();

        assert_eq!(graph.count(), 2);
        let b1 = graph.handle_at(1).unwrap();
        assert_eq!(graph.bus(b1).unwrap().send(), Some(graph.root()));
    }

    #[test]
    fn test_remove_root_promotes_next() {
        let mut graph = BusGraph::new();
        graph.set_count(2).unwrap();
        let b1 = graph.handle_at(1).unwrap();
        graph.remove(0).unwrap();
        assert_eq!(graph.root(), b1);
        assert!(graph.bus(b1).unwrap().send().is_none());
    }

    #[test]
    fn test_remove_last_bus_rejected() {
        let mut graph = BusGraph::new();
        assert!(matches!(
            graph.remove(0),
            Err(AudioError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_slot_reuse_bumps_generation() {
        let mut graph = BusGraph::new();
        graph.set_count(2).unwrap();
        let dropped = graph.handle_at(1).unwrap();
        graph.set_count(1).unwrap();
        graph.set_count(2).unwrap();
        let replacement = graph.handle_at(1).unwrap();
        // Slot is reused but the old handle stays dead
        assert_eq!(dropped.slot(), replacement.slot());
        assert!(graph.bus(dropped).is_none());
        assert!(graph.bus(replacement).is_some());
    }
}
