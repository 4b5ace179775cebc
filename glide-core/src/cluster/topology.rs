//! Cluster Topology Map
//!
//! Slot ownership is held in immutable snapshots. A refresh builds a new
//! snapshot and swaps the pointer; readers clone the `Arc` and never observe
//! a partially updated map.

use super::types::{NodeAddress, SlotRange, TOTAL_SLOTS};
use crate::config::ReadFrom;
use crate::error::{GlideError, Result};
use parking_lot::RwLock;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, info, warn};

/// Live node state consulted while picking a read target
pub trait NodeStatus: Send + Sync {
    /// `false` once a node is marked down
    fn is_available(&self, address: &NodeAddress) -> bool;

    /// Availability zone learned during the handshake
    fn zone(&self, address: &NodeAddress) -> Option<String>;
}

/// Immutable slot table
#[derive(Debug, Clone, Default)]
pub struct TopologySnapshot {
    version: u64,
    ranges: Vec<SlotRange>,
}

impl TopologySnapshot {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a snapshot from ranges, rejecting invalid or overlapping ones
    pub fn from_ranges(version: u64, mut ranges: Vec<SlotRange>) -> Result<Self> {
        ranges.sort_by_key(|r| r.start);

        for range in &ranges {
            if !range.is_valid() {
                return Err(GlideError::Protocol(format!(
                    "invalid slot range {}-{}",
                    range.start, range.end
                )));
            }
        }
        for pair in ranges.windows(2) {
            if pair[1].start <= pair[0].end {
                return Err(GlideError::Protocol(format!(
                    "overlapping slot ranges {}-{} and {}-{}",
                    pair[0].start, pair[0].end, pair[1].start, pair[1].end
                )));
            }
        }

        Ok(Self { version, ranges })
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn ranges(&self) -> &[SlotRange] {
        &self.ranges
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Range owning `slot`
    pub fn range_for(&self, slot: u16) -> Option<&SlotRange> {
        let idx = self.ranges.partition_point(|r| r.end < slot);
        self.ranges.get(idx).filter(|r| r.contains(slot))
    }

    /// Distinct primaries, sorted
    pub fn primaries(&self) -> Vec<NodeAddress> {
        self.ranges
            .iter()
            .map(|r| r.primary.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Distinct replicas, sorted
    pub fn replicas(&self) -> Vec<NodeAddress> {
        self.ranges
            .iter()
            .flat_map(|r| r.replicas.iter().cloned())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Every known node, primaries first
    pub fn all_nodes(&self) -> Vec<NodeAddress> {
        let primaries = self.primaries();
        let mut nodes = primaries.clone();
        nodes.extend(
            self.replicas()
                .into_iter()
                .filter(|r| !primaries.contains(r)),
        );
        nodes
    }

    pub fn is_primary(&self, address: &NodeAddress) -> bool {
        self.ranges.iter().any(|r| &r.primary == address)
    }

    pub fn covered_slots(&self) -> usize {
        self.ranges.iter().map(|r| r.count() as usize).sum()
    }

    pub fn has_full_coverage(&self) -> bool {
        self.covered_slots() == TOTAL_SLOTS as usize
    }

    /// Slot coverage percentage
    pub fn slot_coverage(&self) -> f64 {
        (self.covered_slots() as f64 / TOTAL_SLOTS as f64) * 100.0
    }

    /// Same ranges with the same owners (replicas ignored)
    fn same_layout(&self, ranges: &[SlotRange]) -> bool {
        let mut sorted: Vec<&SlotRange> = ranges.iter().collect();
        sorted.sort_by_key(|r| r.start);
        self.ranges.len() == sorted.len()
            && self
                .ranges
                .iter()
                .zip(sorted)
                .all(|(a, b)| a.start == b.start && a.end == b.end && a.primary == b.primary)
    }

    /// Copy of this snapshot where `slot` is a single-slot range owned by
    /// `owner`. The version is kept.
    fn with_slot_owner(&self, slot: u16, owner: &NodeAddress) -> Self {
        let single = SlotRange::new(slot, slot, owner.clone(), Vec::new());
        let mut ranges = Vec::with_capacity(self.ranges.len() + 2);
        let mut placed = false;

        for range in &self.ranges {
            if !range.contains(slot) {
                ranges.push(range.clone());
                continue;
            }
            if range.start < slot {
                ranges.push(SlotRange::new(
                    range.start,
                    slot - 1,
                    range.primary.clone(),
                    range.replicas.clone(),
                ));
            }
            ranges.push(single.clone());
            if range.end > slot {
                ranges.push(SlotRange::new(
                    slot + 1,
                    range.end,
                    range.primary.clone(),
                    range.replicas.clone(),
                ));
            }
            placed = true;
        }

        if !placed {
            ranges.push(single);
            ranges.sort_by_key(|r| r.start);
        }

        Self {
            version: self.version,
            ranges,
        }
    }
}

/// Shared, atomically swapped topology
pub struct TopologyMap {
    current: RwLock<Arc<TopologySnapshot>>,
    round_robin: AtomicUsize,
}

impl Default for TopologyMap {
    fn default() -> Self {
        Self::new()
    }
}

impl TopologyMap {
    pub fn new() -> Self {
        Self {
            current: RwLock::new(Arc::new(TopologySnapshot::empty())),
            round_robin: AtomicUsize::new(0),
        }
    }

    /// Current snapshot
    pub fn snapshot(&self) -> Arc<TopologySnapshot> {
        self.current.read().clone()
    }

    pub fn version(&self) -> u64 {
        self.current.read().version
    }

    pub fn is_empty(&self) -> bool {
        self.current.read().is_empty()
    }

    pub fn primaries(&self) -> Vec<NodeAddress> {
        self.snapshot().primaries()
    }

    pub fn all_nodes(&self) -> Vec<NodeAddress> {
        self.snapshot().all_nodes()
    }

    /// Install a freshly fetched slot table.
    ///
    /// Returns `true` when the layout changed and the version was bumped.
    pub fn replace(&self, ranges: Vec<SlotRange>) -> Result<bool> {
        if ranges.is_empty() {
            return Err(GlideError::TopologyUnavailable(
                "slot table reply contained no ranges".to_string(),
            ));
        }

        let mut current = self.current.write();
        let changed = !current.same_layout(&ranges);
        let version = if changed {
            current.version + 1
        } else {
            current.version
        };
        let snapshot = TopologySnapshot::from_ranges(version, ranges)?;

        if !snapshot.has_full_coverage() {
            warn!(
                coverage_pct = snapshot.slot_coverage(),
                "Topology does not cover all slots"
            );
        }
        if changed {
            info!(
                version,
                ranges = snapshot.ranges.len(),
                primaries = snapshot.primaries().len(),
                "Topology updated"
            );
        }

        *current = Arc::new(snapshot);
        Ok(changed)
    }

    /// Narrow update after a MOVED reply: `slot` is now owned by `owner`.
    ///
    /// Returns `false` if the map already agreed.
    pub fn apply_redirection(&self, slot: u16, owner: &NodeAddress) -> bool {
        let mut current = self.current.write();
        if current
            .range_for(slot)
            .is_some_and(|r| &r.primary == owner)
        {
            return false;
        }

        debug!(slot, owner = %owner, "Applying slot redirection");
        *current = Arc::new(current.with_slot_owner(slot, owner));
        true
    }

    /// Node that should serve a command on `slot`
    pub fn resolve(
        &self,
        slot: u16,
        is_read: bool,
        read_from: ReadFrom,
        client_az: Option<&str>,
        status: &dyn NodeStatus,
    ) -> Result<NodeAddress> {
        let snapshot = self.snapshot();
        let range = snapshot
            .range_for(slot)
            .ok_or(GlideError::SlotNotCovered(slot))?;

        if !is_read {
            return Ok(range.primary.clone());
        }
        Ok(self.select_reader(range, read_from, client_az, status))
    }

    fn select_reader(
        &self,
        range: &SlotRange,
        read_from: ReadFrom,
        client_az: Option<&str>,
        status: &dyn NodeStatus,
    ) -> NodeAddress {
        let healthy: Vec<&NodeAddress> = range
            .replicas
            .iter()
            .filter(|r| status.is_available(r))
            .collect();
        let in_zone = |addr: &NodeAddress| match client_az {
            Some(az) => status.zone(addr).as_deref() == Some(az),
            None => false,
        };

        let chosen = match read_from {
            ReadFrom::Primary => None,
            ReadFrom::PreferReplica => self.pick(&healthy),
            ReadFrom::AzAffinity => {
                let local: Vec<&NodeAddress> =
                    healthy.iter().copied().filter(|r| in_zone(r)).collect();
                self.pick(&local).or_else(|| self.pick(&healthy))
            }
            ReadFrom::AzAffinityReplicasAndPrimary => {
                let local: Vec<&NodeAddress> =
                    healthy.iter().copied().filter(|r| in_zone(r)).collect();
                self.pick(&local).or_else(|| {
                    if in_zone(&range.primary) {
                        Some(range.primary.clone())
                    } else {
                        self.pick(&healthy)
                    }
                })
            }
        };

        chosen.unwrap_or_else(|| range.primary.clone())
    }

    fn pick(&self, candidates: &[&NodeAddress]) -> Option<NodeAddress> {
        if candidates.is_empty() {
            return None;
        }
        let idx = self.round_robin.fetch_add(1, Ordering::Relaxed) % candidates.len();
        Some(candidates[idx].clone())
    }
}
