//! Cluster topology
//!
//! Hash slot computation, slot table parsing and the topology map used for
//! routing.

pub mod hash_slot;
pub mod slots;
pub mod topology;
pub mod types;

pub use hash_slot::hash_slot;
pub use slots::parse_cluster_slots;
pub use topology::{NodeStatus, TopologyMap, TopologySnapshot};
pub use types::{NodeAddress, NodeHealth, NodeInfo, NodeRole, SlotRange, TOTAL_SLOTS};
