//! Resumable cluster scan

pub mod cursor;
pub mod engine;

pub use cursor::{ClusterScanCursor, FINISHED_CURSOR, INITIAL_CURSOR};
pub use engine::{ObjectType, ScanOptions, cluster_scan, parse_scan_reply, scan_command};
