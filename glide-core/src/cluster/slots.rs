//! CLUSTER SLOTS reply parsing

use super::types::{NodeAddress, SlotRange};
use crate::error::{GlideError, Result};
use crate::protocol::Value;

/// Parse a `CLUSTER SLOTS` reply into slot ranges.
///
/// Each entry is `[start, end, [host, port, id, ...], [replica...], ...]`.
/// An empty or `?` host means the node is reachable on the host of the node
/// that answered the query.
pub fn parse_cluster_slots(reply: &Value, queried: &NodeAddress) -> Result<Vec<SlotRange>> {
    let entries = reply
        .as_array()
        .ok_or_else(|| GlideError::Protocol("CLUSTER SLOTS reply is not an array".to_string()))?;

    let mut ranges = Vec::with_capacity(entries.len());
    for entry in entries {
        let fields = entry.as_array().ok_or_else(|| {
            GlideError::Protocol("CLUSTER SLOTS entry is not an array".to_string())
        })?;
        if fields.len() < 3 {
            return Err(GlideError::Protocol(format!(
                "CLUSTER SLOTS entry has {} fields, expected at least 3",
                fields.len()
            )));
        }

        let start = parse_slot(&fields[0])?;
        let end = parse_slot(&fields[1])?;
        let primary = parse_node(&fields[2], queried)?;
        let replicas = fields[3..]
            .iter()
            .map(|node| parse_node(node, queried))
            .collect::<Result<Vec<_>>>()?;

        let range = SlotRange::new(start, end, primary, replicas);
        if !range.is_valid() {
            return Err(GlideError::Protocol(format!(
                "invalid slot range {}-{}",
                start, end
            )));
        }
        ranges.push(range);
    }

    ranges.sort_by_key(|r| r.start);
    Ok(ranges)
}

fn parse_slot(value: &Value) -> Result<u16> {
    value
        .as_i64()
        .and_then(|v| u16::try_from(v).ok())
        .ok_or_else(|| GlideError::Protocol(format!("invalid slot number: {:?}", value)))
}

fn parse_node(value: &Value, queried: &NodeAddress) -> Result<NodeAddress> {
    let fields = value
        .as_array()
        .ok_or_else(|| GlideError::Protocol("node entry is not an array".to_string()))?;
    if fields.len() < 2 {
        return Err(GlideError::Protocol(
            "node entry is missing host or port".to_string(),
        ));
    }

    let host = fields[0].as_str().unwrap_or_default();
    let port = fields[1]
        .as_i64()
        .and_then(|p| u16::try_from(p).ok())
        .ok_or_else(|| GlideError::Protocol(format!("invalid port: {:?}", fields[1])))?;

    let host = if host.is_empty() || host == "?" {
        queried.host.clone()
    } else {
        host.to_string()
    };
    Ok(NodeAddress::new(host, port))
}
