//! MOVED / ASK redirection parsing

use crate::cluster::NodeAddress;
use std::fmt;

/// Kind of redirection returned by a cluster node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectKind {
    /// Permanent slot reassignment; the slot map is updated
    Moved,
    /// One-shot hint during migration; the slot map is left alone and the
    /// retry must be preceded by `ASKING`
    Ask,
}

/// A parsed redirection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirect {
    pub kind: RedirectKind,
    pub slot: u16,
    pub address: NodeAddress,
}

impl fmt::Display for Redirect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            RedirectKind::Moved => "MOVED",
            RedirectKind::Ask => "ASK",
        };
        write!(f, "{} {} {}", kind, self.slot, self.address)
    }
}

/// Parse an error reply (without the leading `-`) into a redirection.
///
/// Format: `MOVED <slot> <host>:<port>` / `ASK <slot> <host>:<port>`. Servers
/// may omit the host (`:7001`) meaning "same host as the replying node".
pub fn parse_redirect(message: &str, replied_by: &NodeAddress) -> Option<Redirect> {
    let mut parts = message.split_whitespace();
    let kind = match parts.next()? {
        "MOVED" => RedirectKind::Moved,
        "ASK" => RedirectKind::Ask,
        _ => return None,
    };
    let slot: u16 = parts.next()?.parse().ok()?;
    let target = parts.next()?;

    let mut address: NodeAddress = target.parse().ok()?;
    if address.host.is_empty() || address.host == "?" {
        address.host = replied_by.host.clone();
    }

    Some(Redirect {
        kind,
        slot,
        address,
    })
}
