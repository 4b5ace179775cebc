//! Command routing

pub mod route;
pub mod router;

pub use route::{Keys, RoutingDirective, extract_keys, is_read_only};
pub use router::{MAX_REDIRECTIONS, NodeResults, RoutedReply, Router};
