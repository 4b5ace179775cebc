//! Request/response codec
//!
//! RESP2 encoding of commands, incremental reply decoding, typed reply
//! conversion and redirection parsing.

pub mod cmd;
pub mod codec;
pub mod redirect;
pub mod value;

pub use cmd::{Cmd, ToArg, cmd};
pub use redirect::{Redirect, RedirectKind, parse_redirect};
pub use value::{FromValue, Value};
