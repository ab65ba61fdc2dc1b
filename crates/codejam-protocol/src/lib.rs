//! Wire protocol shared by the Codejam server and its clients.

pub mod error;
pub mod mesh;
pub mod messages;
pub mod types;

pub use error::ProtocolError;
pub use messages::{ClientMessage, Limits, ServerMessage};
pub use types::*;
