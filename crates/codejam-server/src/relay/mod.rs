//! Per-event relays. Each takes an authenticated participant and an
//! already-validated payload, checks routing, and hands the result to the
//! session registry. None of them block on persistence.

pub mod chat;
pub mod code;
pub mod cursor;
pub mod lifecycle;
pub mod persist;
pub mod signaling;

#[cfg(test)]
pub(crate) mod testing;
