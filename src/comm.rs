//! # Communications Library
//!
//! The control channel between the broker and the sandboxed process carries
//! length prefixed frames.  Each frame holds one JSON encoded message; one
//! request frame is always answered by exactly one response frame.

pub mod frame;
pub mod message;

mod rwutil;
