//! Wire bridge between the parent runner and a forked worker.
//!
//! - **codec**: length-delimited JSON framing over any byte stream
//! - **protocol**: the event and command types carried in those frames

pub mod codec;
pub mod protocol;
