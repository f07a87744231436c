//! Test signal helpers for the encoder
//!
//! This crate generates deterministic 16-bit PCM used by the encoder's
//! integration tests and benchmarks, and writes encoded output for
//! inspection.

pub mod error;
pub mod signals;

pub use error::*;
pub use signals::*;
