//! Shared serialization primitives.

pub mod encoding;
