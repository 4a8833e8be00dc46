//! Sandboxed virtual processor.
//!
//! Interprets a compact x86-64 flavoured byte-code inside a protected address
//! space, with an x87-style floating-point stack and a small POSIX-like
//! syscall surface bridged to host streams.

pub mod types;
pub mod utils;
pub mod virtual_machine;
