//! Sandboxed virtual processor.
//!
//! Interprets an x86-64-flavoured byte code against a private, barrier
//! protected address space. One [`processor::Processor`] hosts exactly one
//! program at a time.
//!
//! # Architecture
//!
//! - **Registers**: 16 general-purpose 64-bit registers with 8/16/32-bit views,
//!   a flags word and RIP
//! - **Memory**: one buffer split by the exe, readonly and stack barriers
//! - **FPU**: an 8-slot x87-style circular stack of `f64`
//! - **I/O**: a 16-slot descriptor table reached through `SYSCALL`
//! - **Execution model**: one instruction per [`tick`](processor::Processor::tick);
//!   any fault terminates the process and is recorded
//!
//! # Modules
//!
//! - [`errors`]: fault codes and loader/bootstrap errors
//! - [`executable`]: the on-disk image format
//! - [`fd`]: descriptor table and host streams
//! - [`isa`]: opcode table and sub-operation enums
//! - [`operand`]: bit layouts of operand settings bytes
//! - [`processor`]: the engine
//! - [`syscall`]: syscall table and standard handlers

pub mod errors;
pub mod executable;
pub mod fd;
pub mod isa;
#[cfg(test)]
mod isa_static_check;
pub mod operand;
pub mod processor;
pub mod syscall;
