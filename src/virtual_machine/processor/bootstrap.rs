//! Process bootstrap.
//!
//! Address-space layout after [`Processor::initialize`]:
//!
//! ```text
//! 0          text   rodata   data   bss        stack reserve            len
//! |----------|------|--------|------|----------------------------------|
//!            ^ exe  ^ readonly      ^ stack                     RSP ... ^
//! ```
//!
//! With arguments, the top of the stack holds, from high to low: the argument
//! strings, padding to 8 bytes, the `argv` pointer array (argv order), then
//! `argv` and `argc` as two pushed qwords. RDI = argc and RSI = argv.

use super::Processor;
use super::fpu::Fpu;
use super::memory::Memory;
use super::registers::{Flags, RDI, RSI, RSP, Registers};
use crate::debug;
use crate::virtual_machine::errors::{BootstrapError, ErrorCode};
use crate::virtual_machine::executable::Executable;
use crate::virtual_machine::operand::SizeCode;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_core::{OsRng, RngCore};

/// Addresses of the argument block written by [`Processor::initialize`].
struct ArgumentLayout {
    /// Address of each string, in argument order.
    strings: Vec<u64>,
    /// Address of the pointer array.
    argv: u64,
    /// Final stack pointer, pointing at `argc`.
    rsp: u64,
}

impl ArgumentLayout {
    /// Lays out `args` below `top`; `None` if it would run below zero.
    fn plan(args: &[&str], top: u64) -> Option<Self> {
        let mut cursor = top;
        let mut strings = vec![0; args.len()];
        for (i, arg) in args.iter().enumerate().rev() {
            cursor = cursor.checked_sub(arg.len() as u64 + 1)?;
            strings[i] = cursor;
        }
        cursor &= !7;
        let argv = cursor.checked_sub(8 * args.len() as u64)?;
        let rsp = argv.checked_sub(16)?;
        Some(Self { strings, argv, rsp })
    }
}

impl Processor {
    /// Loads `exe` into a fresh address space and prepares it to run.
    ///
    /// On error the processor is left exactly as it was.
    pub fn initialize(&mut self, exe: &Executable, args: &[&str], stack_reserve: u64) -> Result<(), BootstrapError> {
        let content = exe.content();
        let stack_barrier = content.len() as u128 + exe.bss_len() as u128;
        let requested = stack_barrier + stack_reserve as u128;
        let limit = self.config.max_memory;
        let too_large = BootstrapError::AddressSpaceTooLarge { requested, limit };
        if requested > limit as u128 || requested > usize::MAX as u128 {
            return Err(too_large);
        }
        let len = requested as u64;
        let stack_barrier = stack_barrier as u64;

        let arguments_error = || BootstrapError::ArgumentsTooLarge {
            required: argument_bytes(args, len),
            available: stack_reserve,
        };
        let layout = if args.is_empty() {
            None
        } else {
            let layout = ArgumentLayout::plan(args, len)
                .filter(|layout| layout.rsp >= stack_barrier)
                .ok_or_else(arguments_error)?;
            Some(layout)
        };

        let seed = self.config.seed.unwrap_or_else(|| OsRng.next_u64());
        let mut rng = StdRng::seed_from_u64(seed);

        let mut bytes = Vec::new();
        bytes
            .try_reserve_exact(len as usize)
            .map_err(|_| too_large)?;
        bytes.resize(len as usize, 0);
        bytes[..content.len()].copy_from_slice(content);
        rng.fill_bytes(&mut bytes[stack_barrier as usize..]);

        let exe_barrier = exe.text_len();
        let readonly_barrier = exe.text_len() + exe.rodata_len();
        let mut memory = Memory::new(bytes, exe_barrier, readonly_barrier, stack_barrier);
        let mut registers = Registers::randomized(&mut rng);
        registers.set(RSP, len);

        match &layout {
            Some(layout) => {
                // The planned block lies entirely above the stack barrier.
                write_arguments(&mut memory, args, layout).map_err(|_| arguments_error())?;
                registers.set(RSP, layout.rsp);
                registers.set(RDI, args.len() as u64);
                registers.set(RSI, layout.argv);
            }
            None => {
                registers.set(RDI, 0);
                registers.set(RSI, 0);
            }
        }

        debug!(
            "initialized process: {} bytes (text {}, rodata {}, data {}, bss {}, stack {}), {} args, seed {}",
            len,
            exe.text_len(),
            exe.rodata_len(),
            exe.data_len(),
            exe.bss_len(),
            stack_reserve,
            args.len(),
            seed
        );

        self.memory = memory;
        self.registers = registers;
        self.rip = 0;
        self.flags = Flags::new();
        self.fpu = Fpu::new();
        self.running = true;
        self.suspended_read = false;
        self.error = None;
        self.return_value = 0;
        Ok(())
    }
}

/// Stack bytes the argument block needs when the stack top is at `top`.
fn argument_bytes(args: &[&str], top: u64) -> u64 {
    let strings: u64 = args.iter().map(|a| a.len() as u64 + 1).sum();
    let padding = top.wrapping_sub(strings) & 7;
    strings + padding + 8 * args.len() as u64 + 16
}

fn write_arguments(memory: &mut Memory, args: &[&str], layout: &ArgumentLayout) -> Result<(), ErrorCode> {
    for (arg, &pos) in args.iter().zip(&layout.strings) {
        memory.write_cstring(pos, arg)?;
    }
    for (i, &pos) in layout.strings.iter().enumerate() {
        memory.write(layout.argv + 8 * i as u64, SizeCode::Qword, pos)?;
    }
    memory.write(layout.rsp + 8, SizeCode::Qword, layout.argv)?;
    memory.write(layout.rsp, SizeCode::Qword, args.len() as u64)
}
