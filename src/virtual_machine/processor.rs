//! The virtual processor.
//!
//! A [`Processor`] owns one sandboxed process: its address space, registers,
//! FPU stack and descriptor table. A driver boots it with
//! [`initialize`](Processor::initialize), then calls [`tick`](Processor::tick)
//! until it returns false:
//!
//! ```ignore
//! let mut cpu = Processor::new(ProcessorConfig::default());
//! cpu.initialize(&exe, &["prog", "arg"], 1 << 20)?;
//! while cpu.tick() {}
//! match cpu.error() {
//!     None => println!("exited with {}", cpu.return_value()),
//!     Some(code) => println!("faulted: {code}"),
//! }
//! ```
//!
//! A tick that returns false while [`suspended_read`](Processor::suspended_read)
//! is set means the process is blocked on an interactive descriptor; feed it
//! and call [`resume_suspended_read`](Processor::resume_suspended_read).

mod bootstrap;
mod decode;
pub mod fpu;
pub mod memory;
mod ops;
pub mod registers;
mod x87;

use crate::virtual_machine::errors::ErrorCode;
use crate::virtual_machine::fd::FdTable;
use crate::virtual_machine::isa::OpCode;
use crate::virtual_machine::operand::SizeCode;
use crate::virtual_machine::syscall::SyscallTable;
use crate::warn;
use fpu::Fpu;
use memory::Memory;
use registers::{Flags, RSP, Registers};

/// Host-side limits and capabilities of a processor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProcessorConfig {
    /// Allows open, move, remove, mkdir and rmdir.
    pub fs_enabled: bool,
    /// Largest address space `initialize` will allocate, in bytes.
    pub max_memory: u64,
    /// Seed for the uninitialised memory and register fill. `None` draws a
    /// fresh seed from the OS.
    pub seed: Option<u64>,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            fs_enabled: false,
            max_memory: u32::MAX as u64,
            seed: None,
        }
    }
}

/// One virtual process: its address space, registers, FPU and descriptors.
pub struct Processor {
    memory: Memory,
    registers: Registers,
    rip: u64,
    flags: Flags,
    fpu: Fpu,
    fds: FdTable,
    syscalls: SyscallTable,
    config: ProcessorConfig,
    running: bool,
    suspended_read: bool,
    error: Option<ErrorCode>,
    return_value: i32,
}

macro_rules! define_dispatch {
    (
        $(
            $(#[$doc:meta])*
            $name:ident = $opcode:expr, $mnemonic:literal => $handler:ident
        ),* $(,)?
    ) => {
        /// Runs the handler of `opcode`; the opcode byte has already been consumed.
        fn dispatch(&mut self, opcode: OpCode) -> Result<(), ErrorCode> {
            match opcode {
                $( OpCode::$name => self.$handler(), )*
            }
        }
    };
}

impl Processor {
    crate::for_each_instruction!(define_dispatch);
}

impl Processor {
    /// A processor with no process loaded and the standard syscall table.
    pub fn new(config: ProcessorConfig) -> Self {
        Self {
            memory: Memory::empty(),
            registers: Registers::new(),
            rip: 0,
            flags: Flags::new(),
            fpu: Fpu::new(),
            fds: FdTable::new(),
            syscalls: SyscallTable::standard(),
            config,
            running: false,
            suspended_read: false,
            error: None,
            return_value: 0,
        }
    }

    /// Replaces the syscall table.
    pub fn with_syscalls(mut self, syscalls: SyscallTable) -> Self {
        self.syscalls = syscalls;
        self
    }

    pub fn running(&self) -> bool {
        self.running
    }

    pub fn suspended_read(&self) -> bool {
        self.suspended_read
    }

    /// The fault that ended the process, if any.
    pub fn error(&self) -> Option<ErrorCode> {
        self.error
    }

    pub fn return_value(&self) -> i32 {
        self.return_value
    }

    pub fn rip(&self) -> u64 {
        self.rip
    }

    pub fn set_rip(&mut self, rip: u64) {
        self.rip = rip;
    }

    pub fn registers(&self) -> &Registers {
        &self.registers
    }

    pub fn registers_mut(&mut self) -> &mut Registers {
        &mut self.registers
    }

    pub fn flags(&self) -> Flags {
        self.flags
    }

    pub fn fpu(&self) -> &Fpu {
        &self.fpu
    }

    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut Memory {
        &mut self.memory
    }

    pub fn fds(&self) -> &FdTable {
        &self.fds
    }

    pub fn fds_mut(&mut self) -> &mut FdTable {
        &mut self.fds
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    pub fn syscalls(&self) -> &SyscallTable {
        &self.syscalls
    }

    /// Disjoint borrows of the address space and descriptor table, for
    /// syscalls that move bytes between the two.
    pub fn io_parts(&mut self) -> (&mut Memory, &mut FdTable) {
        (&mut self.memory, &mut self.fds)
    }

    /// Executes one instruction.
    ///
    /// Returns false without touching any state when the process is stopped
    /// or suspended. Otherwise returns whether the instruction completed; a
    /// failed instruction has always terminated the process. An instruction
    /// that ends the process normally (the `exit` syscall) still reports true.
    pub fn tick(&mut self) -> bool {
        if !self.running || self.suspended_read {
            return false;
        }
        match self.step() {
            Ok(()) => true,
            Err(code) => {
                self.terminate(code);
                false
            }
        }
    }

    fn step(&mut self) -> Result<(), ErrorCode> {
        if self.rip >= self.memory.exe_barrier() {
            return Err(ErrorCode::AccessViolation);
        }
        let opcode = OpCode::try_from(self.fetch_u8()?)?;
        self.dispatch(opcode)
    }

    /// Ticks until the process stops or suspends. Returns the number of
    /// completed instructions.
    pub fn run(&mut self) -> u64 {
        let mut ticks = 0;
        while self.tick() {
            ticks += 1;
        }
        ticks
    }

    pub fn resume_suspended_read(&mut self) {
        self.suspended_read = false;
    }

    /// Rewinds RIP onto the one-byte `SYSCALL` opcode and blocks the process.
    pub(crate) fn suspend_read(&mut self) {
        self.rip = self.rip.wrapping_sub(1);
        self.suspended_read = true;
    }

    /// Ends the process with a fault.
    pub fn terminate(&mut self, error: ErrorCode) {
        if self.running {
            warn!("process terminated at rip {:#x}: {}", self.rip, error);
        }
        self.stop(Some(error), 0);
    }

    /// Ends the process normally with `return_value`.
    pub fn exit(&mut self, return_value: i32) {
        self.stop(None, return_value);
    }

    /// The first stop wins; every stop closes all descriptors.
    fn stop(&mut self, error: Option<ErrorCode>, return_value: i32) {
        if self.running {
            self.running = false;
            self.suspended_read = false;
            self.error = error;
            self.return_value = return_value;
        }
        self.fds.close_all();
    }

    /// Pushes the low `size` bytes of `value`.
    ///
    /// The new stack pointer may sit exactly on the stack barrier but not
    /// below it.
    pub fn push(&mut self, value: u64, size: SizeCode) -> Result<(), ErrorCode> {
        let rsp = self
            .registers
            .get(RSP)
            .checked_sub(size.bytes())
            .filter(|&rsp| rsp >= self.memory.stack_barrier())
            .ok_or(ErrorCode::StackOverflow)?;
        self.memory.write(rsp, size, value)?;
        self.registers.set(RSP, rsp);
        Ok(())
    }

    pub fn pop(&mut self, size: SizeCode) -> Result<u64, ErrorCode> {
        let rsp = self.registers.get(RSP);
        if rsp < self.memory.stack_barrier() {
            return Err(ErrorCode::StackOverflow);
        }
        let value = self.memory.read(rsp, size)?;
        self.registers.set(RSP, rsp + size.bytes());
        Ok(value)
    }
}
