//! Protected address space.
//!
//! One contiguous byte buffer guarded by three barriers,
//! `exe <= readonly <= stack <= len`:
//!
//! - fetching an instruction at or above `exe` is an access violation (checked
//!   by the processor before each tick)
//! - writing below `readonly` is an access violation
//! - the stack pointer may not move below `stack`
//!
//! Multi-byte values are little-endian.

use crate::virtual_machine::errors::ErrorCode;
use crate::virtual_machine::operand::SizeCode;
use std::ops::Range;

pub struct Memory {
    bytes: Vec<u8>,
    exe_barrier: u64,
    readonly_barrier: u64,
    stack_barrier: u64,
}

impl Memory {
    /// An empty address space with all barriers at zero.
    pub fn empty() -> Self {
        Self {
            bytes: Vec::new(),
            exe_barrier: 0,
            readonly_barrier: 0,
            stack_barrier: 0,
        }
    }

    pub(crate) fn new(bytes: Vec<u8>, exe_barrier: u64, readonly_barrier: u64, stack_barrier: u64) -> Self {
        debug_assert!(
            exe_barrier <= readonly_barrier
                && readonly_barrier <= stack_barrier
                && stack_barrier <= bytes.len() as u64
        );
        Self {
            bytes,
            exe_barrier,
            readonly_barrier,
            stack_barrier,
        }
    }

    pub fn len(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn exe_barrier(&self) -> u64 {
        self.exe_barrier
    }

    pub fn readonly_barrier(&self) -> u64 {
        self.readonly_barrier
    }

    pub fn stack_barrier(&self) -> u64 {
        self.stack_barrier
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Validates `[pos, pos + len)` against the buffer.
    fn range(&self, pos: u64, len: u64) -> Result<Range<usize>, ErrorCode> {
        let end = pos.checked_add(len).ok_or(ErrorCode::OutOfBounds)?;
        if end > self.len() {
            return Err(ErrorCode::OutOfBounds);
        }
        Ok(pos as usize..end as usize)
    }

    /// Reads a `size`-wide little-endian value at `pos`.
    pub fn read(&self, pos: u64, size: SizeCode) -> Result<u64, ErrorCode> {
        let range = self.range(pos, size.bytes())?;
        let mut raw = [0u8; 8];
        raw[..range.len()].copy_from_slice(&self.bytes[range]);
        Ok(u64::from_le_bytes(raw))
    }

    /// Writes the low `size` bytes of `value` at `pos`.
    ///
    /// The readonly check comes first: a write below the readonly barrier is an
    /// `AccessViolation` even when it is also out of bounds.
    pub fn write(&mut self, pos: u64, size: SizeCode, value: u64) -> Result<(), ErrorCode> {
        let range = self.writable(pos, size.bytes())?;
        let len = range.len();
        self.bytes[range].copy_from_slice(&value.to_le_bytes()[..len]);
        Ok(())
    }

    fn writable(&self, pos: u64, len: u64) -> Result<Range<usize>, ErrorCode> {
        if pos < self.readonly_barrier {
            return Err(ErrorCode::AccessViolation);
        }
        self.range(pos, len)
    }

    pub fn read_bytes(&self, pos: u64, len: u64) -> Result<&[u8], ErrorCode> {
        let range = self.range(pos, len)?;
        Ok(&self.bytes[range])
    }

    /// Borrows `[pos, pos + len)` for writing, with the same checks as [`write`](Self::write).
    pub fn writable_bytes(&mut self, pos: u64, len: u64) -> Result<&mut [u8], ErrorCode> {
        let range = self.writable(pos, len)?;
        Ok(&mut self.bytes[range])
    }

    pub fn write_bytes(&mut self, pos: u64, data: &[u8]) -> Result<(), ErrorCode> {
        self.writable_bytes(pos, data.len() as u64)?
            .copy_from_slice(data);
        Ok(())
    }

    /// Reads the NUL-terminated byte string at `pos`, without the terminator.
    pub fn read_cstring_bytes(&self, pos: u64) -> Result<&[u8], ErrorCode> {
        let tail = self
            .bytes
            .get(pos as usize..)
            .filter(|_| pos <= self.len())
            .ok_or(ErrorCode::OutOfBounds)?;
        let end = tail
            .iter()
            .position(|&b| b == 0)
            .ok_or(ErrorCode::OutOfBounds)?;
        Ok(&tail[..end])
    }

    /// Reads the NUL-terminated string at `pos`. Invalid UTF-8 is replaced.
    pub fn read_cstring(&self, pos: u64) -> Result<String, ErrorCode> {
        Ok(String::from_utf8_lossy(self.read_cstring_bytes(pos)?).into_owned())
    }

    /// Writes `text` followed by a NUL terminator at `pos`.
    pub fn write_cstring(&mut self, pos: u64, text: &str) -> Result<(), ErrorCode> {
        let slot = self.writable_bytes(pos, text.len() as u64 + 1)?;
        let (body, terminator) = slot.split_at_mut(text.len());
        body.copy_from_slice(text.as_bytes());
        terminator[0] = 0;
        Ok(())
    }
}

impl Default for Memory {
    fn default() -> Self {
        Self::empty()
    }
}
