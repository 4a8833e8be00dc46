//! Instruction-stream fetching and operand decoding.
//!
//! Every fetch reads at RIP and advances it. Decoders fetch all of an
//! instruction's bytes before touching registers or memory, so a truncated
//! instruction faults with `OutOfBounds` without side effects.

use super::Processor;
use crate::virtual_machine::errors::ErrorCode;
use crate::virtual_machine::operand::{AddressSettings, ImmPrefix, OperandByte, SizeCode, register_pair};

/// Where an operand lives.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(super) enum Location {
    Register(u8),
    Memory(u64),
}

/// Decoded binary-format operands: `dst op= src`.
pub(super) struct Binary {
    pub size: SizeCode,
    pub dst: Location,
    pub src: u64,
}

impl Processor {
    pub(super) fn fetch(&mut self, size: SizeCode) -> Result<u64, ErrorCode> {
        let value = self.memory.read(self.rip, size)?;
        self.rip = self.rip.wrapping_add(size.bytes());
        Ok(value)
    }

    pub(super) fn fetch_u8(&mut self) -> Result<u8, ErrorCode> {
        Ok(self.fetch(SizeCode::Byte)? as u8)
    }

    /// Compact immediate: prefix byte, then a body of the prefix's width.
    pub(super) fn fetch_imm(&mut self) -> Result<u64, ErrorCode> {
        let prefix = ImmPrefix::decode(self.fetch_u8()?);
        let raw = self.fetch(prefix.size)?;
        Ok(prefix.widen(raw))
    }

    /// Address operand: settings, optional register byte, optional displacement.
    ///
    /// Registers are only read once every byte has been fetched. The sum wraps
    /// and is truncated to the address size.
    pub(super) fn fetch_address(&mut self) -> Result<u64, ErrorCode> {
        let settings = AddressSettings::decode(self.fetch_u8()?);
        if settings.size == SizeCode::Byte {
            return Err(ErrorCode::UndefinedBehavior);
        }
        let regs = if settings.has_register_byte() {
            Some(register_pair(self.fetch_u8()?))
        } else {
            None
        };
        let mut address = if settings.has_imm { self.fetch_imm()? } else { 0 };

        if let Some((base, index)) = regs {
            if settings.has_base {
                let base = self.registers.get_sized(base, settings.size);
                address = address.wrapping_add(base << settings.scale);
            }
            if settings.has_index {
                address = address.wrapping_add(self.registers.get_sized(index, settings.size));
            }
        }
        Ok(settings.size.truncate(address))
    }

    pub(super) fn load(&self, location: Location, size: SizeCode) -> Result<u64, ErrorCode> {
        match location {
            Location::Register(reg) => Ok(self.registers.get_sized(reg, size)),
            Location::Memory(addr) => self.memory.read(addr, size),
        }
    }

    pub(super) fn store(&mut self, location: Location, size: SizeCode, value: u64) -> Result<(), ErrorCode> {
        match location {
            Location::Register(reg) => {
                self.registers.set_sized(reg, size, value);
                Ok(())
            }
            Location::Memory(addr) => self.memory.write(addr, size, value),
        }
    }

    /// `[rrrr ss mm]`: 0 reg ← reg, 1 reg ← imm, 2 reg ← mem, 3 mem ← reg.
    pub(super) fn decode_binary(&mut self) -> Result<Binary, ErrorCode> {
        let op = OperandByte::decode(self.fetch_u8()?);
        let size = op.size;
        let (dst, src) = match op.mode {
            0 => {
                let src = self.fetch_u8()? & 0xF;
                (Location::Register(op.reg), self.registers.get_sized(src, size))
            }
            1 => (Location::Register(op.reg), size.truncate(self.fetch_imm()?)),
            2 => {
                let addr = self.fetch_address()?;
                (Location::Register(op.reg), self.memory.read(addr, size)?)
            }
            _ => {
                let addr = self.fetch_address()?;
                (Location::Memory(addr), self.registers.get_sized(op.reg, size))
            }
        };
        Ok(Binary { size, dst, src })
    }

    /// `[rrrr ss .m]`: 0 register, 1 memory.
    pub(super) fn decode_unary(&mut self) -> Result<(SizeCode, Location), ErrorCode> {
        let op = OperandByte::decode(self.fetch_u8()?);
        let location = if op.mode & 1 == 0 {
            Location::Register(op.reg)
        } else {
            Location::Memory(self.fetch_address()?)
        };
        Ok((op.size, location))
    }

    /// `[rrrr ss mm]` value source for jumps, calls and pushes: 0 register,
    /// 1 immediate, 2 memory. 8-bit values and mode 3 are illegal.
    pub(super) fn decode_target(&mut self) -> Result<(SizeCode, u64), ErrorCode> {
        let op = OperandByte::decode(self.fetch_u8()?);
        if op.size == SizeCode::Byte {
            return Err(ErrorCode::UndefinedBehavior);
        }
        let value = match op.mode {
            0 => self.registers.get_sized(op.reg, op.size),
            1 => op.size.truncate(self.fetch_imm()?),
            2 => {
                let addr = self.fetch_address()?;
                self.memory.read(addr, op.size)?
            }
            _ => return Err(ErrorCode::UndefinedBehavior),
        };
        Ok((op.size, value))
    }
}
