//! Integer, control-flow, stack and system instruction handlers.

use super::Processor;
use super::decode::{Binary, Location};
use super::registers::{Flags, RAX, RCX};
use crate::virtual_machine::errors::ErrorCode;
use crate::virtual_machine::isa::{Condition, FlagOp, LoopKind};
use crate::virtual_machine::operand::{OperandByte, SizeCode};

type BinaryFn = fn(&mut Flags, SizeCode, u64, u64) -> u64;
type UnaryFn = fn(&mut Flags, SizeCode, u64) -> u64;

impl Processor {
    /// Shared body of the binary ALU ops. `write_back` is false for CMP and TEST.
    fn alu(&mut self, op: BinaryFn, write_back: bool) -> Result<(), ErrorCode> {
        let Binary { size, dst, src } = self.decode_binary()?;
        let current = self.load(dst, size)?;
        let result = op(&mut self.flags, size, current, src);
        if write_back {
            self.store(dst, size, result)?;
        }
        Ok(())
    }

    fn unary(&mut self, op: UnaryFn) -> Result<(), ErrorCode> {
        let (size, location) = self.decode_unary()?;
        let value = self.load(location, size)?;
        let result = op(&mut self.flags, size, value);
        self.store(location, size, result)
    }

    // ==================== System ====================

    pub(super) fn op_nop(&mut self) -> Result<(), ErrorCode> {
        Ok(())
    }

    pub(super) fn op_hlt(&mut self) -> Result<(), ErrorCode> {
        Err(ErrorCode::Abort)
    }

    pub(super) fn op_syscall(&mut self) -> Result<(), ErrorCode> {
        let number = self.registers.get(RAX);
        let handler = self
            .syscalls
            .get(number)
            .ok_or(ErrorCode::UnhandledSyscall)?;
        handler(self)
    }

    // ==================== Data movement ====================

    pub(super) fn op_lea(&mut self) -> Result<(), ErrorCode> {
        let op = OperandByte::decode(self.fetch_u8()?);
        if op.size == SizeCode::Byte {
            return Err(ErrorCode::UndefinedBehavior);
        }
        let address = self.fetch_address()?;
        self.registers.set_sized(op.reg, op.size, address);
        Ok(())
    }

    pub(super) fn op_mov(&mut self) -> Result<(), ErrorCode> {
        let Binary { size, dst, src } = self.decode_binary()?;
        self.store(dst, size, src)
    }

    pub(super) fn op_xchg(&mut self) -> Result<(), ErrorCode> {
        let op = OperandByte::decode(self.fetch_u8()?);
        let other = if op.mode & 1 == 0 {
            Location::Register(self.fetch_u8()? & 0xF)
        } else {
            Location::Memory(self.fetch_address()?)
        };
        let mine = self.registers.get_sized(op.reg, op.size);
        let theirs = self.load(other, op.size)?;
        self.store(other, op.size, mine)?;
        self.registers.set_sized(op.reg, op.size, theirs);
        Ok(())
    }

    // ==================== ALU ====================

    pub(super) fn op_add(&mut self) -> Result<(), ErrorCode> {
        self.alu(Flags::add, true)
    }

    pub(super) fn op_sub(&mut self) -> Result<(), ErrorCode> {
        self.alu(Flags::sub, true)
    }

    pub(super) fn op_and(&mut self) -> Result<(), ErrorCode> {
        self.alu(|flags, size, a, b| flags.logic(size, a & b), true)
    }

    pub(super) fn op_or(&mut self) -> Result<(), ErrorCode> {
        self.alu(|flags, size, a, b| flags.logic(size, a | b), true)
    }

    pub(super) fn op_xor(&mut self) -> Result<(), ErrorCode> {
        self.alu(|flags, size, a, b| flags.logic(size, a ^ b), true)
    }

    pub(super) fn op_cmp(&mut self) -> Result<(), ErrorCode> {
        self.alu(Flags::sub, false)
    }

    pub(super) fn op_test(&mut self) -> Result<(), ErrorCode> {
        self.alu(|flags, size, a, b| flags.logic(size, a & b), false)
    }

    pub(super) fn op_imul(&mut self) -> Result<(), ErrorCode> {
        self.alu(Flags::imul, true)
    }

    pub(super) fn op_inc(&mut self) -> Result<(), ErrorCode> {
        self.unary(Flags::inc)
    }

    pub(super) fn op_dec(&mut self) -> Result<(), ErrorCode> {
        self.unary(Flags::dec)
    }

    pub(super) fn op_neg(&mut self) -> Result<(), ErrorCode> {
        self.unary(Flags::neg)
    }

    pub(super) fn op_not(&mut self) -> Result<(), ErrorCode> {
        self.unary(|_, size, value| size.truncate(!value))
    }

    // ==================== Control flow ====================

    pub(super) fn op_jmp(&mut self) -> Result<(), ErrorCode> {
        let (_, target) = self.decode_target()?;
        self.rip = target;
        Ok(())
    }

    pub(super) fn op_jcc(&mut self) -> Result<(), ErrorCode> {
        let condition = Condition::try_from(self.fetch_u8()?)?;
        let (_, target) = self.decode_target()?;
        if self.flags.condition(condition) {
            self.rip = target;
        }
        Ok(())
    }

    /// Decrements the `ss`-wide view of RCX and jumps while it is non-zero
    /// (and, for LOOPE/LOOPNE, while ZF matches).
    pub(super) fn op_loopcc(&mut self) -> Result<(), ErrorCode> {
        let settings = self.fetch_u8()?;
        let size = SizeCode::from_bits(settings >> 2);
        if size == SizeCode::Byte {
            return Err(ErrorCode::UndefinedBehavior);
        }
        let kind = LoopKind::try_from(settings & 3)?;
        let (_, target) = self.decode_target()?;

        let count = size.truncate(self.registers.get(RCX).wrapping_sub(1));
        self.registers.set_sized(RCX, size, count);
        let zf = self.flags.get(Flags::ZF);
        let taken = count != 0
            && match kind {
                LoopKind::Loop => true,
                LoopKind::WhileEqual => zf,
                LoopKind::WhileNotEqual => !zf,
            };
        if taken {
            self.rip = target;
        }
        Ok(())
    }

    /// The target is decoded before the return address is taken, so the
    /// pushed address is the byte after the whole instruction.
    pub(super) fn op_call(&mut self) -> Result<(), ErrorCode> {
        let (_, target) = self.decode_target()?;
        self.push(self.rip, SizeCode::Qword)?;
        self.rip = target;
        Ok(())
    }

    pub(super) fn op_ret(&mut self) -> Result<(), ErrorCode> {
        self.rip = self.pop(SizeCode::Qword)?;
        Ok(())
    }

    // ==================== Stack ====================

    pub(super) fn op_push(&mut self) -> Result<(), ErrorCode> {
        let (size, value) = self.decode_target()?;
        self.push(value, size)
    }

    pub(super) fn op_pop(&mut self) -> Result<(), ErrorCode> {
        let op = OperandByte::decode(self.fetch_u8()?);
        if op.size == SizeCode::Byte {
            return Err(ErrorCode::UndefinedBehavior);
        }
        let dst = match op.mode {
            0 => Location::Register(op.reg),
            2 => Location::Memory(self.fetch_address()?),
            _ => return Err(ErrorCode::UndefinedBehavior),
        };
        let value = self.pop(op.size)?;
        self.store(dst, op.size, value)
    }

    pub(super) fn op_pushf(&mut self) -> Result<(), ErrorCode> {
        self.push(self.flags.bits(), SizeCode::Qword)
    }

    pub(super) fn op_popf(&mut self) -> Result<(), ErrorCode> {
        let value = self.pop(SizeCode::Qword)?;
        self.flags.restore_public(value);
        Ok(())
    }

    pub(super) fn op_flagop(&mut self) -> Result<(), ErrorCode> {
        match FlagOp::try_from(self.fetch_u8()?)? {
            FlagOp::Clc => self.flags.set(Flags::CF, false),
            FlagOp::Stc => self.flags.set(Flags::CF, true),
            FlagOp::Cmc => self.flags.set(Flags::CF, !self.flags.get(Flags::CF)),
            FlagOp::Cld => self.flags.set(Flags::DF, false),
            FlagOp::Std => self.flags.set(Flags::DF, true),
        }
        Ok(())
    }
}
