//! Test-only instruction encoder.
//!
//! [`CodeBuilder`] emits the byte encodings of the processor's instruction set
//! so tests can write programs without hand-assembling bytes. Jump, call and
//! loop targets are always encoded as 64-bit immediates, which gives every
//! control-flow instruction a fixed length; build a throwaway prefix and take
//! its [`len`](CodeBuilder::len) to find a forward label.

use crate::virtual_machine::isa::{Condition, LoopKind, OpCode};
use crate::virtual_machine::operand::{AddressSettings, ImmPrefix, OperandByte, SizeCode};
use crate::virtual_machine::processor::registers::{RAX, RBX};
use crate::virtual_machine::syscall::SYS_EXIT;

/// A memory operand: `disp + (base << scale) + index`, computed at `size`.
#[derive(Clone, Copy, Debug)]
pub struct Addr {
    pub size: SizeCode,
    pub base: Option<u8>,
    pub scale: u8,
    pub index: Option<u8>,
    pub disp: Option<u64>,
}

impl Addr {
    /// A 64-bit absolute address.
    pub fn abs(addr: u64) -> Self {
        Self {
            size: SizeCode::Qword,
            base: None,
            scale: 0,
            index: None,
            disp: Some(addr),
        }
    }

    /// `[reg]`
    pub fn reg(base: u8) -> Self {
        Self {
            size: SizeCode::Qword,
            base: Some(base),
            scale: 0,
            index: None,
            disp: None,
        }
    }

    pub fn scale(mut self, scale: u8) -> Self {
        self.scale = scale;
        self
    }

    pub fn index(mut self, index: u8) -> Self {
        self.index = Some(index);
        self
    }

    pub fn disp(mut self, disp: u64) -> Self {
        self.disp = Some(disp);
        self
    }

    pub fn size(mut self, size: SizeCode) -> Self {
        self.size = size;
        self
    }
}

#[derive(Default)]
pub struct CodeBuilder {
    code: Vec<u8>,
}

impl CodeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> u64 {
        self.code.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    pub fn build(self) -> Vec<u8> {
        self.code
    }

    pub fn raw(mut self, bytes: &[u8]) -> Self {
        self.code.extend_from_slice(bytes);
        self
    }

    fn byte(mut self, byte: u8) -> Self {
        self.code.push(byte);
        self
    }

    fn op(self, op: OpCode) -> Self {
        self.byte(op as u8)
    }

    fn operand(self, reg: u8, size: SizeCode, mode: u8) -> Self {
        self.byte(OperandByte { reg, size, mode }.encode())
    }

    /// Zero-extended compact immediate.
    pub fn imm(mut self, size: SizeCode, value: u64) -> Self {
        self.code.push(ImmPrefix { size, sign_extend: false }.encode());
        self.code
            .extend_from_slice(&value.to_le_bytes()[..size.bytes() as usize]);
        self
    }

    /// Sign-extended compact immediate.
    pub fn simm(mut self, size: SizeCode, value: i64) -> Self {
        self.code.push(ImmPrefix { size, sign_extend: true }.encode());
        self.code
            .extend_from_slice(&value.to_le_bytes()[..size.bytes() as usize]);
        self
    }

    pub fn addr(self, addr: Addr) -> Self {
        let settings = AddressSettings {
            has_imm: addr.disp.is_some(),
            scale: addr.scale,
            size: addr.size,
            has_base: addr.base.is_some(),
            has_index: addr.index.is_some(),
        };
        let mut this = self.byte(settings.encode());
        if settings.has_register_byte() {
            this = this.byte(addr.base.unwrap_or(0) << 4 | addr.index.unwrap_or(0));
        }
        match addr.disp {
            Some(disp) => this.imm(addr.size, disp),
            None => this,
        }
    }

    // ==================== System / data movement ====================

    pub fn nop(self) -> Self {
        self.op(OpCode::Nop)
    }

    pub fn hlt(self) -> Self {
        self.op(OpCode::Hlt)
    }

    pub fn syscall(self) -> Self {
        self.op(OpCode::Syscall)
    }

    /// `mov rax, SYS_EXIT; mov rbx, code; syscall`
    pub fn exit(self, code: i32) -> Self {
        self.mov_ri(SizeCode::Qword, RAX, SYS_EXIT)
            .mov_ri(SizeCode::Qword, RBX, code as u32 as u64)
            .syscall()
    }

    pub fn binary_rr(self, op: OpCode, size: SizeCode, dst: u8, src: u8) -> Self {
        self.op(op).operand(dst, size, 0).byte(src & 0xF)
    }

    pub fn binary_ri(self, op: OpCode, size: SizeCode, dst: u8, value: u64) -> Self {
        self.op(op).operand(dst, size, 1).imm(size, value)
    }

    /// `dst op= imm` with a sign-extended immediate of width `imm`.
    pub fn binary_rs(self, op: OpCode, size: SizeCode, dst: u8, imm: SizeCode, value: i64) -> Self {
        self.op(op).operand(dst, size, 1).simm(imm, value)
    }

    pub fn binary_rm(self, op: OpCode, size: SizeCode, dst: u8, addr: Addr) -> Self {
        self.op(op).operand(dst, size, 2).addr(addr)
    }

    pub fn binary_mr(self, op: OpCode, size: SizeCode, addr: Addr, src: u8) -> Self {
        self.op(op).operand(src, size, 3).addr(addr)
    }

    pub fn mov_ri(self, size: SizeCode, dst: u8, value: u64) -> Self {
        self.binary_ri(OpCode::Mov, size, dst, value)
    }

    pub fn mov_rr(self, size: SizeCode, dst: u8, src: u8) -> Self {
        self.binary_rr(OpCode::Mov, size, dst, src)
    }

    pub fn unary_r(self, op: OpCode, size: SizeCode, reg: u8) -> Self {
        self.op(op).operand(reg, size, 0)
    }

    pub fn unary_m(self, op: OpCode, size: SizeCode, addr: Addr) -> Self {
        self.op(op).operand(0, size, 1).addr(addr)
    }

    pub fn lea(self, size: SizeCode, dst: u8, addr: Addr) -> Self {
        self.op(OpCode::Lea).operand(dst, size, 0).addr(addr)
    }

    pub fn xchg_rr(self, size: SizeCode, a: u8, b: u8) -> Self {
        self.op(OpCode::Xchg).operand(a, size, 0).byte(b & 0xF)
    }

    pub fn xchg_rm(self, size: SizeCode, reg: u8, addr: Addr) -> Self {
        self.op(OpCode::Xchg).operand(reg, size, 1).addr(addr)
    }

    // ==================== Control flow ====================

    fn target(self, target: u64) -> Self {
        self.operand(0, SizeCode::Qword, 1).imm(SizeCode::Qword, target)
    }

    pub fn jmp(self, target: u64) -> Self {
        self.op(OpCode::Jmp).target(target)
    }

    pub fn jmp_r(self, reg: u8) -> Self {
        self.op(OpCode::Jmp).operand(reg, SizeCode::Qword, 0)
    }

    pub fn jcc(self, condition: Condition, target: u64) -> Self {
        self.op(OpCode::Jcc).byte(condition as u8).target(target)
    }

    /// LOOP/LOOPE/LOOPNE on the full RCX.
    pub fn loopcc(self, kind: LoopKind, target: u64) -> Self {
        let kind = match kind {
            LoopKind::Loop => 0,
            LoopKind::WhileEqual => 1,
            LoopKind::WhileNotEqual => 2,
        };
        self.op(OpCode::LoopCc)
            .byte((SizeCode::Qword as u8) << 2 | kind)
            .target(target)
    }

    pub fn call(self, target: u64) -> Self {
        self.op(OpCode::Call).target(target)
    }

    pub fn ret(self) -> Self {
        self.op(OpCode::Ret)
    }

    // ==================== Stack ====================

    pub fn push_r(self, size: SizeCode, reg: u8) -> Self {
        self.op(OpCode::Push).operand(reg, size, 0)
    }

    pub fn push_imm(self, size: SizeCode, value: u64) -> Self {
        self.op(OpCode::Push).operand(0, size, 1).imm(size, value)
    }

    pub fn push_m(self, size: SizeCode, addr: Addr) -> Self {
        self.op(OpCode::Push).operand(0, size, 2).addr(addr)
    }

    pub fn pop_r(self, size: SizeCode, reg: u8) -> Self {
        self.op(OpCode::Pop).operand(reg, size, 0)
    }

    pub fn pop_m(self, size: SizeCode, addr: Addr) -> Self {
        self.op(OpCode::Pop).operand(0, size, 2).addr(addr)
    }

    pub fn pushf(self) -> Self {
        self.op(OpCode::Pushf)
    }

    pub fn popf(self) -> Self {
        self.op(OpCode::Popf)
    }

    /// 0 CLC, 1 STC, 2 CMC, 3 CLD, 4 STD.
    pub fn flagop(self, op: u8) -> Self {
        self.op(OpCode::FlagOp).byte(op)
    }

    // ==================== x87 ====================

    pub fn finit(self) -> Self {
        self.op(OpCode::Finit)
    }

    pub fn fld_st(self, i: u8) -> Self {
        self.op(OpCode::Fld).byte(i & 7)
    }

    pub fn fld_m64(self, addr: Addr) -> Self {
        self.op(OpCode::Fld).byte(1 << 4).addr(addr)
    }

    pub fn fld_m32(self, addr: Addr) -> Self {
        self.op(OpCode::Fld).byte(2 << 4).addr(addr)
    }

    pub fn fld_int(self, addr: Addr) -> Self {
        self.op(OpCode::Fld).byte(3 << 4).addr(addr)
    }

    /// 0 one, 1 zero, 2 pi, 3 log2(10), 4 log2(e), 5 log10(2), 6 ln(2).
    pub fn fld_const(self, i: u8) -> Self {
        self.op(OpCode::Fld).byte(4 << 4 | (i & 7))
    }

    fn fst_settings(pop: bool, kind: u8, i: u8) -> u8 {
        (if pop { 0x80 } else { 0 }) | kind << 4 | (i & 7)
    }

    pub fn fst_st(self, i: u8, pop: bool) -> Self {
        self.op(OpCode::Fst).byte(Self::fst_settings(pop, 0, i))
    }

    pub fn fst_m64(self, addr: Addr, pop: bool) -> Self {
        self.op(OpCode::Fst)
            .byte(Self::fst_settings(pop, 1, 0))
            .addr(addr)
    }

    pub fn fst_m32(self, addr: Addr, pop: bool) -> Self {
        self.op(OpCode::Fst)
            .byte(Self::fst_settings(pop, 2, 0))
            .addr(addr)
    }

    pub fn fst_int(self, addr: Addr, pop: bool) -> Self {
        self.op(OpCode::Fst)
            .byte(Self::fst_settings(pop, 3, 0))
            .addr(addr)
    }

    pub fn fxch(self, i: u8) -> Self {
        self.op(OpCode::Fxch).byte(i & 7)
    }

    /// `op`: 0 add, 1 sub, 2 subr, 3 mul, 4 div, 5 divr. `form`: 0 ST0 ∘= ST(i),
    /// 1 ST(i) ∘= ST0, 2 as 1 then pop.
    pub fn farith(self, op: u8, form: u8, i: u8) -> Self {
        self.op(OpCode::Farith).byte(op << 5 | (form & 3) << 3 | (i & 7))
    }

    pub fn farith_m64(self, op: u8, addr: Addr) -> Self {
        self.op(OpCode::Farith).byte(op << 5 | 3 << 3).addr(addr)
    }

    /// 0 FABS, 1 FCHS, 2 FSQRT, 3 FSIN, 4 FCOS, 5 FRNDINT.
    pub fn funary(self, op: u8) -> Self {
        self.op(OpCode::Funary).byte(op)
    }

    pub fn fcomi(self, i: u8, pop: bool) -> Self {
        self.op(OpCode::Fcomi)
            .byte((if pop { 0x80 } else { 0 }) | (i & 7))
    }

    /// `kind`: 0 FINCSTP, 1 FDECSTP, 2 FFREE.
    pub fn fstack(self, kind: u8, i: u8) -> Self {
        self.op(OpCode::Fstack).byte(kind << 6 | (i & 7))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mov_immediate_encoding() {
        let code = CodeBuilder::new().mov_ri(SizeCode::Word, 3, 0xBEEF).build();
        assert_eq!(code, vec![OpCode::Mov as u8, 0x35, 0x01, 0xEF, 0xBE]);
    }

    #[test]
    fn address_encoding() {
        let code = CodeBuilder::new()
            .addr(Addr::reg(1).scale(2).index(4).disp(0x10).size(SizeCode::Dword))
            .build();
        assert_eq!(code, vec![0b1010_1011, 0x14, 0x02, 0x10, 0, 0, 0]);
    }

    #[test]
    fn control_flow_has_fixed_length() {
        assert_eq!(CodeBuilder::new().jmp(0).len(), 11);
        assert_eq!(CodeBuilder::new().jmp(u64::MAX).len(), 11);
        assert_eq!(CodeBuilder::new().jcc(Condition::Equal, 0).len(), 12);
        assert_eq!(CodeBuilder::new().loopcc(LoopKind::Loop, 0).len(), 12);
    }
}
