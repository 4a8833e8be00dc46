use crate::virtual_machine::isa::Condition;
use crate::virtual_machine::operand::SizeCode;
use rand_core::RngCore;

pub const RAX: u8 = 0;
pub const RBX: u8 = 1;
pub const RCX: u8 = 2;
pub const RDX: u8 = 3;
pub const RSI: u8 = 4;
pub const RDI: u8 = 5;
pub const RBP: u8 = 6;
pub const RSP: u8 = 7;
pub const R8: u8 = 8;
pub const R15: u8 = 15;

pub const REGISTER_COUNT: usize = 16;

/// General-purpose register file.
///
/// Sub-width writes follow x86-64: a 64-bit write replaces the register, a
/// 32-bit write zero-extends into the upper half, and 16- and 8-bit writes
/// merge into the low bits leaving the rest untouched. Register indices are
/// taken modulo 16, which is all a 4-bit operand field can express anyway.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Registers {
    regs: [u64; REGISTER_COUNT],
}

impl Registers {
    pub fn new() -> Self {
        Self::default()
    }

    /// A register file filled with random bit patterns.
    pub fn randomized<R: RngCore>(rng: &mut R) -> Self {
        let mut regs = [0u64; REGISTER_COUNT];
        for reg in regs.iter_mut() {
            *reg = rng.next_u64();
        }
        Self { regs }
    }

    pub fn get(&self, reg: u8) -> u64 {
        self.regs[(reg & 0xF) as usize]
    }

    /// Reads the low `size` bits of `reg`.
    pub fn get_sized(&self, reg: u8, size: SizeCode) -> u64 {
        size.truncate(self.get(reg))
    }

    pub fn set(&mut self, reg: u8, value: u64) {
        self.regs[(reg & 0xF) as usize] = value;
    }

    /// Writes `value` through the `size`-bit view of `reg`.
    pub fn set_sized(&mut self, reg: u8, size: SizeCode, value: u64) {
        let slot = &mut self.regs[(reg & 0xF) as usize];
        *slot = match size {
            SizeCode::Qword => value,
            SizeCode::Dword => value & 0xFFFF_FFFF,
            SizeCode::Word | SizeCode::Byte => (*slot & !size.mask()) | (value & size.mask()),
        };
    }
}

/// The flags word, laid out at the x86 bit positions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Flags(u64);

impl Flags {
    pub const CF: u64 = 1 << 0;
    /// Reserved bit that always reads as one.
    pub const ALWAYS_ONE: u64 = 1 << 1;
    pub const PF: u64 = 1 << 2;
    pub const AF: u64 = 1 << 4;
    pub const ZF: u64 = 1 << 6;
    pub const SF: u64 = 1 << 7;
    pub const TF: u64 = 1 << 8;
    pub const IF: u64 = 1 << 9;
    pub const DF: u64 = 1 << 10;
    pub const OF: u64 = 1 << 11;

    /// Bits a program may restore with `POPF`.
    pub const PUBLIC_MASK: u64 =
        Self::CF | Self::PF | Self::AF | Self::ZF | Self::SF | Self::DF | Self::OF;

    pub const fn new() -> Self {
        Flags(Self::ALWAYS_ONE)
    }

    pub const fn bits(self) -> u64 {
        self.0
    }

    pub const fn get(self, flag: u64) -> bool {
        self.0 & flag != 0
    }

    pub fn set(&mut self, flag: u64, on: bool) {
        if on {
            self.0 |= flag;
        } else {
            self.0 &= !flag;
        }
    }

    /// Replaces the public bits with those of `value`; every other bit keeps
    /// its current state.
    pub fn restore_public(&mut self, value: u64) {
        self.0 = (self.0 & !Self::PUBLIC_MASK) | (value & Self::PUBLIC_MASK);
    }

    /// ZF, SF and PF from a `size`-wide result.
    fn set_result(&mut self, size: SizeCode, result: u64) {
        let result = size.truncate(result);
        self.set(Self::ZF, result == 0);
        self.set(Self::SF, size.is_negative(result));
        self.set(Self::PF, (result as u8).count_ones().is_multiple_of(2));
    }

    pub fn add(&mut self, size: SizeCode, a: u64, b: u64) -> u64 {
        let (a, b) = (size.truncate(a), size.truncate(b));
        let result = size.truncate(a.wrapping_add(b));
        self.set(Self::CF, result < a);
        self.set(Self::OF, size.is_negative((a ^ result) & (b ^ result)));
        self.set(Self::AF, (a ^ b ^ result) & 0x10 != 0);
        self.set_result(size, result);
        result
    }

    pub fn sub(&mut self, size: SizeCode, a: u64, b: u64) -> u64 {
        let (a, b) = (size.truncate(a), size.truncate(b));
        let result = size.truncate(a.wrapping_sub(b));
        self.set(Self::CF, a < b);
        self.set(Self::OF, size.is_negative((a ^ b) & (a ^ result)));
        self.set(Self::AF, (a ^ b ^ result) & 0x10 != 0);
        self.set_result(size, result);
        result
    }

    /// Flags of a bitwise operation: CF, OF and AF cleared.
    pub fn logic(&mut self, size: SizeCode, result: u64) -> u64 {
        self.set(Self::CF, false);
        self.set(Self::OF, false);
        self.set(Self::AF, false);
        self.set_result(size, result);
        size.truncate(result)
    }

    /// Truncated signed multiply; CF and OF report that the product did not fit.
    pub fn imul(&mut self, size: SizeCode, a: u64, b: u64) -> u64 {
        let full = (size.sign_extend(a) as i64 as i128) * (size.sign_extend(b) as i64 as i128);
        let result = size.truncate(full as u64);
        let overflow = size.sign_extend(result) as i64 as i128 != full;
        self.set(Self::CF, overflow);
        self.set(Self::OF, overflow);
        self.set(Self::AF, false);
        self.set_result(size, result);
        result
    }

    pub fn inc(&mut self, size: SizeCode, a: u64) -> u64 {
        let carry = self.get(Self::CF);
        let result = self.add(size, a, 1);
        self.set(Self::CF, carry);
        result
    }

    pub fn dec(&mut self, size: SizeCode, a: u64) -> u64 {
        let carry = self.get(Self::CF);
        let result = self.sub(size, a, 1);
        self.set(Self::CF, carry);
        result
    }

    pub fn neg(&mut self, size: SizeCode, a: u64) -> u64 {
        let result = self.sub(size, 0, a);
        self.set(Self::CF, size.truncate(a) != 0);
        result
    }

    pub fn condition(self, condition: Condition) -> bool {
        let cf = self.get(Self::CF);
        let zf = self.get(Self::ZF);
        let sf = self.get(Self::SF);
        let of = self.get(Self::OF);
        let pf = self.get(Self::PF);
        match condition {
            Condition::Overflow => of,
            Condition::NotOverflow => !of,
            Condition::Below => cf,
            Condition::AboveOrEqual => !cf,
            Condition::Equal => zf,
            Condition::NotEqual => !zf,
            Condition::BelowOrEqual => cf || zf,
            Condition::Above => !cf && !zf,
            Condition::Sign => sf,
            Condition::NotSign => !sf,
            Condition::Parity => pf,
            Condition::NotParity => !pf,
            Condition::Less => sf != of,
            Condition::GreaterOrEqual => sf == of,
            Condition::LessOrEqual => zf || sf != of,
            Condition::Greater => !zf && sf == of,
        }
    }
}

impl Default for Flags {
    fn default() -> Self {
        Self::new()
    }
}
