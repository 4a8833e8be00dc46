//! x87 floating-point instruction handlers.
//!
//! Memory operands are raw IEEE-754 bit patterns (`m64`, `m32`) or
//! two's-complement integers (`m64int`), read and written through the same
//! little-endian memory primitives as everything else.

use super::Processor;
use super::registers::Flags;
use crate::virtual_machine::errors::ErrorCode;
use crate::virtual_machine::operand::SizeCode;
use std::f64::consts::{LN_2, LOG2_10, LOG2_E, LOG10_2, PI};

/// `FLD` constant table: FLD1, FLDZ, FLDPI, FLDL2T, FLDL2E, FLDLG2, FLDLN2.
const CONSTANTS: [f64; 7] = [1.0, 0.0, PI, LOG2_10, LOG2_E, LOG10_2, LN_2];

/// Rounds to nearest-even and converts; NaN and out-of-range values become the
/// integer indefinite value `i64::MIN`.
fn to_int64(value: f64) -> i64 {
    let rounded = value.round_ties_even();
    if rounded.is_nan() || rounded < i64::MIN as f64 || rounded >= 9_223_372_036_854_775_808.0 {
        i64::MIN
    } else {
        rounded as i64
    }
}

fn arith(op: u8, a: f64, b: f64) -> f64 {
    match op {
        0 => a + b,
        1 => a - b,
        2 => b - a,
        3 => a * b,
        4 => a / b,
        _ => b / a,
    }
}

impl Processor {
    fn read_f64(&self, addr: u64) -> Result<f64, ErrorCode> {
        Ok(f64::from_bits(self.memory.read(addr, SizeCode::Qword)?))
    }

    pub(super) fn op_finit(&mut self) -> Result<(), ErrorCode> {
        self.fpu.reset();
        Ok(())
    }

    /// `[kkkk .iii]`: 0 ST(i), 1 m64, 2 m32, 3 m64int, 4 constant i.
    pub(super) fn op_fld(&mut self) -> Result<(), ErrorCode> {
        let settings = self.fetch_u8()?;
        let i = settings & 7;
        let value = match settings >> 4 {
            0 => self.fpu.st(i)?,
            1 => {
                let addr = self.fetch_address()?;
                self.read_f64(addr)?
            }
            2 => {
                let addr = self.fetch_address()?;
                f32::from_bits(self.memory.read(addr, SizeCode::Dword)? as u32) as f64
            }
            3 => {
                let addr = self.fetch_address()?;
                self.memory.read(addr, SizeCode::Qword)? as i64 as f64
            }
            4 => *CONSTANTS
                .get(i as usize)
                .ok_or(ErrorCode::UndefinedBehavior)?,
            _ => return Err(ErrorCode::UndefinedBehavior),
        };
        self.fpu.push(value)
    }

    /// `[pkkk .iii]`: 0 ST(i), 1 m64, 2 m32, 3 m64int; `p` pops afterwards.
    pub(super) fn op_fst(&mut self) -> Result<(), ErrorCode> {
        let settings = self.fetch_u8()?;
        let pop = settings & 0x80 != 0;
        let i = settings & 7;
        let kind = (settings >> 4) & 7;
        let addr = match kind {
            0 => None,
            1..=3 => Some(self.fetch_address()?),
            _ => return Err(ErrorCode::UndefinedBehavior),
        };

        let value = self.fpu.st(0)?;
        match (kind, addr) {
            (1, Some(addr)) => self.memory.write(addr, SizeCode::Qword, value.to_bits())?,
            (2, Some(addr)) => {
                self.memory
                    .write(addr, SizeCode::Dword, (value as f32).to_bits() as u64)?
            }
            (3, Some(addr)) => {
                self.memory
                    .write(addr, SizeCode::Qword, to_int64(value) as u64)?
            }
            _ => self.fpu.store(i, value),
        }
        if pop {
            self.fpu.pop()?;
        }
        Ok(())
    }

    pub(super) fn op_fxch(&mut self) -> Result<(), ErrorCode> {
        let i = self.fetch_u8()? & 7;
        self.fpu.swap(i)
    }

    /// `[ooo ff iii]` with `o` add, sub, subr, mul, div, divr and `f`:
    /// 0 ST0 ∘= ST(i), 1 ST(i) ∘= ST0, 2 as 1 then pop, 3 ST0 ∘= m64.
    pub(super) fn op_farith(&mut self) -> Result<(), ErrorCode> {
        let settings = self.fetch_u8()?;
        let op = settings >> 5;
        if op > 5 {
            return Err(ErrorCode::UndefinedBehavior);
        }
        let i = settings & 7;
        match (settings >> 3) & 3 {
            0 => {
                let result = arith(op, self.fpu.st(0)?, self.fpu.st(i)?);
                self.fpu.set_st(0, result)
            }
            form @ (1 | 2) => {
                let result = arith(op, self.fpu.st(i)?, self.fpu.st(0)?);
                self.fpu.set_st(i, result)?;
                if form == 2 {
                    self.fpu.pop()?;
                }
                Ok(())
            }
            _ => {
                let addr = self.fetch_address()?;
                let operand = self.read_f64(addr)?;
                let result = arith(op, self.fpu.st(0)?, operand);
                self.fpu.set_st(0, result)
            }
        }
    }

    /// `[op]`: FABS, FCHS, FSQRT, FSIN, FCOS, FRNDINT applied to ST0.
    pub(super) fn op_funary(&mut self) -> Result<(), ErrorCode> {
        let f: fn(f64) -> f64 = match self.fetch_u8()? {
            0 => f64::abs,
            1 => |x: f64| -x,
            2 => f64::sqrt,
            3 => f64::sin,
            4 => f64::cos,
            5 => f64::round_ties_even,
            _ => return Err(ErrorCode::UndefinedBehavior),
        };
        let value = self.fpu.st(0)?;
        self.fpu.set_st(0, f(value))
    }

    /// `[p... .iii]`: unordered sets ZF, PF and CF; less sets CF; equal sets
    /// ZF. OF, SF and AF are cleared.
    pub(super) fn op_fcomi(&mut self) -> Result<(), ErrorCode> {
        let settings = self.fetch_u8()?;
        let a = self.fpu.st(0)?;
        let b = self.fpu.st(settings & 7)?;
        let (zf, pf, cf) = match a.partial_cmp(&b) {
            None => (true, true, true),
            Some(std::cmp::Ordering::Less) => (false, false, true),
            Some(std::cmp::Ordering::Equal) => (true, false, false),
            Some(std::cmp::Ordering::Greater) => (false, false, false),
        };
        self.flags.set(Flags::ZF, zf);
        self.flags.set(Flags::PF, pf);
        self.flags.set(Flags::CF, cf);
        self.flags.set(Flags::OF, false);
        self.flags.set(Flags::SF, false);
        self.flags.set(Flags::AF, false);
        if settings & 0x80 != 0 {
            self.fpu.pop()?;
        }
        Ok(())
    }

    /// `[kk.. .iii]`: 0 FINCSTP, 1 FDECSTP, 2 FFREE ST(i).
    pub(super) fn op_fstack(&mut self) -> Result<(), ErrorCode> {
        let settings = self.fetch_u8()?;
        match settings >> 6 {
            0 => self.fpu.increment_top(),
            1 => self.fpu.decrement_top(),
            2 => self.fpu.free(settings & 7),
            _ => return Err(ErrorCode::UndefinedBehavior),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int64_conversion_rounds_to_even() {
        assert_eq!(to_int64(2.5), 2);
        assert_eq!(to_int64(3.5), 4);
        assert_eq!(to_int64(-1.5), -2);
    }

    #[test]
    fn int64_conversion_indefinite() {
        assert_eq!(to_int64(f64::NAN), i64::MIN);
        assert_eq!(to_int64(1e300), i64::MIN);
        assert_eq!(to_int64(-1e300), i64::MIN);
        assert_eq!(to_int64(-9_223_372_036_854_775_808.0), i64::MIN);
    }

    #[test]
    fn reverse_forms_swap_operands() {
        assert_eq!(arith(1, 5.0, 2.0), 3.0);
        assert_eq!(arith(2, 5.0, 2.0), -3.0);
        assert_eq!(arith(4, 8.0, 2.0), 4.0);
        assert_eq!(arith(5, 8.0, 2.0), 0.25);
    }
}
