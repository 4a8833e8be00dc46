use crate::virtual_machine::errors::ErrorCode;

pub const FPU_SLOTS: usize = 8;

/// x87-style circular register stack.
///
/// `ST(i)` is physical slot `(top + i) mod 8`. A push decrements `top` and
/// claims the new slot, a pop releases the top slot and increments `top`.
/// Released slots keep their stale value but can no longer be read.
#[derive(Clone, Debug, PartialEq)]
pub struct Fpu {
    values: [f64; FPU_SLOTS],
    in_use: [bool; FPU_SLOTS],
    top: u8,
}

impl Fpu {
    pub fn new() -> Self {
        Self {
            values: [0.0; FPU_SLOTS],
            in_use: [false; FPU_SLOTS],
            top: 0,
        }
    }

    /// Releases every slot and moves `top` back to zero.
    pub fn reset(&mut self) {
        self.in_use = [false; FPU_SLOTS];
        self.top = 0;
    }

    pub fn top(&self) -> u8 {
        self.top
    }

    fn slot(&self, i: u8) -> usize {
        (self.top.wrapping_add(i) & 7) as usize
    }

    pub fn is_in_use(&self, i: u8) -> bool {
        self.in_use[self.slot(i)]
    }

    pub fn occupied(&self) -> usize {
        self.in_use.iter().filter(|&&used| used).count()
    }

    pub fn push(&mut self, value: f64) -> Result<(), ErrorCode> {
        let top = self.top.wrapping_sub(1) & 7;
        if self.in_use[top as usize] {
            return Err(ErrorCode::UndefinedBehavior);
        }
        self.top = top;
        self.values[top as usize] = value;
        self.in_use[top as usize] = true;
        Ok(())
    }

    pub fn pop(&mut self) -> Result<f64, ErrorCode> {
        let top = self.top as usize;
        if !self.in_use[top] {
            return Err(ErrorCode::UndefinedBehavior);
        }
        self.in_use[top] = false;
        self.top = (self.top + 1) & 7;
        Ok(self.values[top])
    }

    /// Reads `ST(i)`.
    pub fn st(&self, i: u8) -> Result<f64, ErrorCode> {
        let slot = self.slot(i);
        if !self.in_use[slot] {
            return Err(ErrorCode::UndefinedBehavior);
        }
        Ok(self.values[slot])
    }

    /// Overwrites `ST(i)`, which must already hold a value.
    pub fn set_st(&mut self, i: u8, value: f64) -> Result<(), ErrorCode> {
        let slot = self.slot(i);
        if !self.in_use[slot] {
            return Err(ErrorCode::UndefinedBehavior);
        }
        self.values[slot] = value;
        Ok(())
    }

    /// Stores into `ST(i)` and marks it in use, as `FST ST(i)` does.
    pub fn store(&mut self, i: u8, value: f64) {
        let slot = self.slot(i);
        self.values[slot] = value;
        self.in_use[slot] = true;
    }

    pub fn swap(&mut self, i: u8) -> Result<(), ErrorCode> {
        let (a, b) = (self.slot(0), self.slot(i));
        if !self.in_use[a] || !self.in_use[b] {
            return Err(ErrorCode::UndefinedBehavior);
        }
        self.values.swap(a, b);
        Ok(())
    }

    /// Marks `ST(i)` as not in use without moving `top`.
    pub fn free(&mut self, i: u8) {
        let slot = self.slot(i);
        self.in_use[slot] = false;
    }

    /// Rotates `top` forward without touching occupancy (`FINCSTP`).
    pub fn increment_top(&mut self) {
        self.top = (self.top + 1) & 7;
    }

    /// Rotates `top` backward without touching occupancy (`FDECSTP`).
    pub fn decrement_top(&mut self) {
        self.top = self.top.wrapping_sub(1) & 7;
    }
}

impl Default for Fpu {
    fn default() -> Self {
        Self::new()
    }
}
