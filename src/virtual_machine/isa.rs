//! Instruction Set Architecture (ISA) definitions.
//!
//! The [`for_each_instruction!`](crate::for_each_instruction) macro holds the
//! canonical opcode table and hands it to a callback macro. This module uses it
//! to generate the [`OpCode`] enum; the processor uses it again to generate its
//! dispatch `match`, so an opcode can never exist without a handler.
//!
//! # Encoding
//!
//! Every instruction is one opcode byte followed by instruction-specific
//! operand bytes. The recurring operand shapes (see [`operand`](super::operand)):
//!
//! - **binary** `[rrrr ss mm]`: `mm` 0 = reg ← reg (then `[.... ssss]`),
//!   1 = reg ← compact imm, 2 = reg ← mem (then address), 3 = mem ← reg
//! - **unary** `[rrrr ss .m]`: `m` 0 = register `r`, 1 = memory (then address)
//! - **target** `[rrrr ss mm]`: `mm` 0 = register, 1 = compact imm,
//!   2 = value loaded from memory; 8-bit targets and `mm` 3 are illegal
//!
//! All multi-byte values are little-endian.

use crate::virtual_machine::errors::ErrorCode;

/// Invokes a callback macro with the complete instruction definition list.
#[macro_export]
macro_rules! for_each_instruction {
    ($callback:ident) => {
        $callback! {
            // =========================
            // Misc
            // =========================
            /// NOP ; no operation
            Nop = 0x00, "NOP" => op_nop,
            /// HLT ; terminates the process with `Abort`
            Hlt = 0x01, "HLT" => op_hlt,
            /// SYSCALL ; dispatches on RAX
            Syscall = 0x02, "SYSCALL" => op_syscall,
            // =========================
            // Data movement
            // =========================
            /// LEA `[rrrr ss ..]` address ; r = effective address (8-bit illegal)
            Lea = 0x03, "LEA" => op_lea,
            /// MOV binary ; dst = src, flags untouched
            Mov = 0x04, "MOV" => op_mov,
            /// XCHG `[rrrr ss .m]` (`[.... ssss]` | address) ; swaps the operands
            Xchg = 0x05, "XCHG" => op_xchg,
            // =========================
            // Integer arithmetic / logic
            // =========================
            /// ADD binary ; dst += src
            Add = 0x06, "ADD" => op_add,
            /// SUB binary ; dst -= src
            Sub = 0x07, "SUB" => op_sub,
            /// AND binary ; dst &= src
            And = 0x08, "AND" => op_and,
            /// OR binary ; dst |= src
            Or = 0x09, "OR" => op_or,
            /// XOR binary ; dst ^= src
            Xor = 0x0A, "XOR" => op_xor,
            /// CMP binary ; flags of dst - src
            Cmp = 0x0B, "CMP" => op_cmp,
            /// TEST binary ; flags of dst & src
            Test = 0x0C, "TEST" => op_test,
            /// IMUL binary ; dst *= src (signed, truncated)
            Imul = 0x0D, "IMUL" => op_imul,
            /// INC unary ; dst += 1, CF preserved
            Inc = 0x0E, "INC" => op_inc,
            /// DEC unary ; dst -= 1, CF preserved
            Dec = 0x0F, "DEC" => op_dec,
            /// NEG unary ; dst = -dst
            Neg = 0x10, "NEG" => op_neg,
            /// NOT unary ; dst = !dst, flags untouched
            Not = 0x11, "NOT" => op_not,
            // =========================
            // Control flow
            // =========================
            /// JMP target ; RIP = target
            Jmp = 0x12, "JMP" => op_jmp,
            /// Jcc `[cond]` target ; RIP = target if cond
            Jcc = 0x13, "Jcc" => op_jcc,
            /// LOOPcc `[.... ss kk]` target ; RCX -= 1, jump while RCX != 0 (and cond)
            LoopCc = 0x14, "LOOPcc" => op_loopcc,
            /// CALL target ; push return address, RIP = target
            Call = 0x15, "CALL" => op_call,
            /// RET ; RIP = pop
            Ret = 0x16, "RET" => op_ret,
            // =========================
            // Stack
            // =========================
            /// PUSH target-style source ; push reg | imm | mem (8-bit illegal)
            Push = 0x17, "PUSH" => op_push,
            /// POP `[rrrr ss mm]` ; mm 0 = register, 2 = memory (then address)
            Pop = 0x18, "POP" => op_pop,
            /// PUSHF ; push the 64-bit flags word
            Pushf = 0x19, "PUSHF" => op_pushf,
            /// POPF ; pop into the public flag bits only
            Popf = 0x1A, "POPF" => op_popf,
            /// FLAGOP `[op]` ; CLC, STC, CMC, CLD, STD
            FlagOp = 0x1B, "FLAGOP" => op_flagop,
            // =========================
            // x87 floating point
            // =========================
            /// FINIT ; empties the FPU stack
            Finit = 0x20, "FINIT" => op_finit,
            /// FLD `[kkkk .iii]` [address] ; push ST(i) | m64 | m32 | m64int | constant i
            Fld = 0x21, "FLD" => op_fld,
            /// FST `[pkkk .iii]` [address] ; store ST0 to ST(i) | m64 | m32 | m64int, p pops
            Fst = 0x22, "FST" => op_fst,
            /// FXCH `[.... .iii]` ; swap ST0 and ST(i)
            Fxch = 0x23, "FXCH" => op_fxch,
            /// FARITH `[ooo ff iii]` [address] ; add, sub, subr, mul, div, divr
            Farith = 0x24, "FARITH" => op_farith,
            /// FUNARY `[op]` ; FABS, FCHS, FSQRT, FSIN, FCOS, FRNDINT on ST0
            Funary = 0x25, "FUNARY" => op_funary,
            /// FCOMI `[p... .iii]` ; compare ST0 with ST(i) into ZF/PF/CF, p pops
            Fcomi = 0x26, "FCOMI" => op_fcomi,
            /// FSTACK `[kk.. .iii]` ; FINCSTP, FDECSTP, FFREE ST(i)
            Fstack = 0x27, "FSTACK" => op_fstack,
        }
    };
}

#[macro_export]
macro_rules! define_opcodes {
    (
        $(
            $(#[$doc:meta])*
            $name:ident = $opcode:expr, $mnemonic:literal => $handler:ident
        ),* $(,)?
    ) => {
        /// One-byte operation codes understood by the processor.
        #[repr(u8)]
        #[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
        pub enum OpCode {
            $(
                $(#[$doc])*
                $name = $opcode,
            )*
        }

        impl TryFrom<u8> for OpCode {
            type Error = ErrorCode;

            fn try_from(value: u8) -> Result<Self, Self::Error> {
                match value {
                    $( $opcode => Ok(OpCode::$name), )*
                    _ => Err(ErrorCode::UndefinedBehavior),
                }
            }
        }

        impl OpCode {
            /// Returns the assembly mnemonic for this opcode.
            pub const fn mnemonic(&self) -> &'static str {
                match self {
                    $( OpCode::$name => $mnemonic, )*
                }
            }
        }
    };
}

for_each_instruction!(define_opcodes);

/// Branch conditions, numbered in x86 order.
#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Condition {
    Overflow = 0,
    NotOverflow = 1,
    Below = 2,
    AboveOrEqual = 3,
    Equal = 4,
    NotEqual = 5,
    BelowOrEqual = 6,
    Above = 7,
    Sign = 8,
    NotSign = 9,
    Parity = 10,
    NotParity = 11,
    Less = 12,
    GreaterOrEqual = 13,
    LessOrEqual = 14,
    Greater = 15,
}

impl TryFrom<u8> for Condition {
    type Error = ErrorCode;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        use Condition::*;
        const ALL: [Condition; 16] = [
            Overflow,
            NotOverflow,
            Below,
            AboveOrEqual,
            Equal,
            NotEqual,
            BelowOrEqual,
            Above,
            Sign,
            NotSign,
            Parity,
            NotParity,
            Less,
            GreaterOrEqual,
            LessOrEqual,
            Greater,
        ];
        ALL.get(value as usize)
            .copied()
            .ok_or(ErrorCode::UndefinedBehavior)
    }
}

/// `LOOPcc` flavours, from the low two bits of its settings byte.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum LoopKind {
    Loop,
    WhileEqual,
    WhileNotEqual,
}

impl TryFrom<u8> for LoopKind {
    type Error = ErrorCode;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(LoopKind::Loop),
            1 => Ok(LoopKind::WhileEqual),
            2 => Ok(LoopKind::WhileNotEqual),
            _ => Err(ErrorCode::UndefinedBehavior),
        }
    }
}

/// `FLAGOP` sub-operations.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FlagOp {
    Clc,
    Stc,
    Cmc,
    Cld,
    Std,
}

impl TryFrom<u8> for FlagOp {
    type Error = ErrorCode;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(FlagOp::Clc),
            1 => Ok(FlagOp::Stc),
            2 => Ok(FlagOp::Cmc),
            3 => Ok(FlagOp::Cld),
            4 => Ok(FlagOp::Std),
            _ => Err(ErrorCode::UndefinedBehavior),
        }
    }
}
