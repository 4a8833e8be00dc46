//! Operand encodings shared by the decoder and by tooling that emits code.
//!
//! These are pure bit-level views over single settings bytes; fetching the
//! bytes (and failing when they run off the end of memory) is the processor's
//! job.

/// Operand width, stored as a 2-bit code.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SizeCode {
    Byte = 0,
    Word = 1,
    Dword = 2,
    Qword = 3,
}

impl SizeCode {
    /// Decodes the low two bits of `bits`.
    pub const fn from_bits(bits: u8) -> Self {
        match bits & 3 {
            0 => SizeCode::Byte,
            1 => SizeCode::Word,
            2 => SizeCode::Dword,
            _ => SizeCode::Qword,
        }
    }

    /// Width in bytes (1, 2, 4 or 8).
    pub const fn bytes(self) -> u64 {
        1 << self as u8
    }

    /// Width in bits.
    pub const fn bits(self) -> u32 {
        8 << self as u8
    }

    /// All-ones value of this width.
    pub const fn mask(self) -> u64 {
        match self {
            SizeCode::Qword => u64::MAX,
            _ => (1u64 << self.bits()) - 1,
        }
    }

    /// The sign bit of this width.
    pub const fn sign_bit(self) -> u64 {
        1u64 << (self.bits() - 1)
    }

    pub const fn truncate(self, value: u64) -> u64 {
        value & self.mask()
    }

    /// Sign-extends the low `bits()` of `value` to 64 bits.
    pub const fn sign_extend(self, value: u64) -> u64 {
        let value = value & self.mask();
        if value & self.sign_bit() != 0 {
            value | !self.mask()
        } else {
            value
        }
    }

    pub const fn is_negative(self, value: u64) -> bool {
        value & self.sign_bit() != 0
    }
}

/// Prefix byte of a compact immediate: `[s000 00ww]`.
///
/// `ww` is the [`SizeCode`] of the body that follows; `s` asks for the body to
/// be sign-extended to 64 bits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImmPrefix {
    pub size: SizeCode,
    pub sign_extend: bool,
}

impl ImmPrefix {
    pub const SIGN_EXTEND: u8 = 0x80;

    pub const fn decode(byte: u8) -> Self {
        Self {
            size: SizeCode::from_bits(byte),
            sign_extend: byte & Self::SIGN_EXTEND != 0,
        }
    }

    pub const fn encode(self) -> u8 {
        (if self.sign_extend { Self::SIGN_EXTEND } else { 0 }) | self.size as u8
    }

    /// Widens a raw body read at `self.size` to its 64-bit value.
    pub const fn widen(self, raw: u64) -> u64 {
        if self.sign_extend {
            self.size.sign_extend(raw)
        } else {
            self.size.truncate(raw)
        }
    }
}

/// Settings byte of an address operand: `[i . ss cc b x]`.
///
/// - `i` (bit 7): a compact immediate displacement follows
/// - `ss` (bits 5:4): base register scale, as a power of two
/// - `cc` (bits 3:2): address [`SizeCode`]; 8-bit addressing is illegal
/// - `b` (bit 1): a scaled base register is present
/// - `x` (bit 0): an index register is present
///
/// When `b` or `x` is set a register byte `[bbbb xxxx]` follows the settings,
/// then the displacement if `i` is set.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AddressSettings {
    pub has_imm: bool,
    pub scale: u8,
    pub size: SizeCode,
    pub has_base: bool,
    pub has_index: bool,
}

impl AddressSettings {
    pub const fn decode(byte: u8) -> Self {
        Self {
            has_imm: byte & 0x80 != 0,
            scale: (byte >> 4) & 3,
            size: SizeCode::from_bits(byte >> 2),
            has_base: byte & 0x02 != 0,
            has_index: byte & 0x01 != 0,
        }
    }

    pub const fn encode(self) -> u8 {
        (if self.has_imm { 0x80 } else { 0 })
            | (self.scale & 3) << 4
            | (self.size as u8) << 2
            | (if self.has_base { 0x02 } else { 0 })
            | (if self.has_index { 0x01 } else { 0 })
    }

    /// Whether a `[bbbb xxxx]` register byte follows.
    pub const fn has_register_byte(self) -> bool {
        self.has_base || self.has_index
    }
}

/// The common `[rrrr ss mm]` operand byte: a register, a width and a 2-bit mode.
///
/// The meaning of `mode` depends on the instruction family (see [`isa`](super::isa)).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OperandByte {
    pub reg: u8,
    pub size: SizeCode,
    pub mode: u8,
}

impl OperandByte {
    pub const fn decode(byte: u8) -> Self {
        Self {
            reg: byte >> 4,
            size: SizeCode::from_bits(byte >> 2),
            mode: byte & 3,
        }
    }

    pub const fn encode(self) -> u8 {
        (self.reg & 0xF) << 4 | (self.size as u8) << 2 | (self.mode & 3)
    }
}

/// Splits a `[hhhh llll]` register byte into its two register indices.
pub const fn register_pair(byte: u8) -> (u8, u8) {
    (byte >> 4, byte & 0xF)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_code_widths() {
        assert_eq!(SizeCode::Byte.bytes(), 1);
        assert_eq!(SizeCode::Word.bytes(), 2);
        assert_eq!(SizeCode::Dword.bytes(), 4);
        assert_eq!(SizeCode::Qword.bytes(), 8);
        assert_eq!(SizeCode::Dword.mask(), 0xFFFF_FFFF);
        assert_eq!(SizeCode::Qword.mask(), u64::MAX);
        assert_eq!(SizeCode::Word.sign_bit(), 0x8000);
    }

    #[test]
    fn size_code_from_bits_ignores_high_bits() {
        assert_eq!(SizeCode::from_bits(0b1111_1101), SizeCode::Word);
    }

    #[test]
    fn sign_extend_only_when_negative() {
        assert_eq!(SizeCode::Byte.sign_extend(0x7F), 0x7F);
        assert_eq!(SizeCode::Byte.sign_extend(0x80), 0xFFFF_FFFF_FFFF_FF80);
        assert_eq!(SizeCode::Dword.sign_extend(0xFFFF_FFFE), u64::MAX - 1);
        assert_eq!(SizeCode::Qword.sign_extend(0x8000_0000_0000_0000), 0x8000_0000_0000_0000);
    }

    #[test]
    fn imm_prefix_widen() {
        let signed = ImmPrefix::decode(0x80 | SizeCode::Word as u8);
        assert!(signed.sign_extend);
        assert_eq!(signed.size, SizeCode::Word);
        assert_eq!(signed.widen(0xFFFF), u64::MAX);

        let unsigned = ImmPrefix::decode(SizeCode::Word as u8);
        assert_eq!(unsigned.widen(0xFFFF), 0xFFFF);
    }

    #[test]
    fn address_settings_bit_layout() {
        let settings = AddressSettings {
            has_imm: true,
            scale: 3,
            size: SizeCode::Qword,
            has_base: true,
            has_index: false,
        };
        assert_eq!(settings.encode(), 0b1011_1110);
        assert_eq!(AddressSettings::decode(0b1011_1110), settings);
        assert!(settings.has_register_byte());
        assert!(!AddressSettings::decode(0x80 | 0x0C).has_register_byte());
    }

    #[test]
    fn operand_byte_layout() {
        let op = OperandByte::decode(0xA7);
        assert_eq!(op.reg, 0xA);
        assert_eq!(op.size, SizeCode::Word);
        assert_eq!(op.mode, 3);
        assert_eq!(op.encode(), 0xA7);
    }

    #[test]
    fn register_pair_splits_nibbles() {
        assert_eq!(register_pair(0x3C), (3, 12));
    }
}
