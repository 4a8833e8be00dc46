#[cfg(test)]
mod tests {
    const FNV_OFFSET: u64 = 0xcbf29ce484222325;
    const FNV_PRIME: u64 = 0x100000001b3;
    const EXPECTED_ISA_HASH: u64 = 14031213821342309703;

    fn fnv1a64(mut h: u64, bytes: &[u8]) -> u64 {
        for b in bytes {
            h ^= *b as u64;
            h = h.wrapping_mul(FNV_PRIME);
        }
        h
    }

    /// Folds every name, opcode byte, mnemonic and handler of the table into
    /// one hash. Assembled images depend on all of them.
    macro_rules! hash_isa {
        (
            $( $(#[$doc:meta])* $name:ident = $opcode:expr, $mnemonic:literal => $handler:ident ),* $(,)?
        ) => {{
            let mut h = FNV_OFFSET;
            $(
                h = fnv1a64(h, stringify!($name).as_bytes());
                h = fnv1a64(h, &[crate::virtual_machine::isa::OpCode::$name as u8]);
                h = fnv1a64(h, $mnemonic.as_bytes());
                h = fnv1a64(h, stringify!($handler).as_bytes());
            )*
            h
        }};
    }

    fn current_isa_hash() -> u64 {
        crate::for_each_instruction!(hash_isa)
    }

    #[test]
    #[ignore]
    fn print_isa_hash() {
        println!("ISA_HASH={}", current_isa_hash());
    }

    #[test]
    fn isa_hash_unchanged() {
        assert_eq!(current_isa_hash(), EXPECTED_ISA_HASH);
    }
}
