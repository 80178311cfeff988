//! FNV-1a name hashes.
//!
//! A command is carried on the wire as the 32-bit FNV-1a hash of its name. Board models
//! use a 16-bit variant that folds the two halves of the 32-bit hash by XOR. Both are
//! `const fn`, so a literal command name costs nothing at runtime:
//!
//! ```rust
//! use totembus::hash;
//!
//! const MOTOR_A: u32 = hash::fnv1a("motorA");
//! assert_eq!(MOTOR_A, 0xaba0_1c49);
//! ```
//!
//! No collision detection is performed; callers choose names to avoid collisions.

const FNV1A_SEED: u32 = 2_166_136_261;
const FNV1A_PRIME: u32 = 16_777_619;

/// Computes the 32-bit FNV-1a hash of a command name.
///
/// Hashing stops at an embedded NUL byte, matching the wire form of string commands.
pub const fn fnv1a(name: &str) -> u32 {
    fnv1a_bytes(name.as_bytes())
}

/// Computes the 32-bit FNV-1a hash of a raw byte slice, stopping at NUL.
pub const fn fnv1a_bytes(name: &[u8]) -> u32 {
    let mut hash = FNV1A_SEED;
    let mut i = 0;
    while i < name.len() {
        if name[i] == 0 {
            break;
        }
        hash ^= name[i] as u32;
        hash = hash.wrapping_mul(FNV1A_PRIME);
        i += 1;
    }
    hash
}

/// Computes the folded 16-bit FNV-1a hash naming a board model.
pub const fn fnv1a16(name: &str) -> u16 {
    let hash = fnv1a(name);
    ((hash >> 16) ^ (hash & 0xFFFF)) as u16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_command_hashes() {
        // Reference values from the board firmware command table
        assert_eq!(fnv1a("motorA"), 0xaba0_1c49);
        assert_eq!(fnv1a("motorB"), 0xa8a0_1790);
        assert_eq!(fnv1a("motorC"), 0xa9a0_1923);
        assert_eq!(fnv1a("motorD"), 0xaea0_2102);
        assert_eq!(fnv1a("motorA/brake"), 0x9a48_6d7d);
        assert_eq!(fnv1a("motorB/brake"), 0x03ee_3018);
        assert_eq!(fnv1a("motorC/brake"), 0xa984_c117);
        assert_eq!(fnv1a("motorD/brake"), 0x64a0_ec5a);
        assert_eq!(fnv1a("motorABCD"), 0x78c9_5d56);
    }

    #[test]
    fn test_empty_name() {
        assert_eq!(fnv1a(""), FNV1A_SEED);
    }

    #[test]
    fn test_nul_terminates() {
        assert_eq!(fnv1a_bytes(b"motorA\0garbage"), fnv1a("motorA"));
    }

    #[test]
    fn test_model_hash_folds() {
        let full = fnv1a("X4");
        let folded = ((full >> 16) ^ (full & 0xFFFF)) as u16;
        assert_eq!(fnv1a16("X4"), folded);
        assert_eq!(fnv1a16("X4"), 0x5afa);
    }

    #[test]
    fn test_const_evaluable() {
        const CMD: u32 = fnv1a("battery");
        assert_eq!(CMD, 0xfd6a_0c8e);
    }
}
