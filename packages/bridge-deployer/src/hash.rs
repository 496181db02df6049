//! Hashing helpers shared by address derivation and ticket id computation.

use alloy::primitives::Address;
use tiny_keccak::{Hasher, Keccak};

/// Compute keccak256 hash of data
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak::v256();
    hasher.update(data);
    let mut output = [0u8; 32];
    hasher.finalize(&mut output);
    output
}

/// Compute keccak256 over the concatenation of several byte slices
pub fn keccak256_concat(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Keccak::v256();
    for part in parts {
        hasher.update(part);
    }
    let mut output = [0u8; 32];
    hasher.finalize(&mut output);
    output
}

/// Extract the low-order 20 bytes of a 32-byte word as an address
pub fn bytes32_to_address(bytes: &[u8; 32]) -> Address {
    Address::from_slice(&bytes[12..32])
}
