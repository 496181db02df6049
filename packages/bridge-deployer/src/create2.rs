//! Deterministic (CREATE2) address derivation
//!
//! ```text
//! address = keccak256(0xff ++ factory ++ salt ++ keccak256(init_code))[12..]
//! ```
//!
//! The derivation must match the EVM bit-for-bit: the deployer compares the
//! derived address against on-chain code to decide whether a deployment can
//! be skipped.

use alloy::primitives::{Address, B256};

use crate::hash::{keccak256, keccak256_concat};

/// Prefix byte of the CREATE2 preimage (EIP-1014)
pub const CREATE2_PREFIX: u8 = 0xff;

/// Arachnid's deterministic deployment proxy, present on most EVM chains
pub const DEFAULT_CREATE2_FACTORY: Address =
    alloy::primitives::address!("4e59b44847b379578588920cA78FbF26c0B4956C");

/// Hash of a contract's init code (creation bytecode plus constructor args)
pub fn init_code_hash(init_code: &[u8]) -> B256 {
    B256::from(keccak256(init_code))
}

/// Derive the address a CREATE2 deployment will occupy
pub fn create2_address(factory: Address, salt: B256, init_code_hash: B256) -> Address {
    let digest = keccak256_concat(&[
        &[CREATE2_PREFIX],
        factory.as_slice(),
        salt.as_slice(),
        init_code_hash.as_slice(),
    ]);
    Address::from_slice(&digest[12..])
}

/// A (factory, salt, init-code hash) triple
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeterministicPlacement {
    pub factory: Address,
    pub salt: B256,
    pub init_code_hash: B256,
}

impl DeterministicPlacement {
    /// Placement for `init_code` deployed through `factory` with `salt`
    pub fn new(factory: Address, salt: B256, init_code: &[u8]) -> Self {
        Self {
            factory,
            salt,
            init_code_hash: init_code_hash(init_code),
        }
    }

    /// The address this placement resolves to
    pub fn address(&self) -> Address {
        create2_address(self.factory, self.salt, self.init_code_hash)
    }
}

/// Parse a 0x-prefixed salt, which must be exactly one 32-byte word
pub fn parse_salt(raw: &str) -> Option<B256> {
    let stripped = raw.trim().trim_start_matches("0x");
    let bytes = hex::decode(stripped).ok()?;
    (bytes.len() == 32).then(|| B256::from_slice(&bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::address;

    // Vectors from EIP-1014
    #[test]
    fn test_eip1014_example_0() {
        let addr = create2_address(Address::ZERO, B256::ZERO, init_code_hash(&[0x00]));
        assert_eq!(addr, address!("4D1A2e2bB4F88F0250f26Ffff098B0b30B26BF38"));
    }

    #[test]
    fn test_eip1014_example_1() {
        let addr = create2_address(
            address!("deadbeef00000000000000000000000000000000"),
            B256::ZERO,
            init_code_hash(&[0x00]),
        );
        assert_eq!(addr, address!("B928f69Bb1D91Cd65274e3c79d8986362984fDA3"));
    }

    #[test]
    fn test_eip1014_example_5() {
        let addr = create2_address(
            address!("00000000000000000000000000000000deadbeef"),
            "0x00000000000000000000000000000000000000000000000000000000cafebabe"
                .parse()
                .unwrap(),
            init_code_hash(&hex::decode("deadbeef").unwrap()),
        );
        assert_eq!(addr, address!("60f3f640a8508fC6a86d45DF051962668E1e8AC7"));
    }

    #[test]
    fn test_matches_alloy_create2() {
        let factory = DEFAULT_CREATE2_FACTORY;
        let salt = B256::repeat_byte(0x11);
        let code = [0x60u8, 0x80, 0x60, 0x40, 0x52];
        let placement = DeterministicPlacement::new(factory, salt, &code);

        assert_eq!(placement.address(), factory.create2_from_code(salt, code));
    }

    #[test]
    fn test_derivation_is_deterministic() {
        let placement = DeterministicPlacement::new(
            DEFAULT_CREATE2_FACTORY,
            B256::ZERO,
            b"some init code",
        );
        assert_eq!(placement.address(), placement.address());
        assert_eq!(
            placement.address(),
            DeterministicPlacement::new(DEFAULT_CREATE2_FACTORY, B256::ZERO, b"some init code")
                .address()
        );
    }

    #[test]
    fn test_parse_salt() {
        let salt = parse_salt("0x0000000000000000000000000000000000000000000000000000000000000001")
            .unwrap();
        assert_eq!(salt[31], 1);

        assert!(parse_salt("0x01").is_none());
        assert!(parse_salt("0xzz").is_none());
        // 20 bytes is an address, not a salt
        assert!(parse_salt("0x4e59b44847b379578588920cA78FbF26c0B4956C").is_none());
    }
}
