//! Deterministic Deposit Address Derivation
//!
//! Maps a (destination address, nonce) pair to a unique receiving address
//! without storing any per-user secret.
//!
//! ## Scheme
//!
//! ```text
//! index   = u32_be(keccak256(lowercase(destination) + "-" + nonce)[0..4]) & 0x7FFF_FFFF
//! private = m/44'/60'/0'/0/{index}           (from the bridge seed)
//! public  = xpub(m/44'/60'/0') / 0 / index   (from the account xpub)
//! ```
//!
//! Both paths yield the same address, so clients holding only the xpub can
//! check that an address handed to them really belongs to the bridge.

use bip32::{ChildNumber, DerivationPath, Prefix, XPrv, XPub};
use bip39::{Language, Mnemonic, MnemonicType, Seed};
use k256::ecdsa::SigningKey;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::types::{keccak256, Address};

/// BIP-44 account path for the bridge (coin type 60, account 0)
pub const ACCOUNT_PATH: &str = "m/44'/60'/0'";

/// External chain under the account
const EXTERNAL_CHAIN: u32 = 0;

/// Highest non-hardened child index
const INDEX_MASK: u32 = 0x7FFF_FFFF;

/// Derivation errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DerivationError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Derivation error: {0}")]
    Derivation(String),
}

impl From<bip32::Error> for DerivationError {
    fn from(e: bip32::Error) -> Self {
        Self::Derivation(e.to_string())
    }
}

/// Root seed for all deposit keys; zeroized on drop
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct BridgeSeed {
    bytes: Vec<u8>,
}

impl BridgeSeed {
    /// Seed from a BIP-39 English mnemonic and optional passphrase
    pub fn from_mnemonic(phrase: &str, passphrase: &str) -> Result<Self, DerivationError> {
        let normalized = phrase.split_whitespace().collect::<Vec<_>>().join(" ");
        let mnemonic = Mnemonic::from_phrase(&normalized, Language::English)
            .map_err(|e| DerivationError::Validation(format!("invalid mnemonic: {}", e)))?;
        let seed = Seed::new(&mnemonic, passphrase);

        Ok(Self {
            bytes: seed.as_bytes().to_vec(),
        })
    }

    /// Seed from raw bytes (BIP-32 accepts 16 to 64 bytes)
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DerivationError> {
        if !(16..=64).contains(&bytes.len()) {
            return Err(DerivationError::Validation(format!(
                "seed must be 16..=64 bytes, got {}",
                bytes.len()
            )));
        }
        Ok(Self {
            bytes: bytes.to_vec(),
        })
    }

    fn derive(&self, path: &str) -> Result<XPrv, DerivationError> {
        let path = DerivationPath::from_str(path)?;
        Ok(XPrv::derive_from_path(&self.bytes, &path)?)
    }
}

impl fmt::Debug for BridgeSeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BridgeSeed(..)")
    }
}

/// Derived signing key for one deposit address
#[derive(Clone)]
pub struct DepositKey {
    pub index: u32,
    pub address: Address,
    signing_key: SigningKey,
}

impl DepositKey {
    pub fn signing_key(&self) -> &SigningKey {
        &self.signing_key
    }
}

impl fmt::Debug for DepositKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DepositKey")
            .field("index", &self.index)
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

/// Deterministic derivation index for a destination/nonce pair
///
/// keccak256 of `"{lowercase destination}-{nonce}"`, first 4 bytes read as a
/// big-endian `u32`, then the top bit is cleared. Unmasked values at or above
/// 2^31 would name a hardened child, which an xpub cannot derive, so indexes
/// differ from the raw 32-bit prefix for about half of all pairs. The index
/// space is 2^31; two pairs sharing an index share a deposit address and the
/// second one is refused at creation.
pub fn calculate_index(destination: &Address, nonce: u64) -> u32 {
    let preimage = format!("{}-{}", destination.to_lower_hex(), nonce);
    let hash = keccak256(preimage.as_bytes());
    u32::from_be_bytes([hash[0], hash[1], hash[2], hash[3]]) & INDEX_MASK
}

/// Parse and validate a destination address
pub fn parse_address(s: &str) -> Result<Address, DerivationError> {
    s.parse()
        .map_err(|e| DerivationError::Validation(format!("invalid address {:?}: {}", s, e)))
}

/// Parse a decimal nonce
pub fn parse_nonce(s: &str) -> Result<u64, DerivationError> {
    let trimmed = s.trim();
    if trimmed.is_empty() || !trimmed.chars().all(|c| c.is_ascii_digit()) {
        return Err(DerivationError::Validation(format!("invalid nonce: {:?}", s)));
    }
    trimmed
        .parse()
        .map_err(|_| DerivationError::Validation(format!("nonce out of range: {}", s)))
}

/// Derive the deposit address and its signing key at `m/44'/60'/0'/0/{index}`
pub fn derive_deposit_address(seed: &BridgeSeed, index: u32) -> Result<DepositKey, DerivationError> {
    if index > INDEX_MASK {
        return Err(DerivationError::Validation(format!(
            "index {} is in the hardened range",
            index
        )));
    }

    let xprv = seed.derive(&format!("{}/{}/{}", ACCOUNT_PATH, EXTERNAL_CHAIN, index))?;
    let signing_key = xprv.private_key().clone();
    let public_key = k256::PublicKey::from(signing_key.verifying_key());

    Ok(DepositKey {
        index,
        address: Address::from_public_key(&public_key),
        signing_key,
    })
}

/// Account-level extended public key (`xpub...`) at `m/44'/60'/0'`
pub fn derive_public_extended_key(seed: &BridgeSeed) -> Result<String, DerivationError> {
    let account = seed.derive(ACCOUNT_PATH)?;
    Ok(account.public_key().to_string(Prefix::XPUB))
}

/// Derive a deposit address using only the account xpub
pub fn derive_address_from_xpub(xpub: &str, index: u32) -> Result<Address, DerivationError> {
    let account = XPub::from_str(xpub.trim())
        .map_err(|e| DerivationError::Validation(format!("invalid extended public key: {}", e)))?;

    let chain = account.derive_child(ChildNumber::new(EXTERNAL_CHAIN, false)?)?;
    let child = chain.derive_child(
        ChildNumber::new(index, false)
            .map_err(|_| DerivationError::Validation(format!("index {} is in the hardened range", index)))?,
    )?;

    let public_key = k256::PublicKey::from(child.public_key());
    Ok(Address::from_public_key(&public_key))
}

/// Check that `claimed_address` is the bridge address for (destination, nonce)
///
/// Any parse or derivation failure counts as a mismatch.
pub fn verify_deposit_address(
    xpub: &str,
    destination: &str,
    nonce: u64,
    claimed_address: &str,
) -> bool {
    let Ok(destination) = parse_address(destination) else {
        return false;
    };
    let Ok(claimed) = parse_address(claimed_address) else {
        return false;
    };

    let index = calculate_index(&destination, nonce);
    match derive_address_from_xpub(xpub, index) {
        Ok(expected) => expected == claimed,
        Err(_) => false,
    }
}

/// Generate a fresh 12-word English mnemonic (testnet tooling)
pub fn generate_mnemonic() -> String {
    Mnemonic::new(MnemonicType::Words12, Language::English)
        .phrase()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const MNEMONIC: &str =
        "legal winner thank year wave sausage worth useful legal winner thank yellow";
    const EXPECTED_XPUB: &str = "xpub6Bh6Cg7bvjFdW6VEAaZmsyhZh86WdJ9Kr5aqqY5LN7UFLpxTrxsiys213UCu8MAYjcq5JhF7jzZXvruGfWfPbxqsByNNhwWaNQRuhP3JcC3";

    // Well-known development mnemonic used by local EVM nodes
    const DEV_MNEMONIC: &str = "test test test test test test test test test test test junk";

    fn seed() -> BridgeSeed {
        BridgeSeed::from_mnemonic(MNEMONIC, "").unwrap()
    }

    #[test]
    fn test_calculate_index_deterministic() {
        let address = parse_address("0x9a5c142ffdbddfcc7b909104f1191d8e3cc44e90").unwrap();
        assert_eq!(calculate_index(&address, 5), calculate_index(&address, 5));
        assert!(calculate_index(&address, 5) <= INDEX_MASK);
    }

    #[test]
    fn test_calculate_index_case_insensitive() {
        let lower = parse_address("0x5aaeb6053f3e94c9b9a09f33669435e7ef1beaed").unwrap();
        let checksummed = parse_address("0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed").unwrap();
        assert_eq!(calculate_index(&lower, 0), calculate_index(&checksummed, 0));
    }

    #[test]
    fn test_calculate_index_varies() {
        let a = parse_address("0x1234567890abcdef1234567890abcdef12345678").unwrap();
        let b = parse_address("0x6543217890abcdef1234567890abcdef12345678").unwrap();

        assert_ne!(calculate_index(&a, 1), calculate_index(&a, 2));
        assert_ne!(calculate_index(&a, 1), calculate_index(&b, 1));
    }

    #[test]
    fn test_calculate_index_preimage() {
        let address = parse_address("0x1234567890abcdef1234567890abcdef12345678").unwrap();
        let hash = keccak256(b"0x1234567890abcdef1234567890abcdef12345678-7");
        let expected = u32::from_be_bytes([hash[0], hash[1], hash[2], hash[3]]) & INDEX_MASK;
        assert_eq!(calculate_index(&address, 7), expected);
    }

    #[test]
    fn test_known_xpub() {
        assert_eq!(derive_public_extended_key(&seed()).unwrap(), EXPECTED_XPUB);
    }

    #[test]
    fn test_known_addresses() {
        let seed = BridgeSeed::from_mnemonic(DEV_MNEMONIC, "").unwrap();

        let first = derive_deposit_address(&seed, 0).unwrap();
        assert_eq!(
            first.address.to_string(),
            "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266"
        );

        let second = derive_deposit_address(&seed, 1).unwrap();
        assert_eq!(
            second.address.to_string(),
            "0x70997970C51812dc3A010C7d01b50e0d17dc79C8"
        );
    }

    #[test]
    fn test_seed_and_xpub_paths_agree() {
        let seed = seed();
        let xpub = derive_public_extended_key(&seed).unwrap();

        let destination = parse_address("0x1234567890abcdef1234567890abcdef12345678").unwrap();
        let indexes = (0..8)
            .chain((0..8).map(|nonce| calculate_index(&destination, nonce)))
            .chain([INDEX_MASK]);

        for index in indexes {
            let from_seed = derive_deposit_address(&seed, index).unwrap();
            let from_xpub = derive_address_from_xpub(&xpub, index).unwrap();
            assert_eq!(from_seed.address, from_xpub, "index {}", index);
        }
    }

    #[test]
    fn test_different_indexes_different_addresses() {
        let seed = seed();
        let a = derive_deposit_address(&seed, 0).unwrap();
        let b = derive_deposit_address(&seed, 1).unwrap();
        assert_ne!(a.address, b.address);
    }

    #[test]
    fn test_hardened_index_rejected() {
        let seed = seed();
        let xpub = derive_public_extended_key(&seed).unwrap();

        assert!(matches!(
            derive_deposit_address(&seed, 0x8000_0000),
            Err(DerivationError::Validation(_))
        ));
        assert!(matches!(
            derive_address_from_xpub(&xpub, 0x8000_0000),
            Err(DerivationError::Validation(_))
        ));
    }

    #[test]
    fn test_verify_deposit_address() {
        let seed = seed();
        let xpub = derive_public_extended_key(&seed).unwrap();
        let destination = "0x1234567890abcdef1234567890abcdef12345678";

        let index = calculate_index(&parse_address(destination).unwrap(), 3);
        let deposit = derive_deposit_address(&seed, index).unwrap();
        let claimed = deposit.address.to_lower_hex();

        assert!(verify_deposit_address(&xpub, destination, 3, &claimed));
        assert!(!verify_deposit_address(&xpub, destination, 4, &claimed));
        assert!(!verify_deposit_address(&xpub, "not-an-address", 3, &claimed));
        assert!(!verify_deposit_address("xpub-garbage", destination, 3, &claimed));
    }

    #[test]
    fn test_invalid_inputs() {
        assert!(matches!(
            BridgeSeed::from_mnemonic("legal winner thank", ""),
            Err(DerivationError::Validation(_))
        ));
        assert!(matches!(
            BridgeSeed::from_bytes(&[0u8; 8]),
            Err(DerivationError::Validation(_))
        ));
        assert!(matches!(
            derive_address_from_xpub("xpub123", 0),
            Err(DerivationError::Validation(_))
        ));
        assert!(parse_address("0x12").is_err());
        assert_eq!(parse_nonce(" 42 "), Ok(42));
        assert!(parse_nonce("-1").is_err());
        assert!(parse_nonce("1.5").is_err());
        assert!(parse_nonce("").is_err());
    }

    #[test]
    fn test_generate_mnemonic_roundtrip() {
        let phrase = generate_mnemonic();
        assert_eq!(phrase.split_whitespace().count(), 12);
        assert!(BridgeSeed::from_mnemonic(&phrase, "").is_ok());
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let seed = seed();
        assert_eq!(format!("{:?}", seed), "BridgeSeed(..)");

        let key = derive_deposit_address(&seed, 0).unwrap();
        let debug = format!("{:?}", key);
        assert!(debug.contains("index: 0"));
        assert!(!debug.contains("signing_key"));
    }
}
