//! EVM Primitive Types
//!
//! 20-byte addresses (EIP-55 rendered), 32-byte transaction hashes, and the
//! block/transaction/receipt shapes the chain abstractions exchange.

use k256::elliptic_curve::sec1::ToEncodedPoint;
use primitive_types::U256;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use sha3::{Digest, Keccak256};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors parsing hex-encoded chain values
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HexParseError {
    #[error("missing 0x prefix")]
    MissingPrefix,

    #[error("wrong length: expected {expected} hex chars, got {got}")]
    InvalidLength { expected: usize, got: usize },

    #[error("invalid hex: {0}")]
    InvalidHex(String),

    #[error("bad EIP-55 checksum: {0}")]
    BadChecksum(String),
}

fn strip_prefix(s: &str) -> Result<&str, HexParseError> {
    s.strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .ok_or(HexParseError::MissingPrefix)
}

fn decode_fixed<const N: usize>(s: &str) -> Result<[u8; N], HexParseError> {
    let body = strip_prefix(s.trim())?;
    if body.len() != N * 2 {
        return Err(HexParseError::InvalidLength {
            expected: N * 2,
            got: body.len(),
        });
    }

    let mut out = [0u8; N];
    hex::decode_to_slice(body, &mut out).map_err(|e| HexParseError::InvalidHex(e.to_string()))?;
    Ok(out)
}

/// Keccak-256 digest
pub fn keccak256(data: impl AsRef<[u8]>) -> [u8; 32] {
    Keccak256::digest(data.as_ref()).into()
}

// =============================================================================
// Address
// =============================================================================

/// A 20-byte EVM account address
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address([u8; 20]);

impl Address {
    pub const fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Address of a secp256k1 public key: last 20 bytes of keccak256(x || y)
    pub fn from_public_key(public_key: &k256::PublicKey) -> Self {
        let point = public_key.to_encoded_point(false);
        // Skip the 0x04 SEC1 tag
        let hash = keccak256(&point.as_bytes()[1..]);

        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(&hash[12..]);
        Self(bytes)
    }

    /// Lowercase `0x`-prefixed hex
    pub fn to_lower_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }

    /// EIP-55 mixed-case checksum encoding
    pub fn to_checksum(&self) -> String {
        let hex_addr = hex::encode(self.0);
        let hash = keccak256(hex_addr.as_bytes());

        let mut result = String::with_capacity(42);
        result.push_str("0x");

        for (i, c) in hex_addr.chars().enumerate() {
            let nibble = if i % 2 == 0 {
                hash[i / 2] >> 4
            } else {
                hash[i / 2] & 0x0f
            };

            if c.is_ascii_alphabetic() && nibble >= 8 {
                result.push(c.to_ascii_uppercase());
            } else {
                result.push(c);
            }
        }

        result
    }
}

impl FromStr for Address {
    type Err = HexParseError;

    /// Accepts lowercase, uppercase, or a correctly checksummed mixed-case address
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let bytes = decode_fixed::<20>(s)?;
        let address = Self(bytes);

        let body = &s[2..];
        let has_lower = body.chars().any(|c| c.is_ascii_lowercase());
        let has_upper = body.chars().any(|c| c.is_ascii_uppercase());
        if has_lower && has_upper && address.to_checksum()[2..] != *body {
            return Err(HexParseError::BadChecksum(s.to_string()));
        }

        Ok(address)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_checksum())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self.to_checksum())
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_checksum())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

// =============================================================================
// Transaction hash
// =============================================================================

/// A 32-byte transaction hash
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TxHash([u8; 32]);

impl TxHash {
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl FromStr for TxHash {
    type Err = HexParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        decode_fixed::<32>(s).map(Self)
    }
}

impl fmt::Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TxHash({})", self)
    }
}

impl Serialize for TxHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TxHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

// =============================================================================
// Blocks, transactions, receipts
// =============================================================================

/// A native-asset transaction as seen inside a block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainTransaction {
    pub hash: TxHash,
    pub from: Address,
    /// `None` for contract creation
    pub to: Option<Address>,
    pub value: U256,
}

/// A block including its full transactions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub number: u64,
    pub transactions: Vec<ChainTransaction>,
}

impl Block {
    /// Transactions whose recipient is `address`
    pub fn transfers_to<'a>(
        &'a self,
        address: &'a Address,
    ) -> impl Iterator<Item = &'a ChainTransaction> + 'a {
        self.transactions
            .iter()
            .filter(move |tx| tx.to.as_ref() == Some(address))
    }
}

/// Final execution status of a mined transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiptStatus {
    Success,
    Reverted,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_known_vectors() {
        // Vectors from EIP-55
        for expected in [
            "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed",
            "0xfB6916095ca1df60bB79Ce92cE3Ea74c37c5d359",
            "0xdbF03B407c01E7cD3CBea99509d93f8DDDC8C6FB",
            "0xD1220A0cf47c7B9Be7A2E6BA89F429762e7b9aDb",
        ] {
            let address: Address = expected.to_lowercase().parse().unwrap();
            assert_eq!(address.to_checksum(), expected);
        }
    }

    #[test]
    fn test_address_parsing() {
        let lower: Address = "0x5aaeb6053f3e94c9b9a09f33669435e7ef1beaed".parse().unwrap();
        let upper: Address = "0x5AAEB6053F3E94C9B9A09F33669435E7EF1BEAED".parse().unwrap();
        let mixed: Address = "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed".parse().unwrap();
        assert_eq!(lower, upper);
        assert_eq!(lower, mixed);

        assert_eq!(
            "5aaeb6053f3e94c9b9a09f33669435e7ef1beaed".parse::<Address>(),
            Err(HexParseError::MissingPrefix)
        );
        assert!(matches!(
            "0x1234".parse::<Address>(),
            Err(HexParseError::InvalidLength { expected: 40, got: 4 })
        ));
        assert!(matches!(
            "0xzzaeb6053f3e94c9b9a09f33669435e7ef1beaed".parse::<Address>(),
            Err(HexParseError::InvalidHex(_))
        ));
        // Wrong case on the first letter
        assert!(matches!(
            "0x5AAeb6053F3E94C9b9A09f33669435E7Ef1BeAed".parse::<Address>(),
            Err(HexParseError::BadChecksum(_))
        ));
    }

    #[test]
    fn test_tx_hash_display_roundtrip() {
        let text = "0xdaf5a779ae972f972197303d7b574746c7ef83eadac0f2791ad23db92e4c8e53";
        let hash: TxHash = text.parse().unwrap();
        assert_eq!(hash.to_string(), text);
    }

    #[test]
    fn test_transfers_to_filters_recipient() {
        let target = Address::from_bytes([0x11; 20]);
        let other = Address::from_bytes([0x22; 20]);
        let tx = |to: Option<Address>, n: u8| ChainTransaction {
            hash: TxHash::from_bytes([n; 32]),
            from: other,
            to,
            value: U256::from(n),
        };

        let block = Block {
            number: 1,
            transactions: vec![tx(Some(target), 1), tx(Some(other), 2), tx(None, 3), tx(Some(target), 4)],
        };

        let values: Vec<U256> = block.transfers_to(&target).map(|t| t.value).collect();
        assert_eq!(values, vec![U256::from(1), U256::from(4)]);
    }
}
