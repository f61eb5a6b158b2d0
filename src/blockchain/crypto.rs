use ed25519_dalek::{Signature, SigningKey, Signer, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use utoipa::ToSchema;

use std::fmt;

/// Number of hex characters kept from the public key digest to form an address
pub const ADDRESS_LENGTH: usize = 40;

/// Errors that can occur during cryptographic operations
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("Invalid private key: {0}")]
    InvalidPrivateKey(String),

    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    #[error("Decoding error: {0}")]
    DecodingError(String),
}

/// Hashes a JSON value with SHA-256 and returns the lowercase hex digest.
///
/// `serde_json::Value` keeps object keys sorted, so two values with the same
/// content always render to the same bytes.
pub fn content_hash(value: &serde_json::Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(value.to_string().as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Represents a wallet address (truncated hex digest of a public key)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
pub struct Address(pub String);

impl Address {
    /// Derives the address owned by a public key
    pub fn from_public_key(public_key: &VerifyingKey) -> Self {
        let digest = Sha256::digest(public_key.as_bytes());
        let mut encoded = hex::encode(digest);
        encoded.truncate(ADDRESS_LENGTH);
        Address(encoded)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Address {
    fn from(s: &str) -> Self {
        Address(s.to_string())
    }
}

/// Encodes a public key the way it travels inside transactions (base58)
pub fn encode_public_key(public_key: &VerifyingKey) -> String {
    bs58::encode(public_key.as_bytes()).into_string()
}

/// Decodes base58 text into exactly `N` bytes
fn decode_base58<const N: usize>(
    encoded: &str,
    wrong_length: fn(String) -> CryptoError,
) -> Result<[u8; N], CryptoError> {
    let bytes = bs58::decode(encoded)
        .into_vec()
        .map_err(|e| CryptoError::DecodingError(e.to_string()))?;
    let len = bytes.len();

    bytes
        .try_into()
        .map_err(|_| wrong_length(format!("expected {} bytes, got {}", N, len)))
}

/// Decodes a base58 public key
pub fn decode_public_key(encoded: &str) -> Result<VerifyingKey, CryptoError> {
    let bytes = decode_base58::<32>(encoded, CryptoError::InvalidPublicKey)?;
    VerifyingKey::from_bytes(&bytes).map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))
}

/// Represents a digital signature
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct DigitalSignature(pub String);

impl DigitalSignature {
    pub fn from_signature(signature: &Signature) -> Self {
        DigitalSignature(bs58::encode(signature.to_bytes()).into_string())
    }

    /// Parses the base58 text back into an Ed25519 signature
    pub fn to_signature(&self) -> Result<Signature, CryptoError> {
        let bytes = decode_base58::<64>(&self.0, CryptoError::InvalidSignature)?;
        Ok(Signature::from_bytes(&bytes))
    }
}

/// An Ed25519 keypair and the address it controls
#[derive(Debug, Clone)]
pub struct Wallet {
    signing_key: SigningKey,
    verifying_key: VerifyingKey,
    address: Address,
}

impl Wallet {
    /// Generates a fresh keypair from the OS random source
    pub fn new() -> Self {
        Self::from_signing_key(SigningKey::generate(&mut OsRng))
    }

    /// Restores a wallet from its 32 secret key bytes
    pub fn from_secret_key(secret_key: &[u8]) -> Result<Self, CryptoError> {
        let secret: [u8; 32] = secret_key.try_into().map_err(|_| {
            CryptoError::InvalidPrivateKey(format!("expected 32 bytes, got {}", secret_key.len()))
        })?;

        Ok(Self::from_signing_key(SigningKey::from_bytes(&secret)))
    }

    /// Creates a wallet from a hex-encoded secret key
    pub fn from_secret_hex(secret_key_hex: &str) -> Result<Self, CryptoError> {
        let bytes = hex::decode(secret_key_hex.trim())
            .map_err(|e| CryptoError::InvalidPrivateKey(e.to_string()))?;
        Self::from_secret_key(&bytes)
    }

    fn from_signing_key(signing_key: SigningKey) -> Self {
        let verifying_key = VerifyingKey::from(&signing_key);
        let address = Address::from_public_key(&verifying_key);

        Wallet {
            signing_key,
            verifying_key,
            address,
        }
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn public_key(&self) -> &VerifyingKey {
        &self.verifying_key
    }

    /// Gets the wallet's public key in transaction encoding
    pub fn encoded_public_key(&self) -> String {
        encode_public_key(&self.verifying_key)
    }

    pub fn sign(&self, message: &[u8]) -> DigitalSignature {
        DigitalSignature::from_signature(&self.signing_key.sign(message))
    }

    /// Raw secret key bytes; the API hands them out hex encoded
    pub fn export_secret_key(&self) -> Vec<u8> {
        self.signing_key.to_bytes().to_vec()
    }
}

impl Default for Wallet {
    fn default() -> Self {
        Self::new()
    }
}

/// Checks `signature` over `message`.
///
/// Returns `Ok(false)` for a well-formed signature that does not verify and
/// `Err` when the signature text cannot be decoded at all.
pub fn verify_signature(
    message: &[u8],
    signature: &DigitalSignature,
    public_key: &VerifyingKey,
) -> Result<bool, CryptoError> {
    let signature = signature.to_signature()?;
    Ok(public_key.verify(message, &signature).is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wallet_creation() {
        let wallet = Wallet::new();
        assert_eq!(wallet.address().0.len(), ADDRESS_LENGTH);
        assert!(wallet.address().0.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_signing_and_verification() {
        let wallet = Wallet::new();
        let message = b"Hello, world!";

        let signature = wallet.sign(message);

        let result = verify_signature(message, &signature, wallet.public_key()).unwrap();
        assert!(result);

        // Verify with wrong message
        let wrong_message = b"Wrong message";
        let result = verify_signature(wrong_message, &signature, wallet.public_key()).unwrap();
        assert!(!result);
    }

    #[test]
    fn test_public_key_encoding() {
        let wallet = Wallet::new();
        let decoded = decode_public_key(&wallet.encoded_public_key()).unwrap();

        assert_eq!(decoded.as_bytes(), wallet.public_key().as_bytes());
        assert_eq!(Address::from_public_key(&decoded), *wallet.address());
    }

    #[test]
    fn test_secret_key_import() {
        let wallet = Wallet::new();
        let imported = Wallet::from_secret_hex(&hex::encode(wallet.export_secret_key())).unwrap();
        assert_eq!(imported.address(), wallet.address());

        assert!(Wallet::from_secret_hex("zz").is_err());
        assert!(Wallet::from_secret_key(&[1, 2, 3]).is_err());
    }

    #[test]
    fn test_malformed_signature() {
        let wallet = Wallet::new();
        let garbage = DigitalSignature("not base58 0OIl".to_string());
        assert!(verify_signature(b"msg", &garbage, wallet.public_key()).is_err());

        let short = DigitalSignature(bs58::encode([7u8; 10]).into_string());
        assert!(verify_signature(b"msg", &short, wallet.public_key()).is_err());
    }

    #[test]
    fn test_content_hash() {
        let a = serde_json::json!({"a": 2, "b": 1});
        let b = serde_json::json!({"a": 2, "b": 2});

        assert_eq!(content_hash(&a), content_hash(&a.clone()));
        assert_ne!(content_hash(&a), content_hash(&b));
        assert_eq!(content_hash(&a).len(), 64);
    }
}
