use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;

use std::collections::BTreeMap;
use std::fmt;

use super::crypto::{
    content_hash, decode_public_key, verify_signature, Address, CryptoError, DigitalSignature,
    Wallet,
};

/// Sender sentinel for the genesis transaction
pub const GENESIS: &str = "GENESIS";

/// Sender sentinel for mining rewards
pub const MINING_REWARD: &str = "MINING_REWARD";

/// Errors that can occur while signing a transaction
#[derive(Debug, Error)]
pub enum TransactionError {
    #[error("Transaction already signed")]
    AlreadySigned,

    #[error("Wrong signer: {0}")]
    WrongSigner(String),

    #[error("Crypto error: {0}")]
    CryptoError(#[from] CryptoError),
}

/// Who a transaction debits.
///
/// Serialized as a plain string: the two sentinels or the account address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Sender {
    Genesis,
    MiningReward,
    Account(Address),
}

impl Sender {
    pub fn as_str(&self) -> &str {
        match self {
            Sender::Genesis => GENESIS,
            Sender::MiningReward => MINING_REWARD,
            Sender::Account(address) => address.as_str(),
        }
    }

    /// The balance-table key for this sender
    pub fn address(&self) -> Address {
        Address(self.as_str().to_string())
    }

    /// Sentinel senders mint value and are never debited
    pub fn is_debited(&self) -> bool {
        matches!(self, Sender::Account(_))
    }
}

impl From<String> for Sender {
    fn from(s: String) -> Self {
        match s.as_str() {
            GENESIS => Sender::Genesis,
            MINING_REWARD => Sender::MiningReward,
            _ => Sender::Account(Address(s)),
        }
    }
}

impl From<Sender> for String {
    fn from(sender: Sender) -> Self {
        match sender {
            Sender::Account(address) => address.0,
            other => other.as_str().to_string(),
        }
    }
}

impl From<Address> for Sender {
    fn from(address: Address) -> Self {
        Sender::from(address.0)
    }
}

impl fmt::Display for Sender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a transaction represents, derived from its contents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Genesis,
    Reward,
    Transfer,
    Marker,
}

/// Data attached to an amount-0 marker transaction (e.g. a supply-chain event)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct MarkerData {
    /// Event name, e.g. `register_product`
    pub event: String,

    /// Identifier of the tracked entity
    pub reference: String,

    #[serde(default)]
    #[schema(value_type = Object)]
    pub details: BTreeMap<String, String>,
}

/// Represents a transaction in the blockchain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Transaction {
    /// Sender's address, or `GENESIS` / `MINING_REWARD`
    #[schema(value_type = String, example = "MINING_REWARD")]
    pub sender: Sender,

    /// Recipient's address
    pub recipient: Address,

    /// Amount being transferred
    pub amount: f64,

    /// Timestamp when the transaction was created
    #[schema(value_type = String, example = "2023-01-01T12:00:00Z")]
    pub timestamp: DateTime<Utc>,

    /// Unique token to prevent replays
    pub nonce: String,

    /// Sender's public key (base58)
    #[serde(default)]
    pub public_key: Option<String>,

    /// Digital signature over the signing payload
    #[serde(default)]
    pub signature: Option<DigitalSignature>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub marker: Option<MarkerData>,
}

impl Transaction {
    /// Creates a new unsigned transaction
    ///
    /// The amount is not checked here; positivity is enforced by callers.
    pub fn new(
        sender: impl Into<Sender>,
        recipient: Address,
        amount: f64,
        public_key: Option<String>,
    ) -> Self {
        Transaction {
            sender: sender.into(),
            recipient,
            amount,
            timestamp: Utc::now(),
            nonce: Uuid::new_v4().to_string(),
            public_key,
            signature: None,
            marker: None,
        }
    }

    /// Creates a mining reward transaction
    ///
    /// # Arguments
    ///
    /// * `recipient` - The address of the miner
    /// * `amount` - The reward amount
    pub fn new_reward(recipient: Address, amount: f64) -> Self {
        Self::new(Sender::MiningReward, recipient, amount, None)
    }

    /// Creates the single `GENESIS -> GENESIS` transaction of block 0
    pub fn genesis() -> Self {
        Self::new(Sender::Genesis, Address(GENESIS.to_string()), 0.0, None)
    }

    /// Creates an amount-0 marker transaction. It must still be signed by `sender`.
    pub fn new_marker(sender: Address, recipient: Address, marker: MarkerData) -> Self {
        Transaction {
            marker: Some(marker),
            ..Self::new(sender, recipient, 0.0, None)
        }
    }

    pub fn kind(&self) -> TransactionKind {
        match (&self.sender, &self.marker) {
            (Sender::Genesis, _) => TransactionKind::Genesis,
            (Sender::MiningReward, _) => TransactionKind::Reward,
            (Sender::Account(_), Some(_)) => TransactionKind::Marker,
            (Sender::Account(_), None) => TransactionKind::Transfer,
        }
    }

    /// Canonical content of the transaction: everything except the signature
    fn payload(&self) -> serde_json::Value {
        let mut payload = serde_json::json!({
            "sender": self.sender.as_str(),
            "recipient": self.recipient.0,
            "amount": self.amount,
            "public_key": self.public_key,
            "timestamp": self.timestamp,
            "nonce": self.nonce,
        });

        if let Some(marker) = &self.marker {
            payload["marker"] = serde_json::json!(marker);
        }

        payload
    }

    /// Bytes that are signed and verified
    pub fn signing_payload(&self) -> Vec<u8> {
        self.payload().to_string().into_bytes()
    }

    /// Content hash, used for identity and lookups
    pub fn hash(&self) -> String {
        content_hash(&self.payload())
    }

    /// Signs the transaction with a wallet
    ///
    /// Reward transactions are left untouched. The wallet's public key is
    /// attached when the transaction does not carry one yet.
    pub fn sign(&mut self, wallet: &Wallet) -> Result<(), TransactionError> {
        if self.sender == Sender::MiningReward {
            return Ok(());
        }

        if self.signature.is_some() {
            return Err(TransactionError::AlreadySigned);
        }

        if self.sender != Sender::Account(wallet.address().clone()) {
            return Err(TransactionError::WrongSigner(
                "Wallet address does not match sender address".to_string(),
            ));
        }

        let public_key = wallet.encoded_public_key();
        match &self.public_key {
            Some(existing) if *existing != public_key => {
                return Err(TransactionError::WrongSigner(
                    "Public key does not belong to the signing wallet".to_string(),
                ));
            }
            Some(_) => {}
            None => self.public_key = Some(public_key),
        }

        self.signature = Some(wallet.sign(&self.signing_payload()));

        Ok(())
    }

    /// Checks the transaction's self-contained validity.
    ///
    /// Never fails: malformed keys or signatures simply make it invalid.
    pub fn is_valid(&self) -> bool {
        if self.sender == Sender::MiningReward {
            return true;
        }

        if !self.amount.is_finite() {
            return false;
        }

        let (signature, encoded_key) = match (&self.signature, &self.public_key) {
            (Some(signature), Some(key)) => (signature, key),
            _ => return false,
        };

        let public_key = match decode_public_key(encoded_key) {
            Ok(key) => key,
            Err(_) => return false,
        };

        // The key has to own the sender address, not just produce a valid signature
        match &self.sender {
            Sender::Account(address) if *address == Address::from_public_key(&public_key) => {}
            _ => return false,
        }

        verify_signature(&self.signing_payload(), signature, &public_key).unwrap_or(false)
    }
}
