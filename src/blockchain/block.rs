use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::crypto::content_hash;
use super::transaction::Transaction;

/// Previous-hash value carried by the genesis block
pub const GENESIS_PREVIOUS_HASH: &str = "0";

/// Represents a block in the blockchain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Block {
    /// Index of the block in the chain
    pub index: u64,

    /// Timestamp when the block was created
    #[schema(value_type = String, example = "2023-01-01T12:00:00Z")]
    pub timestamp: DateTime<Utc>,

    /// List of transactions included in this block
    pub transactions: Vec<Transaction>,

    /// Proof of work counter
    pub nonce: u64,

    /// Hash of the previous block
    pub previous_hash: String,

    /// Hash of the current block
    pub hash: String,
}

impl Block {
    /// Creates a new block stamped with the current time and nonce 0
    ///
    /// # Arguments
    ///
    /// * `index` - The index of the block in the chain
    /// * `transactions` - The list of transactions to include in the block
    /// * `previous_hash` - The hash of the previous block
    pub fn new(index: u64, transactions: Vec<Transaction>, previous_hash: String) -> Self {
        Self::with_timestamp(index, transactions, previous_hash, Utc::now(), 0)
    }

    /// Creates a block with an explicit timestamp and nonce
    pub fn with_timestamp(
        index: u64,
        transactions: Vec<Transaction>,
        previous_hash: String,
        timestamp: DateTime<Utc>,
        nonce: u64,
    ) -> Self {
        let mut block = Block {
            index,
            timestamp,
            transactions,
            nonce,
            previous_hash,
            hash: String::new(),
        };
        block.hash = block.calculate_hash();
        block
    }

    /// The first block of every chain. It is not mined.
    pub fn genesis() -> Self {
        Self::new(0, vec![Transaction::genesis()], GENESIS_PREVIOUS_HASH.to_string())
    }

    /// Calculates the hash of the block
    ///
    /// # Returns
    ///
    /// The SHA-256 hash of the block as a hexadecimal string
    pub fn calculate_hash(&self) -> String {
        let block_data = serde_json::json!({
            "index": self.index,
            "timestamp": self.timestamp,
            "transactions": self.transactions,
            "nonce": self.nonce,
            "previous_hash": self.previous_hash,
        });

        content_hash(&block_data)
    }

    /// Whether the stored hash starts with `difficulty` zero hex digits
    pub fn meets_difficulty(&self, difficulty: u8) -> bool {
        let difficulty = difficulty as usize;
        self.hash.len() >= difficulty && self.hash.bytes().take(difficulty).all(|b| b == b'0')
    }

    /// Runs proof of work until the hash meets `difficulty`.
    ///
    /// Returns the number of nonce increments; a block that already
    /// qualifies is left untouched and 0 is returned.
    pub fn mine(&mut self, difficulty: u8) -> u64 {
        let mut attempts = 0;

        while !self.meets_difficulty(difficulty) {
            self.nonce += 1;
            self.hash = self.calculate_hash();
            attempts += 1;
        }

        attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::Address;

    fn reward_block() -> Block {
        let transactions = vec![
            Transaction::new_reward(Address::from("recipient1"), 10.0),
            Transaction::new_reward(Address::from("recipient2"), 20.0),
        ];

        Block::new(1, transactions, "previous_hash".to_string())
    }

    #[test]
    fn test_new_block() {
        let block = reward_block();

        assert_eq!(block.index, 1);
        assert_eq!(block.nonce, 0);
        assert_eq!(block.previous_hash, "previous_hash");
        assert_eq!(block.hash, block.calculate_hash());
        assert_eq!(block.hash.len(), 64);
    }

    #[test]
    fn test_genesis_block() {
        let genesis = Block::genesis();

        assert_eq!(genesis.index, 0);
        assert_eq!(genesis.previous_hash, "0");
        assert_eq!(genesis.transactions.len(), 1);
        assert_eq!(genesis.transactions[0].sender.as_str(), "GENESIS");
        assert_eq!(genesis.transactions[0].recipient.as_str(), "GENESIS");
    }

    #[test]
    fn test_hash_covers_every_field() {
        let block = reward_block();

        let mut changed = block.clone();
        changed.nonce += 1;
        assert_ne!(changed.calculate_hash(), block.hash);

        let mut changed = block.clone();
        changed.previous_hash = "other".to_string();
        assert_ne!(changed.calculate_hash(), block.hash);

        let mut changed = block.clone();
        changed.transactions.swap(0, 1);
        assert_ne!(changed.calculate_hash(), block.hash);

        let mut changed = block.clone();
        changed.transactions[0].amount = 11.0;
        assert_ne!(changed.calculate_hash(), block.hash);
    }

    #[test]
    fn test_hash_is_stable_across_serialization() {
        let block = reward_block();
        let json = serde_json::to_string(&block).unwrap();
        let parsed: Block = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.calculate_hash(), block.hash);
    }

    #[test]
    fn test_mine_block() {
        let mut block = reward_block();
        block.mine(2);

        assert!(block.hash.starts_with("00"));
        assert_eq!(block.hash, block.calculate_hash());
    }

    #[test]
    fn test_mining_an_already_valid_block_does_nothing() {
        let mut block = reward_block();
        block.mine(2);
        let mined = block.clone();

        assert_eq!(block.mine(2), 0);
        assert_eq!(block, mined);
        // a lower target is met as well
        assert_eq!(block.mine(1), 0);
    }

    #[test]
    fn test_meets_difficulty() {
        let mut block = reward_block();
        block.hash = "000abc".to_string();

        assert!(block.meets_difficulty(0));
        assert!(block.meets_difficulty(3));
        assert!(!block.meets_difficulty(4));
        assert!(!block.meets_difficulty(10));
    }
}
