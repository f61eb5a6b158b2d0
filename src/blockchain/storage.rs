use std::fmt::Debug;
use std::path::Path;

use dashmap::DashMap;
use log::{info, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::{Batch, Db, Transactional, Tree};
use thiserror::Error;
use utoipa::ToSchema;

use super::account::{balance_deltas, Account, AccountState};
use super::block::Block;
use super::crypto::Address;
use super::transaction::Transaction;

const LATEST_BLOCK_HASH: &str = "latest_block_hash";
const BLOCK_HEIGHT: &str = "block_height";
const DIFFICULTY: &str = "difficulty";

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sled::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

/// A mined transaction together with the block that holds it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct TransactionRecord {
    pub block_index: u64,
    pub transaction: Transaction,
}

/// Durable state behind the ledger.
///
/// `append_block` must write the block, its transaction index entries and
/// its balance deltas as one unit: either all of it is visible afterwards
/// or none of it is.
pub trait LedgerStorage: Send + Sync + Debug {
    /// All stored blocks, ordered by index
    fn load_blocks(&self) -> Result<Vec<Block>, StorageError>;

    fn append_block(&self, block: &Block) -> Result<(), StorageError>;

    /// Stored balance, 0 for addresses never referenced
    fn balance(&self, address: &Address) -> Result<f64, StorageError>;

    fn accounts(&self) -> Result<Vec<Account>, StorageError>;

    /// Overwrites the whole balance table (reconciliation)
    fn replace_balances(&self, accounts: &[Account]) -> Result<(), StorageError>;

    fn get_transaction(&self, hash: &str) -> Result<Option<TransactionRecord>, StorageError>;

    fn load_difficulty(&self) -> Result<Option<u8>, StorageError>;

    fn save_difficulty(&self, difficulty: u8) -> Result<(), StorageError>;
}

/// Sled-backed storage for blockchain data
pub struct SledStorage {
    /// The database instance
    db: Db,

    /// Blocks keyed by big-endian index
    blocks: Tree,

    /// Transaction records keyed by transaction hash
    transactions: Tree,

    /// Balance rows keyed by address
    accounts: Tree,

    metadata: Tree,
}

impl std::fmt::Debug for SledStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SledStorage").finish()
    }
}

fn serialize_json<T: Serialize>(value: &T) -> Result<Vec<u8>, StorageError> {
    serde_json::to_vec(value).map_err(|e| StorageError::SerializationError(e.to_string()))
}

fn deserialize_account(bytes: &[u8]) -> Result<Account, StorageError> {
    bincode::deserialize(bytes).map_err(|e| StorageError::DeserializationError(e.to_string()))
}

fn serialize_account(account: &Account) -> Result<Vec<u8>, StorageError> {
    bincode::serialize(account).map_err(|e| StorageError::SerializationError(e.to_string()))
}

impl SledStorage {
    /// Opens (or creates) the database at `path`
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let db = sled::open(path)?;

        let blocks = db.open_tree("blocks")?;
        let transactions = db.open_tree("transactions")?;
        let accounts = db.open_tree("accounts")?;
        let metadata = db.open_tree("metadata")?;

        Ok(Self {
            db,
            blocks,
            transactions,
            accounts,
            metadata,
        })
    }

    /// Gets the latest block hash, if any block was stored
    pub fn get_latest_block_hash(&self) -> Result<Option<String>, StorageError> {
        Ok(self
            .metadata
            .get(LATEST_BLOCK_HASH)?
            .map(|value| String::from_utf8_lossy(&value).to_string()))
    }

    /// Gets the current block height (0 for an empty store)
    pub fn get_block_height(&self) -> Result<u64, StorageError> {
        match self.metadata.get(BLOCK_HEIGHT)? {
            Some(value) => bincode::deserialize(&value)
                .map_err(|e| StorageError::DeserializationError(e.to_string())),
            None => Ok(0),
        }
    }
}

impl LedgerStorage for SledStorage {
    fn load_blocks(&self) -> Result<Vec<Block>, StorageError> {
        let mut blocks = Vec::new();

        for result in self.blocks.iter() {
            let (_, value) = result?;
            let block: Block = serde_json::from_slice(&value)
                .map_err(|e| StorageError::DeserializationError(e.to_string()))?;
            blocks.push(block);
        }

        if !blocks.is_empty() {
            info!("Loaded {} blocks from storage", blocks.len());
        }

        Ok(blocks)
    }

    fn append_block(&self, block: &Block) -> Result<(), StorageError> {
        let key = block.index.to_be_bytes().to_vec();
        let value = serialize_json(block)?;
        let height = bincode::serialize(&block.index)
            .map_err(|e| StorageError::SerializationError(e.to_string()))?;

        let mut records = Vec::with_capacity(block.transactions.len());
        for transaction in &block.transactions {
            let record = TransactionRecord {
                block_index: block.index,
                transaction: transaction.clone(),
            };
            records.push((transaction.hash(), serialize_json(&record)?));
        }

        let deltas = balance_deltas(block);

        (&self.blocks, &self.transactions, &self.accounts, &self.metadata)
            .transaction(|(blocks, transactions, accounts, metadata)| {
                blocks.insert(key.clone(), value.clone())?;

                for (hash, record) in &records {
                    transactions.insert(hash.as_bytes(), record.clone())?;
                }

                for (address, delta) in &deltas {
                    let mut account = match accounts.get(address.0.as_bytes())? {
                        Some(bytes) => {
                            deserialize_account(&bytes).map_err(ConflictableTransactionError::Abort)?
                        }
                        None => Account::new(address.clone()),
                    };
                    account.apply(*delta);
                    let bytes = serialize_account(&account).map_err(ConflictableTransactionError::Abort)?;
                    accounts.insert(address.0.as_bytes(), bytes)?;
                }

                metadata.insert(LATEST_BLOCK_HASH, block.hash.as_bytes())?;
                metadata.insert(BLOCK_HEIGHT, height.clone())?;

                Ok(())
            })
            .map_err(|e: TransactionError<StorageError>| match e {
                TransactionError::Abort(e) => e,
                TransactionError::Storage(e) => StorageError::DatabaseError(e),
            })?;

        self.db.flush()?;
        Ok(())
    }

    fn balance(&self, address: &Address) -> Result<f64, StorageError> {
        match self.accounts.get(address.0.as_bytes())? {
            Some(bytes) => Ok(deserialize_account(&bytes)?.balance),
            None => Ok(0.0),
        }
    }

    fn accounts(&self) -> Result<Vec<Account>, StorageError> {
        let mut accounts = Vec::new();
        let mut deserialization_errors = Vec::new();

        for result in self.accounts.iter() {
            let (key, value) = result?;
            match deserialize_account(&value) {
                Ok(account) => accounts.push(account),
                Err(e) => {
                    let key_str = String::from_utf8_lossy(key.as_ref()).to_string();
                    deserialization_errors.push(format!("{}: {}", key_str, e));
                }
            }
        }

        // A damaged row makes the table untrustworthy; callers reconcile from the chain
        if !deserialization_errors.is_empty() {
            warn!("Some accounts could not be deserialized: {}", deserialization_errors.join(", "));
            return Err(StorageError::DeserializationError(deserialization_errors.join(", ")));
        }

        Ok(accounts)
    }

    fn replace_balances(&self, accounts: &[Account]) -> Result<(), StorageError> {
        let mut batch = Batch::default();

        for result in self.accounts.iter().keys() {
            batch.remove(result?);
        }
        for account in accounts {
            batch.insert(account.address.0.as_bytes(), serialize_account(account)?);
        }

        self.accounts.apply_batch(batch)?;
        self.db.flush()?;
        Ok(())
    }

    fn get_transaction(&self, hash: &str) -> Result<Option<TransactionRecord>, StorageError> {
        match self.transactions.get(hash.as_bytes())? {
            Some(value) => serde_json::from_slice(&value)
                .map(Some)
                .map_err(|e| StorageError::DeserializationError(e.to_string())),
            None => Ok(None),
        }
    }

    fn load_difficulty(&self) -> Result<Option<u8>, StorageError> {
        Ok(self
            .metadata
            .get(DIFFICULTY)?
            .and_then(|value| value.first().copied()))
    }

    fn save_difficulty(&self, difficulty: u8) -> Result<(), StorageError> {
        self.metadata.insert(DIFFICULTY, vec![difficulty])?;
        self.db.flush()?;
        Ok(())
    }
}

/// Process-local storage; everything is lost on restart
#[derive(Debug, Default)]
pub struct MemoryStorage {
    blocks: Mutex<Vec<Block>>,
    accounts: AccountState,
    transactions: DashMap<String, TransactionRecord>,
    difficulty: Mutex<Option<u8>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LedgerStorage for MemoryStorage {
    fn load_blocks(&self) -> Result<Vec<Block>, StorageError> {
        Ok(self.blocks.lock().clone())
    }

    fn append_block(&self, block: &Block) -> Result<(), StorageError> {
        let mut blocks = self.blocks.lock();

        for transaction in &block.transactions {
            self.transactions.insert(
                transaction.hash(),
                TransactionRecord {
                    block_index: block.index,
                    transaction: transaction.clone(),
                },
            );
        }
        self.accounts.apply_block(block);
        blocks.push(block.clone());

        Ok(())
    }

    fn balance(&self, address: &Address) -> Result<f64, StorageError> {
        Ok(self.accounts.balance(address))
    }

    fn accounts(&self) -> Result<Vec<Account>, StorageError> {
        Ok(self.accounts.get_all_accounts())
    }

    fn replace_balances(&self, accounts: &[Account]) -> Result<(), StorageError> {
        self.accounts.replace(accounts);
        Ok(())
    }

    fn get_transaction(&self, hash: &str) -> Result<Option<TransactionRecord>, StorageError> {
        Ok(self.transactions.get(hash).map(|record| record.clone()))
    }

    fn load_difficulty(&self) -> Result<Option<u8>, StorageError> {
        Ok(*self.difficulty.lock())
    }

    fn save_difficulty(&self, difficulty: u8) -> Result<(), StorageError> {
        *self.difficulty.lock() = Some(difficulty);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::Wallet;
    use tempfile::TempDir;

    fn mined_blocks() -> (Vec<Block>, Address, Address) {
        let alice = Wallet::new();
        let bob = Address::from("bob");

        let genesis = Block::genesis();
        let mut block1 = Block::new(
            1,
            vec![Transaction::new_reward(alice.address().clone(), 50.0)],
            genesis.hash.clone(),
        );
        block1.mine(1);

        let mut transfer = Transaction::new(alice.address().clone(), bob.clone(), 20.0, None);
        transfer.sign(&alice).unwrap();
        let mut block2 = Block::new(2, vec![transfer], block1.hash.clone());
        block2.mine(1);

        (vec![genesis, block1, block2], alice.address().clone(), bob)
    }

    fn exercise_backend(storage: &dyn LedgerStorage) {
        let (blocks, alice, bob) = mined_blocks();
        assert!(storage.load_blocks().unwrap().is_empty());

        for block in &blocks {
            storage.append_block(block).unwrap();
        }

        assert_eq!(storage.load_blocks().unwrap(), blocks);
        assert_eq!(storage.balance(&alice).unwrap(), 30.0);
        assert_eq!(storage.balance(&bob).unwrap(), 20.0);
        assert_eq!(storage.balance(&Address::from("nobody")).unwrap(), 0.0);

        let transfer = &blocks[2].transactions[0];
        let record = storage.get_transaction(&transfer.hash()).unwrap().unwrap();
        assert_eq!(record.block_index, 2);
        assert_eq!(&record.transaction, transfer);
        assert!(storage.get_transaction("missing").unwrap().is_none());

        assert_eq!(storage.load_difficulty().unwrap(), None);
        storage.save_difficulty(6).unwrap();
        assert_eq!(storage.load_difficulty().unwrap(), Some(6));

        storage.replace_balances(&[Account { address: bob.clone(), balance: 5.0 }]).unwrap();
        assert_eq!(storage.balance(&bob).unwrap(), 5.0);
        assert_eq!(storage.balance(&alice).unwrap(), 0.0);
        assert_eq!(storage.accounts().unwrap().len(), 1);
    }

    #[test]
    fn test_memory_storage() {
        exercise_backend(&MemoryStorage::new());
    }

    #[test]
    fn test_sled_storage() {
        let dir = TempDir::new().unwrap();
        let storage = SledStorage::new(dir.path()).unwrap();
        exercise_backend(&storage);

        assert_eq!(storage.get_block_height().unwrap(), 2);
        assert!(storage.get_latest_block_hash().unwrap().is_some());
    }

    #[test]
    fn test_sled_storage_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let (blocks, alice, _) = mined_blocks();

        {
            let storage = SledStorage::new(dir.path()).unwrap();
            for block in &blocks {
                storage.append_block(block).unwrap();
            }
            storage.save_difficulty(3).unwrap();
        }

        let storage = SledStorage::new(dir.path()).unwrap();
        let loaded = storage.load_blocks().unwrap();

        assert_eq!(loaded, blocks);
        assert_eq!(loaded[2].calculate_hash(), blocks[2].hash);
        assert_eq!(storage.balance(&alice).unwrap(), 30.0);
        assert_eq!(storage.load_difficulty().unwrap(), Some(3));
        assert_eq!(storage.get_latest_block_hash().unwrap(), Some(blocks[2].hash.clone()));
    }

    #[test]
    fn test_sled_blocks_load_in_index_order() {
        let dir = TempDir::new().unwrap();
        let storage = SledStorage::new(dir.path()).unwrap();

        // indices past 255 would sort wrongly with little-endian keys
        let mut previous = Block::genesis();
        storage.append_block(&previous).unwrap();
        for index in 1..=260 {
            let block = Block::new(index, Vec::new(), previous.hash.clone());
            storage.append_block(&block).unwrap();
            previous = block;
        }

        let indices: Vec<u64> = storage.load_blocks().unwrap().iter().map(|b| b.index).collect();
        assert_eq!(indices, (0..=260).collect::<Vec<u64>>());
    }
}
