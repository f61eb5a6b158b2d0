use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use super::account::{replay_balance, same_balances, Account, AccountState};
use super::block::Block;
use super::crypto::Address;
use super::storage::{LedgerStorage, MemoryStorage, SledStorage, StorageError, TransactionRecord};
use super::transaction::{Sender, Transaction, TransactionKind};
use crate::config::LedgerConfig;

/// Lowest accepted mining difficulty
pub const MIN_DIFFICULTY: u8 = 1;

/// Highest accepted mining difficulty
pub const MAX_DIFFICULTY: u8 = 10;

/// Caller-recoverable reasons for refusing a request
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Rejection {
    #[error("Invalid transaction: {0}")]
    InvalidTransaction(String),

    #[error("Insufficient funds: required {required}, available {available}")]
    InsufficientFunds { required: f64, available: f64 },

    #[error("Duplicate transaction: nonce {0} was already submitted")]
    DuplicateTransaction(String),

    #[error("Difficulty must be between 1 and 10, got {0}")]
    InvalidDifficulty(u8),
}

/// Errors that can occur during blockchain operations
#[derive(Debug, Error)]
pub enum BlockchainError {
    #[error(transparent)]
    Rejected(#[from] Rejection),

    #[error("Storage error: {0}")]
    StorageError(#[from] StorageError),

    #[error("System error: {0}")]
    SystemError(String),
}

impl BlockchainError {
    /// Whether the failure was caused by the caller's input
    pub fn is_rejection(&self) -> bool {
        matches!(self, BlockchainError::Rejected(_))
    }
}

/// First integrity violation found while walking the chain
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize, ToSchema)]
#[error("Block {index} is invalid: {reason}")]
pub struct ChainViolation {
    pub index: u64,
    pub reason: String,
}

/// A mined transaction as seen from an address' history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct HistoryEntry {
    pub block_index: u64,
    pub kind: TransactionKind,
    pub transaction: Transaction,
}

#[derive(Debug)]
struct ChainState {
    /// Never empty: genesis is pushed at construction
    chain: Vec<Block>,

    /// Pending transactions to be included in the next block
    pending: Vec<Transaction>,

    /// Mining difficulty (number of leading zero hex digits)
    difficulty: u8,

    /// Nonces of every transaction on the chain or in the pool
    seen_nonces: HashSet<String>,
}

impl ChainState {
    fn tip(&self) -> &Block {
        self.chain.last().expect("chain always holds the genesis block")
    }

    /// Sum of amounts the sender already has queued in the pool
    fn pending_spend(&self, sender: &Sender) -> f64 {
        self.pending
            .iter()
            .filter(|transaction| transaction.sender == *sender)
            .map(|transaction| transaction.amount)
            .sum()
    }
}

/// The ledger: chain, pending pool and balance store.
///
/// Admission, mining and difficulty changes are serialized by `writer`.
/// Readers only take `state`, which mining holds exclusively just for the
/// commit, so queries never wait on proof of work.
#[derive(Debug)]
pub struct Blockchain {
    state: RwLock<ChainState>,
    writer: Mutex<()>,
    storage: Arc<dyn LedgerStorage>,
    mining_reward: f64,
}

fn check_difficulty(difficulty: u8) -> Result<u8, Rejection> {
    if (MIN_DIFFICULTY..=MAX_DIFFICULTY).contains(&difficulty) {
        Ok(difficulty)
    } else {
        Err(Rejection::InvalidDifficulty(difficulty))
    }
}

impl Blockchain {
    /// Creates a ledger whose state lives only in this process
    pub fn in_memory(config: LedgerConfig) -> Result<Self, BlockchainError> {
        Self::open(Arc::new(MemoryStorage::new()), config)
    }

    /// Creates or reopens a ledger persisted with sled at `storage_path`
    pub fn with_storage<P: AsRef<Path>>(
        storage_path: P,
        config: LedgerConfig,
    ) -> Result<Self, BlockchainError> {
        let storage = SledStorage::new(storage_path)?;
        Self::open(Arc::new(storage), config)
    }

    /// Opens a ledger over any storage backend.
    ///
    /// The genesis block is written only when the backend holds no blocks.
    /// A stored balance table that disagrees with the chain is rebuilt.
    pub fn open(storage: Arc<dyn LedgerStorage>, config: LedgerConfig) -> Result<Self, BlockchainError> {
        let configured_difficulty = check_difficulty(config.difficulty)?;

        let mut chain = storage.load_blocks()?;
        if chain.is_empty() {
            let genesis = Block::genesis();
            storage.append_block(&genesis)?;
            info!("Created genesis block {}", genesis.hash);
            chain.push(genesis);
        }

        let difficulty = match storage.load_difficulty()? {
            Some(stored) => check_difficulty(stored).unwrap_or_else(|rejection| {
                warn!("Ignoring stored difficulty: {}", rejection);
                configured_difficulty
            }),
            None => configured_difficulty,
        };

        let seen_nonces = chain
            .iter()
            .flat_map(|block| block.transactions.iter())
            .map(|transaction| transaction.nonce.clone())
            .collect();

        let blockchain = Blockchain {
            state: RwLock::new(ChainState {
                chain,
                pending: Vec::new(),
                difficulty,
                seen_nonces,
            }),
            writer: Mutex::new(()),
            storage,
            mining_reward: config.mining_reward,
        };

        blockchain.verify_balances()?;

        info!(
            "Ledger ready: height {}, difficulty {}, reward {}",
            blockchain.get_latest_block().index,
            difficulty,
            blockchain.mining_reward
        );

        Ok(blockchain)
    }

    /// Compares the stored balance table with a chain replay and rebuilds it on mismatch
    fn verify_balances(&self) -> Result<(), BlockchainError> {
        let replayed = {
            let state = self.state.read();
            AccountState::replay(&state.chain).get_all_accounts()
        };

        let consistent = match self.storage.accounts() {
            Ok(stored) => same_balances(&stored, &replayed),
            Err(err) => {
                warn!("Failed to load accounts from storage: {}", err);
                false
            }
        };

        if !consistent {
            warn!("Stored balances disagree with the chain, rebuilding from blocks");
            self.storage.replace_balances(&replayed)?;
        }

        Ok(())
    }

    /// Gets the last block in the chain
    pub fn get_latest_block(&self) -> Block {
        self.state.read().tip().clone()
    }

    /// Adds a new transaction to the pending pool
    ///
    /// The sender's confirmed balance minus what it already has pending
    /// must cover the amount; `MINING_REWARD` senders skip that check.
    ///
    /// # Returns
    ///
    /// The index of the block that will include this transaction
    pub fn add_transaction(&self, transaction: Transaction) -> Result<u64, BlockchainError> {
        if !transaction.is_valid() {
            warn!("Rejected transaction {} from {}: invalid signature", transaction.nonce, transaction.sender);
            return Err(Rejection::InvalidTransaction(
                "signature, public key or sender address does not verify".to_string(),
            )
            .into());
        }

        let _writer = self.writer.lock();
        let mut state = self.state.write();

        if state.seen_nonces.contains(&transaction.nonce) {
            warn!("Rejected duplicate transaction {}", transaction.nonce);
            return Err(Rejection::DuplicateTransaction(transaction.nonce).into());
        }

        if transaction.sender != Sender::MiningReward {
            let confirmed = self.storage.balance(&transaction.sender.address())?;
            let available = confirmed - state.pending_spend(&transaction.sender);

            if available < transaction.amount {
                warn!(
                    "Rejected transaction {} from {}: needs {}, has {}",
                    transaction.nonce, transaction.sender, transaction.amount, available
                );
                return Err(Rejection::InsufficientFunds {
                    required: transaction.amount,
                    available,
                }
                .into());
            }
        }

        debug!(
            "Accepted transaction {} ({} -> {}, {})",
            transaction.nonce, transaction.sender, transaction.recipient, transaction.amount
        );

        state.seen_nonces.insert(transaction.nonce.clone());
        state.pending.push(transaction);

        Ok(state.tip().index + 1)
    }

    /// Mines a new block with the pending transactions plus a reward for `miner_address`
    ///
    /// The pool is cleared and the tip advanced only after the storage
    /// accepted the block; on failure the ledger is left as it was.
    pub fn mine_pending_transactions(&self, miner_address: &Address) -> Result<Block, BlockchainError> {
        let _writer = self.writer.lock();

        let (mut block, difficulty) = {
            let state = self.state.read();
            let mut transactions = state.pending.clone();
            transactions.push(Transaction::new_reward(miner_address.clone(), self.mining_reward));

            let tip = state.tip();
            (
                Block::new(tip.index + 1, transactions, tip.hash.clone()),
                state.difficulty,
            )
        };

        let attempts = block.mine(difficulty);
        debug!("Found proof for block {} after {} attempts", block.index, attempts);

        let mut state = self.state.write();
        self.storage.append_block(&block)?;

        state
            .seen_nonces
            .extend(block.transactions.iter().map(|transaction| transaction.nonce.clone()));
        state.pending.clear();
        state.chain.push(block.clone());

        info!(
            "Mined block {} with {} transactions: {}",
            block.index,
            block.transactions.len(),
            block.hash
        );

        Ok(block)
    }

    /// Gets the entire blockchain
    pub fn get_chain(&self) -> Vec<Block> {
        self.state.read().chain.clone()
    }

    /// Gets all pending transactions, in submission order
    pub fn get_pending_transactions(&self) -> Vec<Transaction> {
        self.state.read().pending.clone()
    }

    pub fn get_difficulty(&self) -> u8 {
        self.state.read().difficulty
    }

    /// Changes the difficulty used for the next mined block
    pub fn set_difficulty(&self, difficulty: u8) -> Result<(), BlockchainError> {
        let difficulty = check_difficulty(difficulty)?;

        let _writer = self.writer.lock();
        let mut state = self.state.write();
        self.storage.save_difficulty(difficulty)?;
        state.difficulty = difficulty;

        info!("Difficulty set to {}", difficulty);
        Ok(())
    }

    pub fn mining_reward(&self) -> f64 {
        self.mining_reward
    }

    /// Confirmed balance from the balance store; pending transactions are not counted
    pub fn get_balance(&self, address: &Address) -> Result<f64, BlockchainError> {
        let _state = self.state.read();
        Ok(self.storage.balance(address)?)
    }

    /// Confirmed balance recomputed by folding the whole chain
    pub fn replayed_balance(&self, address: &Address) -> f64 {
        replay_balance(&self.state.read().chain, address)
    }

    /// All balance rows
    pub fn accounts(&self) -> Result<Vec<Account>, BlockchainError> {
        let _state = self.state.read();
        Ok(self.storage.accounts()?)
    }

    /// Rebuilds the balance store from the chain, returning the number of rows written
    pub fn reconcile_balances(&self) -> Result<usize, BlockchainError> {
        let _writer = self.writer.lock();
        let state = self.state.write();

        let accounts = AccountState::replay(&state.chain).get_all_accounts();
        self.storage.replace_balances(&accounts)?;

        info!("Rebuilt {} balances from {} blocks", accounts.len(), state.chain.len());
        Ok(accounts.len())
    }

    /// Every mined transaction where `address` is sender or recipient, in chain order
    pub fn get_transaction_history(&self, address: &Address) -> Vec<HistoryEntry> {
        let state = self.state.read();

        state
            .chain
            .iter()
            .flat_map(|block| {
                block
                    .transactions
                    .iter()
                    .filter(|transaction| {
                        transaction.sender.as_str() == address.as_str()
                            || transaction.recipient == *address
                    })
                    .map(move |transaction| HistoryEntry {
                        block_index: block.index,
                        kind: transaction.kind(),
                        transaction: transaction.clone(),
                    })
            })
            .collect()
    }

    /// Looks up a mined transaction by hash
    pub fn get_transaction(&self, hash: &str) -> Result<Option<TransactionRecord>, BlockchainError> {
        Ok(self.storage.get_transaction(hash)?)
    }

    /// Walks the chain and reports the first broken block
    pub fn validate_chain(&self) -> Result<(), ChainViolation> {
        let state = self.state.read();

        for pair in state.chain.windows(2) {
            let (previous_block, current_block) = (&pair[0], &pair[1]);
            let violation = |reason: &str| ChainViolation {
                index: current_block.index,
                reason: reason.to_string(),
            };

            if current_block.hash != current_block.calculate_hash() {
                return Err(violation("stored hash does not match block contents"));
            }

            if current_block.previous_hash != previous_block.hash {
                return Err(violation("previous hash does not link to the prior block"));
            }

            if current_block.transactions.iter().any(|transaction| !transaction.is_valid()) {
                return Err(violation("contains an invalid transaction"));
            }
        }

        Ok(())
    }

    /// Validates the blockchain
    pub fn is_chain_valid(&self) -> bool {
        self.validate_chain().is_ok()
    }
}
