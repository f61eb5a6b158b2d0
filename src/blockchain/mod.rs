// Blockchain module
//
// This module contains the ledger engine:
// - Block structure and proof of work
// - Transaction structure, signing and validation
// - Cryptography utilities
// - Balance table and chain replay
// - Storage backends (sled, in-memory)
// - The ledger itself (chain + pending pool)

pub mod account;
pub mod block;
pub mod chain;
pub mod crypto;
pub mod storage;
pub mod transaction;

// Re-export main components for easier access
pub use account::Account;
pub use block::Block;
pub use chain::{Blockchain, BlockchainError, ChainViolation, HistoryEntry, Rejection};
pub use crypto::{Address, DigitalSignature, Wallet};
pub use storage::{LedgerStorage, MemoryStorage, SledStorage, StorageError, TransactionRecord};
pub use transaction::{MarkerData, Sender, Transaction, TransactionKind};
