use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use std::sync::Arc;

use super::block::Block;
use super::crypto::Address;

/// Represents an account row in the balance table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Account {
    /// The account's address
    pub address: Address,

    /// The account's balance (may be negative)
    pub balance: f64,
}

impl Account {
    /// Creates a new account with zero balance
    pub fn new(address: Address) -> Self {
        Account {
            address,
            balance: 0.0,
        }
    }

    pub fn apply(&mut self, delta: f64) {
        self.balance += delta;
    }
}

/// Per-transaction balance changes of a block, in transaction order.
///
/// Each transaction credits its recipient and, unless the sender is a
/// sentinel, debits its sender. Sender debits come first.
pub fn balance_deltas(block: &Block) -> Vec<(Address, f64)> {
    let mut deltas = Vec::with_capacity(block.transactions.len() * 2);

    for transaction in &block.transactions {
        if transaction.sender.is_debited() {
            deltas.push((transaction.sender.address(), -transaction.amount));
        }
        deltas.push((transaction.recipient.clone(), transaction.amount));
    }

    deltas
}

/// Folds every transaction of the chain into the balance of one address
pub fn replay_balance(chain: &[Block], address: &Address) -> f64 {
    chain
        .iter()
        .flat_map(balance_deltas)
        .filter(|(account, _)| account == address)
        .fold(0.0, |balance, (_, delta)| balance + delta)
}

/// In-memory address -> balance table
#[derive(Debug, Clone, Default)]
pub struct AccountState {
    accounts: Arc<DashMap<Address, Account>>,
}

impl AccountState {
    pub fn new() -> Self {
        AccountState {
            accounts: Arc::new(DashMap::new()),
        }
    }

    /// Rebuilds the table by replaying a whole chain
    pub fn replay(chain: &[Block]) -> Self {
        let state = AccountState::new();
        for block in chain {
            state.apply_block(block);
        }
        state
    }

    /// Gets an account by address, or a zero-balance one if it was never referenced
    pub fn get_account(&self, address: &Address) -> Account {
        if let Some(account) = self.accounts.get(address) {
            account.clone()
        } else {
            Account::new(address.clone())
        }
    }

    pub fn balance(&self, address: &Address) -> f64 {
        self.accounts.get(address).map(|account| account.balance).unwrap_or(0.0)
    }

    /// Applies a block's deltas, creating rows lazily
    pub fn apply_block(&self, block: &Block) {
        for (address, delta) in balance_deltas(block) {
            self.accounts
                .entry(address.clone())
                .or_insert_with(|| Account::new(address))
                .apply(delta);
        }
    }

    /// Replaces the whole table
    pub fn replace(&self, accounts: &[Account]) {
        self.accounts.clear();
        for account in accounts {
            self.accounts.insert(account.address.clone(), account.clone());
        }
    }

    /// Gets all accounts, sorted by address
    pub fn get_all_accounts(&self) -> Vec<Account> {
        let mut accounts: Vec<Account> =
            self.accounts.iter().map(|entry| entry.value().clone()).collect();
        accounts.sort_by(|a, b| a.address.cmp(&b.address));
        accounts
    }
}

/// Whether two balance tables hold the same non-zero balances
pub fn same_balances(left: &[Account], right: &[Account]) -> bool {
    const EPSILON: f64 = 1e-9;

    let non_zero = |accounts: &[Account]| -> Vec<(Address, f64)> {
        let mut rows: Vec<(Address, f64)> = accounts
            .iter()
            .filter(|account| account.balance.abs() > EPSILON)
            .map(|account| (account.address.clone(), account.balance))
            .collect();
        rows.sort_by(|a, b| a.0.cmp(&b.0));
        rows
    };

    let (left, right) = (non_zero(left), non_zero(right));
    left.len() == right.len()
        && left
            .iter()
            .zip(right.iter())
            .all(|(l, r)| l.0 == r.0 && (l.1 - r.1).abs() <= EPSILON)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::{Transaction, Wallet};

    fn sample_chain() -> (Vec<Block>, Address, Address) {
        let alice = Wallet::new();
        let bob = Address::from("bob");

        let reward = Transaction::new_reward(alice.address().clone(), 50.0);
        let block1 = Block::new(1, vec![reward], "x".to_string());

        let mut transfer = Transaction::new(alice.address().clone(), bob.clone(), 10.0, None);
        transfer.sign(&alice).unwrap();
        let reward = Transaction::new_reward(alice.address().clone(), 50.0);
        let block2 = Block::new(2, vec![transfer, reward], "y".to_string());

        (vec![Block::genesis(), block1, block2], alice.address().clone(), bob)
    }

    #[test]
    fn test_account_creation() {
        let address = Address::from("test_address");
        let account = Account::new(address.clone());

        assert_eq!(account.address, address);
        assert_eq!(account.balance, 0.0);
    }

    #[test]
    fn test_balance_deltas_skip_sentinel_senders() {
        let (chain, alice, bob) = sample_chain();

        assert_eq!(balance_deltas(&chain[0]), vec![(Address::from("GENESIS"), 0.0)]);
        assert_eq!(balance_deltas(&chain[1]), vec![(alice.clone(), 50.0)]);
        assert_eq!(
            balance_deltas(&chain[2]),
            vec![(alice.clone(), -10.0), (bob, 10.0), (alice, 50.0)]
        );
    }

    #[test]
    fn test_replay_balance() {
        let (chain, alice, bob) = sample_chain();

        assert_eq!(replay_balance(&chain, &alice), 90.0);
        assert_eq!(replay_balance(&chain, &bob), 10.0);
        assert_eq!(replay_balance(&chain, &Address::from("nobody")), 0.0);
        assert_eq!(replay_balance(&chain[..1], &alice), 0.0);
    }

    #[test]
    fn test_incremental_state_matches_replay() {
        let (chain, alice, bob) = sample_chain();
        let state = AccountState::new();
        for block in &chain {
            state.apply_block(block);
        }

        assert_eq!(state.balance(&alice), replay_balance(&chain, &alice));
        assert_eq!(state.balance(&bob), replay_balance(&chain, &bob));
        assert!(same_balances(&state.get_all_accounts(), &AccountState::replay(&chain).get_all_accounts()));
    }

    #[test]
    fn test_replace_and_compare() {
        let (chain, alice, _) = sample_chain();
        let state = AccountState::replay(&chain);
        let snapshot = state.get_all_accounts();

        let mut drifted = snapshot.clone();
        for account in drifted.iter_mut().filter(|a| a.address == alice) {
            account.balance += 1.0;
        }
        assert!(!same_balances(&snapshot, &drifted));

        state.replace(&drifted);
        assert_eq!(state.balance(&alice), 91.0);

        // zero rows are not significant
        let mut with_zero = snapshot.clone();
        with_zero.push(Account::new(Address::from("empty")));
        assert!(same_balances(&snapshot, &with_zero));
    }
}
