//! Block-structured account ledger held by each replica.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use drover_core::{
    AccountId, AccountKeying, AccountSnapshot, AccountState, Block, LedgerSnapshot, Transaction,
};

/// Append-only chain of blocks plus the account state they produce.
///
/// Transfers are signed and commutative: two ledgers that applied the same
/// set of transactions hold identical balances regardless of block layout.
#[derive(Debug, Clone)]
pub struct Ledger {
    blocks: Vec<Arc<Block>>,
    accounts: HashMap<AccountId, AccountState>,
    keying: AccountKeying,
    initial_balance: i64,
    applied: u64,
}

impl Ledger {
    /// Creates a ledger with `accounts` funded accounts.
    #[must_use]
    pub fn new(accounts: u32, keying: AccountKeying, initial_balance: i64) -> Self {
        let accounts = (0..accounts)
            .map(|index| (keying.key(index), AccountState::with_balance(initial_balance)))
            .collect();

        Self {
            blocks: Vec::new(),
            accounts,
            keying,
            initial_balance,
            applied: 0,
        }
    }

    /// Returns the number of blocks.
    #[must_use]
    pub fn height(&self) -> u64 {
        self.blocks.len() as u64
    }

    /// Returns the most recent block.
    #[must_use]
    pub fn tip(&self) -> Option<&Arc<Block>> {
        self.blocks.last()
    }

    /// Returns the total number of transactions applied.
    #[must_use]
    pub const fn applied(&self) -> u64 {
        self.applied
    }

    /// Applies `transactions` and seals them into a new block.
    ///
    /// Block timestamps never go backwards, even if the wall clock does.
    pub fn append(&mut self, transactions: Vec<Transaction>) -> Arc<Block> {
        for tx in &transactions {
            self.apply(tx);
        }
        self.applied += transactions.len() as u64;

        let now = Utc::now();
        let timestamp = match self.tip() {
            Some(tip) if tip.timestamp > now => tip.timestamp,
            _ => now,
        };

        let block = Arc::new(Block {
            height: self.height() + 1,
            timestamp,
            transactions,
        });
        self.blocks.push(Arc::clone(&block));
        block
    }

    fn apply(&mut self, tx: &Transaction) {
        let amount = i64::try_from(tx.amount).unwrap_or(i64::MAX);
        let initial = self.initial_balance;

        let from = self
            .accounts
            .entry(self.keying.key(tx.from))
            .or_insert_with(|| AccountState::with_balance(initial));
        from.balance = from.balance.saturating_sub(amount);
        from.nonce += 1;

        let to = self
            .accounts
            .entry(self.keying.key(tx.to))
            .or_insert_with(|| AccountState::with_balance(initial));
        to.balance = to.balance.saturating_add(amount);
    }

    /// Returns a snapshot of the chain.
    #[must_use]
    pub fn blocks(&self) -> LedgerSnapshot {
        self.blocks.clone()
    }

    /// Returns the state of one account.
    #[must_use]
    pub fn account(&self, id: &AccountId) -> Option<AccountState> {
        self.accounts.get(id).copied()
    }

    /// Returns a snapshot of every account.
    #[must_use]
    pub fn accounts(&self) -> AccountSnapshot {
        self.accounts.clone()
    }
}
