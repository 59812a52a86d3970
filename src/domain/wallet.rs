use crate::domain::money::{Amount, Balance};
use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Which side of the marketplace a wallet belongs to.
///
/// A person who both studies and teaches holds two wallets; balances never
/// cross roles implicitly.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Hash, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum WalletRole {
    User,
    Teacher,
}

/// Per-actor balance ledger with three buckets.
///
/// `available` is spendable/payable now, `pending` holds earnings until the
/// class is completed, `locked` holds funds while a payout is in flight.
/// Every mutation goes through the checked bucket moves below so no bucket
/// can ever go negative; funds only leave the wallet via an explicit debit or
/// a confirmed payout.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Wallet {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub role: WalletRole,
    pub available: Balance,
    pub pending: Balance,
    pub locked: Balance,
}

impl Wallet {
    pub fn new(owner_id: Uuid, role: WalletRole) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner_id,
            role,
            available: Balance::ZERO,
            pending: Balance::ZERO,
            locked: Balance::ZERO,
        }
    }

    pub fn credit_available(&mut self, amount: Amount) {
        self.available += amount;
    }

    pub fn debit_available(&mut self, amount: Amount) -> Result<()> {
        self.available.checked_sub(amount)
    }

    pub fn credit_pending(&mut self, amount: Amount) {
        self.pending += amount;
    }

    /// Moves earned funds from pending to available once the class is done.
    pub fn settle_pending(&mut self, amount: Amount) -> Result<()> {
        self.pending.checked_sub(amount)?;
        self.available += amount;
        Ok(())
    }

    /// Moves the whole available balance into the locked bucket for a payout.
    ///
    /// The precondition (`locked == 0` and `available >= threshold`) is the
    /// exclusive lock against a second concurrent batch run: re-evaluated
    /// inside the ledger transaction, at most one caller can observe it true.
    pub fn lock_for_payout(&mut self, threshold: Amount) -> Result<Amount> {
        if !self.locked.is_zero() {
            return Err(CoreError::conflict(format!(
                "wallet {} already has a payout in flight",
                self.id
            )));
        }
        if self.available.value() < threshold.value() {
            return Err(CoreError::InsufficientBalance {
                required: threshold.value().to_string(),
                available: self.available.value().to_string(),
            });
        }
        let taken = self.available.take();
        let amount = Amount::new(taken)?;
        self.locked += amount;
        Ok(amount)
    }

    /// Compensating move after a failed transfer: locked funds go back to
    /// available in full.
    pub fn release_lock(&mut self) -> Result<()> {
        let held = self.locked.take();
        self.available = Balance::new(self.available.value() + held)?;
        Ok(())
    }

    /// Confirmed transfer: the locked funds have left the system.
    pub fn clear_lock(&mut self) {
        self.locked.take();
    }
}
