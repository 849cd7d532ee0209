//! Wallet Collaborator
//!
//! The engine never touches balances directly. It asks a [`Wallet`] to debit
//! registration fees and credit prizes, and compensates with the opposite
//! call when a later step of the same operation fails.

use std::collections::BTreeMap;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;

use crate::core::ids::ParticipantId;
use crate::round::state::Amount;

/// Wallet errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WalletError {
    /// Balance too low for the debit.
    #[error("insufficient funds: needed {needed}, available {available}")]
    InsufficientFunds {
        /// Account that was short.
        participant: ParticipantId,
        /// Requested amount.
        needed: Amount,
        /// Current balance.
        available: Amount,
    },

    /// Wallet backend unreachable.
    #[error("wallet unavailable: {0}")]
    Unavailable(String),
}

/// Participant balance ledger.
#[async_trait]
pub trait Wallet: Send + Sync {
    /// Remove `amount` from the participant's balance.
    async fn debit(&self, participant: ParticipantId, amount: Amount) -> Result<(), WalletError>;

    /// Add `amount` to the participant's balance.
    async fn credit(&self, participant: ParticipantId, amount: Amount) -> Result<(), WalletError>;
}

/// In-process wallet for tests and the demo binary.
#[derive(Default)]
pub struct InMemoryWallet {
    balances: RwLock<BTreeMap<ParticipantId, Amount>>,
    offline: RwLock<bool>,
}

impl InMemoryWallet {
    /// Create an empty wallet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a participant's balance.
    pub async fn deposit(&self, participant: ParticipantId, amount: Amount) {
        let mut balances = self.balances.write().await;
        *balances.entry(participant).or_insert(0) += amount;
    }

    /// Current balance (zero if unknown).
    pub async fn balance(&self, participant: &ParticipantId) -> Amount {
        self.balances.read().await.get(participant).copied().unwrap_or(0)
    }

    /// Simulate an outage: every call fails with `Unavailable` while set.
    pub async fn set_offline(&self, offline: bool) {
        *self.offline.write().await = offline;
    }

    async fn check_online(&self) -> Result<(), WalletError> {
        if *self.offline.read().await {
            return Err(WalletError::Unavailable("wallet offline".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl Wallet for InMemoryWallet {
    async fn debit(&self, participant: ParticipantId, amount: Amount) -> Result<(), WalletError> {
        self.check_online().await?;

        let mut balances = self.balances.write().await;
        let balance = balances.entry(participant).or_insert(0);
        if *balance < amount {
            return Err(WalletError::InsufficientFunds {
                participant,
                needed: amount,
                available: *balance,
            });
        }
        *balance -= amount;
        debug!("Debited {} from {}", amount, participant.short());
        Ok(())
    }

    async fn credit(&self, participant: ParticipantId, amount: Amount) -> Result<(), WalletError> {
        self.check_online().await?;

        let mut balances = self.balances.write().await;
        *balances.entry(participant).or_insert(0) += amount;
        debug!("Credited {} to {}", amount, participant.short());
        Ok(())
    }
}
