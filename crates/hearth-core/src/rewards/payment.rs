//! Payment rail abstraction.
//!
//! The ledger pays every reward through a [`PaymentSink`]. Implementations
//! must be idempotent by `memo`: the ledger retries an interrupted grant with
//! the same memo and expects the original receipt back, not a second payout.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::storage::{KeyValueStore, Repository};

/// Proof that a transfer went through.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentReceipt {
    pub receipt_id: String,
    pub user_id: String,
    pub amount: Decimal,
    pub memo: String,
    pub settled_at: DateTime<Utc>,
}

/// Every wallet/payment integration implements this trait.
pub trait PaymentSink: Send + Sync {
    /// Transfer `amount` Pi to `user_id`.
    fn transfer(
        &self,
        user_id: &str,
        amount: Decimal,
        memo: &str,
    ) -> Result<PaymentReceipt, Box<dyn std::error::Error + Send + Sync>>;
}

/// Wallet stand-in that settles instantly and records each transfer in the
/// store, keyed by memo.
pub struct SimulatedWallet {
    transfers: Repository<PaymentReceipt>,
}

impl SimulatedWallet {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            transfers: Repository::new(store, "wallet"),
        }
    }

    /// Every transfer settled so far, ordered by memo.
    pub fn transfers(&self) -> crate::Result<Vec<PaymentReceipt>> {
        self.transfers.list("")
    }
}

impl PaymentSink for SimulatedWallet {
    fn transfer(
        &self,
        user_id: &str,
        amount: Decimal,
        memo: &str,
    ) -> Result<PaymentReceipt, Box<dyn std::error::Error + Send + Sync>> {
        let receipt = PaymentReceipt {
            receipt_id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            amount,
            memo: memo.to_string(),
            settled_at: Utc::now(),
        };

        let settled = self
            .transfers
            .modify(memo, |existing| match existing {
                Some(_) => None,
                None => Some(receipt.clone()),
            })?;

        let receipt = settled
            .into_current()
            .ok_or("wallet transfer vanished after settlement")?;
        debug!(%user_id, %amount, %memo, receipt_id = %receipt.receipt_id, "simulated transfer settled");
        Ok(receipt)
    }
}
