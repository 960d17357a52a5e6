//! Tenant credit balances.
//!
//! The ledger of record lives outside this system. [`CreditsLedger`] is the
//! seam it plugs into; [`InMemoryCreditsLedger`] backs tests and local runs.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use queue_core::{Credits, JobId, TenantId};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("insufficient funds for {tenant}: balance {balance}, requested {requested}")]
    InsufficientFunds {
        tenant: TenantId,
        balance: Credits,
        requested: Credits,
    },
    #[error("debit for job {0} was already recorded")]
    DuplicateDebit(JobId),
    #[error("ledger unavailable: {0}")]
    Unavailable(String),
}

/// Confirmation of a successful debit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebitReceipt {
    pub tenant_id: TenantId,
    pub amount: Credits,
    pub new_balance: Credits,
    pub reference: JobId,
}

#[async_trait]
pub trait CreditsLedger: Send + Sync {
    async fn get_balance(&self, tenant: &TenantId) -> Result<Credits, LedgerError>;

    /// Subtract `amount` in one atomic step if the balance covers it.
    ///
    /// `reference` identifies the job being paid for. A ledger may refuse a
    /// second debit with the same reference.
    async fn debit(
        &self,
        tenant: &TenantId,
        amount: Credits,
        reference: JobId,
    ) -> Result<DebitReceipt, LedgerError>;
}

#[derive(Debug, Default)]
struct Accounts {
    balances: HashMap<TenantId, Credits>,
    debits: Vec<DebitReceipt>,
    references: HashSet<JobId>,
}

/// Process-local ledger. Unknown tenants have a zero balance.
#[derive(Debug, Default)]
pub struct InMemoryCreditsLedger {
    accounts: Mutex<Accounts>,
}

impl InMemoryCreditsLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Add credits to a tenant, returning the new balance.
    pub async fn deposit(&self, tenant: &TenantId, amount: Credits) -> Credits {
        let mut accounts = self.accounts.lock().await;
        let balance = accounts.balances.entry(tenant.clone()).or_default();
        *balance = *balance + amount;
        *balance
    }

    pub async fn set_balance(&self, tenant: &TenantId, balance: Credits) {
        self.accounts
            .lock()
            .await
            .balances
            .insert(tenant.clone(), balance);
    }

    /// Every successful debit, oldest first.
    pub async fn debits(&self) -> Vec<DebitReceipt> {
        self.accounts.lock().await.debits.clone()
    }

    /// Number of successful debits recorded for `reference`.
    pub async fn debit_count(&self, reference: JobId) -> usize {
        self.accounts
            .lock()
            .await
            .debits
            .iter()
            .filter(|d| d.reference == reference)
            .count()
    }
}

#[async_trait]
impl CreditsLedger for InMemoryCreditsLedger {
    async fn get_balance(&self, tenant: &TenantId) -> Result<Credits, LedgerError> {
        Ok(self
            .accounts
            .lock()
            .await
            .balances
            .get(tenant)
            .copied()
            .unwrap_or_default())
    }

    async fn debit(
        &self,
        tenant: &TenantId,
        amount: Credits,
        reference: JobId,
    ) -> Result<DebitReceipt, LedgerError> {
        let mut accounts = self.accounts.lock().await;
        if accounts.references.contains(&reference) {
            return Err(LedgerError::DuplicateDebit(reference));
        }

        let balance = accounts.balances.get(tenant).copied().unwrap_or_default();
        let new_balance = match balance.checked_sub(amount) {
            Some(remaining) if !remaining.is_negative() => remaining,
            _ => {
                return Err(LedgerError::InsufficientFunds {
                    tenant: tenant.clone(),
                    balance,
                    requested: amount,
                });
            }
        };

        accounts.balances.insert(tenant.clone(), new_balance);
        accounts.references.insert(reference);
        let receipt = DebitReceipt {
            tenant_id: tenant.clone(),
            amount,
            new_balance,
            reference,
        };
        accounts.debits.push(receipt.clone());
        Ok(receipt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn debit_is_all_or_nothing() {
        let ledger = InMemoryCreditsLedger::new();
        let tenant = TenantId::new("tenant-a");
        ledger.deposit(&tenant, Credits::from_millis(150)).await;

        let err = ledger
            .debit(&tenant, Credits::from_millis(200), JobId::new())
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientFunds { .. }));
        assert_eq!(
            ledger.get_balance(&tenant).await.unwrap(),
            Credits::from_millis(150)
        );

        let receipt = ledger
            .debit(&tenant, Credits::from_millis(100), JobId::new())
            .await
            .unwrap();
        assert_eq!(receipt.new_balance, Credits::from_millis(50));
    }

    #[tokio::test]
    async fn refuses_duplicate_reference() {
        let ledger = InMemoryCreditsLedger::new();
        let tenant = TenantId::new("tenant-a");
        ledger.deposit(&tenant, Credits::whole(1)).await;
        let job = JobId::new();

        ledger
            .debit(&tenant, Credits::from_millis(100), job)
            .await
            .unwrap();
        let second = ledger.debit(&tenant, Credits::from_millis(100), job).await;
        assert_eq!(second, Err(LedgerError::DuplicateDebit(job)));
        assert_eq!(ledger.debit_count(job).await, 1);
        assert_eq!(
            ledger.get_balance(&tenant).await.unwrap(),
            Credits::from_millis(900)
        );
    }

    #[tokio::test]
    async fn concurrent_debits_never_overdraw() {
        let ledger = InMemoryCreditsLedger::arc();
        let tenant = TenantId::new("tenant-a");
        ledger.deposit(&tenant, Credits::from_millis(500)).await;

        let mut handles = Vec::new();
        for _ in 0..10 {
            let ledger = ledger.clone();
            let tenant = tenant.clone();
            handles.push(tokio::spawn(async move {
                ledger
                    .debit(&tenant, Credits::from_millis(100), JobId::new())
                    .await
            }));
        }

        let mut succeeded = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                succeeded += 1;
            }
        }
        assert_eq!(succeeded, 5);
        assert_eq!(ledger.get_balance(&tenant).await.unwrap(), Credits::ZERO);
    }
}
