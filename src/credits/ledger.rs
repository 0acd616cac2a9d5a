//! Append-only credit ledger.
//!
//! Every balance change is a [`CreditTransaction`] row; the denormalized
//! balance on the user row is an O(1) read that must always equal the sum
//! of the log. Mutations for one user are serialized through a per-user
//! async mutex on top of the store's transactional check-and-append, so a
//! deduction can never drive a balance negative.
//!
//! Admins bypass deduction but still get a zero-amount `deduction` row for
//! auditability.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::db::MetaStore;
use crate::types::{
    AppError, Claims, CreditTransaction, Result, TransactionKind, UserAccount, UserRole,
};

/// The credit ledger service.
pub struct CreditLedger {
    meta: Arc<MetaStore>,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl CreditLedger {
    /// Create a ledger over the metadata store.
    pub fn new(meta: Arc<MetaStore>) -> Self {
        Self {
            meta,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Per-user serialization primitive.
    fn user_lock(&self, user_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock();
        Arc::clone(
            locks
                .entry(user_id.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
        )
    }

    /// Current balance, O(1) via the denormalized user row.
    pub async fn balance(&self, user_id: &str) -> Result<i64> {
        let account = self
            .meta
            .get_user(user_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("user {}", user_id)))?;
        Ok(account.credit_balance)
    }

    /// Mirror the auth claims into the user table; first sight gets the
    /// initial grant so the balance invariant holds from the first request.
    pub async fn ensure_account(&self, claims: &Claims, initial_grant: i64) -> Result<UserAccount> {
        let lock = self.user_lock(&claims.sub);
        let _guard = lock.lock().await;

        let (account, created) = self
            .meta
            .ensure_user(&claims.sub, &claims.email, claims.role)
            .await?;
        if created && initial_grant > 0 {
            self.meta
                .append_transaction(
                    &claims.sub,
                    TransactionKind::Initial,
                    initial_grant,
                    "hoş geldiniz kredisi",
                    None,
                    None,
                )
                .await?;
            return self
                .meta
                .get_user(&claims.sub)
                .await?
                .ok_or_else(|| AppError::Internal("user vanished after grant".to_string()));
        }
        Ok(account)
    }

    /// Reserve credits for a query: an atomic check-and-append of a
    /// `deduction`. Admins get a zero-amount audit row instead of a charge.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::InsufficientCredits`] when the balance cannot
    /// cover `amount`, and [`AppError::InvalidInput`] for negative amounts.
    pub async fn reserve(
        &self,
        account: &UserAccount,
        amount: i64,
        query_log_id: Option<Uuid>,
    ) -> Result<CreditTransaction> {
        if amount < 0 {
            return Err(AppError::InvalidInput(
                "reserve amount must be non-negative".to_string(),
            ));
        }
        let charged = if account.role == UserRole::Admin { 0 } else { amount };

        let lock = self.user_lock(&account.id);
        let _guard = lock.lock().await;
        self.meta
            .append_transaction(
                &account.id,
                TransactionKind::Deduction,
                -charged,
                "soru sorgusu ücreti",
                query_log_id,
                None,
            )
            .await
    }

    /// Compensate a deduction. Applied at most once: a second refund call
    /// for the same deduction returns the existing refund entry.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::NotFound`] for unknown transactions and
    /// [`AppError::InvalidInput`] when the referenced entry is not a
    /// deduction.
    pub async fn refund(&self, deduction_id: Uuid, reason: &str) -> Result<CreditTransaction> {
        let deduction = self
            .meta
            .get_transaction(deduction_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("transaction {}", deduction_id)))?;
        if deduction.kind != TransactionKind::Deduction {
            return Err(AppError::InvalidInput(format!(
                "transaction {} is not a deduction",
                deduction_id
            )));
        }

        let lock = self.user_lock(&deduction.user_id);
        let _guard = lock.lock().await;

        if let Some(existing) = self.meta.find_refund_for(deduction_id).await? {
            tracing::warn!(
                deduction = %deduction_id,
                refund = %existing,
                "Refund already applied, returning existing entry"
            );
            return self
                .meta
                .get_transaction(existing)
                .await?
                .ok_or_else(|| AppError::Internal("refund vanished".to_string()));
        }

        self.meta
            .append_transaction(
                &deduction.user_id,
                TransactionKind::Refund,
                deduction.amount.abs(),
                reason,
                deduction.query_log_id,
                Some(deduction_id),
            )
            .await
    }

    /// Grant credits: initial, bonus or purchase.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::InvalidInput`] for non-positive amounts or a
    /// kind that is not a grant.
    pub async fn grant(
        &self,
        user_id: &str,
        amount: i64,
        kind: TransactionKind,
        description: &str,
    ) -> Result<CreditTransaction> {
        if amount <= 0 {
            return Err(AppError::InvalidInput(
                "grant amount must be positive".to_string(),
            ));
        }
        if !matches!(
            kind,
            TransactionKind::Initial | TransactionKind::Bonus | TransactionKind::Purchase
        ) {
            return Err(AppError::InvalidInput(format!(
                "{} is not a grant kind",
                kind.as_str()
            )));
        }

        let lock = self.user_lock(user_id);
        let _guard = lock.lock().await;
        self.meta
            .append_transaction(user_id, kind, amount, description, None, None)
            .await
    }

    /// Check the ledger algebra for one user: the denormalized balance must
    /// equal the log sum, the running `balance_after` chain must be
    /// consistent, and no point may dip below zero.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::InvariantViolation`] describing the first drift
    /// found.
    pub async fn verify_ledger(&self, user_id: &str) -> Result<()> {
        let balance = self.balance(user_id).await?;
        let entries = self.meta.list_transactions(user_id).await?;

        let mut running = 0i64;
        for entry in &entries {
            running += entry.amount;
            if entry.balance_after != running {
                return Err(AppError::InvariantViolation(format!(
                    "ledger chain broken at {}: balance_after {} != running {}",
                    entry.id, entry.balance_after, running
                )));
            }
            if entry.balance_after < 0 {
                return Err(AppError::InvariantViolation(format!(
                    "ledger dipped below zero at {}",
                    entry.id
                )));
            }
        }
        if running != balance {
            return Err(AppError::InvariantViolation(format!(
                "denormalized balance {} != ledger sum {}",
                balance, running
            )));
        }
        Ok(())
    }
}
