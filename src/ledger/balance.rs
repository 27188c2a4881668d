//! Balance Store
//!
//! Authoritative coin balance per user. Every mutation happens inside
//! [`BalanceStore::with_user_lock`], which holds an exclusive lock on the
//! user record for the lifetime of one transaction, so concurrent debits and
//! credits on the same account are serialized and never lose an update.

use super::types::{validate_display_name, validate_id, ProfileUpdate, Role, UserAccount};
use crate::config::LedgerConfig;
use crate::errors::{LedgerError, LedgerResult};
use crate::storage::{lock_json, put_json, user_key, user_prefix, LedgerStorage, LedgerTxn};
use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, info};

pub struct BalanceStore {
    storage: Arc<LedgerStorage>,
    starting_balance: Decimal,
}

impl BalanceStore {
    pub fn new(storage: Arc<LedgerStorage>, config: &LedgerConfig) -> Self {
        Self {
            storage,
            starting_balance: config.starting_balance,
        }
    }

    /// Lock the account, run `f`, persist the account if `f` changed it, commit.
    ///
    /// Anything else `f` writes through `txn` commits atomically with the
    /// balance change. An error from `f` drops the transaction, rolling back
    /// every write made so far.
    pub fn with_user_lock<T, F>(&self, user_id: &str, f: F) -> LedgerResult<T>
    where
        F: FnOnce(&LedgerTxn<'_>, &mut UserAccount) -> LedgerResult<T>,
    {
        let txn = self.storage.begin();
        let out = lock_user_in(&txn, user_id, f)?;
        txn.commit()?;
        Ok(out)
    }

    /// Register an account with the starting balance; repeat calls return the existing one
    pub fn open_account(
        &self,
        user_id: &str,
        role: Role,
        display_name: Option<String>,
    ) -> LedgerResult<UserAccount> {
        validate_id("user", user_id).map_err(LedgerError::Validation)?;
        if let Some(ref name) = display_name {
            validate_display_name(name).map_err(LedgerError::Validation)?;
        }

        let txn = self.storage.begin();
        let key = user_key(user_id);
        if let Some(existing) = lock_json::<UserAccount>(&txn, &key)? {
            return Ok(existing);
        }

        let now = Utc::now();
        let account = UserAccount {
            id: user_id.to_string(),
            role,
            display_name,
            balance: self.starting_balance,
            created_at: now,
            updated_at: now,
        };
        put_json(&txn, &key, &account)?;
        txn.commit()?;

        info!(user_id, balance = %account.balance, "Account opened");
        Ok(account)
    }

    pub fn debit(&self, user_id: &str, amount: Decimal) -> LedgerResult<Decimal> {
        let balance = self.with_user_lock(user_id, |_, account| apply_debit(account, amount))?;
        debug!(user_id, %amount, %balance, "Debited");
        Ok(balance)
    }

    pub fn credit(&self, user_id: &str, amount: Decimal) -> LedgerResult<Decimal> {
        let balance = self.with_user_lock(user_id, |_, account| apply_credit(account, amount))?;
        debug!(user_id, %amount, %balance, "Credited");
        Ok(balance)
    }

    /// Operator correction: positive credits, negative debits, never below zero
    pub fn adjust(&self, user_id: &str, delta: Decimal) -> LedgerResult<Decimal> {
        if delta.is_zero() {
            return Err(LedgerError::validation("adjustment must be non-zero"));
        }
        let balance = if delta.is_sign_negative() {
            self.debit(user_id, -delta)?
        } else {
            self.credit(user_id, delta)?
        };
        info!(user_id, %delta, %balance, "Balance adjusted");
        Ok(balance)
    }

    /// Apply profile changes; the balance is never touched here
    pub fn update_profile(&self, user_id: &str, update: ProfileUpdate) -> LedgerResult<UserAccount> {
        if let Some(ref name) = update.display_name {
            validate_display_name(name).map_err(LedgerError::Validation)?;
        }
        let account = self.with_user_lock(user_id, |_, account| {
            if let Some(name) = update.display_name {
                account.display_name = Some(name.trim().to_string());
            }
            if let Some(role) = update.role {
                account.role = role;
            }
            account.updated_at = Utc::now();
            Ok(account.clone())
        })?;
        info!(user_id, role = ?account.role, "Profile updated");
        Ok(account)
    }

    /// Committed balance, read without locking
    pub fn balance(&self, user_id: &str) -> LedgerResult<Decimal> {
        Ok(self.account(user_id)?.balance)
    }

    pub fn account(&self, user_id: &str) -> LedgerResult<UserAccount> {
        self.storage
            .get_json(&user_key(user_id))?
            .ok_or_else(|| LedgerError::not_found("user", user_id))
    }

    /// Every account, ordered by id
    pub fn list_accounts(&self) -> LedgerResult<Vec<UserAccount>> {
        self.storage.scan_json(user_prefix())
    }
}

/// Body of [`BalanceStore::with_user_lock`] against a caller-owned transaction
fn lock_user_in<T, F>(txn: &LedgerTxn<'_>, user_id: &str, f: F) -> LedgerResult<T>
where
    F: FnOnce(&LedgerTxn<'_>, &mut UserAccount) -> LedgerResult<T>,
{
    let key = user_key(user_id);
    let before: UserAccount =
        lock_json(txn, &key)?.ok_or_else(|| LedgerError::not_found("user", user_id))?;

    let mut account = before.clone();
    let out = f(txn, &mut account)?;
    if account != before {
        put_json(txn, &key, &account)?;
    }
    Ok(out)
}

/// Coin amounts carry at most two decimal places
pub fn validate_amount(amount: Decimal, what: &str) -> LedgerResult<()> {
    if amount <= Decimal::ZERO {
        return Err(LedgerError::Validation(format!("{} must be positive", what)));
    }
    if amount.normalize().scale() > 2 {
        return Err(LedgerError::Validation(format!(
            "{} must have at most 2 decimal places",
            what
        )));
    }
    Ok(())
}

/// Subtract `amount` from a locked account, refusing to go below zero
pub fn apply_debit(account: &mut UserAccount, amount: Decimal) -> LedgerResult<Decimal> {
    validate_amount(amount, "debit amount")?;
    if account.balance < amount {
        return Err(LedgerError::InsufficientFunds {
            needed: amount,
            available: account.balance,
        });
    }
    account.balance -= amount;
    account.updated_at = Utc::now();
    Ok(account.balance)
}

/// Add `amount` to a locked account. Zero is accepted and leaves the record untouched.
pub fn apply_credit(account: &mut UserAccount, amount: Decimal) -> LedgerResult<Decimal> {
    if amount.is_zero() {
        return Ok(account.balance);
    }
    validate_amount(amount, "credit amount")?;
    account.balance = account
        .balance
        .checked_add(amount)
        .ok_or_else(|| LedgerError::validation("balance overflow"))?;
    account.updated_at = Utc::now();
    Ok(account.balance)
}
