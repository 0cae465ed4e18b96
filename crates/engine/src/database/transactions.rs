//! Closure-style transactions with retry
//!
//! `Database::transaction` begins a transaction, runs the closure, and
//! commits on `Ok` or rolls back on `Err`. `transaction_with_retry` reruns
//! the whole closure under a fresh transaction while the failure is
//! retryable (write conflicts, lock timeouts, partitions mid-split).

use super::Database;
use snapkv_core::{SiResult, TransactionOptions, TxnId};
use std::time::Duration;
use tracing::{debug, warn};

/// Retry policy for `Database::transaction_with_retry`
///
/// # Example
/// ```ignore
/// let retry = RetryConfig::new().with_max_retries(5).with_base_delay_ms(2);
/// db.transaction_with_retry(TransactionOptions::new(), retry, |db, txn| {
///     db.put("accounts", "alice", txn, "100")
/// })?;
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Attempts after the first (0 = no retries)
    pub max_retries: usize,
    /// First backoff delay; doubles per attempt
    pub base_delay_ms: u64,
    /// Backoff ceiling
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 5,
            max_delay_ms: 200,
        }
    }
}

impl RetryConfig {
    /// Default policy
    pub fn new() -> Self {
        Self::default()
    }

    /// Single attempt
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Set the retry count
    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the first backoff delay
    pub fn with_base_delay_ms(mut self, base_delay_ms: u64) -> Self {
        self.base_delay_ms = base_delay_ms;
        self
    }

    /// Set the backoff ceiling
    pub fn with_max_delay_ms(mut self, max_delay_ms: u64) -> Self {
        self.max_delay_ms = max_delay_ms;
        self
    }

    pub(crate) fn delay_for(&self, attempt: usize) -> Duration {
        let factor = 1u64 << attempt.min(20);
        Duration::from_millis(self.base_delay_ms.saturating_mul(factor).min(self.max_delay_ms))
    }
}

impl Database {
    /// Run `f` inside one transaction, committing on success
    ///
    /// Any error from `f` or from the commit rolls the transaction back and
    /// is returned unchanged.
    pub fn transaction<T, F>(&self, options: TransactionOptions, f: F) -> SiResult<T>
    where
        F: FnOnce(&Database, TxnId) -> SiResult<T>,
    {
        let txn = self.begin_transaction(options)?;
        let result = f(self, txn.id).and_then(|value| {
            self.commit_transaction(txn.id)?;
            Ok(value)
        });
        if result.is_err() {
            if let Err(e) = self.rollback_transaction(txn.id) {
                // Already committed or unknown; nothing left to undo
                debug!(target: "snapkv::txn", txn = %txn.id, error = %e, "Rollback after failure skipped");
            }
        }
        result
    }

    /// `transaction` with retries on retryable failures
    pub fn transaction_with_retry<T, F>(
        &self,
        options: TransactionOptions,
        retry: RetryConfig,
        mut f: F,
    ) -> SiResult<T>
    where
        F: FnMut(&Database, TxnId) -> SiResult<T>,
    {
        let mut attempt = 0;
        loop {
            match self.transaction(options.clone(), &mut f) {
                Err(e) if e.is_retryable() && attempt < retry.max_retries => {
                    let delay = retry.delay_for(attempt);
                    warn!(
                        target: "snapkv::txn",
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Retrying transaction"
                    );
                    std::thread::sleep(delay);
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}
