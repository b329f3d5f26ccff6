//! Estimate → submit → confirm state machine.
//!
//! Estimation is free and filters out calls that would revert, so nothing
//! is submitted unless it succeeds. Confirmation polls a bounded number of
//! times; an unconfirmed transaction is left for the next cycle to observe.

use alloy::primitives::B256;
use perpdex_chain::{ChainClient, ChainError, ContractCall, ReceiptStatus, TxOptions};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::ExecutorConfig;

/// Terminal state of one execution.
#[derive(Debug, Clone)]
pub enum ExecutionOutcome {
    /// Gas estimation failed; nothing was submitted.
    NotExecutable(ChainError),
    /// The node rejected the submission because it reverts.
    Reverted(ChainError),
    /// The submission failed for a non-revert reason.
    SubmitFailed(ChainError),
    /// Mined with status 0.
    MinedFailed(ReceiptStatus),
    /// Mined with status 1.
    Confirmed(ReceiptStatus),
    /// No receipt within the retry budget.
    Unconfirmed { tx_hash: B256, attempts: u32 },
}

impl ExecutionOutcome {
    pub fn is_confirmed(&self) -> bool {
        matches!(self, Self::Confirmed(_))
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::NotExecutable(_) => "not_executable",
            Self::Reverted(_) => "reverted",
            Self::SubmitFailed(_) => "submit_failed",
            Self::MinedFailed(_) => "mined_failed",
            Self::Confirmed(_) => "confirmed",
            Self::Unconfirmed { .. } => "unconfirmed",
        }
    }
}

/// Runs contract calls through the estimate gate.
pub struct TransactionExecutor {
    client: Arc<dyn ChainClient>,
    /// Options applied to every submission (the signing account)
    standing: TxOptions,
    /// Receipt polls before giving up
    receipt_attempts: u32,
    /// Wait per receipt poll
    receipt_timeout: Duration,
    /// Gas limit = estimate × multiplier, unless overridden
    gas_limit_multiplier: f64,
}

impl TransactionExecutor {
    /// Create an executor that signs as `client.sender()`.
    ///
    /// # Arguments
    /// * `client` - Chain access used for estimation, submission and receipts
    /// * `config` - Receipt budget and gas limit padding
    pub fn new(client: Arc<dyn ChainClient>, config: &ExecutorConfig) -> Self {
        let standing = TxOptions {
            from: Some(client.sender()),
            ..Default::default()
        };
        Self {
            client,
            standing,
            receipt_attempts: config.receipt_attempts.max(1),
            receipt_timeout: config.receipt_timeout(),
            gas_limit_multiplier: config.gas_limit_multiplier,
        }
    }

    fn padded_gas_limit(&self, estimate: u64) -> u64 {
        let padded = (estimate as f64 * self.gas_limit_multiplier).ceil();
        if padded.is_finite() && padded >= estimate as f64 {
            padded as u64
        } else {
            estimate
        }
    }

    /// Options for this submission: standing options, then the padded
    /// estimate, then `overrides`.
    pub fn options_for(&self, estimate: u64, overrides: &TxOptions) -> TxOptions {
        let mut options = self.standing.merged(overrides);
        if options.gas_limit.is_none() {
            options.gas_limit = Some(self.padded_gas_limit(estimate));
        }
        options
    }

    /// Estimate, and only if that succeeds, submit and wait for the receipt.
    pub async fn execute(&self, call: &ContractCall, overrides: &TxOptions) -> ExecutionOutcome {
        let from = overrides
            .from
            .or(self.standing.from)
            .unwrap_or_else(|| self.client.sender());

        let estimate = match self.client.estimate_gas(call, from).await {
            Ok(gas) => gas,
            Err(e) => {
                debug!(method = call.method, error = %e, "Gas estimation failed, not submitting");
                return ExecutionOutcome::NotExecutable(e);
            }
        };

        let options = self.options_for(estimate, overrides);
        let tx_hash = match self.client.submit_transaction(call, &options).await {
            Ok(hash) => hash,
            Err(e) if e.is_revert() => {
                warn!(method = call.method, error = %e, "Transaction reverted at submission");
                return ExecutionOutcome::Reverted(e);
            }
            Err(e) => {
                warn!(method = call.method, error = %e, "Transaction submission failed");
                return ExecutionOutcome::SubmitFailed(e);
            }
        };

        info!(method = call.method, tx_hash = %tx_hash, gas_limit = ?options.gas_limit, "Transaction submitted");
        self.confirm(tx_hash).await
    }

    /// Poll for the receipt up to `receipt_attempts` times.
    pub async fn confirm(&self, tx_hash: B256) -> ExecutionOutcome {
        for attempt in 1..=self.receipt_attempts {
            match self.client.wait_for_receipt(tx_hash, self.receipt_timeout).await {
                Ok(receipt) if receipt.success => {
                    info!(
                        tx_hash = %tx_hash,
                        block = ?receipt.block_number,
                        gas_used = receipt.gas_used,
                        "Transaction confirmed"
                    );
                    return ExecutionOutcome::Confirmed(receipt);
                }
                Ok(receipt) => {
                    warn!(tx_hash = %tx_hash, block = ?receipt.block_number, "Transaction mined but failed");
                    return ExecutionOutcome::MinedFailed(receipt);
                }
                Err(e) => {
                    warn!(
                        tx_hash = %tx_hash,
                        attempt,
                        max_attempts = self.receipt_attempts,
                        error = %e,
                        "Waiting for receipt failed"
                    );
                }
            }
        }

        warn!(tx_hash = %tx_hash, attempts = self.receipt_attempts, "Transaction unconfirmed");
        ExecutionOutcome::Unconfirmed {
            tx_hash,
            attempts: self.receipt_attempts,
        }
    }
}
