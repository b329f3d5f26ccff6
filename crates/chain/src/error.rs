//! Error kinds for chain interaction.
//!
//! Callers branch on the kind: transport failures are retried on the next
//! cycle, reverts are business outcomes, decode mismatches are skipped.

use alloy::transports::{RpcError, TransportErrorKind};

/// Result alias used throughout the chain layer.
pub type ChainResult<T> = Result<T, ChainError>;

/// Failure of a single chain interaction.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ChainError {
    /// RPC or network failure. Always retryable.
    #[error("transport error: {0}")]
    Transport(String),

    /// The node reported that execution reverts (simulation or submission).
    #[error("execution reverted: {0}")]
    Revert(String),

    /// Returned data or a log did not match the expected ABI.
    #[error("decode error: {0}")]
    Decode(String),

    /// The operation did not complete within its deadline.
    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),
}

impl ChainError {
    /// Whether the same request may succeed if simply repeated.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Timeout(_))
    }

    /// Whether the node rejected the call because it reverts.
    pub fn is_revert(&self) -> bool {
        matches!(self, Self::Revert(_))
    }
}

/// JSON-RPC error code geth uses for `execution reverted`.
const REVERT_ERROR_CODE: i64 = 3;

impl From<RpcError<TransportErrorKind>> for ChainError {
    fn from(err: RpcError<TransportErrorKind>) -> Self {
        if let Some(payload) = err.as_error_resp() {
            let message = payload.message.to_string();
            if payload.code == REVERT_ERROR_CODE || message.to_lowercase().contains("revert") {
                return Self::Revert(message);
            }
        }
        Self::Transport(err.to_string())
    }
}

impl From<alloy::sol_types::Error> for ChainError {
    fn from(err: alloy::sol_types::Error) -> Self {
        Self::Decode(err.to_string())
    }
}
