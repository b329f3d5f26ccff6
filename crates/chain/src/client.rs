//! Chain capability set consumed by the indexer and the liquidation engine.

use alloy::primitives::{Address, Bytes, B256, U256};
use alloy::rpc::types::Log;
use alloy::sol_types::SolCall;
use async_trait::async_trait;
use std::time::Duration;

use crate::error::ChainResult;

/// An ABI-encoded call against a contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractCall {
    /// Target contract
    pub to: Address,
    /// Encoded calldata (selector + arguments)
    pub input: Bytes,
    /// Solidity signature of the method, for logging
    pub method: &'static str,
}

impl ContractCall {
    /// Encode a typed `sol!` call.
    pub fn new<C: SolCall>(to: Address, call: &C) -> Self {
        Self {
            to,
            input: Bytes::from(call.abi_encode()),
            method: C::SIGNATURE,
        }
    }

    /// Four-byte selector of the encoded method.
    pub fn selector(&self) -> Option<[u8; 4]> {
        self.input.get(..4).and_then(|s| s.try_into().ok())
    }
}

/// Transaction options applied at submission.
///
/// Unset fields are filled by the sender (nonce manager, gas strategy).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TxOptions {
    /// Signing account; the sender's own address when unset
    pub from: Option<Address>,
    /// Gas limit; the executor fills in the padded estimate
    pub gas_limit: Option<u64>,
    /// Legacy gas price (wei). Set, it replaces the strategy's quote.
    pub gas_price: Option<u128>,
    pub value: Option<U256>,
}

impl TxOptions {
    /// Overlay `overrides` on top of these options. Set fields in
    /// `overrides` win.
    pub fn merged(&self, overrides: &TxOptions) -> TxOptions {
        TxOptions {
            from: overrides.from.or(self.from),
            gas_limit: overrides.gas_limit.or(self.gas_limit),
            gas_price: overrides.gas_price.or(self.gas_price),
            value: overrides.value.or(self.value),
        }
    }

}

/// Outcome of a mined transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiptStatus {
    pub tx_hash: B256,
    /// `true` for status 1, `false` for status 0
    pub success: bool,
    pub block_number: Option<u64>,
    pub gas_used: u64,
}

/// Raw chain capabilities.
///
/// Every method is a suspension point and may fail with a transport error.
/// Simulated and synchronous reverts surface as [`crate::ChainError::Revert`].
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Account that signs submitted transactions.
    fn sender(&self) -> Address;

    /// Current chain head.
    async fn block_number(&self) -> ChainResult<u64>;

    /// All logs emitted by `address` in `[from_block, to_block]`, no topic filter.
    async fn get_logs(&self, address: Address, from_block: u64, to_block: u64)
        -> ChainResult<Vec<Log>>;

    /// `eth_call` against the latest block.
    async fn call(&self, call: &ContractCall) -> ChainResult<Bytes>;

    /// `eth_estimateGas` for `call` sent from `from`.
    async fn estimate_gas(&self, call: &ContractCall, from: Address) -> ChainResult<u64>;

    /// Sign and broadcast `call`; returns the transaction hash without waiting.
    async fn submit_transaction(&self, call: &ContractCall, options: &TxOptions)
        -> ChainResult<B256>;

    /// Wait up to `timeout` for the receipt of `tx_hash`.
    async fn wait_for_receipt(&self, tx_hash: B256, timeout: Duration)
        -> ChainResult<ReceiptStatus>;
}

/// Execute a typed read-only call and decode its return value.
pub async fn read<C: SolCall>(
    client: &dyn ChainClient,
    to: Address,
    call: C,
) -> ChainResult<C::Return> {
    let request = ContractCall::new(to, &call);
    let output = client.call(&request).await?;
    Ok(C::abi_decode_returns(&output, true)?)
}
