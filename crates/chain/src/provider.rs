//! Production [`ChainClient`] over alloy HTTP providers.
//!
//! Reads go to `rpc_url`; writes are delegated to the [`TransactionSender`]
//! that owns the key. Providers are cheap to build and are created per
//! request so a dropped connection never poisons later calls.

use alloy::network::TransactionBuilder;
use alloy::primitives::{Address, Bytes, B256};
use alloy::providers::{Provider, ProviderBuilder};
use alloy::rpc::types::{Filter, Log, TransactionRequest};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, info};

use crate::client::{ChainClient, ContractCall, ReceiptStatus, TxOptions};
use crate::error::{ChainError, ChainResult};
use crate::gas::parse_url;
use crate::signer::TransactionSender;

/// Interval between receipt polls.
const RECEIPT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// alloy-backed chain client.
pub struct AlloyChainClient {
    /// Endpoint for reads and receipt polling
    rpc_url: String,
    /// Owns the key; every write goes through it
    sender: TransactionSender,
}

impl AlloyChainClient {
    /// Connect and verify the node answers.
    ///
    /// # Arguments
    /// * `rpc_url` - HTTP endpoint for reads
    /// * `sender` - Signer used by `submit_transaction`
    pub async fn connect(rpc_url: &str, sender: TransactionSender) -> Result<Self> {
        let provider = ProviderBuilder::new().on_http(rpc_url.parse()?);
        let block = provider
            .get_block_number()
            .await
            .context("Provider connection check failed")?;
        info!(block, sender = %sender.address(), "Chain client connected");

        Ok(Self {
            rpc_url: rpc_url.to_string(),
            sender,
        })
    }

    /// Chain id reported by the node at `rpc_url`.
    pub async fn query_chain_id(rpc_url: &str) -> Result<u64> {
        let provider = ProviderBuilder::new().on_http(rpc_url.parse()?);
        Ok(provider.get_chain_id().await?)
    }

    fn read_request(call: &ContractCall) -> TransactionRequest {
        TransactionRequest::default()
            .with_to(call.to)
            .with_input(call.input.clone())
    }

    async fn poll_receipt(&self, tx_hash: B256) -> ChainResult<ReceiptStatus> {
        let provider = ProviderBuilder::new().on_http(parse_url(&self.rpc_url)?);
        loop {
            if let Some(receipt) = provider.get_transaction_receipt(tx_hash).await? {
                return Ok(ReceiptStatus {
                    tx_hash,
                    success: receipt.status(),
                    block_number: receipt.block_number,
                    gas_used: receipt.gas_used,
                });
            }
            tokio::time::sleep(RECEIPT_POLL_INTERVAL).await;
        }
    }
}

#[async_trait]
impl ChainClient for AlloyChainClient {
    fn sender(&self) -> Address {
        self.sender.address()
    }

    async fn block_number(&self) -> ChainResult<u64> {
        let provider = ProviderBuilder::new().on_http(parse_url(&self.rpc_url)?);
        Ok(provider.get_block_number().await?)
    }

    async fn get_logs(
        &self,
        address: Address,
        from_block: u64,
        to_block: u64,
    ) -> ChainResult<Vec<Log>> {
        let provider = ProviderBuilder::new().on_http(parse_url(&self.rpc_url)?);
        let filter = Filter::new()
            .address(address)
            .from_block(from_block)
            .to_block(to_block);
        let logs = provider.get_logs(&filter).await?;
        debug!(from_block, to_block, count = logs.len(), "eth_getLogs");
        Ok(logs)
    }

    async fn call(&self, call: &ContractCall) -> ChainResult<Bytes> {
        let provider = ProviderBuilder::new().on_http(parse_url(&self.rpc_url)?);
        Ok(provider.call(Self::read_request(call)).await?)
    }

    async fn estimate_gas(&self, call: &ContractCall, from: Address) -> ChainResult<u64> {
        let provider = ProviderBuilder::new().on_http(parse_url(&self.rpc_url)?);
        let request = Self::read_request(call).with_from(from);
        Ok(provider.estimate_gas(request).await?)
    }

    async fn submit_transaction(
        &self,
        call: &ContractCall,
        options: &TxOptions,
    ) -> ChainResult<B256> {
        self.sender.submit(call, options).await
    }

    async fn wait_for_receipt(
        &self,
        tx_hash: B256,
        timeout: Duration,
    ) -> ChainResult<ReceiptStatus> {
        tokio::time::timeout(timeout, self.poll_receipt(tx_hash))
            .await
            .map_err(|_| ChainError::Timeout(timeout))?
    }
}
