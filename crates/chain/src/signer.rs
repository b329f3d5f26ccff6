//! Signing and broadcasting of liquidation transactions.
//!
//! The sender owns the liquidator's key. Nonces are handed out locally so
//! concurrent liquidation attempts never race on `eth_getTransactionCount`;
//! the counter is resynced from the chain whenever a submission fails.

use alloy::network::{EthereumWallet, TransactionBuilder};
use alloy::primitives::{Address, B256};
use alloy::providers::{Provider, ProviderBuilder};
use alloy::rpc::types::TransactionRequest;
use alloy::signers::local::PrivateKeySigner;
use anyhow::{Context, Result};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

use crate::client::{ContractCall, TxOptions};
use crate::error::ChainResult;
use crate::gas::{parse_url, GasParams, GasStrategy};

/// Local nonce counter.
#[derive(Debug)]
pub struct NonceManager {
    next: AtomicU64,
}

impl NonceManager {
    pub fn new(initial_nonce: u64) -> Self {
        Self {
            next: AtomicU64::new(initial_nonce),
        }
    }

    /// Take the next nonce.
    #[inline]
    pub fn take(&self) -> u64 {
        self.next.fetch_add(1, Ordering::SeqCst)
    }

    /// Replace the counter with the chain's pending count.
    pub fn reset(&self, chain_nonce: u64) {
        self.next.store(chain_nonce, Ordering::SeqCst);
    }
}

/// Signs with the liquidator key and broadcasts without waiting.
pub struct TransactionSender {
    /// Endpoint for nonce resyncs, fee quotes and broadcasts
    rpc_url: String,
    /// Local signer wrapping the liquidator key
    wallet: EthereumWallet,
    /// Account derived from the key
    address: Address,
    /// Chain id stamped on every request (replay protection)
    chain_id: u64,
    /// Locally tracked next nonce
    nonces: NonceManager,
    /// Fee source for requests without an explicit `gas_price`
    gas_strategy: Box<dyn GasStrategy>,
    /// Last fee quote, used when a fresh quote cannot be fetched
    last_gas: RwLock<Option<GasParams>>,
}

impl TransactionSender {
    /// Load the key and fetch the account's starting nonce.
    ///
    /// # Arguments
    /// * `private_key` - Hex private key, with or without `0x`
    /// * `rpc_url` - HTTP endpoint used for nonces, fees and broadcasts
    /// * `chain_id` - Chain ID signed into every transaction
    /// * `gas_strategy` - Fee source (see [`crate::gas_strategy`])
    pub async fn new(
        private_key: &str,
        rpc_url: &str,
        chain_id: u64,
        gas_strategy: Box<dyn GasStrategy>,
    ) -> Result<Self> {
        let signer: PrivateKeySigner = private_key
            .trim()
            .trim_start_matches("0x")
            .parse()
            .context("Invalid USER_PRIVATE_KEY")?;
        let address = signer.address();

        let provider = ProviderBuilder::new().on_http(rpc_url.parse()?);
        let initial_nonce = provider
            .get_transaction_count(address)
            .await
            .context("Failed to fetch account nonce")?;

        info!(
            address = %address,
            chain_id,
            initial_nonce,
            gas_strategy = gas_strategy.name(),
            "Transaction sender initialized"
        );

        Ok(Self {
            rpc_url: rpc_url.to_string(),
            wallet: EthereumWallet::from(signer),
            address,
            chain_id,
            nonces: NonceManager::new(initial_nonce),
            gas_strategy,
            last_gas: RwLock::new(None),
        })
    }

    pub fn address(&self) -> Address {
        self.address
    }

    async fn gas_params(&self) -> ChainResult<GasParams> {
        match self.gas_strategy.fetch_params(&self.rpc_url).await {
            Ok(params) => {
                *self.last_gas.write() = Some(params);
                Ok(params)
            }
            Err(e) => match *self.last_gas.read() {
                Some(params) => {
                    debug!(error = %e, "Gas quote failed, using previous quote");
                    Ok(params)
                }
                None => Err(e),
            },
        }
    }

    fn build_request(
        &self,
        call: &ContractCall,
        options: &TxOptions,
        nonce: u64,
        gas: Option<GasParams>,
    ) -> TransactionRequest {
        let mut tx = TransactionRequest::default()
            .with_from(options.from.unwrap_or(self.address))
            .with_to(call.to)
            .with_input(call.input.clone())
            .with_nonce(nonce)
            .with_chain_id(self.chain_id);

        if let Some(value) = options.value {
            tx.set_value(value);
        }
        if let Some(gas_limit) = options.gas_limit {
            tx.set_gas_limit(gas_limit);
        }
        match (options.gas_price, gas) {
            (Some(gas_price), _) => tx.set_gas_price(gas_price),
            (None, Some(params)) => params.apply(&mut tx),
            (None, None) => {}
        }
        tx
    }

    /// Sign and broadcast `call`. Returns the hash as soon as the node
    /// accepts it.
    pub async fn submit(&self, call: &ContractCall, options: &TxOptions) -> ChainResult<B256> {
        let gas = match options.gas_price {
            Some(_) => None,
            None => Some(self.gas_params().await?),
        };

        let nonce = self.nonces.take();
        let tx = self.build_request(call, options, nonce, gas);

        info!(
            method = call.method,
            to = %call.to,
            nonce,
            gas_limit = ?options.gas_limit,
            "Submitting transaction"
        );

        let provider = ProviderBuilder::new()
            .wallet(self.wallet.clone())
            .on_http(parse_url(&self.rpc_url)?);

        match provider.send_transaction(tx).await {
            Ok(pending) => Ok(*pending.tx_hash()),
            Err(e) => {
                self.sync_nonce().await;
                Err(e.into())
            }
        }
    }

    /// Re-read the pending nonce from the chain.
    pub async fn sync_nonce(&self) {
        let url = match parse_url(&self.rpc_url) {
            Ok(url) => url,
            Err(e) => {
                warn!(error = %e, "Failed to sync nonce");
                return;
            }
        };
        let provider = ProviderBuilder::new().on_http(url);
        match provider.get_transaction_count(self.address).await {
            Ok(chain_nonce) => {
                self.nonces.reset(chain_nonce);
                debug!(nonce = chain_nonce, "Nonce synced from chain");
            }
            Err(e) => warn!(error = %e, "Failed to sync nonce"),
        }
    }
}

impl std::fmt::Debug for TransactionSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionSender")
            .field("address", &self.address)
            .field("chain_id", &self.chain_id)
            .field("gas_strategy", &self.gas_strategy.name())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gas::LegacyGasStrategy;
    use alloy::primitives::{Bytes, U256};

    const TEST_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    fn offline_sender() -> TransactionSender {
        let signer: PrivateKeySigner = TEST_KEY.trim_start_matches("0x").parse().unwrap();
        let address = signer.address();
        TransactionSender {
            rpc_url: "http://localhost:8545".into(),
            wallet: EthereumWallet::from(signer),
            address,
            chain_id: 31337,
            nonces: NonceManager::new(0),
            gas_strategy: Box::new(LegacyGasStrategy::new(1_000_000_000, 10_000_000_000)),
            last_gas: RwLock::new(None),
        }
    }

    #[test]
    fn test_nonce_manager() {
        let nonces = NonceManager::new(10);
        assert_eq!(nonces.take(), 10);
        assert_eq!(nonces.take(), 11);

        nonces.reset(11);
        assert_eq!(nonces.take(), 11);
        assert_eq!(nonces.take(), 12);
    }

    #[test]
    fn test_request_uses_options() {
        let sender = offline_sender();
        let call = ContractCall {
            to: Address::repeat_byte(0xee),
            input: Bytes::from_static(&[1, 2, 3, 4]),
            method: "trade(...)",
        };
        let options = TxOptions {
            gas_limit: Some(240_000),
            gas_price: Some(3_000_000_000),
            value: Some(U256::ZERO),
            ..Default::default()
        };

        let tx = sender.build_request(&call, &options, 7, None);
        assert_eq!(tx.from, Some(sender.address()));
        assert_eq!(tx.nonce, Some(7));
        assert_eq!(tx.gas, Some(240_000));
        assert_eq!(tx.gas_price, Some(3_000_000_000));
        assert_eq!(tx.chain_id, Some(31337));
    }

    #[test]
    fn test_request_falls_back_to_strategy_fees() {
        let sender = offline_sender();
        let call = ContractCall {
            to: Address::ZERO,
            input: Bytes::new(),
            method: "trade(...)",
        };
        let gas = GasParams::Eip1559 {
            max_fee_per_gas: 50,
            max_priority_fee_per_gas: 2,
        };

        let tx = sender.build_request(&call, &TxOptions::default(), 0, Some(gas));
        assert_eq!(tx.gas_price, None);
        assert_eq!(tx.max_fee_per_gas, Some(50));
        assert_eq!(tx.gas, None);
    }

    #[tokio::test]
    #[ignore] // Requires a local node
    async fn test_sender_against_local_node() {
        let sender = TransactionSender::new(
            TEST_KEY,
            "http://localhost:8545",
            31337,
            Box::new(LegacyGasStrategy::new(1_000_000_000, 10_000_000_000)),
        )
        .await
        .unwrap();
        assert_eq!(
            format!("{:?}", sender.address()).to_lowercase(),
            "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266"
        );
    }
}
