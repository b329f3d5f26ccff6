//! Gas pricing for submitted liquidation transactions.
//!
//! Two pricing models are supported: a single `gas_price` (Legacy) and
//! base fee plus tip (EIP-1559). The strategy is chosen from config and
//! consulted by [`crate::TransactionSender`] right before signing, unless
//! the caller pinned a gas price in [`crate::TxOptions`].

use alloy::eips::BlockNumberOrTag;
use alloy::network::TransactionBuilder;
use alloy::providers::{Provider, ProviderBuilder};
use alloy::rpc::types::TransactionRequest;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::{Debug, Display};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

use crate::error::{ChainError, ChainResult};

const GWEI: f64 = 1e9;

/// Fallback base fee when the latest block carries none.
const FALLBACK_BASE_FEE: u128 = 1_000_000_000;

/// Fee fields resolved for one transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GasParams {
    Legacy {
        gas_price: u128,
    },
    Eip1559 {
        max_fee_per_gas: u128,
        max_priority_fee_per_gas: u128,
    },
}

impl GasParams {
    /// Write the fee fields onto `tx`.
    pub fn apply(&self, tx: &mut TransactionRequest) {
        match *self {
            GasParams::Legacy { gas_price } => tx.set_gas_price(gas_price),
            GasParams::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
            } => {
                tx.set_max_fee_per_gas(max_fee_per_gas);
                tx.set_max_priority_fee_per_gas(max_priority_fee_per_gas);
            }
        }
    }
}

/// Pricing model as written in config.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PricingModel {
    #[default]
    Legacy,
    #[serde(alias = "eip-1559")]
    Eip1559,
}

/// Gas pricing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GasConfig {
    #[serde(default)]
    pub pricing_model: PricingModel,

    /// Price used when the node cannot be asked (gwei)
    #[serde(default = "default_gas_price_gwei")]
    pub default_gas_price_gwei: f64,

    /// Hard ceiling on any price per gas (gwei)
    #[serde(default = "default_max_gas_price_gwei")]
    pub max_gas_price_gwei: f64,

    /// Tip for EIP-1559 transactions (gwei)
    #[serde(default = "default_priority_fee_gwei")]
    pub priority_fee_gwei: f64,

    /// `max_fee = base_fee * multiplier + tip`
    #[serde(default = "default_base_fee_multiplier")]
    pub base_fee_multiplier: f64,
}

fn default_gas_price_gwei() -> f64 {
    1.0
}
fn default_max_gas_price_gwei() -> f64 {
    500.0
}
fn default_priority_fee_gwei() -> f64 {
    1.5
}
fn default_base_fee_multiplier() -> f64 {
    2.0
}

impl Default for GasConfig {
    fn default() -> Self {
        Self {
            pricing_model: PricingModel::default(),
            default_gas_price_gwei: default_gas_price_gwei(),
            max_gas_price_gwei: default_max_gas_price_gwei(),
            priority_fee_gwei: default_priority_fee_gwei(),
            base_fee_multiplier: default_base_fee_multiplier(),
        }
    }
}

fn gwei_to_wei(gwei: f64) -> u128 {
    (gwei * GWEI) as u128
}

/// Source of fee fields for outgoing transactions.
#[async_trait]
pub trait GasStrategy: Send + Sync + Debug {
    /// Resolve fee fields from the node at `rpc_url`.
    async fn fetch_params(&self, rpc_url: &str) -> ChainResult<GasParams>;

    fn name(&self) -> &'static str;
}

/// Build the strategy selected by `config`.
pub fn gas_strategy(config: &GasConfig) -> Box<dyn GasStrategy> {
    match config.pricing_model {
        PricingModel::Legacy => Box::new(LegacyGasStrategy::new(
            gwei_to_wei(config.default_gas_price_gwei),
            gwei_to_wei(config.max_gas_price_gwei),
        )),
        PricingModel::Eip1559 => Box::new(
            Eip1559GasStrategy::new(
                gwei_to_wei(config.priority_fee_gwei),
                config.base_fee_multiplier,
            )
            .with_max_fee_cap(gwei_to_wei(config.max_gas_price_gwei)),
        ),
    }
}

pub(crate) fn parse_url<U>(rpc_url: &str) -> ChainResult<U>
where
    U: FromStr,
    U::Err: Display,
{
    rpc_url
        .parse()
        .map_err(|e| ChainError::Transport(format!("invalid RPC URL: {e}")))
}

/// Single `gas_price`, capped. The last good quote is kept for when the
/// node refuses to answer.
#[derive(Debug)]
pub struct LegacyGasStrategy {
    /// Upper bound on any quote (wei)
    max_gas_price: u128,
    /// Last accepted quote (wei)
    last_gas_price: AtomicU64,
}

impl LegacyGasStrategy {
    /// Create a new Legacy gas strategy.
    ///
    /// # Arguments
    /// * `default_gas_price` - Quote used until the node answers (wei)
    /// * `max_gas_price` - Maximum allowed gas price (wei)
    pub fn new(default_gas_price: u128, max_gas_price: u128) -> Self {
        Self {
            max_gas_price,
            last_gas_price: AtomicU64::new(default_gas_price.min(max_gas_price) as u64),
        }
    }

    pub fn last_gas_price(&self) -> u128 {
        self.last_gas_price.load(Ordering::Relaxed) as u128
    }

    fn record(&self, gas_price: u128) -> u128 {
        let capped = gas_price.min(self.max_gas_price);
        self.last_gas_price.store(capped as u64, Ordering::Relaxed);
        capped
    }
}

#[async_trait]
impl GasStrategy for LegacyGasStrategy {
    async fn fetch_params(&self, rpc_url: &str) -> ChainResult<GasParams> {
        let provider = ProviderBuilder::new().on_http(parse_url(rpc_url)?);
        let gas_price = match provider.get_gas_price().await {
            Ok(price) => self.record(price),
            Err(e) => {
                debug!(error = %e, "eth_gasPrice failed, reusing last quote");
                self.last_gas_price()
            }
        };
        Ok(GasParams::Legacy { gas_price })
    }

    fn name(&self) -> &'static str {
        "Legacy"
    }
}

/// Base fee from the latest block times a multiplier, plus tip.
#[derive(Debug)]
pub struct Eip1559GasStrategy {
    /// Tip used when the node has no suggestion (wei)
    default_priority_fee: u128,
    /// max_fee = base_fee × multiplier + tip
    base_fee_multiplier: f64,
    /// Ceiling on max_fee and tip (wei)
    max_fee_cap: u128,
}

impl Eip1559GasStrategy {
    /// Create a new EIP-1559 gas strategy.
    ///
    /// # Arguments
    /// * `default_priority_fee` - Fallback tip in wei
    /// * `base_fee_multiplier` - Headroom over the latest base fee (e.g. 2.0)
    pub fn new(default_priority_fee: u128, base_fee_multiplier: f64) -> Self {
        Self {
            default_priority_fee,
            base_fee_multiplier,
            max_fee_cap: gwei_to_wei(default_max_gas_price_gwei()),
        }
    }

    pub fn with_max_fee_cap(mut self, cap: u128) -> Self {
        self.max_fee_cap = cap;
        self
    }

    fn params(&self, base_fee: u128, priority_fee: u128) -> GasParams {
        let priority = priority_fee.min(self.max_fee_cap);
        let max_fee = ((base_fee as f64) * self.base_fee_multiplier) as u128 + priority;
        GasParams::Eip1559 {
            max_fee_per_gas: max_fee.min(self.max_fee_cap),
            max_priority_fee_per_gas: priority,
        }
    }
}

#[async_trait]
impl GasStrategy for Eip1559GasStrategy {
    async fn fetch_params(&self, rpc_url: &str) -> ChainResult<GasParams> {
        let provider = ProviderBuilder::new().on_http(parse_url(rpc_url)?);

        let block = provider
            .get_block_by_number(BlockNumberOrTag::Latest)
            .await?
            .ok_or_else(|| ChainError::Transport("latest block unavailable".into()))?;
        let base_fee = block
            .header
            .base_fee_per_gas
            .map(u128::from)
            .unwrap_or(FALLBACK_BASE_FEE);

        let priority_fee = provider
            .get_max_priority_fee_per_gas()
            .await
            .unwrap_or(self.default_priority_fee);

        Ok(self.params(base_fee, priority_fee))
    }

    fn name(&self) -> &'static str {
        "EIP-1559"
    }
}
