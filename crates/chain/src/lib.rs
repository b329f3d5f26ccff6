//! PerpDEX chain interaction layer.
//!
//! This crate provides:
//! - The `ChainClient` capability trait and its alloy implementation
//! - Bindings for the PerpdexExchange contract and its events
//! - Log decoding and range fetching
//! - Transaction signing with local nonce tracking
//! - Gas strategy abstraction (Legacy + EIP-1559)

mod client;
pub mod contracts;
mod error;
pub mod events;
pub mod gas;
mod provider;
mod signer;

pub use client::{read, ChainClient, ContractCall, ReceiptStatus, TxOptions};
pub use contracts::{load_exchange_artifact, DeploymentArtifact, IPerpdexExchange, UnwindSide, NO_DEADLINE};
pub use error::{ChainError, ChainResult};
pub use events::{DecodedEvent, EventSource, EventTable, EventValue, LogFetcher};
pub use gas::{gas_strategy, GasConfig, GasStrategy};
pub use provider::AlloyChainClient;
pub use signer::TransactionSender;
