//! Contract bindings and deployment artifacts.
//!
//! Deployment artifacts are the JSON files written by the exchange's
//! deploy scripts: `{ "address": "0x...", "abi": [...] }`.

pub mod exchange;

pub use exchange::{IPerpdexExchange, UnwindSide, NO_DEADLINE};

use alloy::json_abi::JsonAbi;
use alloy::primitives::Address;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

/// File name of the exchange artifact inside the ABI directory.
pub const EXCHANGE_ARTIFACT: &str = "PerpdexExchange.json";

/// Subset of a deployment artifact we need.
#[derive(Debug, Clone, Deserialize)]
pub struct DeploymentArtifact {
    /// Deployed contract address
    pub address: Address,
    /// Contract ABI; the event table is built from its events
    #[serde(default)]
    pub abi: JsonAbi,
}

impl DeploymentArtifact {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read artifact {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse artifact {}", path.display()))
    }
}

/// Load `<dir>/PerpdexExchange.json`.
pub fn load_exchange_artifact(abi_dir: impl AsRef<Path>) -> Result<DeploymentArtifact> {
    DeploymentArtifact::from_file(abi_dir.as_ref().join(EXCHANGE_ARTIFACT))
}
