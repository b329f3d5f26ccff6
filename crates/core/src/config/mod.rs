//! Configuration loading.
//!
//! Sources, lowest precedence first:
//! - the profile selected by `BOT_PROFILE`
//! - a TOML file at `LIQUIDATOR_CONFIG`, with `${VAR}` expansion
//! - `INITIAL_EVENT_BLOCK_NUMBER`, which overrides `indexer.start_block`

mod liquidator;

pub use liquidator::{EngineConfig, ExecutorConfig, IndexerConfig, LiquidatorConfig, ScannerConfig};

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::OnceLock;
use tracing::info;

/// Path of the optional TOML overlay.
pub const CONFIG_PATH_VAR: &str = "LIQUIDATOR_CONFIG";
/// Start block override.
pub const START_BLOCK_VAR: &str = "INITIAL_EVENT_BLOCK_NUMBER";

fn env_pattern() -> Option<&'static regex_lite::Regex> {
    static PATTERN: OnceLock<Option<regex_lite::Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| regex_lite::Regex::new(r"\$\{([^}]+)\}").ok())
        .as_ref()
}

/// Expand `${VAR_NAME}` patterns with environment values. Unset variables
/// are left as written.
pub fn expand_env(s: &str) -> String {
    let Some(re) = env_pattern() else {
        return s.to_string();
    };
    re.replace_all(s, |caps: &regex_lite::Captures<'_>| {
        std::env::var(&caps[1]).unwrap_or_else(|_| caps[0].to_string())
    })
    .into_owned()
}

/// Recursively overlay `top` onto `base`. Tables merge key by key; any
/// other value in `top` replaces the one in `base`.
fn merge(base: &mut toml::Value, top: toml::Value) {
    match (base, top) {
        (toml::Value::Table(base), toml::Value::Table(top)) => {
            for (key, value) in top {
                match base.get_mut(&key) {
                    Some(existing) => merge(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, top) => *base = top,
    }
}

impl LiquidatorConfig {
    /// Overlay the TOML document `content` onto this configuration.
    pub fn overlay_toml(&self, content: &str) -> Result<Self> {
        let top: toml::Value = toml::from_str(&expand_env(content)).context("Invalid config TOML")?;
        let mut base = toml::Value::try_from(self).context("Failed to serialize config")?;
        merge(&mut base, top);
        base.try_into().context("Invalid config values")
    }

    pub fn overlay_file(&self, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        self.overlay_toml(&content)
    }

    /// Profile from the environment, overlaid with the config file and the
    /// start block override when present.
    pub fn load() -> Result<Self> {
        let mut config = Self::from_env();

        if let Ok(path) = std::env::var(CONFIG_PATH_VAR) {
            info!(path = %path, "Applying config file");
            config = config.overlay_file(&path)?;
        }

        if let Ok(raw) = std::env::var(START_BLOCK_VAR) {
            config.indexer.start_block = raw
                .trim()
                .parse()
                .with_context(|| format!("Invalid {}: {}", START_BLOCK_VAR, raw))?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject values the indexer and dispatcher cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.indexer.window_size == 0 {
            anyhow::bail!("indexer.window_size must be at least 1");
        }
        if self.engine.max_in_flight == 0 {
            anyhow::bail!("engine.max_in_flight must be at least 1");
        }
        if self.engine.trade_reduction_bps > 10_000 {
            anyhow::bail!(
                "engine.trade_reduction_bps must not exceed 10000, got {}",
                self.engine.trade_reduction_bps
            );
        }
        Ok(())
    }
}
