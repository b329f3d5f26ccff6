//! Per-candidate liquidation decisions.
//!
//! For one `(trader, market)` pair: check account-wide maintenance margin,
//! then pull all maker liquidity, then trade down the taker position. Both
//! unwind steps run once the solvency check fails; neither blocks the other.

use alloy::primitives::{Address, U256};
use perpdex_chain::contracts::exchange;
use perpdex_chain::{read, ChainClient, ChainError, TxOptions, UnwindSide};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::config::EngineConfig;
use crate::executor::{ExecutionOutcome, TransactionExecutor};

const BPS_DENOMINATOR: u64 = 10_000;

/// `amount * bps / 10_000` without overflowing at `U256::MAX`.
pub fn scale_bps(amount: U256, bps: u32) -> U256 {
    let denominator = U256::from(BPS_DENOMINATOR);
    let bps = U256::from(bps);
    amount / denominator * bps + amount % denominator * bps / denominator
}

/// Why an unwind step did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NoLiquidity,
    FlatPosition,
    /// The exchange allows no trade (or the reduced bound rounds to zero).
    NothingTradable,
}

/// Result of one unwind step.
#[derive(Debug, Clone)]
pub enum UnwindOutcome {
    Skipped(SkipReason),
    /// A read needed to size the step failed.
    ReadFailed(ChainError),
    Executed(ExecutionOutcome),
}

impl UnwindOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Skipped(_) => "skipped",
            Self::ReadFailed(_) => "read_failed",
            Self::Executed(outcome) => outcome.label(),
        }
    }
}

/// Result of one liquidation attempt.
#[derive(Debug, Clone)]
pub enum LiquidationOutcome {
    SufficientMargin,
    SolvencyCheckFailed(ChainError),
    Unwound {
        maker: UnwindOutcome,
        taker: UnwindOutcome,
    },
}

/// Decides and executes liquidations against one exchange.
pub struct LiquidationEngine {
    /// Reads (solvency, maker info, position share, max trade)
    client: Arc<dyn ChainClient>,
    /// Writes go through the estimate gate
    executor: TransactionExecutor,
    exchange: Address,
    /// Share of `maxTrade` used for the taker unwind
    trade_reduction_bps: u32,
}

impl LiquidationEngine {
    /// # Arguments
    /// * `client` - Chain access for the read-only checks
    /// * `executor` - Submits the unwind transactions
    /// * `exchange` - PerpdexExchange address
    /// * `config` - Taker unwind sizing
    pub fn new(
        client: Arc<dyn ChainClient>,
        executor: TransactionExecutor,
        exchange: Address,
        config: &EngineConfig,
    ) -> Self {
        Self {
            client,
            executor,
            exchange,
            trade_reduction_bps: config.trade_reduction_bps.min(BPS_DENOMINATOR as u32),
        }
    }

    pub fn exchange(&self) -> Address {
        self.exchange
    }

    /// Run the solvency → maker → taker pipeline for one pair.
    #[instrument(skip_all, fields(trader = %trader, market = %market))]
    pub async fn liquidate(&self, trader: Address, market: Address) -> LiquidationOutcome {
        let solvent = read(
            self.client.as_ref(),
            self.exchange,
            exchange::has_enough_maintenance_margin(trader),
        )
        .await;

        match solvent {
            Ok(ret) if ret._0 => {
                debug!("Skip liquidation, trader has enough maintenance margin");
                return LiquidationOutcome::SufficientMargin;
            }
            Ok(_) => info!("Trader below maintenance margin, liquidating"),
            Err(e) => {
                warn!(error = %e, "Solvency check failed");
                return LiquidationOutcome::SolvencyCheckFailed(e);
            }
        }

        let maker = self.unwind_maker(trader, market).await;
        let taker = self.unwind_taker(trader, market).await;

        info!(maker = maker.label(), taker = taker.label(), "Liquidation attempt finished");
        LiquidationOutcome::Unwound { maker, taker }
    }

    /// Remove all of the trader's liquidity in `market`.
    pub async fn unwind_maker(&self, trader: Address, market: Address) -> UnwindOutcome {
        let info = match read(
            self.client.as_ref(),
            self.exchange,
            exchange::get_maker_info(trader, market),
        )
        .await
        {
            Ok(info) => info,
            Err(e) => {
                warn!(error = %e, "getMakerInfo failed");
                return UnwindOutcome::ReadFailed(e);
            }
        };

        if info.liquidity.is_zero() {
            debug!("No maker liquidity");
            return UnwindOutcome::Skipped(SkipReason::NoLiquidity);
        }

        let call = exchange::remove_all_liquidity(self.exchange, trader, market, info.liquidity);
        let outcome = self.executor.execute(&call, &TxOptions::default()).await;
        info!(liquidity = %info.liquidity, outcome = outcome.label(), "removeLiquidity");
        UnwindOutcome::Executed(outcome)
    }

    /// Trade against the trader's open position, sized below `maxTrade`.
    pub async fn unwind_taker(&self, trader: Address, market: Address) -> UnwindOutcome {
        let share = match read(
            self.client.as_ref(),
            self.exchange,
            exchange::get_open_position_share(trader, market),
        )
        .await
        {
            Ok(ret) => ret._0,
            Err(e) => {
                warn!(error = %e, "getOpenPositionShare failed");
                return UnwindOutcome::ReadFailed(e);
            }
        };

        let Some(side) = UnwindSide::for_share(share) else {
            debug!("No open taker position");
            return UnwindOutcome::Skipped(SkipReason::FlatPosition);
        };

        let max_trade = match read(
            self.client.as_ref(),
            self.exchange,
            exchange::max_trade(trader, market, self.client.sender(), side),
        )
        .await
        {
            Ok(ret) => ret.amount,
            Err(e) => {
                warn!(error = %e, "maxTrade failed");
                return UnwindOutcome::ReadFailed(e);
            }
        };

        let amount = share
            .unsigned_abs()
            .min(scale_bps(max_trade, self.trade_reduction_bps));
        if amount.is_zero() {
            debug!(share = %share, max_trade = %max_trade, "Nothing tradable");
            return UnwindOutcome::Skipped(SkipReason::NothingTradable);
        }

        let call = exchange::unwind_trade(self.exchange, trader, market, side, amount);
        let outcome = self.executor.execute(&call, &TxOptions::default()).await;
        info!(
            share = %share,
            max_trade = %max_trade,
            amount = %amount,
            side = ?side,
            outcome = outcome.label(),
            "trade"
        );
        UnwindOutcome::Executed(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExecutorConfig;
    use crate::testing::{MockChain, Recorded};
    use alloy::primitives::I256;
    use alloy::sol_types::SolCall;
    use perpdex_chain::IPerpdexExchange;

    fn engine(chain: Arc<MockChain>) -> LiquidationEngine {
        let executor = TransactionExecutor::new(chain.clone(), &ExecutorConfig::default());
        LiquidationEngine::new(chain, executor, Address::repeat_byte(0xee), &EngineConfig::default())
    }

    fn insolvent_chain(liquidity: u64, share: i64, max_trade: u64) -> Arc<MockChain> {
        let chain = Arc::new(MockChain::new());
        chain.respond_margin(false);
        chain.respond_maker_liquidity(U256::from(liquidity));
        chain.respond_share(I256::try_from(share).unwrap());
        chain.respond_max_trade(U256::from(max_trade));
        chain
    }

    #[test]
    fn test_scale_bps() {
        assert_eq!(scale_bps(U256::from(80), 8000), U256::from(64));
        assert_eq!(scale_bps(U256::from(1), 8000), U256::ZERO);
        assert_eq!(scale_bps(U256::from(10_000), 10_000), U256::from(10_000));
        // No overflow at the top of the range.
        assert!(scale_bps(U256::MAX, 8000) < U256::MAX);
    }

    #[tokio::test]
    async fn test_solvent_trader_has_no_downstream_calls() {
        let chain = Arc::new(MockChain::new());
        chain.respond_margin(true);

        let outcome = engine(chain.clone())
            .liquidate(Address::repeat_byte(1), Address::repeat_byte(2))
            .await;

        assert!(matches!(outcome, LiquidationOutcome::SufficientMargin));
        assert_eq!(
            chain.recorded(),
            vec![Recorded::Call(
                IPerpdexExchange::hasEnoughMaintenanceMarginCall::SIGNATURE
            )]
        );
    }

    #[tokio::test]
    async fn test_insolvent_trader_unwinds_maker_then_taker() {
        let chain = insolvent_chain(10, 100, 80);

        let outcome = engine(chain.clone())
            .liquidate(Address::repeat_byte(1), Address::repeat_byte(2))
            .await;
        assert!(matches!(
            outcome,
            LiquidationOutcome::Unwound {
                maker: UnwindOutcome::Executed(ExecutionOutcome::Confirmed(_)),
                taker: UnwindOutcome::Executed(ExecutionOutcome::Confirmed(_)),
            }
        ));

        let submitted = chain.submitted_inputs();
        assert_eq!(submitted.len(), 2);

        let remove = IPerpdexExchange::removeLiquidityCall::abi_decode(&submitted[0], true).unwrap();
        assert_eq!(remove.params.liquidity, U256::from(10));
        assert_eq!(remove.params.minBase, U256::ZERO);

        let trade = IPerpdexExchange::tradeCall::abi_decode(&submitted[1], true).unwrap();
        assert_eq!(trade.params.amount, U256::from(64));
        assert!(trade.params.isBaseToQuote);
        assert_eq!(trade.params.oppositeAmountBound, U256::ZERO);
    }

    #[tokio::test]
    async fn test_short_position_buys_back_with_open_bound() {
        let chain = insolvent_chain(0, -30, 1_000);

        let outcome = engine(chain.clone())
            .liquidate(Address::repeat_byte(1), Address::repeat_byte(2))
            .await;
        assert!(matches!(
            outcome,
            LiquidationOutcome::Unwound {
                maker: UnwindOutcome::Skipped(SkipReason::NoLiquidity),
                ..
            }
        ));

        let submitted = chain.submitted_inputs();
        assert_eq!(submitted.len(), 1);
        let trade = IPerpdexExchange::tradeCall::abi_decode(&submitted[0], true).unwrap();
        assert_eq!(trade.params.amount, U256::from(30));
        assert!(!trade.params.isBaseToQuote);
        assert!(!trade.params.isExactInput);
        assert_eq!(trade.params.oppositeAmountBound, U256::MAX);
    }

    #[tokio::test]
    async fn test_maker_failure_does_not_block_taker() {
        let chain = insolvent_chain(10, 100, 80);
        chain.fail_estimate_for(
            IPerpdexExchange::removeLiquidityCall::SELECTOR,
            ChainError::Revert("PE_RL: below min".into()),
        );

        let outcome = engine(chain.clone())
            .liquidate(Address::repeat_byte(1), Address::repeat_byte(2))
            .await;

        match outcome {
            LiquidationOutcome::Unwound { maker, taker } => {
                assert!(matches!(
                    maker,
                    UnwindOutcome::Executed(ExecutionOutcome::NotExecutable(_))
                ));
                assert!(matches!(
                    taker,
                    UnwindOutcome::Executed(ExecutionOutcome::Confirmed(_))
                ));
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(chain.submit_count(), 1);
    }

    #[tokio::test]
    async fn test_flat_position_skips_max_trade() {
        let chain = insolvent_chain(0, 0, 80);

        let outcome = engine(chain.clone())
            .liquidate(Address::repeat_byte(1), Address::repeat_byte(2))
            .await;
        assert!(matches!(
            outcome,
            LiquidationOutcome::Unwound {
                taker: UnwindOutcome::Skipped(SkipReason::FlatPosition),
                ..
            }
        ));
        assert!(!chain
            .recorded()
            .contains(&Recorded::Call(IPerpdexExchange::maxTradeCall::SIGNATURE)));
    }

    #[tokio::test]
    async fn test_zero_max_trade_skips_taker() {
        let chain = insolvent_chain(0, 100, 1);

        let outcome = engine(chain.clone())
            .liquidate(Address::repeat_byte(1), Address::repeat_byte(2))
            .await;
        assert!(matches!(
            outcome,
            LiquidationOutcome::Unwound {
                taker: UnwindOutcome::Skipped(SkipReason::NothingTradable),
                ..
            }
        ));
        assert_eq!(chain.submit_count(), 0);
    }

    #[tokio::test]
    async fn test_solvency_read_failure_stops_pipeline() {
        let chain = Arc::new(MockChain::new());

        let outcome = engine(chain.clone())
            .liquidate(Address::repeat_byte(1), Address::repeat_byte(2))
            .await;
        assert!(matches!(outcome, LiquidationOutcome::SolvencyCheckFailed(_)));
        assert_eq!(chain.recorded().len(), 1);
    }
}
