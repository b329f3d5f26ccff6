//! PerpdexExchange interface.
//!
//! Only the surface the liquidator touches is declared: solvency and
//! position reads, the two unwind entry points, and the events that reveal
//! which traders hold positions in which market.

use alloy::primitives::{Address, I256, U256};
use alloy::sol;

use crate::client::ContractCall;

sol! {
    /// PerpdexExchange (subset for liquidation)
    #[derive(Debug)]
    interface IPerpdexExchange {
        struct RemoveLiquidityParams {
            address trader;
            address market;
            uint256 liquidity;
            uint256 minBase;
            uint256 minQuote;
            uint256 deadline;
        }

        struct TradeParams {
            address trader;
            address market;
            bool isBaseToQuote;
            bool isExactInput;
            uint256 amount;
            uint256 oppositeAmountBound;
            uint256 deadline;
        }

        struct MaxTradeParams {
            address trader;
            address market;
            address caller;
            bool isBaseToQuote;
            bool isExactInput;
        }

        event Deposited(address indexed trader, uint256 amount);
        event Withdrawn(address indexed trader, uint256 amount);
        event LiquidityAdded(
            address indexed trader,
            address indexed market,
            uint256 base,
            uint256 quote,
            uint256 liquidity,
            uint256 cumBasePerLiquidityX96,
            uint256 cumQuotePerLiquidityX96
        );
        event LiquidityRemoved(
            address indexed trader,
            address indexed market,
            address liquidator,
            uint256 base,
            uint256 quote,
            uint256 liquidity,
            int256 takerBase,
            int256 takerQuote,
            int256 realizedPnl
        );
        event PositionLiquidated(
            address indexed trader,
            address indexed market,
            address indexed liquidator,
            int256 base,
            int256 quote,
            int256 realizedPnl,
            uint256 protocolFee,
            uint256 baseBalancePerShareX96,
            uint256 sharePriceAfterX96,
            uint256 liquidationPenalty,
            uint256 liquidationReward,
            uint256 insuranceFundReward
        );
        event PositionChanged(
            address indexed trader,
            address indexed market,
            int256 base,
            int256 quote,
            int256 realizedPnl,
            uint256 protocolFee,
            uint256 baseBalancePerShareX96,
            uint256 sharePriceAfterX96
        );

        function hasEnoughMaintenanceMargin(address trader) external view returns (bool);

        function getMakerInfo(address trader, address market)
            external
            view
            returns (uint256 liquidity, uint256 cumBaseSharePerLiquidityX96, uint256 cumQuotePerLiquidityX96);

        function getOpenPositionShare(address trader, address market) external view returns (int256);

        function maxTrade(MaxTradeParams calldata params) external view returns (uint256 amount);

        function removeLiquidity(RemoveLiquidityParams calldata params)
            external
            returns (uint256 base, uint256 quote);

        function trade(TradeParams calldata params) external returns (uint256 oppositeAmount);
    }
}

/// Deadline used for unwind calls; never expires.
pub const NO_DEADLINE: U256 = U256::MAX;

/// Direction of the trade that flattens a taker position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnwindSide {
    /// Position is long: sell base for quote, exact input.
    SellBase,
    /// Position is short: buy base with quote, exact output.
    BuyBase,
}

impl UnwindSide {
    /// Side that closes a signed base share. `None` for a flat position.
    pub fn for_share(share: I256) -> Option<Self> {
        if share.is_zero() {
            None
        } else if share.is_negative() {
            Some(Self::BuyBase)
        } else {
            Some(Self::SellBase)
        }
    }

    pub fn is_base_to_quote(self) -> bool {
        matches!(self, Self::SellBase)
    }

    /// Exact-input when selling base, exact-output when buying it back.
    pub fn is_exact_input(self) -> bool {
        self.is_base_to_quote()
    }

    /// Bound on the quote leg that can never cause the trade to revert.
    ///
    /// Selling with exact input bounds the minimum quote received (0).
    /// Buying with exact output bounds the maximum quote paid (`U256::MAX`).
    pub fn permissive_bound(self) -> U256 {
        match self {
            Self::SellBase => U256::ZERO,
            Self::BuyBase => U256::MAX,
        }
    }
}

/// Solvency check for `trader` across all markets.
pub fn has_enough_maintenance_margin(trader: Address) -> IPerpdexExchange::hasEnoughMaintenanceMarginCall {
    IPerpdexExchange::hasEnoughMaintenanceMarginCall { trader }
}

pub fn get_maker_info(trader: Address, market: Address) -> IPerpdexExchange::getMakerInfoCall {
    IPerpdexExchange::getMakerInfoCall { trader, market }
}

pub fn get_open_position_share(
    trader: Address,
    market: Address,
) -> IPerpdexExchange::getOpenPositionShareCall {
    IPerpdexExchange::getOpenPositionShareCall { trader, market }
}

/// Largest trade the exchange accepts from `caller` on `trader`'s behalf.
pub fn max_trade(
    trader: Address,
    market: Address,
    caller: Address,
    side: UnwindSide,
) -> IPerpdexExchange::maxTradeCall {
    IPerpdexExchange::maxTradeCall {
        params: IPerpdexExchange::MaxTradeParams {
            trader,
            market,
            caller,
            isBaseToQuote: side.is_base_to_quote(),
            isExactInput: side.is_exact_input(),
        },
    }
}

/// Remove all of `trader`'s liquidity with zero minimum-out bounds.
pub fn remove_all_liquidity(
    exchange: Address,
    trader: Address,
    market: Address,
    liquidity: U256,
) -> ContractCall {
    let call = IPerpdexExchange::removeLiquidityCall {
        params: IPerpdexExchange::RemoveLiquidityParams {
            trader,
            market,
            liquidity,
            minBase: U256::ZERO,
            minQuote: U256::ZERO,
            deadline: NO_DEADLINE,
        },
    };
    ContractCall::new(exchange, &call)
}

/// Trade `amount` base against `trader`'s taker position.
pub fn unwind_trade(
    exchange: Address,
    trader: Address,
    market: Address,
    side: UnwindSide,
    amount: U256,
) -> ContractCall {
    let call = IPerpdexExchange::tradeCall {
        params: IPerpdexExchange::TradeParams {
            trader,
            market,
            isBaseToQuote: side.is_base_to_quote(),
            isExactInput: side.is_exact_input(),
            amount,
            oppositeAmountBound: side.permissive_bound(),
            deadline: NO_DEADLINE,
        },
    };
    ContractCall::new(exchange, &call)
}
