//! Log decoding and range log fetching.
//!
//! Logs are fetched broadly (contract address only, no topic filter) and
//! decoded narrowly: each raw log is tried against every event in the
//! [`EventTable`]. A log that matches no entry is dropped.
//!
//! A table is built either from the deployment artifact's JSON ABI, which
//! is authoritative for the deployed contract, or from the built-in
//! `sol!` layouts when no artifact is configured.

use alloy::dyn_abi::{DynSolValue, EventExt};
use alloy::json_abi::{Event, JsonAbi};
use alloy::primitives::{Address, LogData, I256, U256};
use alloy::rpc::types::Log;
use alloy::sol_types::SolEvent;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, trace};

use crate::client::ChainClient;
use crate::contracts::IPerpdexExchange;
use crate::error::ChainResult;

/// A single decoded argument value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum EventValue {
    Address(Address),
    Uint(U256),
    Int(I256),
    Bool(bool),
}

impl EventValue {
    /// Convert a dynamically decoded value. Types the folder never reads
    /// (bytes, strings, arrays, tuples) yield `None`.
    pub fn from_dyn(value: DynSolValue) -> Option<Self> {
        match value {
            DynSolValue::Address(addr) => Some(Self::Address(addr)),
            DynSolValue::Uint(v, _) => Some(Self::Uint(v)),
            DynSolValue::Int(v, _) => Some(Self::Int(v)),
            DynSolValue::Bool(v) => Some(Self::Bool(v)),
            _ => None,
        }
    }
}

/// Decoded event arguments keyed by ABI field name.
pub type EventArgs = BTreeMap<String, EventValue>;

/// A log decoded against one of the exchange's event signatures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodedEvent {
    /// Event name, e.g. `PositionChanged`
    pub name: String,
    pub block_number: u64,
    /// Position of the log within its block
    pub log_index: u64,
    /// Emitting contract
    pub address: Address,
    pub args: EventArgs,
}

impl DecodedEvent {
    /// Address-typed argument `key`, if present.
    pub fn address_arg(&self, key: &str) -> Option<Address> {
        match self.args.get(key) {
            Some(EventValue::Address(addr)) => Some(*addr),
            _ => None,
        }
    }
}

/// Conversion of a typed `sol!` event into generic arguments.
pub trait IntoEventArgs {
    fn into_args(self) -> EventArgs;
}

type DecodeFn = fn(&LogData) -> Option<EventArgs>;

#[derive(Clone)]
enum Decoder {
    /// Compiled `sol!` layout
    Typed(DecodeFn),
    /// Layout read from a JSON ABI at startup
    Abi(Arc<Event>),
}

/// One decodable event signature.
#[derive(Clone)]
pub struct EventDecoder {
    name: String,
    decoder: Decoder,
}

impl std::fmt::Debug for EventDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let source = match self.decoder {
            Decoder::Typed(_) => "sol",
            Decoder::Abi(_) => "abi",
        };
        f.debug_struct("EventDecoder")
            .field("name", &self.name)
            .field("source", &source)
            .finish()
    }
}

fn decode_as<E: SolEvent + IntoEventArgs>(data: &LogData) -> Option<EventArgs> {
    E::decode_log_data(data, true).ok().map(IntoEventArgs::into_args)
}

/// Decode against a JSON ABI event, naming values after its inputs.
fn decode_abi(event: &Event, data: &LogData) -> Option<EventArgs> {
    let decoded = event.decode_log(data, true).ok()?;
    let mut indexed = decoded.indexed.into_iter();
    let mut body = decoded.body.into_iter();

    let mut args = EventArgs::new();
    for param in &event.inputs {
        let value = if param.indexed { indexed.next() } else { body.next() }?;
        if let Some(value) = EventValue::from_dyn(value) {
            args.insert(param.name.clone(), value);
        }
    }
    Some(args)
}

impl EventDecoder {
    pub fn of<E: SolEvent + IntoEventArgs>() -> Self {
        Self {
            name: E::SIGNATURE
                .split('(')
                .next()
                .unwrap_or(E::SIGNATURE)
                .to_string(),
            decoder: Decoder::Typed(decode_as::<E>),
        }
    }

    pub fn from_abi(event: &Event) -> Self {
        Self {
            name: event.name.clone(),
            decoder: Decoder::Abi(Arc::new(event.clone())),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn decode(&self, data: &LogData) -> Option<EventArgs> {
        match &self.decoder {
            Decoder::Typed(decode) => decode(data),
            Decoder::Abi(event) => decode_abi(event, data),
        }
    }
}

/// The decode table for a contract: every event it declares.
#[derive(Debug, Clone)]
pub struct EventTable {
    decoders: Vec<EventDecoder>,
}

impl EventTable {
    pub fn new(decoders: Vec<EventDecoder>) -> Self {
        Self { decoders }
    }

    /// Built-in layouts for the PerpdexExchange events.
    pub fn perpdex_exchange() -> Self {
        use IPerpdexExchange::*;
        Self::new(vec![
            EventDecoder::of::<Deposited>(),
            EventDecoder::of::<Withdrawn>(),
            EventDecoder::of::<LiquidityAdded>(),
            EventDecoder::of::<LiquidityRemoved>(),
            EventDecoder::of::<PositionLiquidated>(),
            EventDecoder::of::<PositionChanged>(),
        ])
    }

    /// Every non-anonymous event declared in `abi`.
    ///
    /// Anonymous events carry no selector topic, so they would match any
    /// log with a compatible layout and are left out.
    pub fn from_abi(abi: &JsonAbi) -> Self {
        Self::new(
            abi.events()
                .filter(|event| !event.anonymous)
                .map(EventDecoder::from_abi)
                .collect(),
        )
    }

    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.decoders.iter().map(EventDecoder::name)
    }

    pub fn is_empty(&self) -> bool {
        self.decoders.is_empty()
    }

    /// Decode `log` against every signature. A mismatch excludes only that
    /// signature.
    pub fn decode(&self, log: &Log) -> Vec<DecodedEvent> {
        let block_number = log.block_number.unwrap_or(0);
        let log_index = log.log_index.unwrap_or(0);

        self.decoders
            .iter()
            .filter_map(|decoder| {
                let args = decoder.decode(&log.inner.data);
                if args.is_none() {
                    trace!(event = decoder.name(), block = block_number, "Signature mismatch");
                }
                args.map(|args| DecodedEvent {
                    name: decoder.name.clone(),
                    block_number,
                    log_index,
                    address: log.inner.address,
                    args,
                })
            })
            .collect()
    }
}

/// Anything that can produce decoded events for a block range.
#[async_trait]
pub trait EventSource: Send + Sync {
    async fn fetch(&self, from_block: u64, to_block: u64) -> ChainResult<Vec<DecodedEvent>>;
}

/// Fetches one contract's logs and decodes them with its event table.
pub struct LogFetcher {
    client: Arc<dyn ChainClient>,
    /// Only logs emitted by this address are requested
    contract: Address,
    /// Signatures tried against each log
    table: EventTable,
}

impl LogFetcher {
    /// # Arguments
    /// * `client` - Chain access for `eth_getLogs`
    /// * `contract` - Emitting contract
    /// * `table` - Built-in layouts or the deployed ABI's events
    pub fn new(client: Arc<dyn ChainClient>, contract: Address, table: EventTable) -> Self {
        Self {
            client,
            contract,
            table,
        }
    }
}

#[async_trait]
impl EventSource for LogFetcher {
    async fn fetch(&self, from_block: u64, to_block: u64) -> ChainResult<Vec<DecodedEvent>> {
        debug!(
            contract = %self.contract,
            from_block,
            to_block,
            "Fetching logs"
        );

        let logs = self.client.get_logs(self.contract, from_block, to_block).await?;
        let raw_count = logs.len();

        let mut events: Vec<DecodedEvent> = logs.iter().flat_map(|log| self.table.decode(log)).collect();
        events.sort_by_key(|e| (e.block_number, e.log_index));

        debug!(
            from_block,
            to_block,
            raw = raw_count,
            decoded = events.len(),
            "Logs decoded"
        );

        Ok(events)
    }
}

fn address(v: Address) -> EventValue {
    EventValue::Address(v)
}

fn uint(v: U256) -> EventValue {
    EventValue::Uint(v)
}

fn int(v: I256) -> EventValue {
    EventValue::Int(v)
}

macro_rules! args {
    ($($key:literal => $value:expr),* $(,)?) => {{
        let mut args = EventArgs::new();
        $(args.insert($key.to_string(), $value);)*
        args
    }};
}

impl IntoEventArgs for IPerpdexExchange::Deposited {
    fn into_args(self) -> EventArgs {
        args! { "trader" => address(self.trader), "amount" => uint(self.amount) }
    }
}

impl IntoEventArgs for IPerpdexExchange::Withdrawn {
    fn into_args(self) -> EventArgs {
        args! { "trader" => address(self.trader), "amount" => uint(self.amount) }
    }
}

impl IntoEventArgs for IPerpdexExchange::LiquidityAdded {
    fn into_args(self) -> EventArgs {
        args! {
            "trader" => address(self.trader),
            "market" => address(self.market),
            "base" => uint(self.base),
            "quote" => uint(self.quote),
            "liquidity" => uint(self.liquidity),
            "cumBasePerLiquidityX96" => uint(self.cumBasePerLiquidityX96),
            "cumQuotePerLiquidityX96" => uint(self.cumQuotePerLiquidityX96),
        }
    }
}

impl IntoEventArgs for IPerpdexExchange::LiquidityRemoved {
    fn into_args(self) -> EventArgs {
        args! {
            "trader" => address(self.trader),
            "market" => address(self.market),
            "liquidator" => address(self.liquidator),
            "base" => uint(self.base),
            "quote" => uint(self.quote),
            "liquidity" => uint(self.liquidity),
            "takerBase" => int(self.takerBase),
            "takerQuote" => int(self.takerQuote),
            "realizedPnl" => int(self.realizedPnl),
        }
    }
}

impl IntoEventArgs for IPerpdexExchange::PositionLiquidated {
    fn into_args(self) -> EventArgs {
        args! {
            "trader" => address(self.trader),
            "market" => address(self.market),
            "liquidator" => address(self.liquidator),
            "base" => int(self.base),
            "quote" => int(self.quote),
            "realizedPnl" => int(self.realizedPnl),
            "protocolFee" => uint(self.protocolFee),
            "liquidationPenalty" => uint(self.liquidationPenalty),
            "liquidationReward" => uint(self.liquidationReward),
            "insuranceFundReward" => uint(self.insuranceFundReward),
        }
    }
}

impl IntoEventArgs for IPerpdexExchange::PositionChanged {
    fn into_args(self) -> EventArgs {
        args! {
            "trader" => address(self.trader),
            "market" => address(self.market),
            "base" => int(self.base),
            "quote" => int(self.quote),
            "realizedPnl" => int(self.realizedPnl),
            "protocolFee" => uint(self.protocolFee),
            "baseBalancePerShareX96" => uint(self.baseBalancePerShareX96),
            "sharePriceAfterX96" => uint(self.sharePriceAfterX96),
        }
    }
}
