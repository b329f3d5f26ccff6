//! Scripted chain, event source and store for unit tests.

use alloy::primitives::{Address, Bytes, B256, I256, U256};
use alloy::rpc::types::Log;
use alloy::sol_types::SolCall;
use async_trait::async_trait;
use parking_lot::Mutex;
use perpdex_chain::events::EventValue;
use perpdex_chain::{
    ChainClient, ChainError, ChainResult, ContractCall, DecodedEvent, EventSource, IPerpdexExchange,
    ReceiptStatus, TxOptions,
};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use crate::cache::KvStore;
use crate::error::CacheError;

/// One interaction with [`MockChain`].
#[derive(Debug, Clone, PartialEq)]
pub enum Recorded {
    Call(&'static str),
    Estimate(&'static str),
    Submit {
        method: &'static str,
        input: Bytes,
        options: TxOptions,
    },
    ReceiptWait(B256),
}

/// In-memory [`ChainClient`] with scripted responses.
///
/// Reads are answered by selector; an unscripted read fails with a
/// transport error. Estimates succeed unless told otherwise, and receipt
/// waits succeed once the script runs out.
pub struct MockChain {
    sender: Address,
    head: Mutex<ChainResult<u64>>,
    responses: Mutex<HashMap<[u8; 4], Bytes>>,
    call_delay: Mutex<Duration>,
    estimate: Mutex<ChainResult<u64>>,
    estimate_failures: Mutex<HashMap<[u8; 4], ChainError>>,
    submit_failure: Mutex<Option<ChainError>>,
    receipts: Mutex<VecDeque<Result<bool, ChainError>>>,
    next_hash: AtomicU64,
    submits: AtomicUsize,
    receipt_waits: AtomicUsize,
    recorded: Mutex<Vec<Recorded>>,
    call_inputs: Mutex<Vec<Bytes>>,
    logs: Mutex<ChainResult<Vec<Log>>>,
}

impl MockChain {
    pub fn new() -> Self {
        Self {
            sender: Address::repeat_byte(0xaa),
            head: Mutex::new(Ok(0)),
            responses: Mutex::new(HashMap::new()),
            call_delay: Mutex::new(Duration::ZERO),
            estimate: Mutex::new(Ok(100_000)),
            estimate_failures: Mutex::new(HashMap::new()),
            submit_failure: Mutex::new(None),
            receipts: Mutex::new(VecDeque::new()),
            next_hash: AtomicU64::new(1),
            submits: AtomicUsize::new(0),
            receipt_waits: AtomicUsize::new(0),
            recorded: Mutex::new(Vec::new()),
            call_inputs: Mutex::new(Vec::new()),
            logs: Mutex::new(Ok(Vec::new())),
        }
    }

    pub fn set_head(&self, block: u64) {
        *self.head.lock() = Ok(block);
    }

    pub fn fail_block_number(&self, err: ChainError) {
        *self.head.lock() = Err(err);
    }

    /// Raw logs served by `get_logs`, filtered to the requested range.
    pub fn script_logs(&self, logs: Vec<Log>) {
        *self.logs.lock() = Ok(logs);
    }

    pub fn fail_get_logs(&self, err: ChainError) {
        *self.logs.lock() = Err(err);
    }

    /// Delay every `eth_call`, to keep tasks in flight.
    pub fn set_call_delay(&self, delay: Duration) {
        *self.call_delay.lock() = delay;
    }

    fn respond<C: SolCall>(&self, output: Vec<u8>) {
        self.responses.lock().insert(C::SELECTOR, Bytes::from(output));
    }

    pub fn respond_margin(&self, enough: bool) {
        self.respond::<IPerpdexExchange::hasEnoughMaintenanceMarginCall>(
            IPerpdexExchange::hasEnoughMaintenanceMarginCall::abi_encode_returns(&(enough,)),
        );
    }

    pub fn respond_maker_liquidity(&self, liquidity: U256) {
        self.respond::<IPerpdexExchange::getMakerInfoCall>(
            IPerpdexExchange::getMakerInfoCall::abi_encode_returns(&(liquidity, U256::ZERO, U256::ZERO)),
        );
    }

    pub fn respond_share(&self, share: I256) {
        self.respond::<IPerpdexExchange::getOpenPositionShareCall>(
            IPerpdexExchange::getOpenPositionShareCall::abi_encode_returns(&(share,)),
        );
    }

    pub fn respond_max_trade(&self, amount: U256) {
        self.respond::<IPerpdexExchange::maxTradeCall>(
            IPerpdexExchange::maxTradeCall::abi_encode_returns(&(amount,)),
        );
    }

    pub fn set_estimate(&self, gas: u64) {
        *self.estimate.lock() = Ok(gas);
    }

    pub fn fail_estimate(&self, err: ChainError) {
        *self.estimate.lock() = Err(err);
    }

    /// Fail estimation only for calls with `selector`.
    pub fn fail_estimate_for(&self, selector: [u8; 4], err: ChainError) {
        self.estimate_failures.lock().insert(selector, err);
    }

    pub fn fail_submit(&self, err: ChainError) {
        *self.submit_failure.lock() = Some(err);
    }

    /// Results of successive receipt waits: `Ok(status)` or an error.
    pub fn script_receipts(&self, script: Vec<Result<bool, ChainError>>) {
        *self.receipts.lock() = script.into();
    }

    pub fn submit_count(&self) -> usize {
        self.submits.load(Ordering::SeqCst)
    }

    pub fn receipt_wait_count(&self) -> usize {
        self.receipt_waits.load(Ordering::SeqCst)
    }

    pub fn recorded(&self) -> Vec<Recorded> {
        self.recorded.lock().clone()
    }

    /// Calldata of every submitted transaction, in order.
    pub fn submitted_inputs(&self) -> Vec<Bytes> {
        self.recorded
            .lock()
            .iter()
            .filter_map(|r| match r {
                Recorded::Submit { input, .. } => Some(input.clone()),
                _ => None,
            })
            .collect()
    }

    /// Traders passed to every solvency check, in call order.
    pub fn margin_checked(&self) -> Vec<Address> {
        self.call_inputs
            .lock()
            .iter()
            .filter_map(|input| {
                IPerpdexExchange::hasEnoughMaintenanceMarginCall::abi_decode(input, true).ok()
            })
            .map(|call| call.trader)
            .collect()
    }

    fn record(&self, entry: Recorded) {
        self.recorded.lock().push(entry);
    }
}

#[async_trait]
impl ChainClient for MockChain {
    fn sender(&self) -> Address {
        self.sender
    }

    async fn block_number(&self) -> ChainResult<u64> {
        self.head.lock().clone()
    }

    async fn get_logs(&self, _address: Address, from: u64, to: u64) -> ChainResult<Vec<Log>> {
        let logs = self.logs.lock().clone()?;
        Ok(logs
            .into_iter()
            .filter(|log| log.block_number.is_some_and(|block| (from..=to).contains(&block)))
            .collect())
    }

    async fn call(&self, call: &ContractCall) -> ChainResult<Bytes> {
        self.record(Recorded::Call(call.method));
        self.call_inputs.lock().push(call.input.clone());
        let delay = *self.call_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        call.selector()
            .and_then(|selector| self.responses.lock().get(&selector).cloned())
            .ok_or_else(|| ChainError::Transport(format!("no response scripted for {}", call.method)))
    }

    async fn estimate_gas(&self, call: &ContractCall, _from: Address) -> ChainResult<u64> {
        self.record(Recorded::Estimate(call.method));
        if let Some(err) = call
            .selector()
            .and_then(|selector| self.estimate_failures.lock().get(&selector).cloned())
        {
            return Err(err);
        }
        self.estimate.lock().clone()
    }

    async fn submit_transaction(&self, call: &ContractCall, options: &TxOptions) -> ChainResult<B256> {
        self.record(Recorded::Submit {
            method: call.method,
            input: call.input.clone(),
            options: options.clone(),
        });
        if let Some(err) = self.submit_failure.lock().clone() {
            return Err(err);
        }
        self.submits.fetch_add(1, Ordering::SeqCst);
        let n = self.next_hash.fetch_add(1, Ordering::SeqCst);
        Ok(B256::from(U256::from(n)))
    }

    async fn wait_for_receipt(&self, tx_hash: B256, _timeout: Duration) -> ChainResult<ReceiptStatus> {
        self.record(Recorded::ReceiptWait(tx_hash));
        self.receipt_waits.fetch_add(1, Ordering::SeqCst);
        let next = self.receipts.lock().pop_front();
        // Mined successfully once the script is exhausted.
        let success = next.unwrap_or(Ok(true))?;
        Ok(ReceiptStatus {
            tx_hash,
            success,
            block_number: Some(1),
            gas_used: 21_000,
        })
    }
}

/// [`EventSource`] over a fixed event list.
pub struct ScriptedSource {
    events: Vec<DecodedEvent>,
    fail_all: bool,
    failures: Mutex<HashMap<(u64, u64), ChainError>>,
    requested: Mutex<Vec<(u64, u64)>>,
}

impl ScriptedSource {
    pub fn new(events: Vec<DecodedEvent>) -> Self {
        Self {
            events,
            fail_all: false,
            failures: Mutex::new(HashMap::new()),
            requested: Mutex::new(Vec::new()),
        }
    }

    /// A source whose every fetch fails.
    pub fn failing() -> Self {
        Self {
            fail_all: true,
            ..Self::new(Vec::new())
        }
    }

    pub fn fail_window(&self, from_block: u64, to_block: u64, err: ChainError) {
        self.failures.lock().insert((from_block, to_block), err);
    }

    pub fn clear_failures(&self) {
        self.failures.lock().clear();
    }

    /// Every requested range, including failed ones.
    pub fn requested(&self) -> Vec<(u64, u64)> {
        self.requested.lock().clone()
    }

    pub fn fetch_count(&self) -> usize {
        self.requested.lock().len()
    }
}

#[async_trait]
impl EventSource for ScriptedSource {
    async fn fetch(&self, from_block: u64, to_block: u64) -> ChainResult<Vec<DecodedEvent>> {
        self.requested.lock().push((from_block, to_block));
        if self.fail_all {
            return Err(ChainError::Transport("scripted failure".into()));
        }
        if let Some(err) = self.failures.lock().get(&(from_block, to_block)).cloned() {
            return Err(err);
        }
        Ok(self
            .events
            .iter()
            .filter(|e| (from_block..=to_block).contains(&e.block_number))
            .cloned()
            .collect())
    }
}

/// [`KvStore`] that rejects every command.
pub struct FailingStore;

#[async_trait]
impl KvStore for FailingStore {
    async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        Err(CacheError::Backend("connection refused".into()))
    }

    async fn set(&self, _key: &str, _value: Vec<u8>) -> Result<(), CacheError> {
        Err(CacheError::Backend("connection refused".into()))
    }
}

/// `PositionChanged` for trader `0x01..01` in market `0x02..02`.
pub fn sample_event(block_number: u64, log_index: u64) -> DecodedEvent {
    let mut event = named_event("PositionChanged", block_number);
    event.log_index = log_index;
    event
        .args
        .insert("trader".into(), EventValue::Address(Address::repeat_byte(0x01)));
    event
}

/// Event `name` in market `0x02..02` for a trader derived from the block.
pub fn named_event(name: &str, block_number: u64) -> DecodedEvent {
    let mut event = DecodedEvent {
        name: name.to_string(),
        block_number,
        log_index: 0,
        address: Address::repeat_byte(0xee),
        args: Default::default(),
    };
    event.args.insert(
        "trader".into(),
        EventValue::Address(Address::with_last_byte(block_number as u8)),
    );
    event
        .args
        .insert("market".into(), EventValue::Address(Address::repeat_byte(0x02)));
    event
}

/// RPC log wrapping `inner` at `(block_number, log_index)`.
pub fn rpc_log(inner: alloy::primitives::Log, block_number: u64, log_index: u64) -> Log {
    Log {
        inner,
        block_hash: Some(B256::ZERO),
        block_number: Some(block_number),
        block_timestamp: None,
        transaction_hash: Some(B256::ZERO),
        transaction_index: Some(0),
        log_index: Some(log_index),
        removed: false,
    }
}
