use alloy::primitives::Bytes;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::{CallRequest, ChainReader, RpcError};

type CallHandler = Box<dyn Fn(&CallRequest) -> Result<Bytes, RpcError> + Send + Sync>;

/// Scripted chain reader for tests
pub struct MockChainReader {
    chain_id: u64,
    call_handler: CallHandler,
    estimate: Result<u64, RpcError>,
    gas_price: Result<u128, RpcError>,
    base_fee: Option<u128>,
    priority_fee: Option<u128>,
    calls: AtomicUsize,
    log: Mutex<Vec<CallRequest>>,
}

impl MockChainReader {
    pub fn new(chain_id: u64) -> Self {
        Self {
            chain_id,
            call_handler: Box::new(|_| Ok(Bytes::new())),
            estimate: Ok(100_000),
            gas_price: Ok(20_000_000_000),
            base_fee: None,
            priority_fee: None,
            calls: AtomicUsize::new(0),
            log: Mutex::new(Vec::new()),
        }
    }

    pub fn with_call_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&CallRequest) -> Result<Bytes, RpcError> + Send + Sync + 'static,
    {
        self.call_handler = Box::new(handler);
        self
    }

    pub fn with_estimate(mut self, estimate: Result<u64, RpcError>) -> Self {
        self.estimate = estimate;
        self
    }

    pub fn with_gas_price(mut self, gas_price: u128) -> Self {
        self.gas_price = Ok(gas_price);
        self
    }

    pub fn with_eip1559(mut self, base_fee: u128, priority_fee: Option<u128>) -> Self {
        self.base_fee = Some(base_fee);
        self.priority_fee = priority_fee;
        self
    }

    /// Number of `eth_call`s made
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<CallRequest> {
        self.log.lock().map(|l| l.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl ChainReader for MockChainReader {
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    async fn call(&self, request: &CallRequest) -> Result<Bytes, RpcError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut log) = self.log.lock() {
            log.push(request.clone());
        }
        (self.call_handler)(request)
    }

    async fn estimate_gas(&self, _request: &CallRequest) -> Result<u64, RpcError> {
        self.estimate.clone()
    }

    async fn gas_price(&self) -> Result<u128, RpcError> {
        self.gas_price.clone()
    }

    async fn base_fee(&self) -> Result<Option<u128>, RpcError> {
        Ok(self.base_fee)
    }

    async fn max_priority_fee(&self) -> Result<Option<u128>, RpcError> {
        Ok(self.priority_fee)
    }
}
