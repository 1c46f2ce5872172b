use alloy::primitives::{Address, Bytes, U256};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use swap_engine_types::{amount::apply_slippage, implied_price, now_millis, Quote, SourceKind};

use crate::{LiquiditySource, QuoteRequest, SourceError};

enum Behavior {
    Output(U256),
    Fail(SourceError),
}

/// Liquidity source with a scripted answer, for tests and local wiring
pub struct MockSource {
    kind: SourceKind,
    behavior: Behavior,
    delay: Option<Duration>,
    target: Address,
    spender: Option<Address>,
    permit2_eip712: Option<serde_json::Value>,
    healthy: bool,
    calls: AtomicUsize,
}

impl MockSource {
    /// Always quotes `buy_amount`
    pub fn returning(kind: SourceKind, buy_amount: U256) -> Self {
        Self::with_behavior(kind, Behavior::Output(buy_amount))
    }

    /// Always fails with `error`
    pub fn failing(kind: SourceKind, error: SourceError) -> Self {
        Self::with_behavior(kind, Behavior::Fail(error))
    }

    fn with_behavior(kind: SourceKind, behavior: Behavior) -> Self {
        let target = Address::repeat_byte(0xA0 + kind as u8);
        Self {
            kind,
            behavior,
            delay: None,
            target,
            spender: Some(target),
            permit2_eip712: None,
            healthy: true,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_target(mut self, target: Address) -> Self {
        self.target = target;
        self
    }

    pub fn with_spender(mut self, spender: Option<Address>) -> Self {
        self.spender = spender;
        self
    }

    /// Quotes carry Permit2 typed data and must be signed before submission
    pub fn requiring_signature(mut self, eip712: serde_json::Value) -> Self {
        self.permit2_eip712 = Some(eip712);
        self
    }

    pub fn unhealthy(mut self) -> Self {
        self.healthy = false;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LiquiditySource for MockSource {
    fn kind(&self) -> SourceKind {
        self.kind
    }

    async fn quote(&self, request: &QuoteRequest) -> Result<Quote, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let buy_amount = match &self.behavior {
            Behavior::Output(amount) => *amount,
            Behavior::Fail(error) => return Err(error.clone()),
        };

        Ok(Quote {
            source: self.kind,
            chain_id: request.chain_id,
            sell_token: request.token_in.address,
            buy_token: request.token_out.address,
            buy_amount,
            sell_amount: request.amount_in,
            price: implied_price(
                buy_amount,
                request.token_out.decimals,
                request.amount_in,
                request.token_in.decimals,
            ),
            to: self.target,
            data: Bytes::from(vec![0xde, 0xad, 0xbe, 0xef]),
            value: if request.token_in.is_native() {
                request.amount_in
            } else {
                U256::ZERO
            },
            gas_estimate: Some(150_000),
            minimum_received: apply_slippage(buy_amount, request.slippage_bps),
            requires_signature: self.permit2_eip712.is_some(),
            permit2_eip712: self.permit2_eip712.clone(),
            allowance_target: self.spender,
            protocol: format!("mock_{}", self.kind),
            gas_usd: None,
            quoted_at_ms: now_millis(),
        })
    }

    async fn health_check(&self) -> bool {
        self.healthy
    }
}
