use alloy::primitives::{Address, Bytes, U256};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use swap_engine_types::{amount::apply_slippage, implied_price, now_millis, Quote, SourceKind};
use tracing::{debug, warn};

use crate::numeric::NumericField;
use crate::{LiquiditySource, QuoteRequest, SourceError};

/// 1inch Swap API v6 client
pub struct OneInchClient {
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
    chains: Vec<u64>,
}

impl OneInchClient {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>, timeout: Duration) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SourceError::Transport(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            client,
            chains: Vec::new(),
        })
    }

    /// Public 1inch developer portal endpoint
    pub fn mainnet(api_key: Option<String>) -> Result<Self, SourceError> {
        Self::new("https://api.1inch.dev", api_key, Duration::from_secs(10))
    }

    pub fn with_chains(mut self, chains: Vec<u64>) -> Self {
        self.chains = chains;
        self
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }
}

/// Slippage in percent with two decimals, as the API expects
fn slippage_percent(bps: u32) -> String {
    format!("{}.{:02}", bps / 100, bps % 100)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SwapResponse {
    dst_amount: NumericField,
    tx: SwapTx,
    #[serde(default)]
    protocols: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct SwapTx {
    to: Address,
    data: Bytes,
    #[serde(default)]
    value: Option<NumericField>,
    #[serde(default)]
    gas: Option<NumericField>,
}

/// Collect distinct protocol names from the nested `protocols` route arrays
fn protocol_names(protocols: &serde_json::Value, out: &mut Vec<String>) {
    match protocols {
        serde_json::Value::Array(items) => items.iter().for_each(|v| protocol_names(v, out)),
        serde_json::Value::Object(map) => {
            if let Some(name) = map.get("name").and_then(|n| n.as_str()) {
                if !out.iter().any(|existing| existing == name) {
                    out.push(name.to_string());
                }
            }
        }
        _ => {}
    }
}

#[async_trait]
impl LiquiditySource for OneInchClient {
    fn kind(&self) -> SourceKind {
        SourceKind::OneInch
    }

    fn supports_chain(&self, chain_id: u64) -> bool {
        self.chains.is_empty() || self.chains.contains(&chain_id)
    }

    async fn quote(&self, request: &QuoteRequest) -> Result<Quote, SourceError> {
        if !self.supports_chain(request.chain_id) {
            return Err(SourceError::UnsupportedChain(request.chain_id));
        }

        let url = format!("{}/swap/v6.0/{}/swap", self.base_url, request.chain_id);
        let query = [
            ("src", request.token_in.address_hex()),
            ("dst", request.token_out.address_hex()),
            ("amount", request.amount_in.to_string()),
            ("from", format!("{:#x}", request.taker)),
            ("origin", format!("{:#x}", request.taker)),
            ("slippage", slippage_percent(request.slippage_bps)),
            ("disableEstimate", "true".to_string()),
            ("includeProtocols", "true".to_string()),
        ];

        debug!(url = %url, "Querying 1inch swap");

        let response = self
            .authorized(self.client.get(&url).query(&query))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!("1inch API error: {} - {}", status, body);
            return Err(SourceError::classify(request.chain_id, status.as_u16(), &body));
        }

        let swap: SwapResponse = response
            .json()
            .await
            .map_err(|e| SourceError::Backend(format!("Failed to parse 1inch response: {e}")))?;

        let buy_amount = swap.dst_amount.to_u256("dstAmount")?;
        let value = match &swap.tx.value {
            Some(field) => field.to_u256("tx.value")?,
            None => U256::ZERO,
        };

        let mut names = Vec::new();
        if let Some(protocols) = &swap.protocols {
            protocol_names(protocols, &mut names);
        }
        let protocol = if names.is_empty() {
            "1inch".to_string()
        } else {
            names.join("+")
        };

        Ok(Quote {
            source: SourceKind::OneInch,
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
            to: swap.tx.to,
            data: swap.tx.data,
            value,
            gas_estimate: swap.tx.gas.as_ref().and_then(NumericField::to_gas),
            minimum_received: apply_slippage(buy_amount, request.slippage_bps),
            requires_signature: false,
            permit2_eip712: None,
            // The router pulls tokens directly
            allowance_target: Some(swap.tx.to),
            protocol,
            gas_usd: None,
            quoted_at_ms: now_millis(),
        })
    }

    async fn health_check(&self) -> bool {
        let chain = self.chains.first().copied().unwrap_or(1);
        let url = format!("{}/swap/v6.0/{}/healthcheck", self.base_url, chain);
        match self.authorized(self.client.get(&url)).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }
}
