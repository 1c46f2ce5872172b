use alloy::primitives::{Address, Bytes, U256};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use swap_engine_types::{amount::apply_slippage, implied_price, now_millis, Quote, SourceKind};
use tracing::{debug, warn};

use crate::numeric::NumericField;
use crate::{LiquiditySource, QuoteRequest, SourceError};

/// 0x Swap API client using the Permit2 quote endpoint (API v2)
pub struct ZeroXClient {
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
    chains: Vec<u64>,
}

impl ZeroXClient {
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

    /// Public 0x endpoint
    pub fn mainnet(api_key: Option<String>) -> Result<Self, SourceError> {
        Self::new("https://api.0x.org", api_key, Duration::from_secs(10))
    }

    /// Restrict the client to these chain ids; empty means every chain
    pub fn with_chains(mut self, chains: Vec<u64>) -> Self {
        self.chains = chains;
        self
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuoteResponse {
    #[serde(default)]
    liquidity_available: Option<bool>,
    buy_amount: Option<NumericField>,
    sell_amount: Option<NumericField>,
    min_buy_amount: Option<NumericField>,
    transaction: Option<TransactionData>,
    permit2: Option<Permit2Data>,
    issues: Option<Issues>,
    route: Option<Route>,
}

#[derive(Debug, Deserialize)]
struct TransactionData {
    to: Address,
    data: Bytes,
    #[serde(default)]
    value: Option<NumericField>,
    #[serde(default)]
    gas: Option<NumericField>,
}

#[derive(Debug, Deserialize)]
struct Permit2Data {
    #[serde(default)]
    eip712: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct Issues {
    #[serde(default)]
    allowance: Option<AllowanceIssue>,
}

#[derive(Debug, Deserialize)]
struct AllowanceIssue {
    spender: Address,
}

#[derive(Debug, Deserialize)]
struct Route {
    #[serde(default)]
    fills: Vec<Fill>,
}

#[derive(Debug, Deserialize)]
struct Fill {
    source: String,
}

#[async_trait]
impl LiquiditySource for ZeroXClient {
    fn kind(&self) -> SourceKind {
        SourceKind::ZeroX
    }

    fn supports_chain(&self, chain_id: u64) -> bool {
        self.chains.is_empty() || self.chains.contains(&chain_id)
    }

    async fn quote(&self, request: &QuoteRequest) -> Result<Quote, SourceError> {
        if !self.supports_chain(request.chain_id) {
            return Err(SourceError::UnsupportedChain(request.chain_id));
        }

        let url = format!("{}/swap/permit2/quote", self.base_url);
        let query = [
            ("chainId", request.chain_id.to_string()),
            ("sellToken", request.token_in.address_hex()),
            ("buyToken", request.token_out.address_hex()),
            ("sellAmount", request.amount_in.to_string()),
            ("taker", format!("{:#x}", request.taker)),
            ("slippageBps", request.slippage_bps.to_string()),
        ];

        debug!(url = %url, chain_id = request.chain_id, "Querying 0x quote");

        let mut builder = self.client.get(&url).query(&query).header("0x-version", "v2");
        if let Some(key) = &self.api_key {
            builder = builder.header("0x-api-key", key);
        }

        let response = builder.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!("0x API error: {} - {}", status, body);
            return Err(SourceError::classify(request.chain_id, status.as_u16(), &body));
        }

        let quote: QuoteResponse = response
            .json()
            .await
            .map_err(|e| SourceError::Backend(format!("Failed to parse 0x response: {e}")))?;

        if quote.liquidity_available == Some(false) {
            return Err(SourceError::InsufficientLiquidity(
                "0x reports liquidityAvailable=false".to_string(),
            ));
        }

        let buy_amount = quote
            .buy_amount
            .ok_or_else(|| SourceError::Backend("0x response missing buyAmount".into()))?
            .to_u256("buyAmount")?;
        let sell_amount = match &quote.sell_amount {
            Some(field) => field.to_u256("sellAmount")?,
            None => request.amount_in,
        };
        let tx = quote
            .transaction
            .ok_or_else(|| SourceError::Backend("0x response missing transaction".into()))?;

        let minimum_received = match &quote.min_buy_amount {
            Some(field) => field.to_u256("minBuyAmount")?,
            None => apply_slippage(buy_amount, request.slippage_bps),
        };
        let value = match &tx.value {
            Some(field) => field.to_u256("value")?,
            None => U256::ZERO,
        };

        let permit2_eip712 = quote.permit2.and_then(|p| p.eip712);
        let protocol = quote
            .route
            .map(|r| {
                let mut sources: Vec<String> = r.fills.into_iter().map(|f| f.source).collect();
                sources.dedup();
                sources.join("+")
            })
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "0x".to_string());

        Ok(Quote {
            source: SourceKind::ZeroX,
            chain_id: request.chain_id,
            sell_token: request.token_in.address,
            buy_token: request.token_out.address,
            buy_amount,
            sell_amount,
            price: implied_price(
                buy_amount,
                request.token_out.decimals,
                sell_amount,
                request.token_in.decimals,
            ),
            to: tx.to,
            data: tx.data,
            value,
            gas_estimate: tx.gas.as_ref().and_then(NumericField::to_gas),
            minimum_received,
            requires_signature: permit2_eip712.is_some(),
            permit2_eip712,
            allowance_target: quote.issues.and_then(|i| i.allowance).map(|a| a.spender),
            protocol,
            gas_usd: None,
            quoted_at_ms: now_millis(),
        })
    }

    async fn health_check(&self) -> bool {
        match self.client.get(&self.base_url).send().await {
            Ok(response) => !response.status().is_server_error(),
            Err(_) => false,
        }
    }
}
