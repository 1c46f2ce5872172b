use alloy::primitives::Bytes;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use swap_engine_ratelimit::{retry_with_policy, RetryPolicy};
use swap_engine_types::amount::{parse_u128, parse_u64};
use tracing::{debug, warn};

use crate::{CallRequest, ChainReader, EndpointRegistry, RpcError};

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcErrorObject>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcErrorObject {
    code: i64,
    message: String,
    #[serde(default)]
    data: Option<Value>,
}

/// JSON-RPC client for one chain with ordered failover across its endpoints
pub struct RpcClient {
    chain_id: u64,
    urls: Vec<String>,
    client: reqwest::Client,
    registry: Arc<EndpointRegistry>,
    retry: RetryPolicy,
    next_id: AtomicU64,
}

impl RpcClient {
    pub fn new(
        chain_id: u64,
        urls: Vec<String>,
        registry: Arc<EndpointRegistry>,
        request_timeout: Duration,
    ) -> Result<Self, RpcError> {
        if urls.is_empty() {
            return Err(RpcError::NoEndpoints(chain_id));
        }
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| RpcError::Transport {
                url: String::new(),
                message: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            chain_id,
            urls,
            client,
            registry,
            retry: RetryPolicy::none(),
            next_id: AtomicU64::new(1),
        })
    }

    /// Retry policy for whole failover passes that end in `Unavailable`
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn urls(&self) -> &[String] {
        &self.urls
    }

    /// Issue a read request, retried per policy when every endpoint failed
    pub async fn request<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, RpcError> {
        let result = retry_with_policy(
            &self.retry,
            |e: &RpcError| matches!(e, RpcError::Unavailable { .. }),
            |_| self.request_once(method, params.clone()),
        )
        .await?;

        serde_json::from_value(result)
            .map_err(|e| RpcError::Decode(format!("{method}: {e}")))
    }

    /// One pass over the endpoint list. Endpoint failures move on to the next
    /// URL; a JSON-RPC error is the node's answer and is returned as is.
    async fn request_once(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": self.next_id.fetch_add(1, Ordering::Relaxed),
            "method": method,
            "params": params,
        });

        let mut failures = Vec::new();
        for url in &self.urls {
            let endpoint = self
                .registry
                .endpoint(url)
                .map_err(|e| RpcError::Decode(format!("invalid endpoint policy: {e}")))?;

            if !endpoint.breaker.try_permit() {
                debug!(url = %url, method, "skipping endpoint with open circuit");
                failures.push(RpcError::CircuitOpen { url: url.clone() }.to_string());
                continue;
            }

            endpoint.limiter.acquire().await;

            match self.send(url, &body).await {
                Ok(result) => {
                    endpoint.breaker.record_success();
                    return Ok(result);
                }
                Err(e) if e.is_endpoint_failure() => {
                    endpoint.breaker.record_failure();
                    warn!(url = %url, method, error = %e, "RPC endpoint failed, trying next");
                    failures.push(e.to_string());
                }
                Err(e) => {
                    endpoint.breaker.record_success();
                    return Err(e);
                }
            }
        }

        Err(RpcError::Unavailable {
            chain_id: self.chain_id,
            detail: failures.join("; "),
        })
    }

    async fn send(&self, url: &str, body: &Value) -> Result<Value, RpcError> {
        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| RpcError::Transport {
                url: url.to_string(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(RpcError::Http {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let rpc_response: JsonRpcResponse = response
            .json()
            .await
            .map_err(|e| RpcError::Decode(format!("{url}: {e}")))?;

        if let Some(error) = rpc_response.error {
            return Err(RpcError::Rpc {
                code: error.code,
                message: error.message,
                data: error.data.map(|d| match d {
                    Value::String(s) => s,
                    other => other.to_string(),
                }),
            });
        }

        rpc_response
            .result
            .ok_or_else(|| RpcError::Decode(format!("{url}: response has neither result nor error")))
    }

    async fn quantity_u128(&self, method: &str, params: Value) -> Result<u128, RpcError> {
        let hex: String = self.request(method, params).await?;
        parse_u128(&hex).map_err(|e| RpcError::Decode(format!("{method}: {e}")))
    }
}

#[async_trait]
impl ChainReader for RpcClient {
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    async fn call(&self, request: &CallRequest) -> Result<Bytes, RpcError> {
        let hex: String = self
            .request("eth_call", json!([request.to_json(), "latest"]))
            .await?;
        hex.parse::<Bytes>()
            .map_err(|e| RpcError::Decode(format!("eth_call: {e}")))
    }

    async fn estimate_gas(&self, request: &CallRequest) -> Result<u64, RpcError> {
        let hex: String = self
            .request("eth_estimateGas", json!([request.to_json()]))
            .await?;
        parse_u64(&hex).map_err(|e| RpcError::Decode(format!("eth_estimateGas: {e}")))
    }

    async fn gas_price(&self) -> Result<u128, RpcError> {
        self.quantity_u128("eth_gasPrice", json!([])).await
    }

    async fn base_fee(&self) -> Result<Option<u128>, RpcError> {
        let block: Value = self
            .request("eth_getBlockByNumber", json!(["latest", false]))
            .await?;
        match block.get("baseFeePerGas").and_then(Value::as_str) {
            Some(hex) => parse_u128(hex)
                .map(Some)
                .map_err(|e| RpcError::Decode(format!("baseFeePerGas: {e}"))),
            None => Ok(None),
        }
    }

    async fn max_priority_fee(&self) -> Result<Option<u128>, RpcError> {
        match self.quantity_u128("eth_maxPriorityFeePerGas", json!([])).await {
            Ok(fee) => Ok(Some(fee)),
            // Method not supported by this node
            Err(RpcError::Rpc { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{EndpointPolicy, RpcError};
    use alloy::primitives::Address;
    use swap_engine_ratelimit::CircuitBreakerConfig;
    use wiremock::matchers::{body_partial_json, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn registry(failure_threshold: u32) -> Arc<EndpointRegistry> {
        Arc::new(
            EndpointRegistry::new(EndpointPolicy {
                max_calls: 100,
                window: Duration::from_secs(1),
                breaker: CircuitBreakerConfig {
                    failure_threshold,
                    timeout_duration: Duration::from_secs(30),
                    ..Default::default()
                },
            })
            .unwrap(),
        )
    }

    fn ok(result: Value) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({"jsonrpc": "2.0", "id": 1, "result": result}))
    }

    #[tokio::test]
    async fn test_gas_price_hex_quantity() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"method": "eth_gasPrice"})))
            .respond_with(ok(json!("0x3b9aca00")))
            .mount(&server)
            .await;

        let client = RpcClient::new(1, vec![server.uri()], registry(3), Duration::from_secs(5)).unwrap();
        assert_eq!(client.gas_price().await.unwrap(), 1_000_000_000);
    }

    #[tokio::test]
    async fn test_failover_to_second_endpoint() {
        let bad = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .expect(1)
            .mount(&bad)
            .await;

        let good = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ok(json!("0x5208")))
            .expect(1)
            .mount(&good)
            .await;

        let registry = registry(3);
        let client = RpcClient::new(1, vec![bad.uri(), good.uri()], registry.clone(), Duration::from_secs(5)).unwrap();
        let gas = client
            .estimate_gas(&CallRequest::new(Address::ZERO, Bytes::new()))
            .await
            .unwrap();
        assert_eq!(gas, 21_000);

        let bad_state = registry.endpoint(&bad.uri()).unwrap();
        assert_eq!(bad_state.breaker.failure_count(), 1);
    }

    #[tokio::test]
    async fn test_open_circuit_skips_network() {
        let bad = MockServer::start().await;
        // Exactly K requests reach the endpoint; the next is rejected locally
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(3)
            .mount(&bad)
            .await;

        let client = RpcClient::new(1, vec![bad.uri()], registry(3), Duration::from_secs(5)).unwrap();
        for _ in 0..3 {
            let err = client.gas_price().await.unwrap_err();
            assert!(matches!(err, RpcError::Unavailable { .. }));
        }

        let err = client.gas_price().await.unwrap_err();
        match err {
            RpcError::Unavailable { detail, .. } => assert!(detail.contains("circuit open")),
            other => panic!("expected Unavailable, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_abandoned_half_open_call_recovers() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(3)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ok(json!("0x1")).set_delay(Duration::from_millis(300)))
            .mount(&server)
            .await;

        let registry = Arc::new(
            EndpointRegistry::new(EndpointPolicy {
                max_calls: 100,
                window: Duration::from_secs(1),
                breaker: CircuitBreakerConfig {
                    failure_threshold: 3,
                    timeout_duration: Duration::from_millis(50),
                    ..Default::default()
                },
            })
            .unwrap(),
        );
        let client = RpcClient::new(1, vec![server.uri()], registry, Duration::from_secs(5)).unwrap();
        for _ in 0..3 {
            assert!(client.gas_price().await.is_err());
        }
        tokio::time::sleep(Duration::from_millis(80)).await;

        // The half-open call is cancelled by its caller before it settles
        let abandoned = tokio::time::timeout(Duration::from_millis(100), client.gas_price()).await;
        assert!(abandoned.is_err());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(client.gas_price().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_revert_is_not_an_endpoint_failure() {
        let first = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0",
                "id": 1,
                "error": {"code": 3, "message": "execution reverted", "data": "0x08c379a0"}
            })))
            .expect(1)
            .mount(&first)
            .await;

        let second = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ok(json!("0x")))
            .expect(0)
            .mount(&second)
            .await;

        let registry = registry(3);
        let client = RpcClient::new(1, vec![first.uri(), second.uri()], registry.clone(), Duration::from_secs(5)).unwrap();
        let err = client
            .call(&CallRequest::new(Address::ZERO, Bytes::new()))
            .await
            .unwrap_err();
        assert!(err.is_revert());
        assert_eq!(registry.endpoint(&first.uri()).unwrap().breaker.failure_count(), 0);
    }

    #[tokio::test]
    async fn test_base_fee_and_priority_fee() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"method": "eth_getBlockByNumber"})))
            .respond_with(ok(json!({"number": "0x1", "baseFeePerGas": "0x2540be400"})))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"method": "eth_maxPriorityFeePerGas"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0",
                "id": 1,
                "error": {"code": -32601, "message": "method not found"}
            })))
            .mount(&server)
            .await;

        let client = RpcClient::new(1, vec![server.uri()], registry(3), Duration::from_secs(5)).unwrap();
        assert_eq!(client.base_fee().await.unwrap(), Some(10_000_000_000));
        assert_eq!(client.max_priority_fee().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_retry_policy_repeats_failover_pass() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ok(json!("0x1")))
            .mount(&server)
            .await;

        let client = RpcClient::new(1, vec![server.uri()], registry(5), Duration::from_secs(5))
            .unwrap()
            .with_retry(RetryPolicy::new(2, Duration::from_millis(1), Duration::from_millis(5)));
        assert_eq!(client.gas_price().await.unwrap(), 1);
    }

    #[test]
    fn test_requires_endpoints() {
        let result = RpcClient::new(1, vec![], registry(3), Duration::from_secs(1));
        assert!(matches!(result, Err(RpcError::NoEndpoints(1))));
    }
}
