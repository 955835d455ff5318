//! Transports carrying JSON-RPC calls to a node.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;
use tracing::debug;

use super::RpcError;
use crate::types::{JsonRpcError, JsonRpcRequest};

/// One JSON-RPC round trip. Implementations classify failures; retry is the
/// client's job.
#[async_trait]
pub trait RpcTransport: Send + Sync {
    async fn request(&self, method: &str, params: Value) -> Result<Value, RpcError>;
}

/// JSON-RPC over HTTP POST.
pub struct HttpTransport {
    client: reqwest::Client,
    url: String,
    next_id: AtomicU64,
}

impl HttpTransport {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, RpcError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RpcError::Protocol(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            url: url.into(),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

fn classify_reqwest(err: reqwest::Error) -> RpcError {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        RpcError::Transient(err.to_string())
    } else {
        RpcError::Protocol(err.to_string())
    }
}

#[async_trait]
impl RpcTransport for HttpTransport {
    async fn request(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let payload = JsonRpcRequest::new(id, method, params);
        debug!(method, id, "sending upstream RPC request");

        let resp = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .map_err(classify_reqwest)?;

        let status = resp.status();
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(RpcError::Transient(format!("HTTP {status}")));
        }
        if !status.is_success() {
            return Err(RpcError::Protocol(format!("HTTP {status}")));
        }

        let body: Value = resp.json().await.map_err(|e| {
            if e.is_timeout() {
                RpcError::Transient(e.to_string())
            } else {
                RpcError::Protocol(format!("response is not JSON: {e}"))
            }
        })?;
        parse_response(body)
    }
}

/// Split a JSON-RPC response envelope into its result or error.
pub fn parse_response(body: Value) -> Result<Value, RpcError> {
    if let Some(error) = body.get("error").filter(|e| !e.is_null()) {
        let error: JsonRpcError = serde_json::from_value(error.clone())
            .map_err(|e| RpcError::Protocol(format!("malformed error object: {e}")))?;
        return Err(RpcError::Node {
            code: error.code,
            message: error.message,
            data: error.data,
        });
    }
    body.get("result")
        .cloned()
        .ok_or_else(|| RpcError::Protocol("response carries neither result nor error".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn transport(server: &MockServer) -> HttpTransport {
        HttpTransport::new(server.uri(), Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_http_result() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"method": "eth_chainId"})))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"jsonrpc": "2.0", "id": 1, "result": "0x1"})),
            )
            .mount(&server)
            .await;

        let result = transport(&server).request("eth_chainId", json!([])).await.unwrap();
        assert_eq!(result, "0x1");
    }

    #[tokio::test]
    async fn test_http_node_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0",
                "id": 1,
                "error": {"code": 3, "message": "execution reverted", "data": "0x1234"}
            })))
            .mount(&server)
            .await;

        let err = transport(&server)
            .request("eth_estimateGas", json!([{}]))
            .await
            .unwrap_err();
        match err {
            RpcError::Node { code, message, data } => {
                assert_eq!(code, 3);
                assert_eq!(message, "execution reverted");
                assert_eq!(data, Some(json!("0x1234")));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_http_5xx_and_429_are_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        let err = transport(&server).request("eth_blockNumber", json!([])).await.unwrap_err();
        assert!(err.is_transient());

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;
        let err = transport(&server).request("eth_blockNumber", json!([])).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_http_garbage_is_protocol_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;
        let err = transport(&server).request("eth_blockNumber", json!([])).await.unwrap_err();
        assert!(matches!(err, RpcError::Protocol(_)));
    }

    #[tokio::test]
    async fn test_connection_refused_is_transient() {
        let transport = HttpTransport::new("http://127.0.0.1:1", Duration::from_secs(1)).unwrap();
        let err = transport.request("eth_blockNumber", json!([])).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[test]
    fn test_parse_response_null_result_is_ok() {
        let value = parse_response(json!({"jsonrpc": "2.0", "id": 1, "result": null})).unwrap();
        assert!(value.is_null());
        assert!(parse_response(json!({"jsonrpc": "2.0", "id": 1})).is_err());
    }
}
