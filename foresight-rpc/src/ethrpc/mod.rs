//! Ethereum JSON-RPC client.
//!
//! A thin typed layer over a pluggable [`RpcTransport`], with retry for
//! transient failures, abort signals on every call and a cached latest block
//! that an optional polling loop keeps fresh.

pub mod abort;
pub mod client;
pub mod transport;
pub mod types;

pub use self::abort::{AbortController, AbortSignal};
pub use self::client::{EthRpcClient, RetryPolicy};
pub use self::transport::{HttpTransport, RpcTransport};
pub use self::types::{
    AccountOverride, BlockHeader, BlockOverrides, BlockStateCall, BlockTag, CallRequest,
    Log, LogFilter, SimulatePayload, SimulatedBlockResult, SimulatedCallResult,
};

use alloy_primitives::Bytes;

use crate::wire::WireError;

#[derive(Debug, Clone, thiserror::Error)]
pub enum RpcError {
    /// Connect failure, timeout, HTTP 5xx or 429. Retried.
    #[error("transient RPC failure: {0}")]
    Transient(String),

    /// The node answered with something we cannot interpret.
    #[error("malformed RPC response: {0}")]
    Protocol(String),

    /// A JSON-RPC error object returned by the node.
    #[error("node error {code}: {message}")]
    Node {
        code: i64,
        message: String,
        data: Option<serde_json::Value>,
    },

    #[error("request aborted")]
    Aborted,
}

impl RpcError {
    pub fn is_transient(&self) -> bool {
        matches!(self, RpcError::Transient(_))
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, RpcError::Aborted)
    }

    /// Revert payload attached to a node error, when the node sent one as hex.
    pub fn revert_data(&self) -> Option<Bytes> {
        match self {
            RpcError::Node {
                data: Some(serde_json::Value::String(data)),
                ..
            } => crate::wire::parse_data(data).ok(),
            _ => None,
        }
    }

    /// Execution reverts come back as node error 3, or -32000 with a
    /// message mentioning the revert.
    pub fn is_execution_revert(&self) -> bool {
        match self {
            RpcError::Node { code, message, .. } => {
                *code == 3 || message.to_ascii_lowercase().contains("revert")
            }
            _ => false,
        }
    }
}

impl From<WireError> for RpcError {
    fn from(err: WireError) -> Self {
        RpcError::Protocol(err.to_string())
    }
}
