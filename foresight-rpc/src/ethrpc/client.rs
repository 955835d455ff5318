//! Typed Ethereum JSON-RPC client with latest-block caching.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use alloy_primitives::{Address, Bytes, B256};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::abort::{self, AbortSignal};
use super::transport::{HttpTransport, RpcTransport};
use super::types::{
    AccountOverride, BlockHeader, BlockTag, CallRequest, Log, LogFilter, SimulatePayload,
    SimulatedBlockResult,
};
use super::RpcError;
use crate::wire::{format_data, parse_u64_quantity};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub retries: u32,
    /// Linear backoff step: attempt `n` waits `n * backoff`.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 3,
            backoff: Duration::from_millis(250),
        }
    }
}

pub struct EthRpcClient {
    transport: Arc<dyn RpcTransport>,
    retry: RetryPolicy,
    latest: watch::Sender<Option<Arc<BlockHeader>>>,
    polling_generation: AtomicU64,
    poll_task: Mutex<Option<JoinHandle<()>>>,
}

impl EthRpcClient {
    pub fn new(transport: Arc<dyn RpcTransport>, retry: RetryPolicy) -> Self {
        let (latest, _rx) = watch::channel(None);
        Self {
            transport,
            retry,
            latest,
            polling_generation: AtomicU64::new(0),
            poll_task: Mutex::new(None),
        }
    }

    pub fn http(url: &str, timeout: Duration, retry: RetryPolicy) -> Result<Self, RpcError> {
        let transport = HttpTransport::new(url, timeout)?;
        Ok(Self::new(Arc::new(transport), retry))
    }

    // ── Raw requests ────────────────────────────────────────────

    /// Issue a request, retrying transient failures.
    pub async fn request_raw(
        &self,
        method: &str,
        params: Value,
        abort: Option<&AbortSignal>,
    ) -> Result<Value, RpcError> {
        let mut attempt = 0u32;
        loop {
            let result = abort::guard(abort, self.transport.request(method, params.clone())).await?;
            match result {
                Err(RpcError::Transient(reason)) if attempt < self.retry.retries => {
                    attempt += 1;
                    warn!(method, attempt, reason = %reason, "Transient RPC failure, retrying");
                    abort::guard(abort, tokio::time::sleep(self.retry.backoff * attempt)).await?;
                }
                Err(RpcError::Transient(reason)) => {
                    warn!(method, reason = %reason, "Transient RPC failure, giving up");
                    return Err(RpcError::Transient(reason));
                }
                Err(RpcError::Protocol(reason)) => {
                    error!(method, reason = %reason, "Protocol failure talking to node");
                    return Err(RpcError::Protocol(reason));
                }
                other => return other,
            }
        }
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
        abort: Option<&AbortSignal>,
    ) -> Result<T, RpcError> {
        let raw = self.request_raw(method, params, abort).await?;
        serde_json::from_value(raw).map_err(|e| {
            error!(method, error = %e, "Malformed RPC result");
            RpcError::Protocol(format!("{method}: {e}"))
        })
    }

    async fn request_u64(
        &self,
        method: &str,
        params: Value,
        abort: Option<&AbortSignal>,
    ) -> Result<u64, RpcError> {
        let raw: String = self.request(method, params, abort).await?;
        Ok(parse_u64_quantity(&raw)?)
    }

    // ── Typed methods ───────────────────────────────────────────

    pub async fn get_block(
        &self,
        tag: BlockTag,
        abort: Option<&AbortSignal>,
    ) -> Result<Option<BlockHeader>, RpcError> {
        self.request("eth_getBlockByNumber", json!([tag, false]), abort)
            .await
    }

    pub async fn get_block_by_hash(
        &self,
        hash: B256,
        abort: Option<&AbortSignal>,
    ) -> Result<Option<BlockHeader>, RpcError> {
        self.request("eth_getBlockByHash", json!([hash, false]), abort)
            .await
    }

    pub async fn get_block_number(&self, abort: Option<&AbortSignal>) -> Result<u64, RpcError> {
        self.request_u64("eth_blockNumber", json!([]), abort).await
    }

    pub async fn get_chain_id(&self, abort: Option<&AbortSignal>) -> Result<u64, RpcError> {
        self.request_u64("eth_chainId", json!([]), abort).await
    }

    pub async fn get_transaction_count(
        &self,
        address: Address,
        tag: BlockTag,
        abort: Option<&AbortSignal>,
    ) -> Result<u64, RpcError> {
        self.request_u64("eth_getTransactionCount", json!([address, tag]), abort)
            .await
    }

    pub async fn call(
        &self,
        request: &CallRequest,
        tag: BlockTag,
        abort: Option<&AbortSignal>,
    ) -> Result<Bytes, RpcError> {
        self.request("eth_call", json!([request, tag]), abort).await
    }

    pub async fn call_with_overrides(
        &self,
        request: &CallRequest,
        tag: BlockTag,
        overrides: &std::collections::BTreeMap<Address, AccountOverride>,
        abort: Option<&AbortSignal>,
    ) -> Result<Bytes, RpcError> {
        self.request("eth_call", json!([request, tag, overrides]), abort)
            .await
    }

    pub async fn estimate_gas(
        &self,
        request: &CallRequest,
        tag: BlockTag,
        abort: Option<&AbortSignal>,
    ) -> Result<u64, RpcError> {
        self.request_u64("eth_estimateGas", json!([request, tag]), abort)
            .await
    }

    pub async fn get_code(
        &self,
        address: Address,
        tag: BlockTag,
        abort: Option<&AbortSignal>,
    ) -> Result<Bytes, RpcError> {
        self.request("eth_getCode", json!([address, tag]), abort).await
    }

    pub async fn get_logs(
        &self,
        filter: &LogFilter,
        abort: Option<&AbortSignal>,
    ) -> Result<Vec<Log>, RpcError> {
        self.request("eth_getLogs", json!([filter]), abort).await
    }

    pub async fn send_raw_transaction(
        &self,
        raw: &[u8],
        abort: Option<&AbortSignal>,
    ) -> Result<B256, RpcError> {
        self.request("eth_sendRawTransaction", json!([format_data(raw)]), abort)
            .await
    }

    pub async fn simulate_v1(
        &self,
        payload: &SimulatePayload,
        tag: BlockTag,
        abort: Option<&AbortSignal>,
    ) -> Result<Vec<SimulatedBlockResult>, RpcError> {
        self.request("eth_simulateV1", json!([payload, tag]), abort)
            .await
    }

    // ── Latest block cache ──────────────────────────────────────

    pub fn cached_latest_block(&self) -> Option<Arc<BlockHeader>> {
        self.latest.borrow().clone()
    }

    pub fn subscribe_blocks(&self) -> watch::Receiver<Option<Arc<BlockHeader>>> {
        self.latest.subscribe()
    }

    /// Replace the cached block if it differs and is not older. Returns
    /// whether subscribers were notified.
    pub fn publish_block(&self, block: BlockHeader) -> bool {
        self.publish_block_when(block, || true)
    }

    /// `publish_block`, with `still_wanted` checked under the cache lock
    /// right before the swap.
    fn publish_block_when(&self, block: BlockHeader, still_wanted: impl FnOnce() -> bool) -> bool {
        self.latest.send_if_modified(|current| {
            if let Some(cached) = current.as_ref() {
                if cached.hash == block.hash {
                    return false;
                }
                if block.number < cached.number {
                    debug!(cached = cached.number, received = block.number, "Ignoring older block");
                    return false;
                }
            }
            if !still_wanted() {
                return false;
            }
            *current = Some(Arc::new(block));
            true
        })
    }

    /// Fetch the latest block, falling back to the cached one on transient
    /// failures.
    pub async fn get_latest_block(
        &self,
        abort: Option<&AbortSignal>,
    ) -> Result<Arc<BlockHeader>, RpcError> {
        match self.get_block(BlockTag::Latest, abort).await {
            Ok(Some(block)) => {
                self.publish_block(block);
                self.cached_latest_block()
                    .ok_or_else(|| RpcError::Protocol("latest block cache empty".into()))
            }
            Ok(None) => Err(RpcError::Protocol("node has no latest block".into())),
            Err(RpcError::Transient(reason)) => match self.cached_latest_block() {
                Some(cached) => {
                    warn!(reason = %reason, cached = cached.number, "Using cached latest block");
                    Ok(cached)
                }
                None => Err(RpcError::Transient(reason)),
            },
            Err(e) => Err(e),
        }
    }

    // ── Polling ─────────────────────────────────────────────────

    pub fn polling_generation(&self) -> u64 {
        self.polling_generation.load(Ordering::SeqCst)
    }

    pub fn is_polling(&self) -> bool {
        self.poll_task
            .lock()
            .map(|task| task.as_ref().is_some_and(|t| !t.is_finished()))
            .unwrap_or(false)
    }

    /// Start or stop the latest-block polling loop. Every toggle bumps the
    /// generation, so a poll already in flight cannot publish afterwards.
    pub fn set_polling(self: &Arc<Self>, enabled: bool, interval: Duration) {
        let generation = self.polling_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let Ok(mut task) = self.poll_task.lock() else {
            warn!("Poll task lock poisoned; polling state unchanged");
            return;
        };
        if let Some(previous) = task.take() {
            previous.abort();
        }
        if !enabled {
            info!("Block polling disabled");
            return;
        }
        info!(interval_ms = interval.as_millis() as u64, "Block polling enabled");
        let weak = Arc::downgrade(self);
        *task = Some(tokio::spawn(poll_loop(weak, generation, interval)));
    }

    /// One polling step. Publishes only if `generation` is still current
    /// once the fetch completes.
    pub async fn poll_once(&self, generation: u64) -> Result<bool, RpcError> {
        let Some(block) = self.get_block(BlockTag::Latest, None).await? else {
            return Ok(false);
        };
        Ok(self.publish_block_when(block, || {
            let current = self.polling_generation() == generation;
            if !current {
                debug!(generation, "Discarding block from stale polling generation");
            }
            current
        }))
    }
}

async fn poll_loop(client: Weak<EthRpcClient>, generation: u64, interval: Duration) {
    loop {
        let Some(client) = client.upgrade() else {
            return;
        };
        if client.polling_generation() != generation {
            return;
        }
        match client.poll_once(generation).await {
            Ok(true) => {
                if let Some(block) = client.cached_latest_block() {
                    info!(number = block.number, hash = %block.hash, "New block");
                }
            }
            Ok(false) => {}
            Err(e) => warn!(error = %e, "Block poll failed"),
        }
        drop(client);
        tokio::time::sleep(interval).await;
    }
}

impl Drop for EthRpcClient {
    fn drop(&mut self) {
        if let Ok(mut task) = self.poll_task.lock() {
            if let Some(task) = task.take() {
                task.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::OnceLock;

    use super::*;
    use crate::ethrpc::AbortController;
    use crate::test_utils::{block_json, ScriptedTransport};

    fn client(transport: Arc<ScriptedTransport>) -> EthRpcClient {
        EthRpcClient::new(
            transport,
            RetryPolicy {
                retries: 2,
                backoff: Duration::from_millis(1),
            },
        )
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_error("eth_chainId", RpcError::Transient("503".into()));
        transport.push_error("eth_chainId", RpcError::Transient("503".into()));
        transport.on("eth_chainId", |_| Ok(json!("0x1")));

        let client = client(transport.clone());
        assert_eq!(client.get_chain_id(None).await.unwrap(), 1);
        assert_eq!(transport.call_count("eth_chainId"), 3);
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.on("eth_chainId", |_| Err(RpcError::Transient("down".into())));
        let client = client(transport.clone());
        assert!(client.get_chain_id(None).await.unwrap_err().is_transient());
        assert_eq!(transport.call_count("eth_chainId"), 3);
    }

    #[tokio::test]
    async fn test_protocol_and_node_errors_are_not_retried() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.on("eth_blockNumber", |_| Ok(json!(12)));
        transport.on("eth_estimateGas", |_| {
            Err(RpcError::Node {
                code: 3,
                message: "execution reverted".into(),
                data: None,
            })
        });
        let client = client(transport.clone());

        assert!(matches!(
            client.get_block_number(None).await,
            Err(RpcError::Protocol(_))
        ));
        assert_eq!(transport.call_count("eth_blockNumber"), 1);

        let err = client
            .estimate_gas(&CallRequest::default(), BlockTag::Latest, None)
            .await
            .unwrap_err();
        assert!(err.is_execution_revert());
        assert_eq!(transport.call_count("eth_estimateGas"), 1);
    }

    #[tokio::test]
    async fn test_aborted_call() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.on("eth_chainId", |_| Ok(json!("0x1")));
        let client = client(transport.clone());
        let controller = AbortController::new();
        controller.abort();
        let err = client.get_chain_id(Some(&controller.signal())).await.unwrap_err();
        assert!(err.is_aborted());
        assert_eq!(transport.call_count("eth_chainId"), 0);
    }

    #[tokio::test]
    async fn test_latest_block_falls_back_to_cache() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_ok("eth_getBlockByNumber", block_json(100, 1_700_000_000, Some(1_000_000_000)));
        transport.on("eth_getBlockByNumber", |_| Err(RpcError::Transient("timeout".into())));
        let client = client(transport.clone());

        let first = client.get_latest_block(None).await.unwrap();
        assert_eq!(first.number, 100);
        let second = client.get_latest_block(None).await.unwrap();
        assert_eq!(second.number, 100);
    }

    #[tokio::test]
    async fn test_publish_notifies_only_on_new_hash() {
        let transport = Arc::new(ScriptedTransport::new());
        let client = client(transport);
        let mut rx = client.subscribe_blocks();

        let block: BlockHeader =
            serde_json::from_value(block_json(5, 1_000, Some(7))).unwrap();
        assert!(client.publish_block(block.clone()));
        assert!(rx.has_changed().unwrap());
        rx.borrow_and_update();
        assert!(!client.publish_block(block));
        assert!(!rx.has_changed().unwrap());
    }

    #[tokio::test]
    async fn test_older_block_does_not_replace_cache() {
        let client = client(Arc::new(ScriptedTransport::new()));
        let newer: BlockHeader = serde_json::from_value(block_json(8, 1_000, Some(7))).unwrap();
        let older: BlockHeader = serde_json::from_value(block_json(7, 990, Some(7))).unwrap();
        assert!(client.publish_block(newer));
        assert!(!client.publish_block(older));
        assert_eq!(client.cached_latest_block().unwrap().number, 8);

        // same height, different hash: a reorg replaces the tip
        let mut sibling: BlockHeader = serde_json::from_value(block_json(8, 1_001, Some(7))).unwrap();
        sibling.hash = B256::repeat_byte(0x88);
        assert!(client.publish_block(sibling));
        assert_eq!(client.cached_latest_block().unwrap().hash, B256::repeat_byte(0x88));
    }

    #[tokio::test]
    async fn test_generation_bumped_mid_fetch_does_not_publish() {
        let transport = Arc::new(ScriptedTransport::new());
        let handle: Arc<OnceLock<Weak<EthRpcClient>>> = Arc::new(OnceLock::new());
        let toggler = handle.clone();
        transport.on("eth_getBlockByNumber", move |_| {
            if let Some(client) = toggler.get().and_then(Weak::upgrade) {
                client.set_polling(false, Duration::from_secs(1));
            }
            Ok(block_json(42, 1_000, Some(7)))
        });
        let client = Arc::new(client(transport));
        handle.set(Arc::downgrade(&client)).unwrap();

        let generation = client.polling_generation();
        assert!(!client.poll_once(generation).await.unwrap());
        assert!(client.cached_latest_block().is_none());
        assert_eq!(client.polling_generation(), generation + 1);
    }

    #[tokio::test]
    async fn test_stale_polling_generation_does_not_publish() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.on("eth_getBlockByNumber", |_| Ok(block_json(42, 1_000, Some(7))));
        let client = Arc::new(client(transport));

        let stale = client.polling_generation();
        client.set_polling(false, Duration::from_secs(1));
        assert!(!client.poll_once(stale).await.unwrap());
        assert!(client.cached_latest_block().is_none());

        let current = client.polling_generation();
        assert!(client.poll_once(current).await.unwrap());
        assert_eq!(client.cached_latest_block().unwrap().number, 42);
    }

    #[tokio::test]
    async fn test_polling_loop_publishes_and_stops() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.on("eth_getBlockByNumber", |_| Ok(block_json(9, 1_000, Some(7))));
        let client = Arc::new(client(transport));
        let mut rx = client.subscribe_blocks();

        client.set_polling(true, Duration::from_millis(5));
        tokio::time::timeout(Duration::from_secs(2), rx.changed())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(client.cached_latest_block().unwrap().number, 9);

        client.set_polling(false, Duration::from_millis(5));
        assert!(!client.is_polling());
    }
}
