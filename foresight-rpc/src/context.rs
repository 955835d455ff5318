//! Shared engine context: one per process, passed by `Arc` to every handler.

use std::sync::{Arc, Mutex};

use alloy_primitives::B256;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::confirmation::ConfirmationQueue;
use crate::ethrpc::{AbortController, AbortSignal, BlockHeader, EthRpcClient, RpcError};
use crate::metadata::MetadataServices;
use crate::protectors::ProtectorPipeline;
use crate::simulation::{
    GovernanceError, GovernanceSimulation, SignedMessage, SimulationEngine, SimulationError,
    SimulationState, StateCell, TransactionSubmission,
};

/// Attempts per mutation when new blocks keep aborting it.
const MAX_ABORTED_ATTEMPTS: usize = 3;

/// A change to the overlay.
#[derive(Debug, Clone)]
pub enum Mutation {
    Append(TransactionSubmission),
    AppendMessage(SignedMessage),
    Remove(B256),
    Rebase(Arc<BlockHeader>),
    Reset,
}

impl Mutation {
    fn name(&self) -> &'static str {
        match self {
            Mutation::Append(_) => "append",
            Mutation::AppendMessage(_) => "append_message",
            Mutation::Remove(_) => "remove",
            Mutation::Rebase(_) => "rebase",
            Mutation::Reset => "reset",
        }
    }
}

pub struct EngineContext {
    pub config: Config,
    pub engine: SimulationEngine,
    pub state: StateCell<SimulationState>,
    pub confirmations: ConfirmationQueue,
    pub metadata: MetadataServices,
    /// For forwarding approved and pass-through requests.
    pub http: reqwest::Client,
    abort: Mutex<AbortController>,
    /// Mutations build on each other, so they run one at a time.
    write_gate: tokio::sync::Mutex<()>,
}

impl EngineContext {
    pub fn new(
        config: Config,
        client: Arc<EthRpcClient>,
        metadata: MetadataServices,
        initial: SimulationState,
    ) -> Self {
        let engine = SimulationEngine::new(client, ProtectorPipeline::default_set(), config.settings());
        Self::with_engine(config, engine, metadata, initial)
    }

    fn with_engine(
        config: Config,
        engine: SimulationEngine,
        metadata: MetadataServices,
        initial: SimulationState,
    ) -> Self {
        Self {
            config,
            engine,
            state: StateCell::new(initial),
            confirmations: ConfirmationQueue::new(),
            metadata,
            http: reqwest::Client::new(),
            abort: Mutex::new(AbortController::new()),
            write_gate: tokio::sync::Mutex::new(()),
        }
    }

    /// Connect to the node and start with an empty overlay on the latest
    /// block.
    pub async fn connect(config: Config, metadata: MetadataServices) -> Result<Arc<Self>, SimulationError> {
        let client = Arc::new(EthRpcClient::http(
            &config.upstream_rpc_url,
            config.rpc_timeout(),
            config.retry_policy(),
        )?);
        let engine = SimulationEngine::new(client.clone(), ProtectorPipeline::default_set(), config.settings());
        let initial = engine.new_state(None).await?;
        info!(
            chain_id = initial.chain_id,
            anchor = initial.anchor_block_number,
            "Connected to upstream node"
        );
        if config.block_polling_enabled {
            client.set_polling(true, config.polling_interval());
        }
        Ok(Arc::new(Self::with_engine(config, engine, metadata, initial)))
    }

    pub fn client(&self) -> &Arc<EthRpcClient> {
        self.engine.client()
    }

    pub fn current_state(&self) -> Arc<SimulationState> {
        self.state.load()
    }

    fn abort_signal(&self) -> Result<AbortSignal, SimulationError> {
        self.abort
            .lock()
            .map(|controller| controller.signal())
            .map_err(|_| SimulationError::Invariant("abort controller lock poisoned".into()))
    }

    /// Cancel in-flight simulations and arm a fresh controller.
    pub fn abort_in_flight(&self) {
        if let Ok(mut controller) = self.abort.lock() {
            controller.abort();
            *controller = AbortController::new();
        }
    }

    /// Apply `mutation` to the current overlay and publish the result.
    ///
    /// A mutation aborted by a new block is retried on the fresh signal; the
    /// aborted result itself is never published.
    pub async fn apply(&self, mutation: Mutation) -> Result<Arc<SimulationState>, SimulationError> {
        let _writer = self.write_gate.lock().await;
        for attempt in 1..=MAX_ABORTED_ATTEMPTS {
            if let Mutation::Rebase(anchor) = &mutation {
                let current = self.state.load();
                if anchor.number <= current.anchor_block_number {
                    debug!(
                        received = anchor.number,
                        anchor = current.anchor_block_number,
                        "Overlay already at or past block, not rebasing"
                    );
                    return Ok(current);
                }
            }
            let epoch = self.state.begin();
            let signal = self.abort_signal()?;
            let current = self.state.load();
            let abort = Some(&signal);

            let result = match &mutation {
                Mutation::Append(submission) => {
                    self.engine.append_transaction(&current, submission.clone(), abort).await
                }
                Mutation::AppendMessage(message) => {
                    self.engine.append_signed_message(&current, message.clone(), abort).await
                }
                Mutation::Remove(identifier) => self.engine.remove_transaction(&current, *identifier, abort).await,
                Mutation::Rebase(anchor) => self.engine.rebase(&current, anchor, abort).await,
                Mutation::Reset => Ok(self.engine.reset(&current)),
            };

            match result {
                Ok(next) => {
                    let next = Arc::new(next);
                    if self.state.commit(epoch, next.clone()) {
                        return Ok(next);
                    }
                    debug!(mutation = mutation.name(), attempt, "Superseded before commit, retrying");
                }
                Err(err) if err.is_aborted() => {
                    debug!(mutation = mutation.name(), attempt, "Aborted by a new block, retrying");
                }
                Err(err) => return Err(err),
            }
        }
        Err(SimulationError::Rpc(RpcError::Aborted))
    }

    /// A new latest block arrived: cancel what is running and move the
    /// overlay onto it.
    pub async fn on_new_block(&self, block: Arc<BlockHeader>) {
        self.abort_in_flight();
        let number = block.number;
        match self.apply(Mutation::Rebase(block)).await {
            Ok(state) => debug!(anchor = state.anchor_block_number, "Overlay follows block {number}"),
            Err(err) if err.is_aborted() => debug!(number, "Rebase aborted"),
            Err(err) => warn!(number, error = %err, "Failed to rebase overlay"),
        }
    }

    /// Follow the client's latest-block cache for as long as the context
    /// lives.
    pub fn spawn_block_follower(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let mut blocks = self.client().subscribe_blocks();
        let context = Arc::downgrade(self);
        tokio::spawn(async move {
            while blocks.changed().await.is_ok() {
                let Some(block) = blocks.borrow_and_update().clone() else {
                    continue;
                };
                let Some(context) = context.upgrade() else {
                    return;
                };
                context.on_new_block(block).await;
            }
        })
    }

    pub async fn simulate_governance_vote(&self, identifier: B256) -> Result<GovernanceSimulation, GovernanceError> {
        let state = self.state.load();
        let signal = self.abort_signal()?;
        self.engine
            .simulate_governance_vote(&state, identifier, Some(&signal))
            .await
    }
}

#[cfg(test)]
mod tests {
    use alloy_primitives::Address;
    use chrono::Utc;
    use serde_json::json;

    use super::*;
    use crate::config::Settings;
    use crate::ethrpc::RetryPolicy;
    use crate::requests::TransactionRequest;
    use crate::test_utils::{anchor_state, block_json, ScriptedTransport};

    fn test_config() -> Config {
        Config::from_lookup(|_| None).unwrap()
    }

    fn context(transport: Arc<ScriptedTransport>) -> EngineContext {
        let client = Arc::new(EthRpcClient::new(transport, RetryPolicy::default()));
        EngineContext::new(test_config(), client, MetadataServices::default(), anchor_state())
    }

    fn eth_transfer(original: &str) -> Mutation {
        Mutation::Append(TransactionSubmission {
            request: TransactionRequest {
                from: Some(Address::repeat_byte(1)),
                to: Some(Address::repeat_byte(2)),
                value: Some(alloy_primitives::U256::from(1u64)),
                gas: Some(21_000),
                ..Default::default()
            },
            website: "https://app.example".into(),
            original_request: original.into(),
            created: Utc::now(),
            new_block: false,
        })
    }

    fn plain_node(transport: &ScriptedTransport) {
        transport.on("eth_getTransactionCount", |_| Ok(json!("0x0")));
        transport.on("eth_getCode", |_| Ok(json!("0x")));
        transport.on("eth_simulateV1", |params| {
            let blocks = params[0]["blockStateCalls"].as_array().cloned().unwrap_or_default();
            Ok(json!(blocks
                .iter()
                .enumerate()
                .map(|(i, block)| json!({
                    "number": format!("{:#x}", 101 + i),
                    "timestamp": "0x3f4",
                    "gasLimit": "0x1c9c380",
                    "gasUsed": "0x5208",
                    "calls": block["calls"].as_array().map(|calls| calls.iter().map(|_| json!({
                        "status": "0x1", "returnData": "0x", "gasUsed": "0x5208", "logs": []
                    })).collect::<Vec<_>>()).unwrap_or_default(),
                }))
                .collect::<Vec<_>>()))
        });
    }

    #[tokio::test]
    async fn test_apply_publishes_new_state() {
        let transport = Arc::new(ScriptedTransport::new());
        plain_node(&transport);
        let ctx = context(transport);
        let mut updates = ctx.state.subscribe();

        let next = ctx.apply(eth_transfer("one")).await.unwrap();
        assert_eq!(next.transaction_count(), 1);
        assert!(updates.has_changed().unwrap());
        assert_eq!(ctx.current_state().transaction_count(), 1);

        let cleared = ctx.apply(Mutation::Reset).await.unwrap();
        assert_eq!(cleared.transaction_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_mutation_keeps_state() {
        let transport = Arc::new(ScriptedTransport::new());
        plain_node(&transport);
        let ctx = context(transport);
        let err = ctx.apply(Mutation::Remove(B256::repeat_byte(5))).await.unwrap_err();
        assert!(matches!(err, SimulationError::UnknownTransaction(_)));
        assert_eq!(ctx.current_state().anchor_block_number, 100);
    }

    #[tokio::test]
    async fn test_new_block_rebases() {
        let transport = Arc::new(ScriptedTransport::new());
        plain_node(&transport);
        let ctx = context(transport);
        ctx.apply(eth_transfer("one")).await.unwrap();

        let block: BlockHeader = serde_json::from_value(block_json(105, 1_060, Some(1_000_000_000))).unwrap();
        ctx.on_new_block(Arc::new(block.clone())).await;
        let state = ctx.current_state();
        assert_eq!(state.anchor_block_number, 105);
        assert_eq!(state.transaction_count(), 1);

        // an older block never moves the anchor back
        let stale: BlockHeader = serde_json::from_value(block_json(104, 1_048, Some(1))).unwrap();
        ctx.on_new_block(Arc::new(stale)).await;
        assert_eq!(ctx.current_state().anchor_block_number, 105);
    }

    #[tokio::test]
    async fn test_stale_rebase_leaves_epoch_alone() {
        let transport = Arc::new(ScriptedTransport::new());
        plain_node(&transport);
        let ctx = context(transport.clone());
        let before = ctx.state.epoch();
        let simulations = transport.call_count("eth_simulateV1");

        for number in [99, 100] {
            let block: BlockHeader = serde_json::from_value(block_json(number, 1_000, Some(1))).unwrap();
            let state = ctx.apply(Mutation::Rebase(Arc::new(block))).await.unwrap();
            assert_eq!(state.anchor_block_number, 100);
        }
        assert_eq!(ctx.state.epoch(), before);
        assert_eq!(transport.call_count("eth_simulateV1"), simulations);
    }

    #[tokio::test]
    async fn test_block_follower_tracks_published_blocks() {
        let transport = Arc::new(ScriptedTransport::new());
        plain_node(&transport);
        let ctx = Arc::new(context(transport));
        let mut states = ctx.state.subscribe();
        let follower = ctx.spawn_block_follower();

        let block: BlockHeader = serde_json::from_value(block_json(101, 1_012, Some(1_000_000_000))).unwrap();
        assert!(ctx.client().publish_block(block));
        states.changed().await.unwrap();
        assert_eq!(states.borrow().anchor_block_number, 101);
        follower.abort();
    }

    #[tokio::test]
    async fn test_connect_anchors_on_latest_block() {
        use wiremock::matchers::{body_partial_json, method};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"method": "eth_getBlockByNumber"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0", "id": 1, "result": block_json(250, 3_000, Some(7))
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"method": "eth_chainId"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"jsonrpc": "2.0", "id": 1, "result": "0xa"})))
            .mount(&server)
            .await;

        let uri = server.uri();
        let config = Config::from_lookup(|key| match key {
            "FORESIGHT_UPSTREAM_RPC" => Some(uri.clone()),
            "FORESIGHT_BLOCK_POLLING" => Some("false".into()),
            _ => None,
        })
        .unwrap();
        let ctx = EngineContext::connect(config, MetadataServices::default()).await.unwrap();
        let state = ctx.current_state();
        assert_eq!(state.anchor_block_number, 250);
        assert_eq!(state.chain_id, 10);
        assert_eq!(state.transaction_count(), 0);
    }

    #[test]
    fn test_settings_flow_into_engine() {
        let transport = Arc::new(ScriptedTransport::new());
        let ctx = context(transport);
        assert_eq!(ctx.engine.settings(), &Settings::default());
    }
}
