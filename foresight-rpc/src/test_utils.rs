//! Scripted in-memory node used by unit tests.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use alloy_primitives::{Address, Bytes, U256};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};

use crate::config::Config;
use crate::context::EngineContext;
use crate::ethrpc::{BlockHeader, EthRpcClient, Log, RetryPolicy, RpcError, RpcTransport};
use crate::metadata::MetadataServices;
use crate::requests::TransactionRequest;
use crate::simulation::{
    mock_sign_transaction, CallResult, CallStatus, PreSimulationTransaction, SimulatedTransaction,
    SimulationState,
};
use crate::wire::{Eip1559Transaction, UnsignedTransaction};

type Handler = Arc<dyn Fn(&Value) -> Result<Value, RpcError> + Send + Sync>;

/// Answers each method from a queue of one-shot replies, then from a
/// standing handler. Unscripted methods fail with "method not found".
#[derive(Default)]
pub struct ScriptedTransport {
    queued: Mutex<HashMap<String, VecDeque<Result<Value, RpcError>>>>,
    handlers: Mutex<HashMap<String, Handler>>,
    calls: Mutex<Vec<(String, Value)>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on<F>(&self, method: &str, handler: F)
    where
        F: Fn(&Value) -> Result<Value, RpcError> + Send + Sync + 'static,
    {
        self.handlers
            .lock()
            .unwrap()
            .insert(method.to_string(), Arc::new(handler));
    }

    pub fn push_ok(&self, method: &str, value: Value) {
        self.push(method, Ok(value));
    }

    pub fn push_error(&self, method: &str, error: RpcError) {
        self.push(method, Err(error));
    }

    fn push(&self, method: &str, reply: Result<Value, RpcError>) {
        self.queued
            .lock()
            .unwrap()
            .entry(method.to_string())
            .or_default()
            .push_back(reply);
    }

    pub fn call_count(&self, method: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(m, _)| m == method)
            .count()
    }

    pub fn calls(&self, method: &str) -> Vec<Value> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(m, _)| m == method)
            .map(|(_, params)| params.clone())
            .collect()
    }
}

#[async_trait]
impl RpcTransport for ScriptedTransport {
    async fn request(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        self.calls
            .lock()
            .unwrap()
            .push((method.to_string(), params.clone()));

        if let Some(reply) = self
            .queued
            .lock()
            .unwrap()
            .get_mut(method)
            .and_then(VecDeque::pop_front)
        {
            return reply;
        }
        let handler = self.handlers.lock().unwrap().get(method).cloned();
        match handler {
            Some(handler) => handler(&params),
            None => Err(RpcError::Node {
                code: -32601,
                message: format!("method {method} not scripted"),
                data: None,
            }),
        }
    }
}

/// A node-shaped block object.
pub fn block_json(number: u64, timestamp: u64, base_fee: Option<u64>) -> Value {
    let mut block = json!({
        "number": format!("{number:#x}"),
        "hash": format!("0x{:064x}", number + 0xb10c),
        "parentHash": format!("0x{:064x}", number + 0xb10b),
        "timestamp": format!("{timestamp:#x}"),
        "gasLimit": "0x1c9c380",
        "gasUsed": "0xe4e1c0",
        "miner": "0x0000000000000000000000000000000000000000",
    });
    if let Some(fee) = base_fee {
        block["baseFeePerGas"] = json!(format!("{fee:#x}"));
    }
    block
}

/// State anchored at block 100 on chain 1 with an empty overlay.
pub fn anchor_state() -> SimulationState {
    let header: BlockHeader = serde_json::from_value(block_json(100, 1_000, Some(1_000_000_000)))
        .expect("fixture block parses");
    SimulationState::empty(&header, 1)
}

/// A successful simulated EIP-1559 transaction carrying `logs`.
pub fn simulated_transaction(
    from: Address,
    to: Option<Address>,
    input: Bytes,
    logs: Vec<Log>,
) -> SimulatedTransaction {
    let tx = UnsignedTransaction::Eip1559(Eip1559Transaction {
        chain_id: 1,
        nonce: 0,
        max_priority_fee_per_gas: U256::from(1_000_000_000u64),
        max_fee_per_gas: U256::from(3_000_000_000u64),
        gas_limit: 100_000,
        to,
        value: U256::ZERO,
        input: input.clone(),
        access_list: Vec::new(),
    });
    let preview = mock_sign_transaction(tx, from, true).expect("fixture signs");
    let original = format!("{from}:{to:?}:{input}:{}", logs.len());
    SimulatedTransaction {
        pre_simulation: PreSimulationTransaction {
            preview,
            website: "https://app.example".into(),
            created: Utc::now(),
            transaction_identifier: PreSimulationTransaction::identifier_for(&original),
            original_request: TransactionRequest {
                from: Some(from),
                to,
                input: Some(input),
                ..Default::default()
            },
            engine_filled_fees: true,
            engine_filled_gas: true,
            predicted_revert: None,
            expected_nonce: None,
        },
        call_result: CallResult {
            status: CallStatus::Success,
            gas_used: 50_000,
            logs,
            return_data: Bytes::new(),
            balance_deltas: BTreeMap::new(),
        },
        realized_gas_price: U256::from(2_000_000_000u64),
        token_balances_after: Vec::new(),
        quarantine_codes: BTreeSet::new(),
    }
}

/// Answers `eth_getCode` with code for `contracts` and `0x` for everyone else.
pub fn code_for(transport: &ScriptedTransport, contracts: Vec<Address>) {
    transport.on("eth_getCode", move |params| {
        let address: Address = serde_json::from_value(params[0].clone())
            .map_err(|e| RpcError::Protocol(e.to_string()))?;
        if contracts.contains(&address) {
            Ok(json!("0x6080604052"))
        } else {
            Ok(json!("0x"))
        }
    });
}

/// Engine context on [`anchor_state`] whose node knows every account as an
/// EOA with nonce 0. `vars` are `FORESIGHT_*` overrides.
pub fn engine_context(vars: &[(&str, &str)]) -> Arc<EngineContext> {
    let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
    let config = Config::from_lookup(|key| vars.get(key).cloned()).unwrap();
    let transport = Arc::new(ScriptedTransport::new());
    transport.on("eth_getTransactionCount", |_| Ok(json!("0x0")));
    transport.on("eth_getCode", |_| Ok(json!("0x")));
    let client = Arc::new(EthRpcClient::new(transport, RetryPolicy::default()));
    Arc::new(EngineContext::new(config, client, MetadataServices::default(), anchor_state()))
}
