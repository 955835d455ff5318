//! Batched overlay execution through `eth_simulateV1`.
//!
//! The whole overlay is always re-run in one call anchored at the anchor
//! block, so results never depend on what the node cached from an earlier
//! run. A second pass reads ERC-20 balances around every transaction that
//! moved tokens.

use std::collections::{BTreeMap, BTreeSet};

use alloy_primitives::{Address, Bytes, I256, U256};
use alloy_sol_types::SolCall;
use tracing::{debug, warn};

use super::fees::base_fee_schedule;
use super::state::{
    CallResult, CallStatus, PreSimulationTransaction, SignedMessage, SimulatedBlock,
    SimulatedTransaction, SimulationState, TokenBalance,
};
use super::tokens::{parse_token_events, TokenEvent, IERC20};
use super::SimulationError;
use crate::ethrpc::{
    AbortSignal, AccountOverride, BlockOverrides, BlockStateCall, BlockTag, CallRequest,
    EthRpcClient, SimulatePayload, SimulatedBlockResult, SimulatedCallResult,
};

/// Gas handed to each `balanceOf` query.
const BALANCE_CALL_GAS: u64 = 100_000;

/// An overlay block before simulation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlannedBlock {
    pub state_overrides: BTreeMap<Address, AccountOverride>,
    pub transactions: Vec<PreSimulationTransaction>,
    pub signed_messages: Vec<SignedMessage>,
    pub time_increase_delta: u64,
}

/// One more block appended after the overlay, for read-only queries.
#[derive(Debug, Clone, Default)]
pub struct QueryBlock {
    pub state_overrides: BTreeMap<Address, AccountOverride>,
    pub calls: Vec<CallRequest>,
    pub time_increase_delta: u64,
}

/// Everything needed to re-run an overlay from scratch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlayPlan {
    pub anchor_block_number: u64,
    pub anchor_timestamp: u64,
    pub anchor_base_fee_per_gas: Option<U256>,
    pub anchor_gas_limit: u64,
    pub anchor_gas_used: u64,
    pub blocks: Vec<PlannedBlock>,
}

impl OverlayPlan {
    /// Strip the results off a simulated state.
    pub fn from_state(state: &SimulationState) -> Self {
        Self {
            anchor_block_number: state.anchor_block_number,
            anchor_timestamp: state.anchor_timestamp,
            anchor_base_fee_per_gas: state.anchor_base_fee_per_gas,
            anchor_gas_limit: state.anchor_gas_limit,
            anchor_gas_used: state.anchor_gas_used,
            blocks: state
                .blocks
                .iter()
                .map(|block| PlannedBlock {
                    state_overrides: block.state_overrides.clone(),
                    transactions: block
                        .simulated_transactions
                        .iter()
                        .map(|tx| tx.pre_simulation.clone())
                        .collect(),
                    signed_messages: block.signed_messages.clone(),
                    time_increase_delta: block.time_increase_delta,
                })
                .collect(),
        }
    }

    pub fn transactions(&self) -> impl Iterator<Item = &PreSimulationTransaction> {
        self.blocks.iter().flat_map(|block| block.transactions.iter())
    }

    pub fn transactions_mut(&mut self) -> impl Iterator<Item = &mut PreSimulationTransaction> {
        self.blocks
            .iter_mut()
            .flat_map(|block| block.transactions.iter_mut())
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.iter().all(|block| {
            block.transactions.is_empty() && block.state_overrides.is_empty()
        })
    }

    /// Base fees assuming every transaction burns its whole gas limit.
    pub fn planned_base_fees(&self) -> Vec<Option<U256>> {
        let used: Vec<u64> = self
            .blocks
            .iter()
            .map(|block| {
                block
                    .transactions
                    .iter()
                    .map(|tx| tx.preview.transaction().gas_limit())
                    .fold(0u64, u64::saturating_add)
            })
            .collect();
        self.base_fees_for(&used)
    }

    pub fn base_fees_for(&self, gas_used_per_block: &[u64]) -> Vec<Option<U256>> {
        base_fee_schedule(
            self.anchor_base_fee_per_gas,
            self.anchor_gas_used,
            self.anchor_gas_limit,
            gas_used_per_block,
        )
    }

    fn block_overrides(&self, index: usize, timestamp: u64, base_fee: Option<U256>) -> BlockOverrides {
        BlockOverrides {
            number: Some(self.anchor_block_number + index as u64 + 1),
            time: Some(timestamp),
            gas_limit: Some(self.anchor_gas_limit),
            fee_recipient: None,
            base_fee_per_gas: base_fee,
        }
    }

    fn timestamps(&self) -> Vec<u64> {
        let mut ts = self.anchor_timestamp;
        self.blocks
            .iter()
            .map(|block| {
                ts = ts.saturating_add(block.time_increase_delta);
                ts
            })
            .collect()
    }

    /// Payload for the overlay, optionally followed by a query block.
    pub fn to_payload(&self, query: Option<&QueryBlock>) -> SimulatePayload {
        let fees = self.planned_base_fees();
        let timestamps = self.timestamps();
        let mut block_state_calls: Vec<BlockStateCall> = self
            .blocks
            .iter()
            .enumerate()
            .map(|(index, block)| BlockStateCall {
                block_overrides: Some(self.block_overrides(index, timestamps[index], fees[index])),
                state_overrides: block.state_overrides.clone(),
                calls: block
                    .transactions
                    .iter()
                    .map(|tx| tx.preview.to_call_request())
                    .collect(),
            })
            .collect();

        if let Some(query) = query {
            let index = self.blocks.len();
            let last_ts = timestamps.last().copied().unwrap_or(self.anchor_timestamp);
            block_state_calls.push(BlockStateCall {
                block_overrides: Some(self.block_overrides(
                    index,
                    last_ts.saturating_add(query.time_increase_delta),
                    None,
                )),
                state_overrides: query.state_overrides.clone(),
                calls: query.calls.clone(),
            });
        }

        SimulatePayload {
            block_state_calls,
            trace_transfers: true,
            validation: false,
        }
    }
}

/// `Error(string)`, `Panic(uint256)` or a raw UTF-8 reason. Empty revert
/// data has no reason.
pub fn decode_revert(data: &[u8]) -> Option<String> {
    if data.is_empty() {
        return None;
    }
    alloy_sol_types::decode_revert_reason(data).filter(|reason| !reason.is_empty())
}

/// Human-readable reason for a failed call.
pub fn failure_reason(result: &SimulatedCallResult) -> String {
    if let Some(reason) = decode_revert(&result.return_data) {
        return reason;
    }
    match &result.error {
        Some(error) if !error.message.is_empty() => error.message.clone(),
        _ => "execution reverted".to_string(),
    }
}

fn call_result(
    result: &SimulatedCallResult,
    sender: Address,
    gas_price: U256,
) -> CallResult {
    let status = if result.succeeded() {
        CallStatus::Success
    } else {
        CallStatus::Failure {
            reason: failure_reason(result),
        }
    };

    let mut deltas: BTreeMap<Address, I256> = BTreeMap::new();
    let mut add = |address: Address, amount: I256| {
        let entry = deltas.entry(address).or_insert(I256::ZERO);
        *entry = entry.saturating_add(amount);
    };
    for event in parse_token_events(&result.logs) {
        if let TokenEvent::NativeTransfer { from, to, value } = event {
            let value = I256::from_raw(value);
            add(from, value.saturating_neg());
            add(to, value);
        }
    }
    let fee = U256::from(result.gas_used).saturating_mul(gas_price);
    if !fee.is_zero() {
        add(sender, I256::from_raw(fee).saturating_neg());
    }
    deltas.retain(|_, delta| !delta.is_zero());

    CallResult {
        status,
        gas_used: result.gas_used,
        logs: result.logs.clone(),
        return_data: result.return_data.clone(),
        balance_deltas: deltas,
    }
}

fn check_shape(plan: &OverlayPlan, results: &[SimulatedBlockResult], extra: usize) -> Result<(), SimulationError> {
    if results.len() != plan.blocks.len() + extra {
        return Err(SimulationError::Invariant(format!(
            "eth_simulateV1 returned {} blocks for {} requested",
            results.len(),
            plan.blocks.len() + extra
        )));
    }
    Ok(())
}

/// (token, owner) pairs whose ERC-20 balance a transaction changed.
fn touched_balances(result: &CallResult) -> BTreeSet<(Address, Address)> {
    parse_token_events(&result.logs)
        .into_iter()
        .filter_map(|event| match event {
            TokenEvent::Erc20Transfer { token, from, to, .. } => Some([(token, from), (token, to)]),
            _ => None,
        })
        .flatten()
        .filter(|(_, owner)| *owner != Address::ZERO)
        .collect()
}

fn balance_call(token: Address, owner: Address) -> CallRequest {
    CallRequest {
        to: Some(token),
        gas: Some(BALANCE_CALL_GAS),
        input: Some(Bytes::from(IERC20::balanceOfCall { owner }.abi_encode())),
        ..Default::default()
    }
}

fn decode_balance(result: &SimulatedCallResult) -> Option<U256> {
    if !result.succeeded() {
        return None;
    }
    IERC20::balanceOfCall::abi_decode_returns(&result.return_data, true)
        .ok()
        .map(|decoded| decoded.balance)
}

/// Run the overlay and build simulated blocks. Quarantine codes are left
/// empty for the protector pipeline.
pub async fn simulate_plan(
    client: &EthRpcClient,
    plan: &OverlayPlan,
    abort: Option<&AbortSignal>,
) -> Result<Vec<SimulatedBlock>, SimulationError> {
    if plan.blocks.iter().all(|block| block.transactions.is_empty()) {
        return Ok(plan
            .blocks
            .iter()
            .map(|block| SimulatedBlock {
                state_overrides: block.state_overrides.clone(),
                signed_messages: block.signed_messages.clone(),
                simulated_transactions: Vec::new(),
                time_increase_delta: block.time_increase_delta,
            })
            .collect());
    }

    let payload = plan.to_payload(None);
    let results = client
        .simulate_v1(&payload, BlockTag::Number(plan.anchor_block_number), abort)
        .await?;
    check_shape(plan, &results, 0)?;

    let planned_fees = plan.planned_base_fees();

    let mut blocks = Vec::with_capacity(plan.blocks.len());
    for (index, (planned, result)) in plan.blocks.iter().zip(&results).enumerate() {
        if result.calls.len() != planned.transactions.len() {
            return Err(SimulationError::Invariant(format!(
                "block {index}: {} call results for {} transactions",
                result.calls.len(),
                planned.transactions.len()
            )));
        }
        let base_fee = result.base_fee_per_gas.or(planned_fees[index]);
        let simulated_transactions = planned
            .transactions
            .iter()
            .zip(&result.calls)
            .map(|(pre, call)| {
                let gas_price = pre.preview.transaction().effective_gas_price(base_fee);
                SimulatedTransaction {
                    pre_simulation: pre.clone(),
                    call_result: call_result(call, pre.from(), gas_price),
                    realized_gas_price: gas_price,
                    token_balances_after: Vec::new(),
                    quarantine_codes: BTreeSet::new(),
                }
            })
            .collect();
        blocks.push(SimulatedBlock {
            state_overrides: planned.state_overrides.clone(),
            signed_messages: planned.signed_messages.clone(),
            simulated_transactions,
            time_increase_delta: planned.time_increase_delta,
        });
    }

    attach_token_balances(client, plan, &mut blocks, abort).await?;
    Ok(blocks)
}

/// Second pass: the same overlay with `balanceOf` queries before and after
/// every transaction that emitted ERC-20 transfers.
async fn attach_token_balances(
    client: &EthRpcClient,
    plan: &OverlayPlan,
    blocks: &mut [SimulatedBlock],
    abort: Option<&AbortSignal>,
) -> Result<(), SimulationError> {
    let touched: Vec<Vec<BTreeSet<(Address, Address)>>> = blocks
        .iter()
        .map(|block| {
            block
                .simulated_transactions
                .iter()
                .map(|tx| touched_balances(&tx.call_result))
                .collect()
        })
        .collect();
    if touched.iter().flatten().all(BTreeSet::is_empty) {
        return Ok(());
    }

    let mut payload = plan.to_payload(None);
    for (block_index, block_call) in payload.block_state_calls.iter_mut().enumerate() {
        let mut calls = Vec::new();
        for (tx_index, tx_call) in block_call.calls.drain(..).enumerate() {
            let pairs = &touched[block_index][tx_index];
            calls.extend(pairs.iter().map(|(token, owner)| balance_call(*token, *owner)));
            calls.push(tx_call);
            calls.extend(pairs.iter().map(|(token, owner)| balance_call(*token, *owner)));
        }
        block_call.calls = calls;
    }

    let results = client
        .simulate_v1(&payload, BlockTag::Number(plan.anchor_block_number), abort)
        .await?;
    check_shape(plan, &results, 0)?;

    for (block_index, result) in results.iter().enumerate() {
        let mut calls = result.calls.iter();
        for (tx_index, tx) in blocks[block_index].simulated_transactions.iter_mut().enumerate() {
            let pairs = &touched[block_index][tx_index];
            let before: Vec<Option<U256>> = calls.by_ref().take(pairs.len()).map(decode_balance).collect();
            if calls.next().is_none() {
                return Err(SimulationError::Invariant(
                    "balance pass returned fewer calls than sent".into(),
                ));
            }
            let after: Vec<Option<U256>> = calls.by_ref().take(pairs.len()).map(decode_balance).collect();

            for (((token, owner), before), after) in pairs.iter().zip(before).zip(after) {
                match (before, after) {
                    (Some(before), Some(after)) => tx.token_balances_after.push(TokenBalance {
                        token: *token,
                        owner: *owner,
                        before,
                        after,
                    }),
                    _ => debug!(%token, %owner, "balanceOf query failed"),
                }
            }
        }
        if calls.next().is_some() {
            warn!(block = block_index, "Balance pass returned extra calls");
        }
    }
    Ok(())
}

/// Run read-only calls in a block after the overlay.
pub async fn query_after_overlay(
    client: &EthRpcClient,
    plan: &OverlayPlan,
    query: &QueryBlock,
    abort: Option<&AbortSignal>,
) -> Result<Vec<SimulatedCallResult>, SimulationError> {
    let payload = plan.to_payload(Some(query));
    let mut results = client
        .simulate_v1(&payload, BlockTag::Number(plan.anchor_block_number), abort)
        .await?;
    check_shape(plan, &results, 1)?;
    let calls = results.pop().map(|block| block.calls).unwrap_or_default();
    if calls.len() != query.calls.len() {
        return Err(SimulationError::Invariant(format!(
            "query block returned {} results for {} calls",
            calls.len(),
            query.calls.len()
        )));
    }
    Ok(calls)
}

/// `eth_call`-like read through the overlay.
pub async fn call_through_overlay(
    client: &EthRpcClient,
    plan: &OverlayPlan,
    call: CallRequest,
    abort: Option<&AbortSignal>,
) -> Result<SimulatedCallResult, SimulationError> {
    let query = QueryBlock {
        calls: vec![call],
        ..Default::default()
    };
    let mut calls = query_after_overlay(client, plan, &query, abort).await?;
    calls
        .pop()
        .ok_or_else(|| SimulationError::Invariant("empty query result".into()))
}
