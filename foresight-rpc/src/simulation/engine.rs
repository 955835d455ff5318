//! Overlay mutations.
//!
//! Every operation takes the current [`SimulationState`] and returns a brand
//! new one. Callers swap it in through a [`super::StateCell`], so readers
//! never see a half-built overlay.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use alloy_primitives::{Address, B256, U256};
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use super::fees::{adjust_fees, compute_next_base_fee, DEFAULT_PRIORITY_FEE};
use super::gas::estimate_gas;
use super::governance::{simulate_vote_execution, GovernanceError, GovernanceSimulation};
use super::mock_signer::{call_request_for, mock_sign_transaction};
use super::multicall::{simulate_plan, OverlayPlan, PlannedBlock};
use super::state::{PreSimulationTransaction, SignedMessage, SimulatedBlock, SimulationState};
use super::SimulationError;
use crate::config::Settings;
use crate::ethrpc::{AbortSignal, BlockHeader, BlockTag, EthRpcClient};
use crate::protectors::{ProtectorContext, ProtectorPipeline};
use crate::requests::TransactionRequest;
use crate::wire::{
    Eip1559Transaction, Eip2930Transaction, Eip4844Transaction, LegacyTransaction,
    UnsignedTransaction,
};

/// A transaction the user asked to preview.
#[derive(Debug, Clone)]
pub struct TransactionSubmission {
    pub request: TransactionRequest,
    /// Origin of the requesting page.
    pub website: String,
    /// The request exactly as received; hashed into the stable identifier.
    pub original_request: String,
    pub created: DateTime<Utc>,
    /// Start a new overlay block instead of joining the last one.
    pub new_block: bool,
}

/// Real nonces at the anchor, fetched once per sender per operation.
type NonceBase = BTreeMap<Address, u64>;

pub struct SimulationEngine {
    client: Arc<EthRpcClient>,
    protectors: ProtectorPipeline,
    settings: Settings,
}

impl SimulationEngine {
    pub fn new(client: Arc<EthRpcClient>, protectors: ProtectorPipeline, settings: Settings) -> Self {
        Self {
            client,
            protectors,
            settings,
        }
    }

    pub fn client(&self) -> &Arc<EthRpcClient> {
        &self.client
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Empty overlay on top of the latest block.
    pub async fn new_state(&self, abort: Option<&AbortSignal>) -> Result<SimulationState, SimulationError> {
        let latest = self.client.get_latest_block(abort).await?;
        let chain_id = self.client.get_chain_id(abort).await?;
        Ok(SimulationState::empty(&latest, chain_id))
    }

    /// Chain nonce at the anchor plus the overlay transactions `address` sent.
    pub async fn get_simulated_transaction_count(
        &self,
        state: &SimulationState,
        address: Address,
        abort: Option<&AbortSignal>,
    ) -> Result<u64, SimulationError> {
        let real = self
            .client
            .get_transaction_count(address, BlockTag::Number(state.anchor_block_number), abort)
            .await?;
        Ok(real + state.transactions_sent_by(address))
    }

    /// Fill, mock-sign and append a transaction, then re-simulate the whole
    /// overlay.
    pub async fn append_transaction(
        &self,
        state: &SimulationState,
        submission: TransactionSubmission,
        abort: Option<&AbortSignal>,
    ) -> Result<SimulationState, SimulationError> {
        let request = &submission.request;
        let from = self
            .settings
            .impersonation_address
            .unwrap_or_else(|| request.sender());

        if let Some(requested) = request.chain_id {
            if requested != state.chain_id {
                return Err(SimulationError::ChainIdMismatch {
                    requested,
                    active: state.chain_id,
                });
            }
        }

        let mut plan = OverlayPlan::from_state(state);
        let nonce = match request.nonce {
            Some(nonce) => nonce,
            None => self.get_simulated_transaction_count(state, from, abort).await?,
        };
        let (mut tx, engine_filled_fees) = build_transaction(request, state, nonce)?;

        let engine_filled_gas = request.gas.is_none();
        let mut predicted_revert = None;
        if engine_filled_gas {
            let mut call = call_request_for(&tx, from);
            call.gas_price = None;
            call.max_fee_per_gas = None;
            call.max_priority_fee_per_gas = None;
            call.nonce = None;
            let estimate = estimate_gas(&self.client, &plan, call, abort).await?;
            if let Some(reason) = estimate.revert_reason() {
                info!(%from, reason, "Gas estimation predicts a revert, previewing with block gas limit");
                predicted_revert = Some(reason.to_string());
            }
            tx.set_gas_limit(estimate.gas_limit(state.anchor_gas_limit));
        }

        let preview = mock_sign_transaction(tx, from, true)?;
        let pre_simulation = PreSimulationTransaction {
            preview,
            website: submission.website,
            created: submission.created,
            transaction_identifier: PreSimulationTransaction::identifier_for(&submission.original_request),
            original_request: submission.request,
            engine_filled_fees,
            engine_filled_gas,
            predicted_revert,
            expected_nonce: None,
        };
        debug!(
            id = %pre_simulation.transaction_identifier,
            hash = %pre_simulation.preview.hash(),
            nonce,
            "Appending transaction to overlay"
        );

        match plan.blocks.last_mut() {
            Some(block) if !submission.new_block => block.transactions.push(pre_simulation),
            _ => plan.blocks.push(PlannedBlock {
                transactions: vec![pre_simulation],
                time_increase_delta: self.settings.block_time_secs,
                ..Default::default()
            }),
        }

        self.resimulate(state, plan, abort).await
    }

    /// Drop a transaction and re-simulate what is left. Later transactions
    /// from the same sender move down a nonce.
    pub async fn remove_transaction(
        &self,
        state: &SimulationState,
        identifier: B256,
        abort: Option<&AbortSignal>,
    ) -> Result<SimulationState, SimulationError> {
        let mut plan = OverlayPlan::from_state(state);
        let mut removed = false;
        for block in &mut plan.blocks {
            let before = block.transactions.len();
            block
                .transactions
                .retain(|tx| tx.transaction_identifier != identifier);
            removed |= block.transactions.len() != before;
        }
        if !removed {
            return Err(SimulationError::UnknownTransaction(identifier));
        }
        plan.blocks.retain(|block| {
            !block.transactions.is_empty()
                || !block.signed_messages.is_empty()
                || !block.state_overrides.is_empty()
        });
        self.resimulate(state, plan, abort).await
    }

    /// Record a signature request in the last block. Messages do not change
    /// execution, so nothing is re-simulated.
    pub async fn append_signed_message(
        &self,
        state: &SimulationState,
        mut message: SignedMessage,
        abort: Option<&AbortSignal>,
    ) -> Result<SimulationState, SimulationError> {
        let ctx = ProtectorContext {
            state,
            client: &self.client,
            abort,
        };
        message.quarantine_codes = self.protectors.inspect_message(&message, &ctx).await?;

        let mut next = state.clone();
        match next.blocks.last_mut() {
            Some(block) => block.signed_messages.push(message),
            None => next.blocks.push(SimulatedBlock {
                signed_messages: vec![message],
                time_increase_delta: self.settings.block_time_secs,
                ..Default::default()
            }),
        }
        next.simulation_conducted_at = Utc::now();
        Ok(next)
    }

    /// Re-anchor the overlay on `anchor`. Transactions whose nonce the chain
    /// has already used are dropped, as they were mined or replaced.
    pub async fn rebase(
        &self,
        state: &SimulationState,
        anchor: &BlockHeader,
        abort: Option<&AbortSignal>,
    ) -> Result<SimulationState, SimulationError> {
        let base = SimulationState::empty(anchor, state.chain_id);
        let mut plan = OverlayPlan::from_state(state);
        plan.anchor_block_number = base.anchor_block_number;
        plan.anchor_timestamp = base.anchor_timestamp;
        plan.anchor_base_fee_per_gas = base.anchor_base_fee_per_gas;
        plan.anchor_gas_limit = base.anchor_gas_limit;
        plan.anchor_gas_used = base.anchor_gas_used;

        let nonces = self.real_nonces(&plan, abort).await?;
        let mut dropped = 0usize;
        for block in &mut plan.blocks {
            block.transactions.retain(|tx| {
                let stale = match (tx.preview.nonce(), nonces.get(&tx.from())) {
                    (Some(nonce), Some(real)) => nonce < *real,
                    _ => false,
                };
                dropped += stale as usize;
                !stale
            });
        }
        info!(
            from = state.anchor_block_number,
            to = anchor.number,
            dropped,
            "Rebasing overlay"
        );

        self.resimulate_with_nonces(&base, plan, nonces, abort).await
    }

    /// Same anchor, empty overlay.
    pub fn reset(&self, state: &SimulationState) -> SimulationState {
        SimulationState {
            blocks: Vec::new(),
            simulation_conducted_at: Utc::now(),
            ..state.clone()
        }
    }

    /// Preview the proposal a simulated vote is for.
    pub async fn simulate_governance_vote(
        &self,
        state: &SimulationState,
        identifier: B256,
        abort: Option<&AbortSignal>,
    ) -> Result<GovernanceSimulation, GovernanceError> {
        let vote = state
            .find_transaction(identifier)
            .ok_or(SimulationError::UnknownTransaction(identifier))?;
        simulate_vote_execution(&self.client, state, vote, abort).await
    }

    // ── Re-simulation ───────────────────────────────────────────

    async fn real_nonces(&self, plan: &OverlayPlan, abort: Option<&AbortSignal>) -> Result<NonceBase, SimulationError> {
        let senders: BTreeSet<Address> = plan.transactions().map(|tx| tx.from()).collect();
        let mut nonces = BTreeMap::new();
        for sender in senders {
            let nonce = self
                .client
                .get_transaction_count(sender, BlockTag::Number(plan.anchor_block_number), abort)
                .await?;
            nonces.insert(sender, nonce);
        }
        Ok(nonces)
    }

    async fn resimulate(
        &self,
        base: &SimulationState,
        plan: OverlayPlan,
        abort: Option<&AbortSignal>,
    ) -> Result<SimulationState, SimulationError> {
        let nonces = self.real_nonces(&plan, abort).await?;
        self.resimulate_with_nonces(base, plan, nonces, abort).await
    }

    /// Reprice, simulate, fix nonces (re-simulating once if needed) and run
    /// the protectors. `base` supplies the anchor and chain id.
    async fn resimulate_with_nonces(
        &self,
        base: &SimulationState,
        mut plan: OverlayPlan,
        nonces: NonceBase,
        abort: Option<&AbortSignal>,
    ) -> Result<SimulationState, SimulationError> {
        reprice(&mut plan)?;
        let mut blocks = simulate_plan(&self.client, &plan, abort).await?;

        if fix_nonces(&mut plan, &nonces)? {
            info!("Overlay nonces were out of order, re-simulating");
            reprice(&mut plan)?;
            blocks = simulate_plan(&self.client, &plan, abort).await?;
            let fresh = self.real_nonces(&plan, abort).await?;
            let stale = nonce_mismatches(&plan, &fresh);
            if stale > 0 {
                warn!(stale, "Chain nonces moved during re-simulation, leaving overlay nonces as simulated");
            }
        }
        // pinned-nonce mismatches are recorded on the plan after `blocks` was produced
        let simulated = blocks.iter_mut().flat_map(|block| block.simulated_transactions.iter_mut());
        for (simulated, planned) in simulated.zip(plan.transactions()) {
            simulated.pre_simulation.expected_nonce = planned.expected_nonce;
        }

        let mut next = SimulationState {
            blocks,
            simulation_conducted_at: Utc::now(),
            ..base.clone()
        };
        self.run_protectors(&mut next, abort).await?;
        Ok(next)
    }

    async fn run_protectors(&self, state: &mut SimulationState, abort: Option<&AbortSignal>) -> Result<(), SimulationError> {
        let mut verdicts = Vec::new();
        {
            let ctx = ProtectorContext {
                state: &*state,
                client: &self.client,
                abort,
            };
            for tx in state.transactions() {
                verdicts.push(self.protectors.inspect_transaction(tx, &ctx).await?);
            }
        }
        let targets = state
            .blocks
            .iter_mut()
            .flat_map(|block| block.simulated_transactions.iter_mut());
        for (tx, codes) in targets.zip(verdicts) {
            tx.quarantine_codes = codes;
        }
        Ok(())
    }
}

/// Turn a validated request into an unsigned transaction. Returns whether
/// the fees were chosen by us.
fn build_transaction(
    request: &TransactionRequest,
    state: &SimulationState,
    nonce: u64,
) -> Result<(UnsignedTransaction, bool), SimulationError> {
    let chain_id = state.chain_id;
    let engine_filled_fees = request.gas_price.is_none() && request.max_fee_per_gas.is_none();
    let next_base_fee = state
        .anchor_base_fee_per_gas
        .map(|fee| compute_next_base_fee(fee, state.anchor_gas_used, state.anchor_gas_limit));

    let tx_type = match request.tx_type {
        Some(t) => t,
        None if request.is_blob() => 3,
        None if request.max_fee_per_gas.is_some() => 2,
        None if request.gas_price.is_some() && request.access_list.is_some() => 1,
        None if request.gas_price.is_some() => 0,
        None if state.anchor_base_fee_per_gas.is_some() => 2,
        None => 0,
    };

    let priority = request.max_priority_fee_per_gas.unwrap_or(DEFAULT_PRIORITY_FEE);
    let fee_cap = || -> Result<U256, SimulationError> {
        match (request.max_fee_per_gas, next_base_fee) {
            (Some(max), _) => Ok(max),
            (None, Some(next)) => Ok(next.saturating_mul(U256::from(2)).saturating_add(priority)),
            (None, None) => Err(SimulationError::UnsupportedChainState(
                "This chain does not report a base fee, so fee-market transactions cannot be previewed.".into(),
            )),
        }
    };
    let gas_price = request
        .gas_price
        .unwrap_or_else(|| next_base_fee.unwrap_or_default().saturating_add(priority));

    let gas_limit = request.gas.unwrap_or(state.anchor_gas_limit);
    let value = request.value.unwrap_or_default();
    let input = request.calldata();
    let access_list = request.access_list.clone().unwrap_or_default();

    let tx = match tx_type {
        0 => UnsignedTransaction::Legacy(LegacyTransaction {
            chain_id: Some(chain_id),
            nonce,
            gas_price,
            gas_limit,
            to: request.to,
            value,
            input,
        }),
        1 => UnsignedTransaction::Eip2930(Eip2930Transaction {
            chain_id,
            nonce,
            gas_price,
            gas_limit,
            to: request.to,
            value,
            input,
            access_list,
        }),
        2 => UnsignedTransaction::Eip1559(Eip1559Transaction {
            chain_id,
            nonce,
            max_priority_fee_per_gas: priority,
            max_fee_per_gas: fee_cap()?,
            gas_limit,
            to: request.to,
            value,
            input,
            access_list,
        }),
        3 => UnsignedTransaction::Eip4844(Eip4844Transaction {
            chain_id,
            nonce,
            max_priority_fee_per_gas: priority,
            max_fee_per_gas: fee_cap()?,
            gas_limit,
            to: request
                .to
                .ok_or_else(|| SimulationError::Invariant("blob transaction without `to`".into()))?,
            value,
            input,
            access_list,
            max_fee_per_blob_gas: request.max_fee_per_blob_gas.unwrap_or(DEFAULT_PRIORITY_FEE),
            blob_versioned_hashes: request.blob_versioned_hashes.clone().unwrap_or_default(),
        }),
        other => {
            return Err(SimulationError::Invariant(format!(
                "transaction type {other} passed request validation"
            )))
        }
    };
    Ok((tx, engine_filled_fees))
}

/// Apply the base-fee rules to every transaction, re-signing the ones that
/// changed.
fn reprice(plan: &mut OverlayPlan) -> Result<(), SimulationError> {
    let anchor_fee = plan.anchor_base_fee_per_gas;
    let next_fee = anchor_fee.map(|fee| compute_next_base_fee(fee, plan.anchor_gas_used, plan.anchor_gas_limit));
    if anchor_fee.is_none() {
        if let Some(tx) = plan.transactions().find(|tx| tx.preview.transaction().is_fee_market()) {
            return Err(SimulationError::UnsupportedChainState(format!(
                "Transaction {} uses fee-market pricing but this chain reports no base fee.",
                tx.transaction_identifier
            )));
        }
    }
    for pre in plan.transactions_mut() {
        let mut tx = pre.preview.transaction().clone();
        adjust_fees(&mut tx, pre.engine_filled_fees, anchor_fee, next_fee);
        if &tx != pre.preview.transaction() {
            pre.preview = mock_sign_transaction(tx, pre.from(), true)?;
        }
    }
    Ok(())
}

/// Give every transaction the nonce it would get in execution order.
/// Returns whether anything changed; a correct plan is left untouched.
///
/// Nonces pinned by the request are kept. A pinned nonce that differs from
/// the sender's next one is recorded in `expected_nonce` instead.
pub fn fix_nonces(plan: &mut OverlayPlan, real: &BTreeMap<Address, u64>) -> Result<bool, SimulationError> {
    let mut next: BTreeMap<Address, u64> = real.clone();
    let mut changed = false;
    for pre in plan.transactions_mut() {
        let from = pre.from();
        let Some(expected) = next.get_mut(&from) else {
            return Err(SimulationError::Invariant(format!("no chain nonce for sender {from}")));
        };
        if pre.original_request.nonce.is_some() {
            pre.expected_nonce = (pre.preview.nonce() != Some(*expected)).then_some(*expected);
        } else if pre.preview.nonce() != Some(*expected) {
            debug!(
                id = %pre.transaction_identifier,
                had = ?pre.preview.nonce(),
                expected = *expected,
                "Rewriting overlay nonce"
            );
            let mut tx = pre.preview.transaction().clone();
            tx.set_nonce(*expected);
            pre.preview = mock_sign_transaction(tx, from, true)?;
            changed = true;
        }
        *expected += 1;
    }
    Ok(changed)
}

/// Engine-assigned nonces that no longer line up with `real`.
fn nonce_mismatches(plan: &OverlayPlan, real: &BTreeMap<Address, u64>) -> usize {
    let mut next = real.clone();
    let mut stale = 0;
    for pre in plan.transactions() {
        let Some(expected) = next.get_mut(&pre.from()) else {
            continue;
        };
        if pre.original_request.nonce.is_none() && pre.preview.nonce() != Some(*expected) {
            stale += 1;
        }
        *expected += 1;
    }
    stale
}
