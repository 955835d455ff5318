//! Preview of what a GovernorBravo proposal does once executed.
//!
//! Given a simulated vote, the proposal's actions are read through the
//! overlay and replayed from the timelock in a block `delay` seconds later.

use std::collections::BTreeMap;

use alloy_primitives::{keccak256, Address, Bytes, U256};
use alloy_sol_types::{sol, SolCall};
use serde::Serialize;
use tracing::info;

use super::multicall::{call_through_overlay, failure_reason, query_after_overlay, OverlayPlan, QueryBlock};
use super::state::{SimulatedTransaction, SimulationState};
use super::tokens::{parse_token_events, TokenEvent};
use super::SimulationError;
use crate::ethrpc::{AbortSignal, AccountOverride, CallRequest, EthRpcClient, Log};

sol! {
    interface IGovernorBravo {
        function castVote(uint256 proposalId, uint8 support) external;
        function castVoteWithReason(uint256 proposalId, uint8 support, string reason) external;
        function castVoteBySig(uint256 proposalId, uint8 support, uint8 v, bytes32 r, bytes32 s) external;
        function getActions(uint256 proposalId) external view returns (
            address[] targets,
            uint256[] values,
            string[] signatures,
            bytes[] calldatas
        );
        function timelock() external view returns (address timelockAddress);
    }

    interface ITimelock {
        function delay() external view returns (uint256 delaySeconds);
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GovernanceError {
    /// The transaction is not a GovernorBravo vote we know how to decode.
    #[error("transaction does not match the GovernorBravo vote ABI")]
    MissingAbi,

    #[error("{0}")]
    Other(String),

    #[error(transparent)]
    Simulation(#[from] SimulationError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposalAction {
    pub target: Address,
    pub value: U256,
    pub signature: String,
    pub calldata: Bytes,
}

impl ProposalAction {
    /// Calldata as the timelock sends it: the selector of `signature`
    /// prepended when a signature is given.
    pub fn call_data(&self) -> Bytes {
        if self.signature.is_empty() {
            return self.calldata.clone();
        }
        let mut data = keccak256(self.signature.as_bytes())[..4].to_vec();
        data.extend_from_slice(&self.calldata);
        Bytes::from(data)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionOutcome {
    pub action: ProposalAction,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    pub gas_used: u64,
    pub logs: Vec<Log>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GovernanceSimulation {
    pub governor: Address,
    pub proposal_id: U256,
    pub support: u8,
    pub timelock: Address,
    pub delay: u64,
    pub outcomes: Vec<ActionOutcome>,
}

impl GovernanceSimulation {
    pub fn all_succeeded(&self) -> bool {
        self.outcomes.iter().all(|outcome| outcome.success)
    }

    /// ERC-20 transfers emitted by the execution.
    pub fn token_events(&self) -> Vec<TokenEvent> {
        self.outcomes
            .iter()
            .flat_map(|outcome| parse_token_events(&outcome.logs))
            .collect()
    }
}

/// `(proposalId, support)` of a vote call.
pub fn decode_vote(input: &[u8]) -> Result<(U256, u8), GovernanceError> {
    let selector: [u8; 4] = input
        .get(..4)
        .and_then(|s| s.try_into().ok())
        .ok_or(GovernanceError::MissingAbi)?;
    let bad = |e: alloy_sol_types::Error| GovernanceError::Other(format!("malformed vote: {e}"));
    match selector {
        IGovernorBravo::castVoteCall::SELECTOR => {
            let call = IGovernorBravo::castVoteCall::abi_decode(input, true).map_err(bad)?;
            Ok((call.proposalId, call.support))
        }
        IGovernorBravo::castVoteWithReasonCall::SELECTOR => {
            let call = IGovernorBravo::castVoteWithReasonCall::abi_decode(input, true).map_err(bad)?;
            Ok((call.proposalId, call.support))
        }
        IGovernorBravo::castVoteBySigCall::SELECTOR => {
            let call = IGovernorBravo::castVoteBySigCall::abi_decode(input, true).map_err(bad)?;
            Ok((call.proposalId, call.support))
        }
        _ => Err(GovernanceError::MissingAbi),
    }
}

async fn read<C: SolCall>(
    client: &EthRpcClient,
    plan: &OverlayPlan,
    to: Address,
    call: C,
    abort: Option<&AbortSignal>,
) -> Result<C::Return, GovernanceError> {
    let request = CallRequest {
        to: Some(to),
        input: Some(Bytes::from(call.abi_encode())),
        ..Default::default()
    };
    let result = call_through_overlay(client, plan, request, abort).await?;
    if !result.succeeded() {
        return Err(GovernanceError::Other(format!(
            "{} reverted: {}",
            C::SIGNATURE,
            failure_reason(&result)
        )));
    }
    C::abi_decode_returns(&result.return_data, true)
        .map_err(|e| GovernanceError::Other(format!("{} returned malformed data: {e}", C::SIGNATURE)))
}

/// Replay the proposal behind a simulated vote.
pub async fn simulate_vote_execution(
    client: &EthRpcClient,
    state: &SimulationState,
    vote: &SimulatedTransaction,
    abort: Option<&AbortSignal>,
) -> Result<GovernanceSimulation, GovernanceError> {
    let tx = vote.pre_simulation.preview.transaction();
    let governor = tx.to().ok_or(GovernanceError::MissingAbi)?;
    let (proposal_id, support) = decode_vote(tx.input())?;
    if !vote.call_result.succeeded() {
        return Err(GovernanceError::Other(
            "the vote itself fails, so its proposal cannot be previewed".into(),
        ));
    }

    let plan = OverlayPlan::from_state(state);
    let timelock = read(client, &plan, governor, IGovernorBravo::timelockCall {}, abort)
        .await?
        .timelockAddress;
    let actions = read(
        client,
        &plan,
        governor,
        IGovernorBravo::getActionsCall { proposalId: proposal_id },
        abort,
    )
    .await?;
    let delay = read(client, &plan, timelock, ITimelock::delayCall {}, abort)
        .await?
        .delaySeconds;
    let delay = u64::try_from(delay)
        .map_err(|_| GovernanceError::Other(format!("timelock delay {delay} is out of range")))?;

    let count = actions.targets.len();
    if actions.values.len() != count
        || actions.signatures.len() != count
        || actions.calldatas.len() != count
    {
        return Err(GovernanceError::Other(
            "proposal actions have mismatched lengths".into(),
        ));
    }
    let actions: Vec<ProposalAction> = actions
        .targets
        .into_iter()
        .zip(actions.values)
        .zip(actions.signatures)
        .zip(actions.calldatas)
        .map(|(((target, value), signature), calldata)| ProposalAction {
            target,
            value,
            signature,
            calldata,
        })
        .collect();

    let total_value = actions
        .iter()
        .fold(U256::ZERO, |sum, action| sum.saturating_add(action.value));
    let mut state_overrides = BTreeMap::new();
    if !total_value.is_zero() {
        state_overrides.insert(
            timelock,
            AccountOverride {
                balance: Some(total_value),
                ..Default::default()
            },
        );
    }
    let query = QueryBlock {
        state_overrides,
        calls: actions
            .iter()
            .map(|action| CallRequest {
                from: Some(timelock),
                to: Some(action.target),
                value: Some(action.value),
                input: Some(action.call_data()),
                gas: Some(state.anchor_gas_limit),
                ..Default::default()
            })
            .collect(),
        time_increase_delta: delay,
    };

    info!(
        %governor,
        proposal = %proposal_id,
        actions = actions.len(),
        delay,
        "Simulating proposal execution"
    );
    let results = query_after_overlay(client, &plan, &query, abort).await?;
    let outcomes = actions
        .into_iter()
        .zip(results)
        .map(|(action, result)| ActionOutcome {
            success: result.succeeded(),
            failure_reason: (!result.succeeded()).then(|| failure_reason(&result)),
            gas_used: result.gas_used,
            logs: result.logs,
            action,
        })
        .collect();

    Ok(GovernanceSimulation {
        governor,
        proposal_id,
        support,
        timelock,
        delay,
        outcomes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_cast_vote() {
        let input = IGovernorBravo::castVoteCall {
            proposalId: U256::from(42u64),
            support: 1,
        }
        .abi_encode();
        assert_eq!(decode_vote(&input).unwrap(), (U256::from(42u64), 1));
    }

    #[test]
    fn test_decode_cast_vote_with_reason() {
        let input = IGovernorBravo::castVoteWithReasonCall {
            proposalId: U256::from(7u64),
            support: 0,
            reason: "no".into(),
        }
        .abi_encode();
        assert_eq!(decode_vote(&input).unwrap(), (U256::from(7u64), 0));
    }

    #[test]
    fn test_unknown_selector_is_missing_abi() {
        assert!(matches!(decode_vote(&[0xde, 0xad, 0xbe, 0xef]), Err(GovernanceError::MissingAbi)));
        assert!(matches!(decode_vote(&[0x01]), Err(GovernanceError::MissingAbi)));
    }

    #[test]
    fn test_truncated_vote_is_other() {
        let mut input = IGovernorBravo::castVoteCall {
            proposalId: U256::from(1u64),
            support: 1,
        }
        .abi_encode();
        input.truncate(20);
        assert!(matches!(decode_vote(&input), Err(GovernanceError::Other(_))));
    }

    #[test]
    fn test_action_calldata_with_signature() {
        let action = ProposalAction {
            target: Address::repeat_byte(1),
            value: U256::ZERO,
            signature: "transfer(address,uint256)".into(),
            calldata: Bytes::from(vec![0xaa; 64]),
        };
        let data = action.call_data();
        assert_eq!(&data[..4], &[0xa9, 0x05, 0x9c, 0xbb]);
        assert_eq!(data.len(), 68);

        let raw = ProposalAction {
            signature: String::new(),
            ..action
        };
        assert_eq!(raw.call_data().len(), 64);
    }
}
