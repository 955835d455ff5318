//! Gas estimation against the overlay.

use alloy_primitives::Bytes;
use tracing::debug;

use super::multicall::{call_through_overlay, decode_revert, failure_reason, OverlayPlan};
use super::SimulationError;
use crate::ethrpc::{AbortSignal, BlockTag, CallRequest, EthRpcClient, RpcError};

/// Headroom over measured gas when estimating through `eth_simulateV1`, in
/// tenths.
const SIMULATED_GAS_MARGIN_TENTHS: u64 = 12;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GasEstimate {
    Estimated(u64),
    /// Execution reverts at every gas limit. The preview still runs, with
    /// the block gas limit, so the failure is shown.
    WouldRevert { reason: String, data: Bytes },
}

impl GasEstimate {
    /// Gas limit to put on the transaction.
    pub fn gas_limit(&self, block_gas_limit: u64) -> u64 {
        match self {
            GasEstimate::Estimated(gas) => *gas,
            GasEstimate::WouldRevert { .. } => block_gas_limit,
        }
    }

    pub fn revert_reason(&self) -> Option<&str> {
        match self {
            GasEstimate::Estimated(_) => None,
            GasEstimate::WouldRevert { reason, .. } => Some(reason),
        }
    }
}

fn revert_from_node_error(err: &RpcError) -> GasEstimate {
    let data = err.revert_data().unwrap_or_default();
    let reason = decode_revert(&data).unwrap_or_else(|| match err {
        RpcError::Node { message, .. } => message.clone(),
        other => other.to_string(),
    });
    GasEstimate::WouldRevert { reason, data }
}

/// Estimate gas for `call` on top of the overlay.
///
/// With nothing in the overlay this is a plain `eth_estimateGas` at the
/// anchor. Otherwise the call runs through `eth_simulateV1` after every
/// overlay block with the block gas limit, and the measured gas plus a
/// margin is used.
pub async fn estimate_gas(
    client: &EthRpcClient,
    plan: &OverlayPlan,
    mut call: CallRequest,
    abort: Option<&AbortSignal>,
) -> Result<GasEstimate, SimulationError> {
    if plan.is_empty() {
        call.gas = None;
        return match client
            .estimate_gas(&call, BlockTag::Number(plan.anchor_block_number), abort)
            .await
        {
            Ok(gas) => Ok(GasEstimate::Estimated(gas)),
            Err(err) if err.is_execution_revert() => {
                debug!(error = %err, "eth_estimateGas predicts a revert");
                Ok(revert_from_node_error(&err))
            }
            Err(err) => Err(err.into()),
        };
    }

    call.gas = Some(plan.anchor_gas_limit);
    let result = call_through_overlay(client, plan, call, abort).await?;
    if !result.succeeded() {
        return Ok(GasEstimate::WouldRevert {
            reason: failure_reason(&result),
            data: result.return_data,
        });
    }
    let padded = result
        .gas_used
        .saturating_mul(SIMULATED_GAS_MARGIN_TENTHS)
        / 10;
    Ok(GasEstimate::Estimated(padded.min(plan.anchor_gas_limit)))
}
