//! EIP-1559 base fee tracking across overlay blocks.

use alloy_primitives::U256;

use super::state::SimulationState;
use crate::wire::UnsignedTransaction;

pub const ELASTICITY_MULTIPLIER: u64 = 2;
pub const BASE_FEE_MAX_CHANGE_DENOMINATOR: u64 = 8;

/// 1 gwei.
pub const DEFAULT_PRIORITY_FEE: U256 = U256::from_limbs([1_000_000_000, 0, 0, 0]);

/// Base fee of the block following one with `base_fee` that used `gas_used`
/// out of `gas_limit`.
pub fn compute_next_base_fee(base_fee: U256, gas_used: u64, gas_limit: u64) -> U256 {
    let target = gas_limit / ELASTICITY_MULTIPLIER;
    if target == 0 || gas_used == target {
        return base_fee;
    }
    let denominator = U256::from(target) * U256::from(BASE_FEE_MAX_CHANGE_DENOMINATOR);
    if gas_used > target {
        let delta = base_fee.saturating_mul(U256::from(gas_used - target)) / denominator;
        base_fee.saturating_add(delta.max(U256::from(1)))
    } else {
        let delta = base_fee.saturating_mul(U256::from(target - gas_used)) / denominator;
        base_fee.saturating_sub(delta)
    }
}

/// Base fee of each overlay block given the gas every block consumed.
/// Block 0 follows the anchor; each later block follows the one before it.
/// `None` on chains without a base fee.
pub fn base_fee_schedule(
    anchor_base_fee: Option<U256>,
    anchor_gas_used: u64,
    gas_limit: u64,
    gas_used_per_block: &[u64],
) -> Vec<Option<U256>> {
    let Some(anchor_fee) = anchor_base_fee else {
        return vec![None; gas_used_per_block.len()];
    };
    let mut fees = Vec::with_capacity(gas_used_per_block.len());
    let mut fee = compute_next_base_fee(anchor_fee, anchor_gas_used, gas_limit);
    for index in 0..gas_used_per_block.len() {
        if index > 0 {
            fee = compute_next_base_fee(fee, gas_used_per_block[index - 1], gas_limit);
        }
        fees.push(Some(fee));
    }
    fees
}

/// Base fee of every block of a simulated overlay.
pub fn block_base_fees(state: &SimulationState) -> Vec<Option<U256>> {
    let used: Vec<u64> = state
        .blocks
        .iter()
        .map(|block| {
            block
                .simulated_transactions
                .iter()
                .map(|tx| tx.call_result.gas_used)
                .fold(0u64, u64::saturating_add)
        })
        .collect();
    base_fee_schedule(
        state.anchor_base_fee_per_gas,
        state.anchor_gas_used,
        state.anchor_gas_limit,
        &used,
    )
}

/// Base fee of the block right after the anchor.
pub fn next_base_fee(state: &SimulationState) -> Option<U256> {
    state
        .anchor_base_fee_per_gas
        .map(|fee| compute_next_base_fee(fee, state.anchor_gas_used, state.anchor_gas_limit))
}

/// Re-price a transaction against the current anchor.
///
/// Engine-filled fee-market fees are recomputed as `2 * next_base + priority`.
/// Whatever the origin, the fee cap is then lifted to at least the anchor
/// base fee so the transaction stays includable.
pub fn adjust_fees(
    tx: &mut UnsignedTransaction,
    engine_filled: bool,
    anchor_base_fee: Option<U256>,
    next_base_fee: Option<U256>,
) {
    if engine_filled {
        if let (Some(priority), Some(next)) = (tx.max_priority_fee_per_gas(), next_base_fee) {
            tx.set_max_fee_per_gas(next.saturating_mul(U256::from(2)).saturating_add(priority));
        }
    }
    if let Some(anchor) = anchor_base_fee {
        if tx.max_fee_per_gas() < anchor {
            tx.set_max_fee_per_gas(anchor);
        }
    }
}
