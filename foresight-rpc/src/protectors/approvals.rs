use alloy_primitives::U256;
use async_trait::async_trait;

use super::{Protector, ProtectorContext, QuarantineCode};
use crate::ethrpc::RpcError;
use crate::simulation::tokens::{parse_token_events, TokenEvent};
use crate::simulation::SimulatedTransaction;

/// Allowances at or above 2^96 - 1 are treated as unlimited. Wallets and
/// dapps that mean "infinite" rarely use exactly `U256::MAX`.
pub const UNLIMITED_APPROVAL_THRESHOLD: U256 = U256::from_limbs([u64::MAX, u32::MAX as u64, 0, 0]);

/// Flags unlimited ERC-20 allowances and `setApprovalForAll(…, true)`.
pub struct ApprovalProtector;

#[async_trait]
impl Protector for ApprovalProtector {
    fn name(&self) -> &'static str {
        "approvals"
    }

    async fn inspect(
        &self,
        tx: &SimulatedTransaction,
        _ctx: &ProtectorContext<'_>,
    ) -> Result<Vec<QuarantineCode>, RpcError> {
        let codes = parse_token_events(&tx.call_result.logs)
            .into_iter()
            .filter_map(|event| match event {
                TokenEvent::Erc20Approval { value, .. } if value >= UNLIMITED_APPROVAL_THRESHOLD => {
                    Some(QuarantineCode::UnlimitedApproval)
                }
                TokenEvent::ApprovalForAll { approved: true, .. } => {
                    Some(QuarantineCode::ApprovalForAll)
                }
                _ => None,
            })
            .collect();
        Ok(codes)
    }
}
