use std::collections::BTreeSet;

use alloy_primitives::{Address, U256};
use async_trait::async_trait;

use super::{Protector, ProtectorContext, QuarantineCode};
use crate::ethrpc::RpcError;
use crate::simulation::tokens::{parse_token_events, TokenEvent};
use crate::simulation::SimulatedTransaction;

/// Addresses 0x01..=0x0a are precompiles: no code, but not accounts either.
fn is_precompile(address: Address) -> bool {
    address <= Address::with_last_byte(0x0a)
}

/// Flags approvals to, and calldata sent to, addresses without code.
///
/// Neither is ever useful: an externally owned account cannot execute
/// calldata, and allowances to one usually mean the user was told to
/// "approve" a scammer's wallet.
pub struct EoaProtector;

#[async_trait]
impl Protector for EoaProtector {
    fn name(&self) -> &'static str {
        "eoa"
    }

    async fn inspect(
        &self,
        tx: &SimulatedTransaction,
        ctx: &ProtectorContext<'_>,
    ) -> Result<Vec<QuarantineCode>, RpcError> {
        let mut codes = Vec::new();

        let spenders: BTreeSet<Address> = parse_token_events(&tx.call_result.logs)
            .into_iter()
            .filter_map(|event| match event {
                TokenEvent::Erc20Approval { spender, value, .. } if value > U256::ZERO => Some(spender),
                TokenEvent::Erc721Approval { approved, .. } => Some(approved),
                TokenEvent::ApprovalForAll { operator, approved: true, .. } => Some(operator),
                _ => None,
            })
            .filter(|spender| !is_precompile(*spender))
            .collect();
        for spender in spenders {
            if !ctx.has_code(spender).await? {
                codes.push(QuarantineCode::EoaApproval);
                break;
            }
        }

        let transaction = tx.pre_simulation.preview.transaction();
        if let Some(to) = transaction.to() {
            if !transaction.input().is_empty() && !is_precompile(to) && !ctx.has_code(to).await? {
                codes.push(QuarantineCode::EoaCalldata);
            }
        }
        Ok(codes)
    }
}
