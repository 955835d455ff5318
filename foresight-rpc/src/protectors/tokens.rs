use async_trait::async_trait;

use super::{Protector, ProtectorContext, QuarantineCode};
use crate::ethrpc::RpcError;
use crate::simulation::tokens::{is_well_known_token, parse_token_events, TokenEvent};
use crate::simulation::SimulatedTransaction;

/// Flags ERC-20 transfers whose recipient is the token itself or another
/// well-known token. Those contracts cannot send the tokens back.
pub struct TokenToContractProtector;

#[async_trait]
impl Protector for TokenToContractProtector {
    fn name(&self) -> &'static str {
        "erc20-to-contract"
    }

    async fn inspect(
        &self,
        tx: &SimulatedTransaction,
        _ctx: &ProtectorContext<'_>,
    ) -> Result<Vec<QuarantineCode>, RpcError> {
        let sender = tx.from();
        let unintended = parse_token_events(&tx.call_result.logs)
            .into_iter()
            .any(|event| match event {
                TokenEvent::Erc20Transfer { token, from, to, .. } => {
                    from == sender && (to == token || is_well_known_token(to))
                }
                _ => false,
            });
        Ok(if unintended {
            vec![QuarantineCode::Erc20UnintendedContract]
        } else {
            Vec::new()
        })
    }
}
