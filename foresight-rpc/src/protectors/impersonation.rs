use std::collections::BTreeSet;

use alloy_primitives::Address;
use async_trait::async_trait;

use super::{Protector, ProtectorContext, QuarantineCode};
use crate::ethrpc::RpcError;
use crate::simulation::tokens::{parse_token_events, TokenEvent, WELL_KNOWN_TOKENS};
use crate::simulation::SimulatedTransaction;

/// Hex digits compared at each end of an address. Wallets show about this
/// much, which is what address-poisoning attacks vanity-mine for.
const MATCHED_DIGITS: usize = 4;

/// Same leading and trailing hex digits, different address.
pub fn is_look_alike(a: Address, b: Address) -> bool {
    if a == b {
        return false;
    }
    let a = hex::encode(a);
    let b = hex::encode(b);
    a[..MATCHED_DIGITS] == b[..MATCHED_DIGITS]
        && a[a.len() - MATCHED_DIGITS..] == b[b.len() - MATCHED_DIGITS..]
}

/// Addresses a transaction sends to: the call target and ERC-20 recipients.
fn destinations(tx: &SimulatedTransaction) -> BTreeSet<Address> {
    let mut out: BTreeSet<Address> = tx.pre_simulation.preview.transaction().to().into_iter().collect();
    out.extend(
        parse_token_events(&tx.call_result.logs)
            .into_iter()
            .filter_map(|event| match event {
                TokenEvent::Erc20Transfer { to, .. } => Some(to),
                _ => None,
            }),
    );
    out.remove(&Address::ZERO);
    out
}

/// Flags interaction with an address that imitates a well-known token or an
/// address used earlier in the overlay.
pub struct ImpersonationProtector;

#[async_trait]
impl Protector for ImpersonationProtector {
    fn name(&self) -> &'static str {
        "impersonation"
    }

    async fn inspect(
        &self,
        tx: &SimulatedTransaction,
        ctx: &ProtectorContext<'_>,
    ) -> Result<Vec<QuarantineCode>, RpcError> {
        let mut known: BTreeSet<Address> = WELL_KNOWN_TOKENS.keys().copied().collect();
        for earlier in ctx.state.transactions_before(tx.identifier()) {
            known.extend(destinations(earlier));
        }

        let suspicious = destinations(tx)
            .into_iter()
            .any(|candidate| known.iter().any(|k| is_look_alike(candidate, *k)));
        Ok(if suspicious {
            vec![QuarantineCode::ContractImpersonation]
        } else {
            Vec::new()
        })
    }
}
