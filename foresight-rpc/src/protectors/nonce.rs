use async_trait::async_trait;

use super::{Protector, ProtectorContext, QuarantineCode};
use crate::ethrpc::RpcError;
use crate::simulation::SimulatedTransaction;

/// Flags transactions whose request pinned a nonce out of sequence. Such a
/// transaction either replaces a pending one or waits behind a gap.
pub struct NonceProtector;

#[async_trait]
impl Protector for NonceProtector {
    fn name(&self) -> &'static str {
        "unexpected-nonce"
    }

    async fn inspect(
        &self,
        tx: &SimulatedTransaction,
        _ctx: &ProtectorContext<'_>,
    ) -> Result<Vec<QuarantineCode>, RpcError> {
        Ok(tx
            .pre_simulation
            .expected_nonce
            .map(|_| QuarantineCode::UnexpectedNonce)
            .into_iter()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use alloy_primitives::{Address, Bytes};

    use super::*;
    use crate::ethrpc::{EthRpcClient, RetryPolicy};
    use crate::test_utils::{anchor_state, simulated_transaction, ScriptedTransport};

    #[tokio::test]
    async fn test_flags_only_out_of_sequence_nonces() {
        let client = EthRpcClient::new(Arc::new(ScriptedTransport::new()), RetryPolicy::default());
        let state = anchor_state();
        let ctx = ProtectorContext {
            state: &state,
            client: &client,
            abort: None,
        };
        let mut tx = simulated_transaction(Address::repeat_byte(1), Some(Address::repeat_byte(2)), Bytes::new(), vec![]);
        assert!(NonceProtector.inspect(&tx, &ctx).await.unwrap().is_empty());

        tx.pre_simulation.expected_nonce = Some(3);
        assert_eq!(
            NonceProtector.inspect(&tx, &ctx).await.unwrap(),
            vec![QuarantineCode::UnexpectedNonce]
        );
    }
}
