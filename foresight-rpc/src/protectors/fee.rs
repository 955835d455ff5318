use alloy_primitives::U256;
use async_trait::async_trait;

use super::{Protector, ProtectorContext, QuarantineCode};
use crate::ethrpc::RpcError;
use crate::simulation::SimulatedTransaction;

/// 0.05 native units.
pub const EXCESSIVE_FEE_WEI: U256 = U256::from_limbs([50_000_000_000_000_000, 0, 0, 0]);

/// Flags transactions whose fee exceeds a fixed threshold.
pub struct ExcessiveFeeProtector {
    threshold: U256,
}

impl Default for ExcessiveFeeProtector {
    fn default() -> Self {
        Self {
            threshold: EXCESSIVE_FEE_WEI,
        }
    }
}

impl ExcessiveFeeProtector {
    pub fn with_threshold(threshold: U256) -> Self {
        Self { threshold }
    }
}

#[async_trait]
impl Protector for ExcessiveFeeProtector {
    fn name(&self) -> &'static str {
        "excessive-fee"
    }

    async fn inspect(
        &self,
        tx: &SimulatedTransaction,
        _ctx: &ProtectorContext<'_>,
    ) -> Result<Vec<QuarantineCode>, RpcError> {
        Ok(if tx.fee() > self.threshold {
            vec![QuarantineCode::ExcessiveFee]
        } else {
            Vec::new()
        })
    }
}
