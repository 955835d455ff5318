//! Heuristic risk checks run on every newly simulated transaction and
//! signed message.
//!
//! Each [`Protector`] is read-only: it looks at a simulation result and the
//! overlay it ran in, and reports zero or more [`QuarantineCode`]s. The
//! pipeline unions the codes so the order protectors run in never matters.

pub mod approvals;
pub mod eoa;
pub mod fee;
pub mod impersonation;
pub mod messages;
pub mod nonce;
pub mod tokens;

use std::collections::BTreeSet;

use alloy_primitives::Address;
use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, warn};

use crate::ethrpc::{AbortSignal, BlockTag, EthRpcClient, RpcError};
use crate::simulation::{SignedMessage, SimulatedTransaction, SimulationState};

/// Risk categories attached to a simulated transaction or message.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    derive_more::Display,
)]
pub enum QuarantineCode {
    #[display("grants an unlimited token allowance")]
    UnlimitedApproval,
    #[display("grants control over every NFT in a collection")]
    ApprovalForAll,
    #[display("grants an allowance to an address without code")]
    EoaApproval,
    #[display("sends calldata to an address without code")]
    EoaCalldata,
    #[display("sends tokens to a token contract")]
    Erc20UnintendedContract,
    #[display("interacts with a look-alike of a known address")]
    ContractImpersonation,
    #[display("pays an unusually high fee")]
    ExcessiveFee,
    #[display("uses a nonce other than the sender's next one")]
    UnexpectedNonce,
    #[display("signs a raw hash without knowing what it authorizes")]
    BlindHashSignature,
    #[display("signs an unlimited permit")]
    UnlimitedPermit,
    #[display("signs a permit for an address without code")]
    PermitToEoa,
    #[display("signature is bound to a different chain")]
    ChainIdMismatch,
    /// A protector could not finish, so other risks may be missing.
    #[display("could not be fully checked for risks")]
    InspectionIncomplete,
}

/// What a protector may look at besides the result itself.
pub struct ProtectorContext<'a> {
    pub state: &'a SimulationState,
    pub client: &'a EthRpcClient,
    pub abort: Option<&'a AbortSignal>,
}

impl ProtectorContext<'_> {
    /// Whether `address` has code, either at the anchor block or through a
    /// code override somewhere in the overlay.
    pub async fn has_code(&self, address: Address) -> Result<bool, RpcError> {
        let overridden = self.state.blocks.iter().any(|block| {
            block
                .state_overrides
                .get(&address)
                .and_then(|o| o.code.as_ref())
                .is_some_and(|code| !code.is_empty())
        });
        if overridden {
            return Ok(true);
        }
        let code = self
            .client
            .get_code(address, BlockTag::Number(self.state.anchor_block_number), self.abort)
            .await?;
        Ok(!code.is_empty())
    }
}

#[async_trait]
pub trait Protector: Send + Sync {
    fn name(&self) -> &'static str;

    async fn inspect(
        &self,
        tx: &SimulatedTransaction,
        ctx: &ProtectorContext<'_>,
    ) -> Result<Vec<QuarantineCode>, RpcError>;

    async fn inspect_message(
        &self,
        _message: &SignedMessage,
        _ctx: &ProtectorContext<'_>,
    ) -> Result<Vec<QuarantineCode>, RpcError> {
        Ok(Vec::new())
    }
}

pub struct ProtectorPipeline {
    protectors: Vec<Box<dyn Protector>>,
}

impl Default for ProtectorPipeline {
    fn default() -> Self {
        Self::default_set()
    }
}

impl ProtectorPipeline {
    pub fn new(protectors: Vec<Box<dyn Protector>>) -> Self {
        Self { protectors }
    }

    /// Every registered protector.
    pub fn default_set() -> Self {
        Self::new(vec![
            Box::new(approvals::ApprovalProtector),
            Box::new(eoa::EoaProtector),
            Box::new(tokens::TokenToContractProtector),
            Box::new(impersonation::ImpersonationProtector),
            Box::new(fee::ExcessiveFeeProtector::default()),
            Box::new(nonce::NonceProtector),
            Box::new(messages::MessageProtector),
        ])
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.protectors.iter().map(|p| p.name()).collect()
    }

    /// Union of every protector's codes for `tx`.
    ///
    /// An aborted lookup aborts the whole run. Any other failure is reported
    /// as [`QuarantineCode::InspectionIncomplete`].
    pub async fn inspect_transaction(
        &self,
        tx: &SimulatedTransaction,
        ctx: &ProtectorContext<'_>,
    ) -> Result<BTreeSet<QuarantineCode>, RpcError> {
        let mut codes = BTreeSet::new();
        for protector in &self.protectors {
            match protector.inspect(tx, ctx).await {
                Ok(found) => codes.extend(found),
                Err(RpcError::Aborted) => return Err(RpcError::Aborted),
                Err(e) => {
                    warn!(
                        protector = protector.name(),
                        tx = %tx.identifier(),
                        error = %e,
                        "Protector failed"
                    );
                    codes.insert(QuarantineCode::InspectionIncomplete);
                }
            }
        }
        if !codes.is_empty() {
            debug!(tx = %tx.identifier(), codes = ?codes, "Transaction quarantined");
        }
        Ok(codes)
    }

    pub async fn inspect_message(
        &self,
        message: &SignedMessage,
        ctx: &ProtectorContext<'_>,
    ) -> Result<BTreeSet<QuarantineCode>, RpcError> {
        let mut codes = BTreeSet::new();
        for protector in &self.protectors {
            match protector.inspect_message(message, ctx).await {
                Ok(found) => codes.extend(found),
                Err(RpcError::Aborted) => return Err(RpcError::Aborted),
                Err(e) => {
                    warn!(
                        protector = protector.name(),
                        message = %message.identifier,
                        error = %e,
                        "Protector failed on message"
                    );
                    codes.insert(QuarantineCode::InspectionIncomplete);
                }
            }
        }
        Ok(codes)
    }
}
