//! Simulation overlay engine.
//!
//! Pending transactions and signed messages are layered on top of a real
//! anchor block and executed through the node's `eth_simulateV1`. Nothing is
//! ever broadcast: every transaction is mock-signed into a
//! [`mock_signer::PreviewTransaction`], which has no raw encoding.

pub mod engine;
pub mod epoch;
pub mod fees;
pub mod gas;
pub mod governance;
pub mod mock_signer;
pub mod multicall;
pub mod state;
pub mod tokens;

pub use self::engine::{SimulationEngine, TransactionSubmission};
pub use self::epoch::{Epoch, EpochCounter, StateCell};
pub use self::gas::GasEstimate;
pub use self::governance::{GovernanceError, GovernanceSimulation};
pub use self::mock_signer::{mock_sign_transaction, mock_signer_address, PreviewTransaction};
pub use self::state::{
    CallResult, CallStatus, PreSimulationTransaction, SignableMessage, SignedMessage,
    SimulatedBlock, SimulatedTransaction, SimulationState, TokenBalance,
};

use alloy_primitives::B256;

use crate::ethrpc::RpcError;
use crate::wire::WireError;

#[derive(Debug, Clone, thiserror::Error)]
pub enum SimulationError {
    #[error(transparent)]
    Rpc(#[from] RpcError),

    #[error(transparent)]
    Wire(#[from] WireError),

    /// The chain cannot support the requested preview, e.g. a fee-market
    /// transaction on a chain without a base fee.
    #[error("unsupported chain state: {0}")]
    UnsupportedChainState(String),

    #[error("transaction is for chain {requested} but the active chain is {active}")]
    ChainIdMismatch { requested: u64, active: u64 },

    #[error("no simulated transaction with identifier {0}")]
    UnknownTransaction(B256),

    #[error("simulation invariant violated: {0}")]
    Invariant(String),
}

impl SimulationError {
    pub fn is_aborted(&self) -> bool {
        matches!(self, SimulationError::Rpc(RpcError::Aborted))
    }

    /// Message suitable for showing to the user.
    pub fn user_message(&self) -> String {
        match self {
            SimulationError::UnsupportedChainState(message) => message.clone(),
            SimulationError::ChainIdMismatch { requested, active } => format!(
                "This transaction targets chain {requested}, but the wallet is connected to chain {active}."
            ),
            SimulationError::Rpc(RpcError::Transient(_)) => {
                "The RPC node could not be reached. Try again shortly.".into()
            }
            SimulationError::Rpc(RpcError::Node { message, .. }) => {
                format!("The RPC node rejected the simulation: {message}")
            }
            SimulationError::Rpc(RpcError::Aborted) => "Simulation was cancelled.".into(),
            SimulationError::UnknownTransaction(_) => {
                "The transaction is no longer part of the simulation.".into()
            }
            SimulationError::Rpc(RpcError::Protocol(_))
            | SimulationError::Wire(_)
            | SimulationError::Invariant(_) => "Unknown error occurred".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_messages() {
        let unsupported = SimulationError::UnsupportedChainState("No base fee on this chain.".into());
        assert_eq!(unsupported.user_message(), "No base fee on this chain.");
        assert_eq!(
            SimulationError::Invariant("x".into()).user_message(),
            "Unknown error occurred"
        );
        assert!(SimulationError::Rpc(RpcError::Aborted).is_aborted());
        assert!(SimulationError::ChainIdMismatch { requested: 5, active: 1 }
            .user_message()
            .contains("chain 5"));
    }
}
