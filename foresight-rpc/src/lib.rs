//! Foresight RPC Proxy: previews what a wallet request will do before the
//! user signs it.
//!
//! The proxy:
//!   1. Intercepts `eth_sendTransaction`, `eth_sendRawTransaction` and the
//!      signing methods
//!   2. Layers the request on a simulation overlay anchored at the latest block
//!   3. Runs the protectors over the result and raises quarantine codes
//!   4. Waits for the user's decision and forwards approved requests
//!
//! ## Architecture
//!
//! ```text
//! Wallet / dapp
//!    │
//!    ▼
//! router ─▶ rpc ─▶ confirmation queue
//!            │
//!            ▼
//!         context ─▶ simulation engine ─▶ protectors
//!                          │
//!                          ▼
//!                    ethrpc client ─▶ upstream node (eth_simulateV1)
//! ```

pub mod config;
pub mod confirmation;
pub mod context;
pub mod ethrpc;
pub mod metadata;
pub mod protectors;
pub mod requests;
pub mod router;
pub mod rpc;
pub mod simulation;
pub mod typed_data;
pub mod types;
pub mod visualize;
pub mod wire;

#[cfg(test)]
mod test_utils;
