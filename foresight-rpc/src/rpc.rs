//! JSON-RPC handler: intercepts send and sign methods for confirmation and
//! passes everything else through to the upstream node.

use alloy_primitives::{keccak256, Address};
use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::confirmation::{PendingPayload, PendingState, Resolution};
use crate::context::{EngineContext, Mutation};
use crate::requests::{parse_intercepted, InterceptedRequest, TransactionRequest};
use crate::simulation::{
    PreSimulationTransaction, SignableMessage, SignedMessage, SimulationError, TransactionSubmission,
};
use crate::types::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, INTERNAL_ERROR};
use crate::wire::{SignedTransaction, UnsignedTransaction};

/// Origin used when the caller sends no `Origin` header.
pub const UNKNOWN_WEBSITE: &str = "unknown";

/// Handle an incoming JSON-RPC request.
pub async fn handle_rpc(ctx: &EngineContext, req: JsonRpcRequest, website: &str) -> JsonRpcResponse {
    info!(method = %req.method, website, "RPC request received");

    let intercepted = match parse_intercepted(&req.method, &req.params) {
        Ok(Some(intercepted)) => intercepted,
        Ok(None) => return proxy_to(ctx, &ctx.config.upstream_rpc_url, &req).await,
        Err(e) => {
            warn!(method = %req.method, error = %e, "Rejecting malformed request");
            return JsonRpcResponse::error(req.id, e.code(), e.to_string());
        }
    };

    let forward_to = match intercepted {
        InterceptedRequest::SendRawTransaction { .. } => ctx.config.upstream_rpc_url.clone(),
        _ => ctx.config.signer_rpc_url.clone(),
    };
    let payload = pending_payload(intercepted, &req, website);
    let ticket = ctx.confirmations.admit(&req.method, website, payload.clone()).await;
    let id = ticket.id;

    set_state(ctx, id, PendingState::Simulating);
    let mutation = match &payload {
        PendingPayload::Transaction(submission) => Mutation::Append(submission.clone()),
        PendingPayload::Message(message) => Mutation::AppendMessage(message.clone()),
    };
    let simulated = match ctx.apply(mutation).await {
        Ok(state) => {
            set_state(ctx, id, PendingState::Simulated { state });
            true
        }
        Err(e) => {
            log_simulation_failure(&req.method, &e);
            set_state(
                ctx,
                id,
                PendingState::FailedToSimulate {
                    message: e.user_message(),
                },
            );
            false
        }
    };

    let resolution = ctx
        .confirmations
        .wait(ticket, ctx.engine.settings().confirmation_timeout)
        .await;
    match resolution {
        Resolution::Approved => {
            info!(id, method = %req.method, "Approved, forwarding to signer");
            let response = proxy_to(ctx, &forward_to, &req).await;
            ctx.confirmations.complete(id);
            response
        }
        Resolution::Rejected | Resolution::NoResponse => {
            if let (PendingPayload::Transaction(submission), true) = (&payload, simulated) {
                let identifier = PreSimulationTransaction::identifier_for(&submission.original_request);
                if let Err(e) = ctx.apply(Mutation::Remove(identifier)).await {
                    debug!(%identifier, error = %e, "Rejected transaction already left the overlay");
                }
            }
            JsonRpcResponse::user_rejected(req.id)
        }
    }
}

fn set_state(ctx: &EngineContext, id: u64, state: PendingState) {
    if let Err(e) = ctx.confirmations.set_state(id, state) {
        debug!(id, error = %e, "Confirmation closed before its state changed");
    }
}

fn log_simulation_failure(method: &str, err: &SimulationError) {
    match err {
        SimulationError::Rpc(rpc) if rpc.is_aborted() => debug!(method, "Simulation aborted"),
        SimulationError::Rpc(rpc) if rpc.is_transient() => warn!(method, error = %err, "Simulation failed"),
        _ => error!(method, error = %err, "Simulation failed"),
    }
}

/// Turn an intercepted request into what the confirmation shows. The
/// request id is part of the identifier so identical resubmissions stay
/// distinct.
fn pending_payload(intercepted: InterceptedRequest, req: &JsonRpcRequest, website: &str) -> PendingPayload {
    let created = Utc::now();
    let original_request = match &intercepted {
        InterceptedRequest::SendTransaction { original, .. } => format!("{}:{original}", req.id),
        _ => format!("{}:{}", req.id, req.params),
    };
    let identifier = keccak256(original_request.as_bytes());
    let message = move |from: Address, message: SignableMessage| SignedMessage {
        identifier,
        method: req.method.clone(),
        from,
        message,
        website: website.to_string(),
        created,
        quarantine_codes: Default::default(),
    };

    match intercepted {
        InterceptedRequest::SendTransaction { request, .. } => TransactionSubmission {
            request,
            website: website.to_string(),
            original_request,
            created,
            new_block: false,
        }
        .into(),
        InterceptedRequest::SendRawTransaction { transaction, from, .. } => TransactionSubmission {
            request: request_from_signed(&transaction, from),
            website: website.to_string(),
            original_request,
            created,
            new_block: false,
        }
        .into(),
        InterceptedRequest::PersonalSign { account, message: text } => {
            message(account, SignableMessage::PersonalSign { message: text }).into()
        }
        InterceptedRequest::EthSign { account, data } => message(account, SignableMessage::EthSign { data }).into(),
        InterceptedRequest::SignTypedData { account, typed_data, .. } => {
            message(account, SignableMessage::TypedData(typed_data)).into()
        }
        InterceptedRequest::SignTypedDataV1 { account, fields } => {
            message(account, SignableMessage::TypedDataV1 { fields }).into()
        }
    }
}

/// The request a decoded raw transaction would have been sent as.
pub fn request_from_signed(signed: &SignedTransaction, from: Address) -> TransactionRequest {
    let tx = &signed.transaction;
    let fee_market = tx.is_fee_market();
    let mut request = TransactionRequest {
        from: Some(from),
        to: tx.to(),
        gas: Some(tx.gas_limit()),
        gas_price: (!fee_market).then(|| tx.max_fee_per_gas()),
        max_fee_per_gas: fee_market.then(|| tx.max_fee_per_gas()),
        max_priority_fee_per_gas: tx.max_priority_fee_per_gas(),
        value: Some(tx.value()),
        data: Some(tx.input().clone()),
        nonce: tx.nonce(),
        chain_id: tx.chain_id(),
        tx_type: Some(u64::from(tx.tx_type())),
        access_list: tx.access_list().map(<[_]>::to_vec),
        ..Default::default()
    };
    if let UnsignedTransaction::Eip4844(blob) = tx {
        request.max_fee_per_blob_gas = Some(blob.max_fee_per_blob_gas);
        request.blob_versioned_hashes = Some(blob.blob_versioned_hashes.clone());
    }
    request
}

/// Forward a request to `url` and relay its answer under the caller's id.
async fn proxy_to(ctx: &EngineContext, url: &str, req: &JsonRpcRequest) -> JsonRpcResponse {
    match ctx.http.post(url).json(req).send().await {
        Ok(resp) => match resp.json::<serde_json::Value>().await {
            Ok(body) => match body.get("error") {
                Some(error) => match serde_json::from_value::<JsonRpcError>(error.clone()) {
                    Ok(error) => JsonRpcResponse::node_error(req.id.clone(), error),
                    Err(e) => JsonRpcResponse::error(
                        req.id.clone(),
                        INTERNAL_ERROR,
                        format!("Upstream error object malformed: {e}"),
                    ),
                },
                None => JsonRpcResponse::success(
                    req.id.clone(),
                    body.get("result").cloned().unwrap_or(serde_json::Value::Null),
                ),
            },
            Err(e) => JsonRpcResponse::error(req.id.clone(), INTERNAL_ERROR, format!("Upstream parse error: {e}")),
        },
        Err(e) => {
            warn!(url, error = %e, "Upstream unreachable");
            JsonRpcResponse::error(req.id.clone(), INTERNAL_ERROR, format!("Upstream connection error: {e}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use alloy_primitives::{Bytes, U256};
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::test_utils::engine_context;
    use crate::types::{INVALID_PARAMS, USER_REJECTED};
    use crate::wire::{Eip1559Transaction, LegacyTransaction, TxSignature};

    const ALICE: &str = "0x7e5f4552091a69125d5dfcb7b8c2659029395bdf";

    fn signed(tx: UnsignedTransaction) -> SignedTransaction {
        SignedTransaction::new(
            tx,
            TxSignature::YParity {
                y_parity: false,
                r: U256::from(1u64),
                s: U256::from(1u64),
            },
        )
    }

    fn context_for(server: &MockServer, timeout_secs: &str) -> Arc<EngineContext> {
        engine_context(&[
            ("FORESIGHT_UPSTREAM_RPC", server.uri().as_str()),
            ("FORESIGHT_CONFIRMATION_TIMEOUT_SECS", timeout_secs),
        ])
    }

    async fn wait_for_confirmation(ctx: &EngineContext) -> u64 {
        for _ in 0..200 {
            if let Some(item) = ctx.confirmations.list().into_iter().next() {
                if !matches!(item.state, PendingState::Crafting | PendingState::Simulating) {
                    return item.unique_request_identifier;
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("no confirmation appeared");
    }

    #[tokio::test]
    async fn test_read_methods_pass_through() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"method": "eth_blockNumber"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"jsonrpc": "2.0", "id": 99, "result": "0x10"})))
            .mount(&server)
            .await;
        let ctx = context_for(&server, "0");

        let resp = handle_rpc(&ctx, JsonRpcRequest::new(7, "eth_blockNumber", json!([])), UNKNOWN_WEBSITE).await;
        assert_eq!(resp.result, Some(json!("0x10")));
        assert_eq!(resp.id, json!(7));
        assert!(ctx.confirmations.is_empty());
    }

    #[tokio::test]
    async fn test_null_result_is_kept() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"jsonrpc": "2.0", "id": 1, "result": null})))
            .mount(&server)
            .await;
        let ctx = context_for(&server, "0");
        let resp = handle_rpc(
            &ctx,
            JsonRpcRequest::new(1, "eth_getTransactionReceipt", json!([format!("0x{}", "00".repeat(32))])),
            UNKNOWN_WEBSITE,
        )
        .await;
        let value = serde_json::to_value(&resp).unwrap();
        assert!(value.get("result").is_some());
        assert!(value["result"].is_null());
    }

    #[tokio::test]
    async fn test_upstream_error_passes_through() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0", "id": 1,
                "error": {"code": 3, "message": "execution reverted", "data": "0x08c379a0"}
            })))
            .mount(&server)
            .await;
        let ctx = context_for(&server, "0");
        let resp = handle_rpc(&ctx, JsonRpcRequest::new(1, "eth_call", json!([{}, "latest"])), UNKNOWN_WEBSITE).await;
        let error = resp.error.unwrap();
        assert_eq!(error.code, 3);
        assert_eq!(error.data, Some(json!("0x08c379a0")));
    }

    #[tokio::test]
    async fn test_malformed_signing_request_is_invalid_params() {
        let server = MockServer::start().await;
        let ctx = context_for(&server, "0");
        let resp = handle_rpc(
            &ctx,
            JsonRpcRequest::new(1, "eth_signTypedData_v4", json!([ALICE, "{\"types\": 5}"])),
            UNKNOWN_WEBSITE,
        )
        .await;
        assert_eq!(resp.error.unwrap().code, INVALID_PARAMS);
        assert!(ctx.confirmations.is_empty());
    }

    #[tokio::test]
    async fn test_approved_signature_is_forwarded() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"method": "personal_sign"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"jsonrpc": "2.0", "id": 3, "result": "0xsig"})))
            .mount(&server)
            .await;
        let ctx = context_for(&server, "0");

        let request = JsonRpcRequest::new(3, "personal_sign", json!(["0x68656c6c6f", ALICE]));
        let handler = {
            let ctx = ctx.clone();
            tokio::spawn(async move { handle_rpc(&ctx, request, "https://app.example").await })
        };
        let id = wait_for_confirmation(&ctx).await;
        let pending = ctx.confirmations.get(id).unwrap();
        assert_eq!(pending.website, "https://app.example");
        assert!(matches!(pending.state, PendingState::Simulated { .. }));
        assert_eq!(ctx.current_state().signed_messages().count(), 1);

        ctx.confirmations.resolve(id, Resolution::Approved).unwrap();
        let resp = handler.await.unwrap();
        assert_eq!(resp.result, Some(json!("0xsig")));
        assert!(ctx.confirmations.is_empty());
    }

    #[tokio::test]
    async fn test_rejected_transaction_leaves_overlay() {
        let server = MockServer::start().await;
        let ctx = context_for(&server, "0");
        // Simulation fails against the scripted node (no eth_simulateV1), so
        // the confirmation shows the failure and nothing is added.
        let request = JsonRpcRequest::new(
            4,
            "eth_sendTransaction",
            json!([{"from": ALICE, "to": ALICE, "value": "0x1", "gas": "0x5208"}]),
        );
        let handler = {
            let ctx = ctx.clone();
            tokio::spawn(async move { handle_rpc(&ctx, request, UNKNOWN_WEBSITE).await })
        };
        let id = wait_for_confirmation(&ctx).await;
        assert!(matches!(
            ctx.confirmations.get(id).unwrap().state,
            PendingState::FailedToSimulate { .. }
        ));
        ctx.confirmations.resolve(id, Resolution::Rejected).unwrap();
        let resp = handler.await.unwrap();
        assert_eq!(resp.error.unwrap().code, USER_REJECTED);
        assert_eq!(ctx.current_state().transaction_count(), 0);
    }

    #[tokio::test]
    async fn test_unanswered_request_times_out() {
        let server = MockServer::start().await;
        let ctx = context_for(&server, "1");
        let resp = handle_rpc(
            &ctx,
            JsonRpcRequest::new(5, "eth_sign", json!([ALICE, format!("0x{}", "ab".repeat(32))])),
            UNKNOWN_WEBSITE,
        )
        .await;
        assert_eq!(resp.error.unwrap().code, USER_REJECTED);
        assert!(ctx.confirmations.is_empty());
    }

    #[test]
    fn test_request_from_signed_fee_market() {
        let tx = UnsignedTransaction::Eip1559(Eip1559Transaction {
            chain_id: 1,
            nonce: 9,
            max_priority_fee_per_gas: U256::from(2u64),
            max_fee_per_gas: U256::from(50u64),
            gas_limit: 21_000,
            to: Some(Address::repeat_byte(2)),
            value: U256::from(1u64),
            input: Bytes::new(),
            access_list: Vec::new(),
        });
        let request = request_from_signed(&signed(tx), Address::repeat_byte(1));
        assert_eq!(request.max_fee_per_gas, Some(U256::from(50u64)));
        assert_eq!(request.gas_price, None);
        assert_eq!(request.nonce, Some(9));
        assert_eq!(request.tx_type, Some(2));
    }

    #[test]
    fn test_request_from_signed_legacy() {
        let tx = UnsignedTransaction::Legacy(LegacyTransaction {
            chain_id: Some(1),
            nonce: 0,
            gas_price: U256::from(7u64),
            gas_limit: 21_000,
            to: None,
            value: U256::ZERO,
            input: Bytes::from(vec![0x60]),
        });
        let request = request_from_signed(&signed(tx), Address::repeat_byte(1));
        assert_eq!(request.gas_price, Some(U256::from(7u64)));
        assert_eq!(request.max_priority_fee_per_gas, None);
        assert_eq!(request.to, None);
    }
}
