//! Placeholder signing for previews.
//!
//! Transactions are signed with the well-known key `0x…01` so they have a
//! real hash, but the signed form stays private to [`PreviewTransaction`].
//! There is no way to get raw bytes out of it, so a preview can never be
//! broadcast by accident.

use alloy_primitives::{address, Address, B256, U256};
use ethers::signers::LocalWallet;
use ethers::types::H256;

use super::SimulationError;
use crate::ethrpc::CallRequest;
use crate::wire::{SignedTransaction, TxSignature, UnsignedTransaction};

const MOCK_PRIVATE_KEY: &str = "0000000000000000000000000000000000000000000000000000000000000001";

/// Address of the placeholder key.
pub fn mock_signer_address() -> Address {
    address!("7E5F4552091A69125d5DfCb7b8C2659029395Bdf")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviewTransaction {
    signed: SignedTransaction,
    from: Address,
    hash: B256,
}

impl PreviewTransaction {
    /// The sender the simulation runs as. Differs from the recovered signer
    /// when impersonating.
    pub fn from(&self) -> Address {
        self.from
    }

    pub fn hash(&self) -> B256 {
        self.hash
    }

    pub fn transaction(&self) -> &UnsignedTransaction {
        &self.signed.transaction
    }

    pub fn nonce(&self) -> Option<u64> {
        self.signed.transaction.nonce()
    }

    /// Call object for `eth_simulateV1` / `eth_estimateGas`.
    pub fn to_call_request(&self) -> CallRequest {
        call_request_for(self.transaction(), self.from)
    }
}

/// Build a call object for `tx` sent by `from`.
pub fn call_request_for(tx: &UnsignedTransaction, from: Address) -> CallRequest {
    let mut request = CallRequest {
        from: Some(from),
        to: tx.to(),
        gas: Some(tx.gas_limit()),
        value: Some(tx.value()),
        input: Some(tx.input().clone()),
        nonce: tx.nonce(),
        chain_id: tx.chain_id(),
        access_list: tx.access_list().map(<[_]>::to_vec),
        ..Default::default()
    };
    match tx {
        UnsignedTransaction::Eip1559(_) | UnsignedTransaction::Eip4844(_) => {
            request.max_fee_per_gas = Some(tx.max_fee_per_gas());
            request.max_priority_fee_per_gas = tx.max_priority_fee_per_gas();
        }
        UnsignedTransaction::Legacy(_)
        | UnsignedTransaction::Eip2930(_)
        | UnsignedTransaction::Deposit(_) => {
            request.gas_price = Some(tx.max_fee_per_gas());
        }
    }
    if let UnsignedTransaction::Eip4844(blob) = tx {
        request.max_fee_per_blob_gas = Some(blob.max_fee_per_blob_gas);
        request.blob_versioned_hashes = Some(blob.blob_versioned_hashes.clone());
    }
    request
}

fn to_alloy_u256(value: ethers::types::U256) -> U256 {
    let mut bytes = [0u8; 32];
    value.to_big_endian(&mut bytes);
    U256::from_be_bytes(bytes)
}

/// Sign `tx` with the placeholder key.
///
/// `from` must be the placeholder address unless `impersonate` is set, in
/// which case the preview runs as `from` while carrying a placeholder
/// signature.
pub fn mock_sign_transaction(
    tx: UnsignedTransaction,
    from: Address,
    impersonate: bool,
) -> Result<PreviewTransaction, SimulationError> {
    if !impersonate && from != mock_signer_address() {
        return Err(SimulationError::Invariant(format!(
            "cannot mock-sign for {from} without impersonation"
        )));
    }
    let prehash = tx.signing_hash()?;
    let wallet: LocalWallet = MOCK_PRIVATE_KEY
        .parse()
        .map_err(|e| SimulationError::Invariant(format!("mock key: {e}")))?;
    let signature = wallet
        .sign_hash(H256::from(prehash.0))
        .map_err(|e| SimulationError::Invariant(format!("mock signing failed: {e}")))?;

    let y_parity = match signature.v {
        27 | 0 => false,
        28 | 1 => true,
        v => {
            return Err(SimulationError::Invariant(format!(
                "mock signer produced v = {v}"
            )))
        }
    };
    let signed = SignedTransaction::new(
        tx,
        TxSignature::YParity {
            y_parity,
            r: to_alloy_u256(signature.r),
            s: to_alloy_u256(signature.s),
        },
    );
    let hash = signed.hash()?;
    Ok(PreviewTransaction { signed, from, hash })
}

#[cfg(test)]
mod tests {
    use alloy_primitives::Bytes;
    use ethers::signers::Signer;

    use super::*;
    use crate::wire::{DepositTransaction, Eip1559Transaction, LegacyTransaction};

    fn transfer() -> UnsignedTransaction {
        UnsignedTransaction::Eip1559(Eip1559Transaction {
            chain_id: 1,
            nonce: 3,
            max_priority_fee_per_gas: U256::from(1u64),
            max_fee_per_gas: U256::from(100u64),
            gas_limit: 21_000,
            to: Some(Address::repeat_byte(0x22)),
            value: U256::from(5u64),
            input: Bytes::new(),
            access_list: Vec::new(),
        })
    }

    #[test]
    fn test_mock_address_matches_key() {
        let wallet: LocalWallet = MOCK_PRIVATE_KEY.parse().unwrap();
        assert_eq!(Address::from(wallet.address().0), mock_signer_address());
    }

    #[test]
    fn test_signature_recovers_to_mock_address() {
        let preview = mock_sign_transaction(transfer(), mock_signer_address(), false).unwrap();
        assert_eq!(preview.signed.recover_sender().unwrap(), mock_signer_address());
        assert_eq!(preview.from(), mock_signer_address());
        assert_eq!(preview.nonce(), Some(3));
    }

    #[test]
    fn test_other_sender_requires_impersonation() {
        let user = Address::repeat_byte(0x11);
        assert!(mock_sign_transaction(transfer(), user, false).is_err());

        let preview = mock_sign_transaction(transfer(), user, true).unwrap();
        assert_eq!(preview.from(), user);
        assert_eq!(preview.to_call_request().from, Some(user));
    }

    #[test]
    fn test_legacy_call_request_uses_gas_price() {
        let tx = UnsignedTransaction::Legacy(LegacyTransaction {
            chain_id: Some(1),
            nonce: 0,
            gas_price: U256::from(7u64),
            gas_limit: 21_000,
            to: None,
            value: U256::ZERO,
            input: Bytes::new(),
        });
        let preview = mock_sign_transaction(tx, mock_signer_address(), false).unwrap();
        let request = preview.to_call_request();
        assert_eq!(request.gas_price, Some(U256::from(7u64)));
        assert_eq!(request.max_fee_per_gas, None);
        assert_eq!(request.to, None);
    }

    #[test]
    fn test_hash_is_deterministic() {
        let a = mock_sign_transaction(transfer(), mock_signer_address(), false).unwrap();
        let b = mock_sign_transaction(transfer(), mock_signer_address(), false).unwrap();
        assert_eq!(a.hash(), b.hash());
    }

    #[test]
    fn test_deposit_cannot_be_mock_signed() {
        let deposit = UnsignedTransaction::Deposit(DepositTransaction {
            hash: B256::repeat_byte(1),
            source_hash: B256::repeat_byte(2),
            from: Address::repeat_byte(3),
            to: None,
            mint: None,
            value: U256::ZERO,
            gas_limit: 100_000,
            is_system_tx: false,
            input: Bytes::new(),
        });
        assert!(mock_sign_transaction(deposit, mock_signer_address(), false).is_err());
    }
}
