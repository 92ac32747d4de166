use {
    alloy_consensus::{Transaction, TxEnvelope, crypto::RecoveryError, transaction::SignerRecoverable},
    alloy_eips::eip2718::{Decodable2718, Eip2718Error},
    alloy_primitives::{Address, B256, Bytes, hex},
    thiserror::Error,
};

#[derive(Debug, Error)]
pub enum TxError {
    #[error("invalid raw transaction hex: {0}")]
    Hex(#[from] hex::FromHexError),
    #[error("failed to decode raw transaction: {0}")]
    Decode(#[from] Eip2718Error),
    #[error("failed to recover sender: {0}")]
    Sender(#[from] RecoveryError),
}

/// A raw transaction decoded far enough for routing decisions: gas and
/// calldata feed the protection predicate, the recovered sender feeds the
/// sanctions check, and the canonical hash replaces the tx-manager's bundle
/// hash in the response.
#[derive(Debug, Clone)]
pub struct DecodedTx {
    envelope: TxEnvelope,
}

impl DecodedTx {
    pub fn decode(raw_tx_hex: &str) -> Result<Self, TxError> {
        let raw: Bytes = raw_tx_hex.parse()?;
        let envelope = TxEnvelope::decode_2718(&mut raw.as_ref())?;
        Ok(Self { envelope })
    }

    pub fn gas_limit(&self) -> u64 {
        self.envelope.gas_limit()
    }

    pub fn calldata(&self) -> &[u8] {
        self.envelope.input()
    }

    pub fn hash(&self) -> B256 {
        *self.envelope.tx_hash()
    }

    pub fn recover_sender(&self) -> Result<Address, TxError> {
        Ok(self.envelope.recover_signer()?)
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        alloy_consensus::{SignableTransaction, TxLegacy},
        alloy_eips::eip2718::Encodable2718,
        alloy_primitives::{TxKind, U256, address},
        alloy_signer::SignerSync,
        alloy_signer_local::PrivateKeySigner,
    };

    fn signer() -> PrivateKeySigner {
        PrivateKeySigner::from_bytes(&B256::repeat_byte(0x42)).unwrap()
    }

    fn signed_raw_tx(gas_limit: u64, input: Vec<u8>) -> (String, TxEnvelope) {
        let signer = signer();
        let tx = TxLegacy {
            chain_id: Some(1),
            nonce: 7,
            gas_price: 30_000_000_000,
            gas_limit,
            to: TxKind::Call(address!("7f367cc41522ce07553e823bf3be79a889debe1b")),
            value: U256::ZERO,
            input: input.into(),
        };
        let signature = signer.sign_hash_sync(&tx.signature_hash()).unwrap();
        let envelope: TxEnvelope = tx.into_signed(signature).into();
        let raw = format!("0x{}", hex::encode(envelope.encoded_2718()));
        (raw, envelope)
    }

    #[test]
    fn decodes_gas_calldata_and_hash() {
        let calldata = vec![0xa9, 0x05, 0x9c, 0xbb, 0x01, 0x02];
        let (raw, envelope) = signed_raw_tx(60_000, calldata.clone());

        let tx = DecodedTx::decode(&raw).unwrap();
        assert_eq!(tx.gas_limit(), 60_000);
        assert_eq!(tx.calldata(), calldata.as_slice());
        assert_eq!(tx.hash(), *envelope.tx_hash());
    }

    #[test]
    fn recovers_the_signing_address() {
        let (raw, _) = signed_raw_tx(21_000, Vec::new());
        let tx = DecodedTx::decode(&raw).unwrap();
        assert_eq!(tx.recover_sender().unwrap(), signer().address());
    }

    #[test]
    fn rejects_garbage() {
        assert!(DecodedTx::decode("0x").is_err());
        assert!(DecodedTx::decode("0xzzzz").is_err());
        assert!(DecodedTx::decode("0xdeadbeef").is_err());
    }
}
