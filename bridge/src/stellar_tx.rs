// Copyright (c) ThreeFold Tech
// SPDX-License-Identifier: Apache-2.0

//! Deterministic Stellar transaction envelopes.
//!
//! Every validator must produce a byte-identical envelope for the same
//! payout or refund so that signatures collected on tfchain all cover the
//! same hash. Determinism comes from: a fixed base fee, no preconditions,
//! the sequence number recorded on chain, and a memo derived from the burn
//! id or deposit hash alone.

use crate::encoding::{decode_account_id, XdrWriter};
use crate::error::{BridgeError, BridgeResult};
use fastcrypto::ed25519::{Ed25519KeyPair, Ed25519Signature};
use fastcrypto::encoding::{Base64, Encoding};
use fastcrypto::hash::{HashFunction, Sha256};
use fastcrypto::traits::{KeyPair, ToFromBytes};
use serde::{Deserialize, Serialize};

/// Flat fee in stroops, identical on every validator.
pub const BASE_FEE: u32 = 100;

const MEMO_TEXT_MAX: usize = 28;

// XDR union discriminants
const KEY_TYPE_ED25519: u32 = 0;
const PRECOND_NONE: u32 = 0;
const MEMO_NONE: u32 = 0;
const MEMO_TEXT: u32 = 1;
const MEMO_HASH: u32 = 3;
const OPERATION_TYPE_PAYMENT: u32 = 1;
const ASSET_TYPE_NATIVE: u32 = 0;
const ENVELOPE_TYPE_TX: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StellarNetwork {
    Public,
    Testnet,
}

impl StellarNetwork {
    pub fn passphrase(&self) -> &'static str {
        match self {
            StellarNetwork::Public => "Public Global Stellar Network ; September 2015",
            StellarNetwork::Testnet => "Test SDF Network ; September 2015",
        }
    }

    /// Network id: the SHA-256 of the network passphrase, mixed into every
    /// signature payload.
    pub fn network_id(&self) -> [u8; 32] {
        Sha256::digest(self.passphrase().as_bytes()).digest
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Memo {
    None,
    Text(String),
    Hash([u8; 32]),
}

impl Memo {
    /// Payout memo: the burn id rendered in decimal, reproducible by every
    /// validator.
    pub fn burn(id: u64) -> Memo {
        Memo::Text(id.to_string())
    }

    /// Refund memo: the originating deposit hash, typed as a hash memo so
    /// the monitor recognizes the acknowledgement coming back.
    pub fn refund(deposit_hash: &str) -> BridgeResult<Memo> {
        let bytes = hex::decode(deposit_hash)
            .map_err(|e| BridgeError::SerializationError(format!("memo hash: {e}")))?;
        let hash: [u8; 32] = bytes.try_into().map_err(|_| {
            BridgeError::SerializationError(format!(
                "memo hash {deposit_hash} is not 32 bytes"
            ))
        })?;
        Ok(Memo::Hash(hash))
    }

    fn encode(&self, w: &mut XdrWriter) -> BridgeResult<()> {
        match self {
            Memo::None => w.put_u32(MEMO_NONE),
            Memo::Text(text) => {
                if text.len() > MEMO_TEXT_MAX {
                    return Err(BridgeError::SerializationError(format!(
                        "memo text exceeds {MEMO_TEXT_MAX} bytes: {text}"
                    )));
                }
                w.put_u32(MEMO_TEXT);
                w.put_string(text);
            }
            Memo::Hash(hash) => {
                w.put_u32(MEMO_HASH);
                w.put_opaque_fixed(hash);
            }
        }
        Ok(())
    }
}

/// A signature with the public-key hint Stellar uses to match it to a
/// signer of the envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecoratedSignature {
    pub hint: [u8; 4],
    pub signature: Vec<u8>,
}

impl DecoratedSignature {
    /// Pair a raw signature with the signer's address. The hint is the last
    /// four bytes of the signer's ed25519 public key.
    pub fn new(signer_address: &str, signature: Vec<u8>) -> BridgeResult<Self> {
        let key = decode_account_id(signer_address)?;
        let mut hint = [0u8; 4];
        hint.copy_from_slice(&key[28..]);
        Ok(Self { hint, signature })
    }
}

/// A single-operation native payment from the custody account.
#[derive(Debug, Clone)]
pub struct PaymentEnvelope {
    pub network: StellarNetwork,
    /// custody account, raw ed25519 public key
    pub source: [u8; 32],
    /// payout target, raw ed25519 public key
    pub destination: [u8; 32],
    /// stroops
    pub amount: u64,
    pub sequence_number: i64,
    pub memo: Memo,
}

impl PaymentEnvelope {
    pub fn new(
        network: StellarNetwork,
        source_address: &str,
        destination_address: &str,
        amount: u64,
        sequence_number: i64,
        memo: Memo,
    ) -> BridgeResult<Self> {
        Ok(Self {
            network,
            source: decode_account_id(source_address)?,
            destination: decode_account_id(destination_address)?,
            amount,
            sequence_number,
            memo,
        })
    }

    fn encode_muxed_account(w: &mut XdrWriter, key: &[u8; 32]) {
        w.put_u32(KEY_TYPE_ED25519);
        w.put_opaque_fixed(key);
    }

    /// The Transaction (v1) body, without envelope framing or signatures.
    fn encode_tx(&self, w: &mut XdrWriter) -> BridgeResult<()> {
        Self::encode_muxed_account(w, &self.source);
        w.put_u32(BASE_FEE);
        w.put_i64(self.sequence_number);
        w.put_u32(PRECOND_NONE);
        self.memo.encode(w)?;
        // exactly one payment operation, no per-op source override
        w.put_u32(1);
        w.put_bool(false);
        w.put_u32(OPERATION_TYPE_PAYMENT);
        Self::encode_muxed_account(w, &self.destination);
        w.put_u32(ASSET_TYPE_NATIVE);
        w.put_i64(self.amount as i64);
        // ext
        w.put_u32(0);
        Ok(())
    }

    /// The hash every validator signs: SHA-256 over the network id, the
    /// envelope type tag and the transaction body.
    pub fn signature_payload(&self) -> BridgeResult<[u8; 32]> {
        let mut w = XdrWriter::new();
        w.put_opaque_fixed(&self.network.network_id());
        w.put_u32(ENVELOPE_TYPE_TX);
        self.encode_tx(&mut w)?;
        Ok(Sha256::digest(&w.into_bytes()).digest)
    }

    /// This validator's partial signature, hex encoded for on-chain storage.
    pub fn sign(&self, keypair: &Ed25519KeyPair) -> BridgeResult<String> {
        use fastcrypto::traits::Signer;
        let payload = self.signature_payload()?;
        let signature: Ed25519Signature = keypair.sign(&payload);
        Ok(hex::encode(signature.as_ref()))
    }

    /// Decorated signature for the local keypair, used when the validator
    /// itself assembles the final envelope.
    pub fn decorate_local(&self, keypair: &Ed25519KeyPair) -> BridgeResult<DecoratedSignature> {
        use fastcrypto::traits::Signer;
        let payload = self.signature_payload()?;
        let signature: Ed25519Signature = keypair.sign(&payload);
        let public = keypair.public().as_bytes();
        let mut hint = [0u8; 4];
        hint.copy_from_slice(&public[28..]);
        Ok(DecoratedSignature {
            hint,
            signature: signature.as_ref().to_vec(),
        })
    }

    /// Assemble the final envelope with the collected signatures, base64
    /// encoded for Horizon submission.
    pub fn envelope_base64(&self, signatures: &[DecoratedSignature]) -> BridgeResult<String> {
        let mut w = XdrWriter::new();
        w.put_u32(ENVELOPE_TYPE_TX);
        self.encode_tx(&mut w)?;
        w.put_u32(signatures.len() as u32);
        for sig in signatures {
            w.put_opaque_fixed(&sig.hint);
            w.put_opaque_var(&sig.signature);
        }
        Ok(Base64::encode(w.into_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::encode_account_id;
    use fastcrypto::traits::VerifyingKey;

    fn keypair(seed: u8) -> Ed25519KeyPair {
        use fastcrypto::ed25519::Ed25519PrivateKey;
        let secret = Ed25519PrivateKey::from_bytes(&[seed; 32]).unwrap();
        Ed25519KeyPair::from(secret)
    }

    fn envelope(memo: Memo) -> PaymentEnvelope {
        let source = encode_account_id(&[1u8; 32]);
        let dest = encode_account_id(&[2u8; 32]);
        PaymentEnvelope::new(StellarNetwork::Testnet, &source, &dest, 5_000_000, 17, memo)
            .unwrap()
    }

    #[test]
    fn test_envelope_is_deterministic() {
        let a = envelope(Memo::burn(42)).signature_payload().unwrap();
        let b = envelope(Memo::burn(42)).signature_payload().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_payload_distinguishes_memo_and_network() {
        let text = envelope(Memo::burn(42)).signature_payload().unwrap();
        let other = envelope(Memo::burn(43)).signature_payload().unwrap();
        assert_ne!(text, other);

        let mut on_public = envelope(Memo::burn(42));
        on_public.network = StellarNetwork::Public;
        assert_ne!(text, on_public.signature_payload().unwrap());
    }

    #[test]
    fn test_signature_verifies_against_payload() {
        let kp = keypair(9);
        let env = envelope(Memo::burn(7));
        let sig_hex = env.sign(&kp).unwrap();
        let sig =
            Ed25519Signature::from_bytes(&hex::decode(sig_hex).unwrap()).unwrap();
        let payload = env.signature_payload().unwrap();
        kp.public().verify(&payload, &sig).unwrap();
    }

    #[test]
    fn test_decorated_hint_is_key_tail() {
        let kp = keypair(5);
        let address = encode_account_id(kp.public().as_bytes().try_into().unwrap());
        let decorated = DecoratedSignature::new(&address, vec![0u8; 64]).unwrap();
        assert_eq!(&decorated.hint, &kp.public().as_bytes()[28..]);
    }

    #[test]
    fn test_refund_memo_requires_full_hash() {
        assert!(Memo::refund("abcd").is_err());
        assert!(Memo::refund("zz").is_err());
        let hash = hex::encode([0xabu8; 32]);
        assert_eq!(Memo::refund(&hash).unwrap(), Memo::Hash([0xabu8; 32]));
    }

    #[test]
    fn test_memo_text_length_guard() {
        let mut w = XdrWriter::new();
        let too_long = Memo::Text("x".repeat(29));
        assert!(too_long.encode(&mut w).is_err());
    }

    #[test]
    fn test_envelope_base64_varies_with_signatures() {
        let kp = keypair(3);
        let env = envelope(Memo::burn(1));
        let unsigned = env.envelope_base64(&[]).unwrap();
        let signed = env
            .envelope_base64(&[env.decorate_local(&kp).unwrap()])
            .unwrap();
        assert_ne!(unsigned, signed);
        assert!(!signed.is_empty());
    }
}
