// Copyright (c) ThreeFold Tech
// SPDX-License-Identifier: Apache-2.0

//! The wallet side of the bridge: custody account monitoring and the
//! multi-signature Stellar payment workflow. The core consumes the
//! [`BridgeWallet`] trait; [`StellarWallet`] is the Horizon-backed
//! implementation.

use crate::encoding::{decode_account_id, decode_secret_seed, encode_account_id};
use crate::error::{BridgeError, BridgeResult};
use crate::horizon::{HorizonClient, HorizonError, PaymentRecord, SubmitOutcome};
use crate::retry_with_max_elapsed_time;
use crate::stellar_tx::{DecoratedSignature, Memo, PaymentEnvelope, StellarNetwork};
use crate::types::{MemoKind, MintEvent, PaymentObservation, StellarSignature};
use async_trait::async_trait;
use fastcrypto::ed25519::{Ed25519KeyPair, Ed25519PrivateKey};
use fastcrypto::traits::{KeyPair, ToFromBytes};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const PAYMENT_PAGE_LIMIT: u32 = 100;
const MONITOR_POLL_INTERVAL: Duration = Duration::from_secs(10);
const MONITOR_MAX_RETRY: Duration = Duration::from_secs(60);
const MINT_CHANNEL_SIZE: usize = 64;

/// Stellar-side operations the transfer state machine depends on.
#[async_trait]
pub trait BridgeWallet: Send + Sync + 'static {
    /// Ordered, resumable stream of inbound custody-account deposits
    /// starting after `cursor`. The stream is single-consumer; dropping the
    /// receiver or cancelling the token halts the producer.
    async fn monitor_bridge_account(
        &self,
        cancel: CancellationToken,
        cursor: String,
    ) -> BridgeResult<mpsc::Receiver<MintEvent>>;

    /// Validate that `address` is a well-formed, existing payment target.
    async fn check_account(&self, address: &str) -> BridgeResult<()>;

    /// Partial signature over the payout envelope for burn `burn_id`.
    /// Returns the hex signature and the sequence number signed against.
    async fn create_payment_and_return_signature(
        &self,
        target: &str,
        amount: u64,
        burn_id: u64,
    ) -> BridgeResult<(String, i64)>;

    /// Partial signature over the refund envelope for deposit `tx_hash`.
    async fn create_refund_and_return_signature(
        &self,
        target: &str,
        amount: u64,
        tx_hash: &str,
    ) -> BridgeResult<(String, i64)>;

    /// Rebuild the payout envelope at the recorded sequence number, attach
    /// the collected signatures and submit it.
    async fn create_payment_with_signatures_and_submit(
        &self,
        target: &str,
        amount: u64,
        burn_id: u64,
        signatures: &[StellarSignature],
        sequence_number: i64,
    ) -> BridgeResult<()>;

    /// As above for a refund, with the hash memo of the original deposit.
    async fn create_refund_payment_with_signatures_and_submit(
        &self,
        target: &str,
        amount: u64,
        tx_hash: &str,
        signatures: &[StellarSignature],
        sequence_number: i64,
    ) -> BridgeResult<()>;

    /// This validator's Stellar address.
    fn address(&self) -> &str;
}

pub struct StellarWallet {
    horizon: HorizonClient,
    network: StellarNetwork,
    keypair: Ed25519KeyPair,
    /// strkey of this validator's signing key
    address: String,
    /// strkey of the shared custody account
    bridge_account: String,
}

impl StellarWallet {
    pub fn new(
        horizon_url: &str,
        network: StellarNetwork,
        secret_seed: &str,
        bridge_account: &str,
    ) -> BridgeResult<Self> {
        let seed = decode_secret_seed(secret_seed)?;
        let secret = Ed25519PrivateKey::from_bytes(&seed)
            .map_err(|e| BridgeError::Generic(format!("invalid stellar key material: {e}")))?;
        let keypair = Ed25519KeyPair::from(secret);
        let public: [u8; 32] = keypair
            .public()
            .as_bytes()
            .try_into()
            .expect("ed25519 public key is 32 bytes");
        let address = encode_account_id(&public);
        decode_account_id(bridge_account)?;
        Ok(Self {
            horizon: HorizonClient::new(horizon_url),
            network,
            keypair,
            address,
            bridge_account: bridge_account.to_string(),
        })
    }

    fn envelope(
        &self,
        target: &str,
        amount: u64,
        sequence_number: i64,
        memo: Memo,
    ) -> BridgeResult<PaymentEnvelope> {
        PaymentEnvelope::new(
            self.network,
            &self.bridge_account,
            target,
            amount,
            sequence_number,
            memo,
        )
    }

    async fn next_sequence_number(&self) -> BridgeResult<i64> {
        let account = self
            .horizon
            .get_account(&self.bridge_account)
            .await
            .map_err(|e| BridgeError::HorizonError(e.to_string()))?;
        let current = account
            .sequence_number()
            .map_err(|e| BridgeError::HorizonError(e.to_string()))?;
        Ok(current + 1)
    }

    async fn sign_at_current_sequence(
        &self,
        target: &str,
        amount: u64,
        memo: Memo,
    ) -> BridgeResult<(String, i64)> {
        let sequence_number = self.next_sequence_number().await?;
        let envelope = self.envelope(target, amount, sequence_number, memo)?;
        let signature = envelope.sign(&self.keypair)?;
        Ok((signature, sequence_number))
    }

    async fn submit_with_signatures(
        &self,
        target: &str,
        amount: u64,
        memo: Memo,
        signatures: &[StellarSignature],
        sequence_number: i64,
    ) -> BridgeResult<()> {
        let envelope = self.envelope(target, amount, sequence_number, memo)?;
        let decorated = signatures
            .iter()
            .map(|sig| {
                let bytes = hex::decode(&sig.signature).map_err(|e| {
                    BridgeError::SerializationError(format!("stored signature: {e}"))
                })?;
                DecoratedSignature::new(&sig.signer, bytes)
            })
            .collect::<BridgeResult<Vec<_>>>()?;
        let encoded = envelope.envelope_base64(&decorated)?;
        match self.horizon.submit_transaction(&encoded).await {
            Ok(SubmitOutcome::Accepted(hash)) => {
                info!(tx_hash = %hash, "stellar transaction submitted");
                Ok(())
            }
            Ok(SubmitOutcome::AlreadySubmitted) => {
                info!("envelope sequence already consumed, treating as submitted");
                Ok(())
            }
            Err(e) => Err(BridgeError::HorizonError(e.to_string())),
        }
    }
}

#[async_trait]
impl BridgeWallet for StellarWallet {
    async fn monitor_bridge_account(
        &self,
        cancel: CancellationToken,
        cursor: String,
    ) -> BridgeResult<mpsc::Receiver<MintEvent>> {
        let (event_tx, event_rx) = mpsc::channel(MINT_CHANNEL_SIZE);
        let horizon = self.horizon.clone();
        let bridge_account = self.bridge_account.clone();
        tokio::spawn(async move {
            run_payment_monitor(horizon, bridge_account, cursor, event_tx, cancel).await;
        });
        Ok(event_rx)
    }

    async fn check_account(&self, address: &str) -> BridgeResult<()> {
        decode_account_id(address)?;
        match self.horizon.get_account(address).await {
            Ok(_) => Ok(()),
            Err(HorizonError::AccountNotFound(_)) => {
                Err(BridgeError::InvalidStellarAddress(address.to_string()))
            }
            Err(e) => Err(BridgeError::HorizonError(e.to_string())),
        }
    }

    async fn create_payment_and_return_signature(
        &self,
        target: &str,
        amount: u64,
        burn_id: u64,
    ) -> BridgeResult<(String, i64)> {
        self.sign_at_current_sequence(target, amount, Memo::burn(burn_id))
            .await
    }

    async fn create_refund_and_return_signature(
        &self,
        target: &str,
        amount: u64,
        tx_hash: &str,
    ) -> BridgeResult<(String, i64)> {
        self.sign_at_current_sequence(target, amount, Memo::refund(tx_hash)?)
            .await
    }

    async fn create_payment_with_signatures_and_submit(
        &self,
        target: &str,
        amount: u64,
        burn_id: u64,
        signatures: &[StellarSignature],
        sequence_number: i64,
    ) -> BridgeResult<()> {
        self.submit_with_signatures(
            target,
            amount,
            Memo::burn(burn_id),
            signatures,
            sequence_number,
        )
        .await
    }

    async fn create_refund_payment_with_signatures_and_submit(
        &self,
        target: &str,
        amount: u64,
        tx_hash: &str,
        signatures: &[StellarSignature],
        sequence_number: i64,
    ) -> BridgeResult<()> {
        self.submit_with_signatures(
            target,
            amount,
            Memo::refund(tx_hash)?,
            signatures,
            sequence_number,
        )
        .await
    }

    fn address(&self) -> &str {
        &self.address
    }
}

/// Keep only the records the mint flow cares about: successful inbound
/// native payments to the custody account. Outbound and custody-internal
/// records are dropped here so they never reach the state machine.
fn is_inbound_deposit(record: &PaymentRecord, bridge_account: &str) -> bool {
    record.record_type == "payment"
        && record.to.as_deref() == Some(bridge_account)
        && record.from.as_deref() != Some(bridge_account)
        && record.asset_type.as_deref() == Some("native")
}

/// Aggregate the payment operations of one transaction per sender, in
/// observation order. "First sender" in the multi-sender refund rule means
/// the first entry of this list.
fn aggregate_senders(records: &[PaymentRecord]) -> BridgeResult<Vec<(String, u64)>> {
    let mut senders: Vec<(String, u64)> = Vec::new();
    for record in records {
        let from = record
            .from
            .clone()
            .ok_or_else(|| BridgeError::HorizonError("payment without sender".to_string()))?;
        let amount = record
            .amount_stroops()
            .map_err(|e| BridgeError::HorizonError(e.to_string()))?;
        match senders.iter_mut().find(|(sender, _)| *sender == from) {
            Some((_, total)) => *total += amount,
            None => senders.push((from, amount)),
        }
    }
    Ok(senders)
}

async fn observation_for(
    horizon: &HorizonClient,
    records: &[PaymentRecord],
) -> BridgeResult<MintEvent> {
    let hash = records[0].transaction_hash.clone();
    let paging_token = records
        .last()
        .expect("group is never empty")
        .paging_token
        .clone();
    let tx = match retry_with_max_elapsed_time!(horizon.transaction(&hash), MONITOR_MAX_RETRY) {
        Ok(Ok(tx)) => tx,
        Ok(Err(e)) | Err(e) => return Err(BridgeError::HorizonError(e.to_string())),
    };
    Ok(MintEvent {
        senders: aggregate_senders(records)?,
        tx: PaymentObservation {
            hash,
            memo_kind: MemoKind::parse(&tx.memo_type),
            memo: tx.memo.unwrap_or_default(),
            paging_token,
        },
    })
}

async fn run_payment_monitor(
    horizon: HorizonClient,
    bridge_account: String,
    mut cursor: String,
    event_tx: mpsc::Sender<MintEvent>,
    cancel: CancellationToken,
) {
    info!(cursor = %cursor, "starting custody account monitor");
    // Records of the transaction currently being grouped; flushed when a
    // record with a different hash arrives or the stream goes idle.
    let mut pending: Vec<PaymentRecord> = Vec::new();

    loop {
        let page = match retry_with_max_elapsed_time!(
            horizon.payments(&bridge_account, &cursor, PAYMENT_PAGE_LIMIT),
            MONITOR_MAX_RETRY
        ) {
            Ok(Ok(page)) => page,
            Ok(Err(e)) | Err(e) => {
                error!("custody account monitor giving up: {e}");
                return;
            }
        };

        let page_len = page.len();
        for record in page {
            cursor = record.paging_token.clone();
            if !is_inbound_deposit(&record, &bridge_account) {
                debug!(record = %record.id, "skipping non-deposit record");
                continue;
            }
            if let Some(first) = pending.first() {
                if first.transaction_hash != record.transaction_hash
                    && !flush_group(&horizon, &mut pending, &event_tx).await
                {
                    return;
                }
            }
            pending.push(record);
        }

        if page_len < PAYMENT_PAGE_LIMIT as usize {
            // Caught up with the account history: a transaction can no
            // longer span into the next page.
            if !flush_group(&horizon, &mut pending, &event_tx).await {
                return;
            }
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("custody account monitor cancelled");
                    return;
                }
                _ = tokio::time::sleep(MONITOR_POLL_INTERVAL) => {}
            }
        }
    }
}

/// Emit the pending transaction group, if any. Returns false when the
/// consumer is gone and the monitor should stop.
async fn flush_group(
    horizon: &HorizonClient,
    pending: &mut Vec<PaymentRecord>,
    event_tx: &mpsc::Sender<MintEvent>,
) -> bool {
    if pending.is_empty() {
        return true;
    }
    let records = std::mem::take(pending);
    match observation_for(horizon, &records).await {
        Ok(event) => {
            debug!(tx_hash = %event.tx.hash, senders = event.senders.len(), "deposit observed");
            event_tx.send(event).await.is_ok()
        }
        Err(e) => {
            warn!("failed to build deposit observation: {e}");
            false
        }
    }
}
