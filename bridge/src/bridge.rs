// Copyright (c) ThreeFold Tech
// SPDX-License-Identifier: Apache-2.0

//! The transfer state machine and its single-threaded coordinator.
//!
//! Every cross-chain movement funnels through one of the handlers below,
//! and all handlers run on one task. Inter-validator races are resolved by
//! the on-chain idempotency markers, never by local state, so a crash at
//! any point is recovered by replaying from the persisted cursor/height.

use crate::error::{BridgeError, BridgeResult};
use crate::events::{
    BridgeEventBatch, RefundExpired, RefundReady, WithdrawCreated, WithdrawExpired, WithdrawReady,
};
use crate::memo::DepositMemo;
use crate::metrics::BridgeMetrics;
use crate::persist::ChainPersistency;
use crate::stellar_wallet::BridgeWallet;
use crate::tfchain_client::SubClient;
use crate::types::{MemoKind, MintEvent, PaymentObservation};
use std::sync::Arc;
use std::time::Duration;
use subxt::utils::AccountId32;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const MINT_RETRY_INTERVAL: Duration = Duration::from_secs(10);

pub struct Bridge<W, C> {
    wallet: Arc<W>,
    sub_client: Arc<C>,
    persistency: ChainPersistency,
    deposit_fee: u64,
    metrics: Arc<BridgeMetrics>,
}

impl<W: BridgeWallet, C: SubClient> Bridge<W, C> {
    pub fn new(
        wallet: Arc<W>,
        sub_client: Arc<C>,
        persistency: ChainPersistency,
        deposit_fee: u64,
        metrics: Arc<BridgeMetrics>,
    ) -> Self {
        Self {
            wallet,
            sub_client,
            persistency,
            deposit_fee,
            metrics,
        }
    }

    /// Coordinator loop: multiplex the two event sources until cancellation
    /// or a fatal handler error. The daemon's recovery mechanism for fatal
    /// errors is a restart, which resumes from the persisted checkpoints.
    pub async fn run(
        &self,
        cancel: CancellationToken,
        mut tfchain_rx: mpsc::Receiver<BridgeEventBatch>,
        mut mint_rx: mpsc::Receiver<MintEvent>,
    ) -> BridgeResult<()> {
        info!("bridge coordinator started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("bridge coordinator stopping");
                    return Ok(());
                }
                batch = tfchain_rx.recv() => {
                    let Some(batch) = batch else {
                        return Err(BridgeError::SubstrateRpcError(
                            "tfchain event stream ended".to_string(),
                        ));
                    };
                    if let Err(e) = self.handle_event_batch(&batch).await {
                        self.metrics.handler_errors(&e);
                        return Err(e);
                    }
                    self.persistency.save_height(batch.height)?;
                    self.metrics.last_processed_height.set(batch.height as i64);
                }
                event = mint_rx.recv() => {
                    let Some(event) = event else {
                        return Err(BridgeError::HorizonError(
                            "stellar mint stream ended".to_string(),
                        ));
                    };
                    self.mint_with_retry(&cancel, &event).await?;
                }
            }
        }
    }

    /// Process one block's bridge events in the fixed variant order.
    pub async fn handle_event_batch(&self, batch: &BridgeEventBatch) -> BridgeResult<()> {
        for event in &batch.withdraw_created {
            self.handle_withdraw_created(event).await?;
        }
        for event in &batch.withdraw_expired {
            self.handle_withdraw_expired(event).await?;
        }
        for event in &batch.withdraw_ready {
            self.handle_withdraw_ready(event).await?;
        }
        for event in &batch.refund_ready {
            self.handle_refund_ready(event).await?;
        }
        for event in &batch.refund_expired {
            self.handle_refund_expired(event).await.or_else(|e| match e {
                BridgeError::TransactionAlreadyRefunded(_) => Ok(()),
                other => Err(other),
            })?;
        }
        Ok(())
    }

    /// The mint path is the only one that retries: transient submission
    /// failures replay the same deposit every ten seconds until it lands or
    /// the process is cancelled.
    async fn mint_with_retry(
        &self,
        cancel: &CancellationToken,
        event: &MintEvent,
    ) -> BridgeResult<()> {
        loop {
            match self.mint(&event.senders, &event.tx).await {
                Ok(()) => return Ok(()),
                Err(BridgeError::TransactionAlreadyRefunded(hash)) => {
                    info!(tx_hash = %hash, "deposit already refunded, continuing");
                    return Ok(());
                }
                Err(e) => {
                    warn!(tx_hash = %event.tx.hash, "mint failed, retrying: {e}");
                    self.metrics.mint_retries.inc();
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(e),
                        _ = tokio::time::sleep(MINT_RETRY_INTERVAL) => {}
                    }
                }
            }
        }
    }

    /// Route one observed deposit to exactly one of mint, refund or skip.
    pub async fn mint(
        &self,
        senders: &[(String, u64)],
        tx: &PaymentObservation,
    ) -> BridgeResult<()> {
        info!(tx_hash = %tx.hash, "processing deposit");

        if senders.len() > 1 {
            // The deposit cannot be attributed to a single principal.
            // Refund the first enumerated sender; the remaining senders are
            // not refunded in this pass.
            info!(tx_hash = %tx.hash, "multiple senders found, refunding");
            let (sender, amount) = &senders[0];
            return self.refund(sender, *amount, tx).await;
        }
        let Some((receiver, amount)) = senders.first() else {
            return Err(BridgeError::Generic(format!(
                "deposit {} has no senders",
                tx.hash
            )));
        };

        if tx.memo_kind == MemoKind::Return {
            // Stellar-side acknowledgement of a refund we issued earlier
            debug!(tx_hash = %tx.hash, "return memo, skipping transaction");
            self.metrics.deposits_skipped.inc();
            return self.save_cursor(tx);
        }

        if tx.memo.is_empty() {
            info!(tx_hash = %tx.hash, "empty memo, refunding");
            return self.refund(receiver, *amount, tx).await;
        }

        if self.sub_client.is_minted_already(&tx.hash).await? {
            info!(tx_hash = %tx.hash, "deposit is already minted");
            self.metrics.deposits_skipped.inc();
            return self.save_cursor(tx);
        }

        if *amount <= self.deposit_fee {
            info!(tx_hash = %tx.hash, amount, fee = self.deposit_fee, "deposit below fee, refunding");
            return self.refund(receiver, *amount, tx).await;
        }

        let target = match self.resolve_memo(&tx.memo).await {
            Ok(target) => target,
            Err(e) => {
                warn!(tx_hash = %tx.hash, memo = %tx.memo, "cannot resolve memo, refunding: {e}");
                return self.refund(receiver, *amount, tx).await;
            }
        };

        info!(tx_hash = %tx.hash, amount, target = %target, "minting deposit");
        let extrinsic = self
            .sub_client
            .propose_or_vote_mint_transaction(&tx.hash, &target, *amount)
            .await?;
        info!(extrinsic = %extrinsic, "mint proposed");
        self.metrics.mints_proposed.inc();
        self.save_cursor(tx)
    }

    async fn resolve_memo(&self, memo: &str) -> BridgeResult<AccountId32> {
        let memo: DepositMemo = memo.parse()?;
        memo.resolve(&*self.sub_client).await
    }

    /// Initiate the refund of a deposit, then advance the cursor. A refund
    /// that already executed counts as success.
    async fn refund(
        &self,
        destination: &str,
        amount: u64,
        tx: &PaymentObservation,
    ) -> BridgeResult<()> {
        let event = RefundExpired {
            hash: tx.hash.clone(),
            target: destination.to_string(),
            amount,
        };
        match self.handle_refund_expired(&event).await {
            Ok(()) => {}
            Err(BridgeError::TransactionAlreadyRefunded(hash)) => {
                info!(tx_hash = %hash, "deposit already refunded");
            }
            Err(e) => return Err(e),
        }
        self.metrics.refunds_initiated.inc();
        self.save_cursor(tx)
    }

    /// Contribute this validator's signature to a refund, fresh sequence
    /// number included. Fired both by refund initiation and by the runtime
    /// re-expiring an unquorumed refund.
    async fn handle_refund_expired(&self, event: &RefundExpired) -> BridgeResult<()> {
        if self.sub_client.is_refunded_already(&event.hash).await? {
            return Err(BridgeError::TransactionAlreadyRefunded(event.hash.clone()));
        }
        let (signature, sequence_number) = self
            .wallet
            .create_refund_and_return_signature(&event.target, event.amount, &event.hash)
            .await?;
        let extrinsic = self
            .sub_client
            .create_refund_transaction_or_add_sig(
                &event.hash,
                &event.target,
                event.amount,
                &signature,
                self.wallet.address(),
                sequence_number,
            )
            .await?;
        info!(tx_hash = %event.hash, extrinsic = %extrinsic, "refund signature submitted");
        Ok(())
    }

    /// Quorum reached on a refund: any validator may submit the payout.
    async fn handle_refund_ready(&self, event: &RefundReady) -> BridgeResult<()> {
        if self.sub_client.is_refunded_already(&event.hash).await? {
            info!(tx_hash = %event.hash, "refund already executed, skipping");
            return Ok(());
        }
        let refund = self.sub_client.get_refund_transaction(&event.hash).await?;
        self.wallet
            .create_refund_payment_with_signatures_and_submit(
                &refund.target,
                refund.amount,
                &refund.tx_hash,
                &refund.signatures,
                refund.sequence_number,
            )
            .await?;
        let extrinsic = self
            .sub_client
            .set_refund_transaction_executed(&refund.tx_hash)
            .await?;
        info!(tx_hash = %event.hash, extrinsic = %extrinsic, "refund executed");
        self.metrics.refunds_executed.inc();
        Ok(())
    }

    async fn handle_withdraw_created(&self, event: &WithdrawCreated) -> BridgeResult<()> {
        if self.sub_client.is_burned_already(event.id).await? {
            info!(burn_id = event.id, "burn already executed, skipping");
            return Ok(());
        }

        if let Err(e) = self.wallet.check_account(&event.target).await {
            // The burn cannot be paid out on Stellar. Mint the amount back
            // to the source account and retire the burn.
            info!(burn_id = event.id, "invalid burn target, minting back on chain: {e}");
            let mint_id = format!("refund-{}", event.id);
            self.handle_mint(event.amount, &event.source, &mint_id).await?;
            let extrinsic = self
                .sub_client
                .set_burn_transaction_executed(event.id)
                .await?;
            info!(burn_id = event.id, extrinsic = %extrinsic, "invalid burn retired");
            return Ok(());
        }

        self.sign_and_propose_burn(event.id, &event.target, event.amount)
            .await
    }

    /// A previous signing round missed the quorum deadline; contribute a
    /// signature against a fresh sequence number.
    async fn handle_withdraw_expired(&self, event: &WithdrawExpired) -> BridgeResult<()> {
        if let Err(e) = self.wallet.check_account(&event.target).await {
            // The re-mint already happened when the burn was first created;
            // just retire it.
            info!(burn_id = event.id, "expired burn with invalid target, retiring: {e}");
            let extrinsic = self
                .sub_client
                .set_burn_transaction_executed(event.id)
                .await?;
            info!(burn_id = event.id, extrinsic = %extrinsic, "invalid burn retired");
            return Ok(());
        }
        self.sign_and_propose_burn(event.id, &event.target, event.amount)
            .await
    }

    async fn sign_and_propose_burn(
        &self,
        burn_id: u64,
        target: &str,
        amount: u64,
    ) -> BridgeResult<()> {
        let (signature, sequence_number) = self
            .wallet
            .create_payment_and_return_signature(target, amount, burn_id)
            .await?;
        debug!(burn_id, sequence_number, "signed payout envelope");
        let extrinsic = self
            .sub_client
            .propose_burn_transaction_or_add_sig(
                burn_id,
                target,
                amount,
                &signature,
                self.wallet.address(),
                sequence_number,
            )
            .await?;
        info!(burn_id, extrinsic = %extrinsic, "burn signature submitted");
        self.metrics.withdraws_signed.inc();
        Ok(())
    }

    /// Quorum reached on a burn: submit the Stellar payout. Stellar rejects
    /// replays of the identical envelope, so concurrent submissions by
    /// other validators are harmless.
    async fn handle_withdraw_ready(&self, event: &WithdrawReady) -> BridgeResult<()> {
        if self.sub_client.is_burned_already(event.id).await? {
            info!(burn_id = event.id, "burn already executed, skipping");
            return Ok(());
        }
        let burn = self.sub_client.get_burn_transaction(event.id).await?;
        if burn.signatures.is_empty() {
            error!(burn_id = event.id, "burn flagged ready with zero signatures");
            return Err(BridgeError::NoSignatures(event.id));
        }
        self.wallet
            .create_payment_with_signatures_and_submit(
                &burn.target,
                burn.amount,
                burn.id,
                &burn.signatures,
                burn.sequence_number,
            )
            .await?;
        let extrinsic = self
            .sub_client
            .set_burn_transaction_executed(event.id)
            .await?;
        info!(burn_id = event.id, extrinsic = %extrinsic, "burn executed");
        self.metrics.withdraws_executed.inc();
        Ok(())
    }

    /// Mint through the idempotency gate. An already-executed mint is not
    /// an error here: the caller proceeds to retire the burn either way.
    async fn handle_mint(
        &self,
        amount: u64,
        target: &AccountId32,
        mint_id: &str,
    ) -> BridgeResult<()> {
        if self.sub_client.is_minted_already(mint_id).await? {
            debug!(mint_id, "mint already executed");
            return Ok(());
        }
        let extrinsic = self
            .sub_client
            .propose_or_vote_mint_transaction(mint_id, target, amount)
            .await?;
        info!(mint_id, extrinsic = %extrinsic, "mint proposed");
        self.metrics.mints_proposed.inc();
        Ok(())
    }

    fn save_cursor(&self, tx: &PaymentObservation) -> BridgeResult<()> {
        self.persistency.save_stellar_cursor(&tx.paging_token)?;
        info!(cursor = %tx.paging_token, "stellar cursor saved");
        Ok(())
    }
}
