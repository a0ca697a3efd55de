// Copyright (c) ThreeFold Tech
// SPDX-License-Identifier: Apache-2.0

//! A mock implementation of the wallet interface. Responses are preset by
//! tests; every signing and submission call is recorded for assertions.

use crate::error::{BridgeError, BridgeResult};
use crate::stellar_wallet::BridgeWallet;
use crate::types::{MintEvent, StellarSignature};
use async_trait::async_trait;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalletCall {
    PaymentSignature {
        target: String,
        amount: u64,
        burn_id: u64,
    },
    RefundSignature {
        target: String,
        amount: u64,
        tx_hash: String,
    },
    SubmitPayment {
        target: String,
        amount: u64,
        burn_id: u64,
        signatures: usize,
        sequence_number: i64,
    },
    SubmitRefund {
        target: String,
        amount: u64,
        tx_hash: String,
        signatures: usize,
        sequence_number: i64,
    },
}

pub struct MockWallet {
    address: String,
    valid_accounts: Mutex<HashSet<String>>,
    deposits: Mutex<VecDeque<MintEvent>>,
    next_sequence: AtomicI64,
    calls: Mutex<Vec<WalletCall>>,
    submit_failure: Mutex<Option<BridgeError>>,
    // Keeps the monitor channel open after the preset deposits are drained
    monitor_tx: Mutex<Option<mpsc::Sender<MintEvent>>>,
}

impl MockWallet {
    pub fn new(address: &str) -> Self {
        Self {
            address: address.to_string(),
            valid_accounts: Default::default(),
            deposits: Default::default(),
            next_sequence: AtomicI64::new(100),
            calls: Default::default(),
            submit_failure: Default::default(),
            monitor_tx: Default::default(),
        }
    }

    pub fn set_valid_account(&self, address: &str) {
        self.valid_accounts.lock().unwrap().insert(address.to_string());
    }

    pub fn queue_deposit(&self, event: MintEvent) {
        self.deposits.lock().unwrap().push_back(event);
    }

    pub fn fail_next_submit(&self, error: BridgeError) {
        *self.submit_failure.lock().unwrap() = Some(error);
    }

    pub fn calls(&self) -> Vec<WalletCall> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: WalletCall) {
        self.calls.lock().unwrap().push(call);
    }

    fn take_submit_failure(&self) -> Option<BridgeError> {
        self.submit_failure.lock().unwrap().take()
    }
}

#[async_trait]
impl BridgeWallet for MockWallet {
    async fn monitor_bridge_account(
        &self,
        _cancel: CancellationToken,
        _cursor: String,
    ) -> BridgeResult<mpsc::Receiver<MintEvent>> {
        let (event_tx, event_rx) = mpsc::channel(64);
        for event in self.deposits.lock().unwrap().drain(..) {
            event_tx.try_send(event).expect("mock channel overflow");
        }
        *self.monitor_tx.lock().unwrap() = Some(event_tx);
        Ok(event_rx)
    }

    async fn check_account(&self, address: &str) -> BridgeResult<()> {
        if self.valid_accounts.lock().unwrap().contains(address) {
            Ok(())
        } else {
            Err(BridgeError::InvalidStellarAddress(address.to_string()))
        }
    }

    async fn create_payment_and_return_signature(
        &self,
        target: &str,
        amount: u64,
        burn_id: u64,
    ) -> BridgeResult<(String, i64)> {
        self.record(WalletCall::PaymentSignature {
            target: target.to_string(),
            amount,
            burn_id,
        });
        let sequence_number = self.next_sequence.fetch_add(1, Ordering::SeqCst);
        Ok((format!("sig-{burn_id}-{sequence_number}"), sequence_number))
    }

    async fn create_refund_and_return_signature(
        &self,
        target: &str,
        amount: u64,
        tx_hash: &str,
    ) -> BridgeResult<(String, i64)> {
        self.record(WalletCall::RefundSignature {
            target: target.to_string(),
            amount,
            tx_hash: tx_hash.to_string(),
        });
        let sequence_number = self.next_sequence.fetch_add(1, Ordering::SeqCst);
        Ok((format!("sig-{tx_hash}-{sequence_number}"), sequence_number))
    }

    async fn create_payment_with_signatures_and_submit(
        &self,
        target: &str,
        amount: u64,
        burn_id: u64,
        signatures: &[StellarSignature],
        sequence_number: i64,
    ) -> BridgeResult<()> {
        if let Some(error) = self.take_submit_failure() {
            return Err(error);
        }
        self.record(WalletCall::SubmitPayment {
            target: target.to_string(),
            amount,
            burn_id,
            signatures: signatures.len(),
            sequence_number,
        });
        Ok(())
    }

    async fn create_refund_payment_with_signatures_and_submit(
        &self,
        target: &str,
        amount: u64,
        tx_hash: &str,
        signatures: &[StellarSignature],
        sequence_number: i64,
    ) -> BridgeResult<()> {
        if let Some(error) = self.take_submit_failure() {
            return Err(error);
        }
        self.record(WalletCall::SubmitRefund {
            target: target.to_string(),
            amount,
            tx_hash: tx_hash.to_string(),
            signatures: signatures.len(),
            sequence_number,
        });
        Ok(())
    }

    fn address(&self) -> &str {
        &self.address
    }
}
