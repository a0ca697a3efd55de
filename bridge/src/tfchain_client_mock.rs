// Copyright (c) ThreeFold Tech
// SPDX-License-Identifier: Apache-2.0

//! A mock implementation of the chain client. Storage reads come from
//! preset maps; submitted extrinsics are recorded for assertions. A
//! successful mint or execute marks the corresponding idempotency set the
//! way the runtime would after quorum.

use crate::error::{BridgeError, BridgeResult};
use crate::events::BridgeEventBatch;
use crate::tfchain_client::SubClient;
use crate::types::{BurnTransaction, RefundTransaction};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use subxt::utils::AccountId32;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extrinsic {
    ProposeOrVoteMint {
        mint_id: String,
        target: AccountId32,
        amount: u64,
    },
    ProposeBurnOrAddSig {
        burn_id: u64,
        target: String,
        amount: u64,
        signature: String,
        stellar_address: String,
        sequence_number: i64,
    },
    CreateRefundOrAddSig {
        tx_hash: String,
        target: String,
        amount: u64,
        signature: String,
        stellar_address: String,
        sequence_number: i64,
    },
    SetBurnExecuted {
        burn_id: u64,
    },
    SetRefundExecuted {
        tx_hash: String,
    },
}

pub struct MockSubClient {
    account: AccountId32,
    validator: Mutex<bool>,
    minted: Mutex<HashSet<String>>,
    refunded: Mutex<HashSet<String>>,
    burned: Mutex<HashSet<u64>>,
    twins: Mutex<HashMap<u32, AccountId32>>,
    farms: Mutex<HashMap<u32, u32>>,
    nodes: Mutex<HashMap<u32, u32>>,
    entities: Mutex<HashMap<u32, AccountId32>>,
    burn_transactions: Mutex<HashMap<u64, BurnTransaction>>,
    refund_transactions: Mutex<HashMap<String, RefundTransaction>>,
    batches: Mutex<VecDeque<BridgeEventBatch>>,
    extrinsics: Mutex<Vec<Extrinsic>>,
    mint_failure: Mutex<Option<BridgeError>>,
    batch_tx: Mutex<Option<mpsc::Sender<BridgeEventBatch>>>,
}

impl MockSubClient {
    pub fn new() -> Self {
        Self {
            account: AccountId32::from([77u8; 32]),
            validator: Mutex::new(true),
            minted: Default::default(),
            refunded: Default::default(),
            burned: Default::default(),
            twins: Default::default(),
            farms: Default::default(),
            nodes: Default::default(),
            entities: Default::default(),
            burn_transactions: Default::default(),
            refund_transactions: Default::default(),
            batches: Default::default(),
            extrinsics: Default::default(),
            mint_failure: Default::default(),
            batch_tx: Default::default(),
        }
    }

    pub fn set_validator(&self, value: bool) {
        *self.validator.lock().unwrap() = value;
    }

    pub fn set_minted(&self, mint_id: &str) {
        self.minted.lock().unwrap().insert(mint_id.to_string());
    }

    pub fn set_refunded(&self, tx_hash: &str) {
        self.refunded.lock().unwrap().insert(tx_hash.to_string());
    }

    pub fn set_burned(&self, burn_id: u64) {
        self.burned.lock().unwrap().insert(burn_id);
    }

    pub fn set_twin(&self, twin_id: u32, account: AccountId32) {
        self.twins.lock().unwrap().insert(twin_id, account);
    }

    pub fn set_farm(&self, farm_id: u32, twin_id: u32) {
        self.farms.lock().unwrap().insert(farm_id, twin_id);
    }

    pub fn set_node(&self, node_id: u32, twin_id: u32) {
        self.nodes.lock().unwrap().insert(node_id, twin_id);
    }

    pub fn set_entity(&self, entity_id: u32, account: AccountId32) {
        self.entities.lock().unwrap().insert(entity_id, account);
    }

    pub fn set_burn_transaction(&self, burn: BurnTransaction) {
        self.burn_transactions.lock().unwrap().insert(burn.id, burn);
    }

    pub fn set_refund_transaction(&self, refund: RefundTransaction) {
        self.refund_transactions
            .lock()
            .unwrap()
            .insert(refund.tx_hash.clone(), refund);
    }

    pub fn queue_batch(&self, batch: BridgeEventBatch) {
        self.batches.lock().unwrap().push_back(batch);
    }

    pub fn fail_next_mint(&self, error: BridgeError) {
        *self.mint_failure.lock().unwrap() = Some(error);
    }

    pub fn extrinsics(&self) -> Vec<Extrinsic> {
        self.extrinsics.lock().unwrap().clone()
    }

    fn record(&self, extrinsic: Extrinsic) -> String {
        let mut extrinsics = self.extrinsics.lock().unwrap();
        extrinsics.push(extrinsic);
        format!("0x{:064x}", extrinsics.len())
    }
}

impl Default for MockSubClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SubClient for MockSubClient {
    fn account_id(&self) -> &AccountId32 {
        &self.account
    }

    async fn is_validator(&self) -> BridgeResult<bool> {
        Ok(*self.validator.lock().unwrap())
    }

    async fn subscribe_bridge_events(
        &self,
        _cancel: CancellationToken,
    ) -> BridgeResult<mpsc::Receiver<BridgeEventBatch>> {
        let (batch_tx, batch_rx) = mpsc::channel(16);
        for batch in self.batches.lock().unwrap().drain(..) {
            batch_tx.try_send(batch).expect("mock channel overflow");
        }
        *self.batch_tx.lock().unwrap() = Some(batch_tx);
        Ok(batch_rx)
    }

    async fn is_minted_already(&self, mint_id: &str) -> BridgeResult<bool> {
        Ok(self.minted.lock().unwrap().contains(mint_id))
    }

    async fn is_refunded_already(&self, tx_hash: &str) -> BridgeResult<bool> {
        Ok(self.refunded.lock().unwrap().contains(tx_hash))
    }

    async fn is_burned_already(&self, burn_id: u64) -> BridgeResult<bool> {
        Ok(self.burned.lock().unwrap().contains(&burn_id))
    }

    async fn propose_or_vote_mint_transaction(
        &self,
        mint_id: &str,
        target: &AccountId32,
        amount: u64,
    ) -> BridgeResult<String> {
        if let Some(error) = self.mint_failure.lock().unwrap().take() {
            return Err(error);
        }
        self.minted.lock().unwrap().insert(mint_id.to_string());
        Ok(self.record(Extrinsic::ProposeOrVoteMint {
            mint_id: mint_id.to_string(),
            target: target.clone(),
            amount,
        }))
    }

    async fn propose_burn_transaction_or_add_sig(
        &self,
        burn_id: u64,
        target: &str,
        amount: u64,
        signature: &str,
        stellar_address: &str,
        sequence_number: i64,
    ) -> BridgeResult<String> {
        Ok(self.record(Extrinsic::ProposeBurnOrAddSig {
            burn_id,
            target: target.to_string(),
            amount,
            signature: signature.to_string(),
            stellar_address: stellar_address.to_string(),
            sequence_number,
        }))
    }

    async fn create_refund_transaction_or_add_sig(
        &self,
        tx_hash: &str,
        target: &str,
        amount: u64,
        signature: &str,
        stellar_address: &str,
        sequence_number: i64,
    ) -> BridgeResult<String> {
        Ok(self.record(Extrinsic::CreateRefundOrAddSig {
            tx_hash: tx_hash.to_string(),
            target: target.to_string(),
            amount,
            signature: signature.to_string(),
            stellar_address: stellar_address.to_string(),
            sequence_number,
        }))
    }

    async fn set_burn_transaction_executed(&self, burn_id: u64) -> BridgeResult<String> {
        self.burned.lock().unwrap().insert(burn_id);
        Ok(self.record(Extrinsic::SetBurnExecuted { burn_id }))
    }

    async fn set_refund_transaction_executed(&self, tx_hash: &str) -> BridgeResult<String> {
        self.refunded.lock().unwrap().insert(tx_hash.to_string());
        Ok(self.record(Extrinsic::SetRefundExecuted {
            tx_hash: tx_hash.to_string(),
        }))
    }

    async fn get_burn_transaction(&self, burn_id: u64) -> BridgeResult<BurnTransaction> {
        self.burn_transactions
            .lock()
            .unwrap()
            .get(&burn_id)
            .cloned()
            .ok_or_else(|| {
                BridgeError::SubstrateRpcError(format!("burn transaction {burn_id} not found"))
            })
    }

    async fn get_refund_transaction(&self, tx_hash: &str) -> BridgeResult<RefundTransaction> {
        self.refund_transactions
            .lock()
            .unwrap()
            .get(tx_hash)
            .cloned()
            .ok_or_else(|| {
                BridgeError::SubstrateRpcError(format!("refund transaction {tx_hash} not found"))
            })
    }

    async fn get_deposit_fee(&self) -> BridgeResult<u64> {
        Ok(1_000_000)
    }

    async fn get_twin_account(&self, twin_id: u32) -> BridgeResult<AccountId32> {
        self.twins
            .lock()
            .unwrap()
            .get(&twin_id)
            .cloned()
            .ok_or_else(|| BridgeError::InvalidMemo(format!("twin {twin_id} not found")))
    }

    async fn get_farm_twin_id(&self, farm_id: u32) -> BridgeResult<u32> {
        self.farms
            .lock()
            .unwrap()
            .get(&farm_id)
            .copied()
            .ok_or_else(|| BridgeError::InvalidMemo(format!("farm {farm_id} not found")))
    }

    async fn get_node_twin_id(&self, node_id: u32) -> BridgeResult<u32> {
        self.nodes
            .lock()
            .unwrap()
            .get(&node_id)
            .copied()
            .ok_or_else(|| BridgeError::InvalidMemo(format!("node {node_id} not found")))
    }

    async fn get_entity_account(&self, entity_id: u32) -> BridgeResult<AccountId32> {
        self.entities
            .lock()
            .unwrap()
            .get(&entity_id)
            .cloned()
            .ok_or_else(|| BridgeError::InvalidMemo(format!("entity {entity_id} not found")))
    }
}
