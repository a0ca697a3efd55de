// Copyright (c) ThreeFold Tech
// SPDX-License-Identifier: Apache-2.0

//! The tfchain side of the bridge. The core consumes the [`SubClient`]
//! trait; [`TfchainClient`] implements it over subxt's dynamic API so no
//! generated runtime metadata is needed. Storage reads and extrinsics talk
//! to the `TFTBridgeModule` pallet; identity lookups to `TfgridModule`.

use crate::error::{BridgeError, BridgeResult};
use crate::events::{value_to_bytes, value_to_u64, BridgeEvent, BridgeEventBatch, BRIDGE_PALLET};
use crate::types::{BurnTransaction, RefundTransaction, StellarSignature};
use async_trait::async_trait;
use futures::StreamExt;
use std::str::FromStr;
use subxt::dynamic::Value;
use subxt::ext::scale_value::{Composite, ValueDef};
use subxt::utils::AccountId32;
use subxt::{OnlineClient, PolkadotConfig};
use subxt_signer::{sr25519::Keypair, SecretUri};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Pallet that resolves twin/farm/node/entity identities.
const GRID_PALLET: &str = "TfgridModule";

const EVENT_CHANNEL_SIZE: usize = 16;

/// Chain operations the transfer state machine depends on.
#[async_trait]
pub trait SubClient: Send + Sync + 'static {
    /// The validator's tfchain account.
    fn account_id(&self) -> &AccountId32;

    /// Whether the account is enrolled in the bridge validator set.
    async fn is_validator(&self) -> BridgeResult<bool>;

    /// Per-finalized-block batches of bridge events. The stream ends on
    /// cancellation or unrecoverable connection loss.
    async fn subscribe_bridge_events(
        &self,
        cancel: CancellationToken,
    ) -> BridgeResult<mpsc::Receiver<BridgeEventBatch>>;

    async fn is_minted_already(&self, mint_id: &str) -> BridgeResult<bool>;
    async fn is_refunded_already(&self, tx_hash: &str) -> BridgeResult<bool>;
    async fn is_burned_already(&self, burn_id: u64) -> BridgeResult<bool>;

    /// Propose a mint or add this validator's vote to an existing proposal.
    /// Returns the extrinsic hash.
    async fn propose_or_vote_mint_transaction(
        &self,
        mint_id: &str,
        target: &AccountId32,
        amount: u64,
    ) -> BridgeResult<String>;

    async fn propose_burn_transaction_or_add_sig(
        &self,
        burn_id: u64,
        target: &str,
        amount: u64,
        signature: &str,
        stellar_address: &str,
        sequence_number: i64,
    ) -> BridgeResult<String>;

    async fn create_refund_transaction_or_add_sig(
        &self,
        tx_hash: &str,
        target: &str,
        amount: u64,
        signature: &str,
        stellar_address: &str,
        sequence_number: i64,
    ) -> BridgeResult<String>;

    async fn set_burn_transaction_executed(&self, burn_id: u64) -> BridgeResult<String>;
    async fn set_refund_transaction_executed(&self, tx_hash: &str) -> BridgeResult<String>;

    async fn get_burn_transaction(&self, burn_id: u64) -> BridgeResult<BurnTransaction>;
    async fn get_refund_transaction(&self, tx_hash: &str) -> BridgeResult<RefundTransaction>;
    async fn get_deposit_fee(&self) -> BridgeResult<u64>;

    async fn get_twin_account(&self, twin_id: u32) -> BridgeResult<AccountId32>;
    async fn get_farm_twin_id(&self, farm_id: u32) -> BridgeResult<u32>;
    async fn get_node_twin_id(&self, node_id: u32) -> BridgeResult<u32>;
    async fn get_entity_account(&self, entity_id: u32) -> BridgeResult<AccountId32>;
}

pub struct TfchainClient {
    api: OnlineClient<PolkadotConfig>,
    signer: Keypair,
    account: AccountId32,
}

fn rpc_err(e: impl std::fmt::Display) -> BridgeError {
    BridgeError::SubstrateRpcError(e.to_string())
}

impl TfchainClient {
    pub async fn new(url: &str, seed: &str) -> BridgeResult<Self> {
        let api = OnlineClient::<PolkadotConfig>::from_url(url)
            .await
            .map_err(rpc_err)?;
        let suri = SecretUri::from_str(seed)
            .map_err(|e| BridgeError::Generic(format!("invalid tfchain seed: {e}")))?;
        let signer = Keypair::from_uri(&suri)
            .map_err(|e| BridgeError::Generic(format!("invalid tfchain seed: {e}")))?;
        let account = AccountId32::from(signer.public_key().0);
        info!(account = %account, "connected to tfchain at {url}");
        Ok(Self {
            api,
            signer,
            account,
        })
    }

    async fn fetch_storage(
        &self,
        pallet: &str,
        entry: &str,
        keys: Vec<Value>,
    ) -> BridgeResult<Option<subxt::ext::scale_value::Value<u32>>> {
        let address = subxt::dynamic::storage(pallet, entry, keys);
        let storage = self
            .api
            .storage()
            .at_latest()
            .await
            .map_err(rpc_err)?;
        let thunk = storage.fetch(&address).await.map_err(rpc_err)?;
        thunk.map(|t| t.to_value().map_err(rpc_err)).transpose()
    }

    async fn storage_contains(
        &self,
        entry: &str,
        keys: Vec<Value>,
    ) -> BridgeResult<bool> {
        Ok(self.fetch_storage(BRIDGE_PALLET, entry, keys).await?.is_some())
    }

    /// Sign, submit and wait for finalized inclusion of a bridge extrinsic.
    async fn call(&self, call_name: &str, fields: Vec<Value>) -> BridgeResult<String> {
        let tx = subxt::dynamic::tx(BRIDGE_PALLET, call_name, fields);
        let progress = self
            .api
            .tx()
            .sign_and_submit_then_watch_default(&tx, &self.signer)
            .await
            .map_err(rpc_err)?;
        let hash = progress.extrinsic_hash();
        progress
            .wait_for_finalized_success()
            .await
            .map_err(rpc_err)?;
        let hash = format!("{hash:#x}");
        debug!(call = call_name, extrinsic = %hash, "extrinsic finalized");
        Ok(hash)
    }
}

fn account_value(account: &AccountId32) -> Value {
    Value::from_bytes(account.0)
}

fn signature_fields(
    signature: &str,
    stellar_address: &str,
    sequence_number: i64,
) -> Vec<Value> {
    vec![
        Value::from_bytes(signature.as_bytes()),
        Value::from_bytes(stellar_address.as_bytes()),
        Value::u128(sequence_number as u128),
    ]
}

fn named_field<'a>(
    value: &'a subxt::ext::scale_value::Value<u32>,
    name: &str,
) -> BridgeResult<&'a subxt::ext::scale_value::Value<u32>> {
    if let ValueDef::Composite(Composite::Named(fields)) = &value.value {
        if let Some((_, field)) = fields.iter().find(|(field, _)| field.as_str() == name) {
            return Ok(field);
        }
    }
    Err(BridgeError::SerializationError(format!(
        "storage value has no field `{name}`"
    )))
}

fn named_u64(value: &subxt::ext::scale_value::Value<u32>, name: &str) -> BridgeResult<u64> {
    value_to_u64(named_field(value, name)?).ok_or_else(|| {
        BridgeError::SerializationError(format!("field `{name}` is not an integer"))
    })
}

fn named_string(value: &subxt::ext::scale_value::Value<u32>, name: &str) -> BridgeResult<String> {
    let mut bytes = Vec::new();
    if !value_to_bytes(named_field(value, name)?, &mut bytes) {
        return Err(BridgeError::SerializationError(format!(
            "field `{name}` is not a byte sequence"
        )));
    }
    String::from_utf8(bytes)
        .map_err(|_| BridgeError::SerializationError(format!("field `{name}` is not utf-8")))
}

fn named_account(
    value: &subxt::ext::scale_value::Value<u32>,
    name: &str,
) -> BridgeResult<AccountId32> {
    let mut bytes = Vec::new();
    if !value_to_bytes(named_field(value, name)?, &mut bytes) {
        return Err(BridgeError::SerializationError(format!(
            "field `{name}` is not a byte sequence"
        )));
    }
    let raw: [u8; 32] = bytes.try_into().map_err(|_| {
        BridgeError::SerializationError(format!("field `{name}` is not an account id"))
    })?;
    Ok(AccountId32::from(raw))
}

/// Decode the on-chain signature set: a vector of
/// `{ signature, stellar_pub_key }` byte pairs, both utf-8 strings written
/// by validators.
fn decode_signatures(
    value: &subxt::ext::scale_value::Value<u32>,
) -> BridgeResult<Vec<StellarSignature>> {
    let entries = match &value.value {
        ValueDef::Composite(Composite::Unnamed(entries)) => entries.as_slice(),
        ValueDef::Composite(Composite::Named(_)) => {
            return Err(BridgeError::SerializationError(
                "signature set is not a sequence".to_string(),
            ))
        }
        _ => &[],
    };
    entries
        .iter()
        .map(|entry| {
            Ok(StellarSignature {
                signer: named_string(entry, "stellar_pub_key")?,
                signature: named_string(entry, "signature")?,
            })
        })
        .collect()
}

#[async_trait]
impl SubClient for TfchainClient {
    fn account_id(&self) -> &AccountId32 {
        &self.account
    }

    async fn is_validator(&self) -> BridgeResult<bool> {
        let validators = self
            .fetch_storage(BRIDGE_PALLET, "Validators", vec![])
            .await?;
        let Some(validators) = validators else {
            return Ok(false);
        };
        let entries = match &validators.value {
            ValueDef::Composite(Composite::Unnamed(entries)) => entries.as_slice(),
            _ => return Ok(false),
        };
        Ok(entries.iter().any(|entry| {
            let mut bytes = Vec::new();
            value_to_bytes(entry, &mut bytes) && bytes == self.account.0
        }))
    }

    async fn subscribe_bridge_events(
        &self,
        cancel: CancellationToken,
    ) -> BridgeResult<mpsc::Receiver<BridgeEventBatch>> {
        let mut blocks = self
            .api
            .blocks()
            .subscribe_finalized()
            .await
            .map_err(rpc_err)?;
        let (batch_tx, batch_rx) = mpsc::channel(EVENT_CHANNEL_SIZE);

        tokio::spawn(async move {
            info!("subscribed to tfchain bridge events");
            loop {
                let block = tokio::select! {
                    _ = cancel.cancelled() => {
                        info!("tfchain event subscription cancelled");
                        return;
                    }
                    block = blocks.next() => block,
                };
                let block = match block {
                    Some(Ok(block)) => block,
                    Some(Err(e)) => {
                        error!("tfchain block subscription failed: {e}");
                        return;
                    }
                    None => {
                        warn!("tfchain block subscription ended");
                        return;
                    }
                };

                let height = block.number() as u64;
                let events = match block.events().await {
                    Ok(events) => events,
                    Err(e) => {
                        error!(height, "failed to fetch block events: {e}");
                        return;
                    }
                };

                let mut batch = BridgeEventBatch::new(height);
                for event in events.iter() {
                    let event = match event {
                        Ok(event) => event,
                        Err(e) => {
                            error!(height, "undecodable event: {e}");
                            return;
                        }
                    };
                    if event.pallet_name() != BRIDGE_PALLET {
                        continue;
                    }
                    let fields = match event.field_values() {
                        Ok(fields) => fields,
                        Err(e) => {
                            error!(height, "undecodable bridge event fields: {e}");
                            return;
                        }
                    };
                    match BridgeEvent::try_from_fields(event.variant_name(), &fields) {
                        Ok(Some(bridge_event)) => batch.push(bridge_event),
                        Ok(None) => {}
                        Err(e) => {
                            error!(height, variant = event.variant_name(), "bad bridge event: {e}");
                            return;
                        }
                    }
                }

                if !batch.is_empty() {
                    debug!(height, events = batch.len(), "bridge events observed");
                }
                if batch_tx.send(batch).await.is_err() {
                    return;
                }
            }
        });

        Ok(batch_rx)
    }

    async fn is_minted_already(&self, mint_id: &str) -> BridgeResult<bool> {
        self.storage_contains(
            "ExecutedMintTransactions",
            vec![Value::from_bytes(mint_id.as_bytes())],
        )
        .await
    }

    async fn is_refunded_already(&self, tx_hash: &str) -> BridgeResult<bool> {
        self.storage_contains(
            "ExecutedRefundTransactions",
            vec![Value::from_bytes(tx_hash.as_bytes())],
        )
        .await
    }

    async fn is_burned_already(&self, burn_id: u64) -> BridgeResult<bool> {
        self.storage_contains(
            "ExecutedWithdrawTransactions",
            vec![Value::u128(burn_id as u128)],
        )
        .await
    }

    async fn propose_or_vote_mint_transaction(
        &self,
        mint_id: &str,
        target: &AccountId32,
        amount: u64,
    ) -> BridgeResult<String> {
        self.call(
            "propose_or_vote_mint_transaction",
            vec![
                Value::from_bytes(mint_id.as_bytes()),
                account_value(target),
                Value::u128(amount as u128),
            ],
        )
        .await
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
        let mut fields = vec![
            Value::u128(burn_id as u128),
            Value::from_bytes(target.as_bytes()),
            Value::u128(amount as u128),
        ];
        fields.extend(signature_fields(signature, stellar_address, sequence_number));
        self.call("propose_burn_transaction_or_add_sig", fields).await
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
        let mut fields = vec![
            Value::from_bytes(tx_hash.as_bytes()),
            Value::from_bytes(target.as_bytes()),
            Value::u128(amount as u128),
        ];
        fields.extend(signature_fields(signature, stellar_address, sequence_number));
        self.call("create_refund_transaction_or_add_sig", fields)
            .await
    }

    async fn set_burn_transaction_executed(&self, burn_id: u64) -> BridgeResult<String> {
        self.call(
            "set_burn_transaction_executed",
            vec![Value::u128(burn_id as u128)],
        )
        .await
    }

    async fn set_refund_transaction_executed(&self, tx_hash: &str) -> BridgeResult<String> {
        self.call(
            "set_refund_transaction_executed",
            vec![Value::from_bytes(tx_hash.as_bytes())],
        )
        .await
    }

    async fn get_burn_transaction(&self, burn_id: u64) -> BridgeResult<BurnTransaction> {
        let value = self
            .fetch_storage(
                BRIDGE_PALLET,
                "WithdrawTransactions",
                vec![Value::u128(burn_id as u128)],
            )
            .await?
            .ok_or_else(|| {
                BridgeError::SubstrateRpcError(format!("burn transaction {burn_id} not found"))
            })?;
        Ok(BurnTransaction {
            id: burn_id,
            target: named_string(&value, "target")?,
            amount: named_u64(&value, "amount")?,
            signatures: decode_signatures(named_field(&value, "signatures")?)?,
            sequence_number: named_u64(&value, "sequence_number")? as i64,
        })
    }

    async fn get_refund_transaction(&self, tx_hash: &str) -> BridgeResult<RefundTransaction> {
        let value = self
            .fetch_storage(
                BRIDGE_PALLET,
                "RefundTransactions",
                vec![Value::from_bytes(tx_hash.as_bytes())],
            )
            .await?
            .ok_or_else(|| {
                BridgeError::SubstrateRpcError(format!("refund transaction {tx_hash} not found"))
            })?;
        Ok(RefundTransaction {
            tx_hash: tx_hash.to_string(),
            target: named_string(&value, "target")?,
            amount: named_u64(&value, "amount")?,
            signatures: decode_signatures(named_field(&value, "signatures")?)?,
            sequence_number: named_u64(&value, "sequence_number")? as i64,
        })
    }

    async fn get_deposit_fee(&self) -> BridgeResult<u64> {
        let value = self
            .fetch_storage(BRIDGE_PALLET, "DepositFee", vec![])
            .await?
            .ok_or_else(|| BridgeError::SubstrateRpcError("deposit fee unset".to_string()))?;
        value_to_u64(&value).ok_or_else(|| {
            BridgeError::SerializationError("deposit fee is not an integer".to_string())
        })
    }

    async fn get_twin_account(&self, twin_id: u32) -> BridgeResult<AccountId32> {
        let value = self
            .fetch_storage(GRID_PALLET, "Twins", vec![Value::u128(twin_id as u128)])
            .await?
            .ok_or_else(|| BridgeError::InvalidMemo(format!("twin {twin_id} not found")))?;
        named_account(&value, "account_id")
    }

    async fn get_farm_twin_id(&self, farm_id: u32) -> BridgeResult<u32> {
        let value = self
            .fetch_storage(GRID_PALLET, "Farms", vec![Value::u128(farm_id as u128)])
            .await?
            .ok_or_else(|| BridgeError::InvalidMemo(format!("farm {farm_id} not found")))?;
        Ok(named_u64(&value, "twin_id")? as u32)
    }

    async fn get_node_twin_id(&self, node_id: u32) -> BridgeResult<u32> {
        let value = self
            .fetch_storage(GRID_PALLET, "Nodes", vec![Value::u128(node_id as u128)])
            .await?
            .ok_or_else(|| BridgeError::InvalidMemo(format!("node {node_id} not found")))?;
        Ok(named_u64(&value, "twin_id")? as u32)
    }

    async fn get_entity_account(&self, entity_id: u32) -> BridgeResult<AccountId32> {
        let value = self
            .fetch_storage(GRID_PALLET, "Entities", vec![Value::u128(entity_id as u128)])
            .await?
            .ok_or_else(|| BridgeError::InvalidMemo(format!("entity {entity_id} not found")))?;
        named_account(&value, "account_id")
    }
}
