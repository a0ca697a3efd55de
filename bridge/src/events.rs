// Copyright (c) ThreeFold Tech
// SPDX-License-Identifier: Apache-2.0

//! Bridge events emitted by the tfchain runtime, decoded from the dynamic
//! event values of finalized blocks. Each variant drives one arm of the
//! transfer state machine.

use crate::error::{BridgeError, BridgeResult};
use subxt::ext::scale_value::{Composite, Primitive, Value, ValueDef};
use subxt::utils::AccountId32;

/// Pallet that owns the bridge storage, calls and events.
pub const BRIDGE_PALLET: &str = "TFTBridgeModule";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WithdrawCreated {
    pub id: u64,
    pub source: AccountId32,
    pub target: String,
    pub amount: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WithdrawExpired {
    pub id: u64,
    pub target: String,
    pub amount: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WithdrawReady {
    pub id: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefundReady {
    pub hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefundExpired {
    pub hash: String,
    pub target: String,
    pub amount: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeEvent {
    WithdrawCreated(WithdrawCreated),
    WithdrawExpired(WithdrawExpired),
    WithdrawReady(WithdrawReady),
    RefundReady(RefundReady),
    RefundExpired(RefundExpired),
}

/// All bridge events of one finalized block, split per variant so the
/// coordinator can process them in the mandated order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BridgeEventBatch {
    pub height: u64,
    pub withdraw_created: Vec<WithdrawCreated>,
    pub withdraw_expired: Vec<WithdrawExpired>,
    pub withdraw_ready: Vec<WithdrawReady>,
    pub refund_ready: Vec<RefundReady>,
    pub refund_expired: Vec<RefundExpired>,
}

impl BridgeEventBatch {
    pub fn new(height: u64) -> Self {
        Self {
            height,
            ..Default::default()
        }
    }

    pub fn push(&mut self, event: BridgeEvent) {
        match event {
            BridgeEvent::WithdrawCreated(e) => self.withdraw_created.push(e),
            BridgeEvent::WithdrawExpired(e) => self.withdraw_expired.push(e),
            BridgeEvent::WithdrawReady(e) => self.withdraw_ready.push(e),
            BridgeEvent::RefundReady(e) => self.refund_ready.push(e),
            BridgeEvent::RefundExpired(e) => self.refund_expired.push(e),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.withdraw_created.is_empty()
            && self.withdraw_expired.is_empty()
            && self.withdraw_ready.is_empty()
            && self.refund_ready.is_empty()
            && self.refund_expired.is_empty()
    }

    pub fn len(&self) -> usize {
        self.withdraw_created.len()
            + self.withdraw_expired.len()
            + self.withdraw_ready.len()
            + self.refund_ready.len()
            + self.refund_expired.len()
    }
}

impl BridgeEvent {
    /// Decode a runtime event of the bridge pallet. Returns `None` for
    /// variants the daemon does not act on (fee changes, validator set
    /// updates and the like).
    pub fn try_from_fields(
        variant: &str,
        fields: &Composite<u32>,
    ) -> BridgeResult<Option<BridgeEvent>> {
        let event = match variant {
            "WithdrawTransactionCreated" => Some(BridgeEvent::WithdrawCreated(WithdrawCreated {
                id: field_u64(fields, 0, variant)?,
                source: field_account(fields, 1, variant)?,
                target: field_string(fields, 2, variant)?,
                amount: field_u64(fields, 3, variant)?,
            })),
            "WithdrawTransactionExpired" => Some(BridgeEvent::WithdrawExpired(WithdrawExpired {
                id: field_u64(fields, 0, variant)?,
                target: field_string(fields, 1, variant)?,
                amount: field_u64(fields, 2, variant)?,
            })),
            "WithdrawTransactionReady" => Some(BridgeEvent::WithdrawReady(WithdrawReady {
                id: field_u64(fields, 0, variant)?,
            })),
            "RefundTransactionReady" => Some(BridgeEvent::RefundReady(RefundReady {
                hash: field_string(fields, 0, variant)?,
            })),
            "RefundTransactionExpired" => Some(BridgeEvent::RefundExpired(RefundExpired {
                hash: field_string(fields, 0, variant)?,
                target: field_string(fields, 1, variant)?,
                amount: field_u64(fields, 2, variant)?,
            })),
            _ => None,
        };
        Ok(event)
    }
}

fn composite_values<'a>(fields: &'a Composite<u32>) -> Vec<&'a Value<u32>> {
    match fields {
        Composite::Named(named) => named.iter().map(|(_, value)| value).collect(),
        Composite::Unnamed(values) => values.iter().collect(),
    }
}

fn field<'a>(
    fields: &'a Composite<u32>,
    index: usize,
    variant: &str,
) -> BridgeResult<&'a Value<u32>> {
    composite_values(fields).get(index).copied().ok_or_else(|| {
        BridgeError::SerializationError(format!("{variant}: missing field {index}"))
    })
}

/// Collect a value tree into raw bytes. AccountId and Vec<u8> fields both
/// arrive as (possibly nested) composites of u8 primitives.
pub(crate) fn value_to_bytes(value: &Value<u32>, out: &mut Vec<u8>) -> bool {
    match &value.value {
        ValueDef::Primitive(Primitive::U128(byte)) if *byte <= u8::MAX as u128 => {
            out.push(*byte as u8);
            true
        }
        ValueDef::Composite(inner) => composite_values(inner)
            .into_iter()
            .all(|v| value_to_bytes(v, out)),
        _ => false,
    }
}

pub(crate) fn value_to_u64(value: &Value<u32>) -> Option<u64> {
    match &value.value {
        ValueDef::Primitive(Primitive::U128(n)) => u64::try_from(*n).ok(),
        _ => None,
    }
}

fn field_u64(fields: &Composite<u32>, index: usize, variant: &str) -> BridgeResult<u64> {
    value_to_u64(field(fields, index, variant)?).ok_or_else(|| {
        BridgeError::SerializationError(format!("{variant}: field {index} is not an integer"))
    })
}

fn field_bytes(fields: &Composite<u32>, index: usize, variant: &str) -> BridgeResult<Vec<u8>> {
    let mut bytes = Vec::new();
    if value_to_bytes(field(fields, index, variant)?, &mut bytes) {
        Ok(bytes)
    } else {
        Err(BridgeError::SerializationError(format!(
            "{variant}: field {index} is not a byte sequence"
        )))
    }
}

fn field_string(fields: &Composite<u32>, index: usize, variant: &str) -> BridgeResult<String> {
    String::from_utf8(field_bytes(fields, index, variant)?).map_err(|_| {
        BridgeError::SerializationError(format!("{variant}: field {index} is not utf-8"))
    })
}

fn field_account(
    fields: &Composite<u32>,
    index: usize,
    variant: &str,
) -> BridgeResult<AccountId32> {
    let bytes = field_bytes(fields, index, variant)?;
    let raw: [u8; 32] = bytes.try_into().map_err(|_| {
        BridgeError::SerializationError(format!("{variant}: field {index} is not an account id"))
    })?;
    Ok(AccountId32::from(raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use subxt::ext::scale_value::Value;

    fn bytes_value(data: &[u8]) -> Value<u32> {
        Value::unnamed_composite(data.iter().map(|b| Value::u128(*b as u128))).map_context(|_| 0)
    }

    fn u64_value(n: u64) -> Value<u32> {
        Value::u128(n as u128).map_context(|_| 0)
    }

    #[test]
    fn test_decode_withdraw_created() {
        let fields = Composite::Unnamed(vec![
            u64_value(7),
            bytes_value(&[9u8; 32]),
            bytes_value(b"GTARGET"),
            u64_value(1000),
        ]);
        let event = BridgeEvent::try_from_fields("WithdrawTransactionCreated", &fields)
            .unwrap()
            .unwrap();
        match event {
            BridgeEvent::WithdrawCreated(e) => {
                assert_eq!(e.id, 7);
                assert_eq!(e.source, AccountId32::from([9u8; 32]));
                assert_eq!(e.target, "GTARGET");
                assert_eq!(e.amount, 1000);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_decode_refund_expired() {
        let fields = Composite::Unnamed(vec![
            bytes_value(b"cafebabe"),
            bytes_value(b"GDEST"),
            u64_value(500_000),
        ]);
        let event = BridgeEvent::try_from_fields("RefundTransactionExpired", &fields)
            .unwrap()
            .unwrap();
        assert_eq!(
            event,
            BridgeEvent::RefundExpired(RefundExpired {
                hash: "cafebabe".to_string(),
                target: "GDEST".to_string(),
                amount: 500_000,
            })
        );
    }

    #[test]
    fn test_unknown_variant_is_skipped() {
        let fields = Composite::Unnamed(vec![]);
        assert_eq!(
            BridgeEvent::try_from_fields("WithdrawFeeSet", &fields).unwrap(),
            None
        );
    }

    #[test]
    fn test_missing_field_is_an_error() {
        let fields = Composite::Unnamed(vec![u64_value(1)]);
        let err = BridgeEvent::try_from_fields("WithdrawTransactionExpired", &fields).unwrap_err();
        assert_eq!(err.error_type(), "serialization_error");
    }

    #[test]
    fn test_batch_split_and_counts() {
        let mut batch = BridgeEventBatch::new(40);
        assert!(batch.is_empty());
        batch.push(BridgeEvent::WithdrawReady(WithdrawReady { id: 1 }));
        batch.push(BridgeEvent::RefundReady(RefundReady {
            hash: "aa".to_string(),
        }));
        batch.push(BridgeEvent::WithdrawReady(WithdrawReady { id: 2 }));
        assert_eq!(batch.len(), 3);
        assert_eq!(batch.withdraw_ready.len(), 2);
        assert_eq!(batch.refund_ready.len(), 1);
        assert_eq!(batch.height, 40);
    }
}
