// Copyright (c) ThreeFold Tech
// SPDX-License-Identifier: Apache-2.0

//! Domain types shared between the Stellar side and the tfchain side of the
//! bridge. Amounts are always stroops (1e-7 of a unit) on both ledgers.

use serde::{Deserialize, Serialize};

/// Bridge instance label reported to the tfchain runtime.
pub const BRIDGE_NETWORK: &str = "stellar";

/// Memo type of a Stellar transaction as reported by Horizon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoKind {
    None,
    Text,
    Id,
    Hash,
    Return,
}

impl MemoKind {
    pub fn parse(s: &str) -> MemoKind {
        match s {
            "text" => MemoKind::Text,
            "id" => MemoKind::Id,
            "hash" => MemoKind::Hash,
            "return" => MemoKind::Return,
            _ => MemoKind::None,
        }
    }
}

/// A single inbound payment to the custody account, as observed through the
/// wallet monitor. The transaction hash is globally unique on Stellar and is
/// the idempotency key for mints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentObservation {
    pub hash: String,
    pub memo_kind: MemoKind,
    pub memo: String,
    /// Opaque, monotonically ordered resume point in the payment stream.
    pub paging_token: String,
}

/// A deposit routed to the mint handler. Senders are kept in observation
/// order; a transaction aggregating several source accounts carries one
/// entry per distinct sender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MintEvent {
    pub senders: Vec<(String, u64)>,
    pub tx: PaymentObservation,
}

impl MintEvent {
    /// Total deposited amount across all senders, in stroops.
    pub fn amount(&self) -> u64 {
        self.senders.iter().map(|(_, amount)| amount).sum()
    }
}

/// One validator's contribution to a multi-signature Stellar envelope, as
/// stored in the tfchain bridge pallet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StellarSignature {
    /// strkey address of the signing validator
    pub signer: String,
    /// hex encoded 64-byte ed25519 signature over the envelope hash
    pub signature: String,
}

/// Accumulated multi-sig material for a burn, keyed by the chain-assigned
/// burn id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BurnTransaction {
    pub id: u64,
    pub target: String,
    pub amount: u64,
    pub signatures: Vec<StellarSignature>,
    pub sequence_number: i64,
}

/// Accumulated multi-sig material for a refund, keyed by the originating
/// Stellar deposit hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefundTransaction {
    pub tx_hash: String,
    pub target: String,
    pub amount: u64,
    pub signatures: Vec<StellarSignature>,
    pub sequence_number: i64,
}
