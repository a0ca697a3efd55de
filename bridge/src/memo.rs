// Copyright (c) ThreeFold Tech
// SPDX-License-Identifier: Apache-2.0

//! Deposit memo classifier. A deposit carries a text memo `<kind>_<id>`
//! naming the grid object whose twin account receives the minted tokens.
//! Anything that does not parse routes the deposit to the refund path.

use crate::error::{BridgeError, BridgeResult};
use crate::tfchain_client::SubClient;
use std::str::FromStr;
use subxt::utils::AccountId32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepositMemo {
    Twin(u32),
    Farm(u32),
    Node(u32),
    Entity(u32),
}

impl FromStr for DepositMemo {
    type Err = BridgeError;

    fn from_str(memo: &str) -> BridgeResult<Self> {
        let invalid = || BridgeError::InvalidMemo(memo.to_string());
        let mut chunks = memo.split('_');
        let (kind, id) = match (chunks.next(), chunks.next(), chunks.next()) {
            (Some(kind), Some(id), None) => (kind, id),
            _ => return Err(invalid()),
        };
        let id: u32 = id.parse().map_err(|_| invalid())?;
        match kind {
            "twin" => Ok(DepositMemo::Twin(id)),
            "farm" => Ok(DepositMemo::Farm(id)),
            "node" => Ok(DepositMemo::Node(id)),
            "entity" => Ok(DepositMemo::Entity(id)),
            _ => Err(invalid()),
        }
    }
}

impl DepositMemo {
    /// Resolve the memo to the tfchain account that receives the mint.
    /// Farms and nodes resolve through the twin that manages them.
    pub async fn resolve<C: SubClient>(&self, client: &C) -> BridgeResult<AccountId32> {
        match *self {
            DepositMemo::Twin(id) => client.get_twin_account(id).await,
            DepositMemo::Farm(id) => {
                let twin_id = client.get_farm_twin_id(id).await?;
                client.get_twin_account(twin_id).await
            }
            DepositMemo::Node(id) => {
                let twin_id = client.get_node_twin_id(id).await?;
                client.get_twin_account(twin_id).await
            }
            DepositMemo::Entity(id) => client.get_entity_account(id).await,
        }
    }
}
