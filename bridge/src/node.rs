// Copyright (c) ThreeFold Tech
// SPDX-License-Identifier: Apache-2.0

use crate::bridge::Bridge;
use crate::config::BridgeNodeConfig;
use crate::error::BridgeError;
use crate::metrics::BridgeMetrics;
use crate::persist::ChainPersistency;
use crate::stellar_wallet::{BridgeWallet, StellarWallet};
use crate::tfchain_client::{SubClient, TfchainClient};
use crate::types::BRIDGE_NETWORK;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Wire the clients, enforce the validator self-check, start the two event
/// producers and run the coordinator until cancellation or a fatal error.
pub async fn run_bridge_node(
    config: BridgeNodeConfig,
    registry: &prometheus::Registry,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let metrics = Arc::new(BridgeMetrics::new(registry));

    let sub_client = Arc::new(TfchainClient::new(&config.tfchain_url, &config.tfchain_seed).await?);
    if !sub_client.is_validator().await? {
        return Err(BridgeError::NotAValidator.into());
    }

    let wallet = Arc::new(StellarWallet::new(
        &config.stellar.horizon_url,
        config.stellar.stellar_network,
        &config.stellar.stellar_seed,
        &config.stellar.bridge_account,
    )?);
    info!(
        validator = %sub_client.account_id(),
        stellar_address = wallet.address(),
        "validator self-check passed for {BRIDGE_NETWORK} bridge"
    );

    let persistency = ChainPersistency::new(&config.persistency_file);
    if config.rescan_bridge_account {
        // Resetting the cursor re-presents every payment ever made to the
        // custody account; the on-chain mint gate absorbs the replays.
        info!("rescan requested, resetting stellar cursor and tfchain height");
        persistency.save_stellar_cursor("0")?;
        persistency.save_height(0)?;
    }

    let deposit_fee = sub_client.get_deposit_fee().await?;
    info!(deposit_fee, "fetched configured deposit fee");

    let snapshot = persistency.get_height()?;
    info!("starting stellar subscription from cursor {:?}", snapshot.stellar_cursor);
    let mint_rx = wallet
        .monitor_bridge_account(cancel.clone(), snapshot.stellar_cursor)
        .await?;

    info!("starting tfchain subscription");
    let tfchain_rx = sub_client.subscribe_bridge_events(cancel.clone()).await?;

    let bridge = Bridge::new(wallet, sub_client, persistency, deposit_fee, metrics);
    bridge.run(cancel, tfchain_rx, mint_rx).await?;
    Ok(())
}
