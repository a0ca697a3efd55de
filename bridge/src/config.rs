// Copyright (c) ThreeFold Tech
// SPDX-License-Identifier: Apache-2.0

use crate::stellar_tx::StellarNetwork;
use anyhow::Result;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::path::{Path, PathBuf};

// Config file handling, YAML or JSON keyed on the file extension.
pub trait Config: Serialize + DeserializeOwned {
    fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let is_yaml = matches!(
            path.extension().and_then(|s| s.to_str()),
            Some("yaml") | Some("yml")
        );
        let config: Self = if is_yaml {
            serde_yaml::from_str(&content)?
        } else {
            serde_json::from_str(&content)?
        };
        Ok(config)
    }

    fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct StellarConfig {
    // Network the custody account lives on.
    pub stellar_network: StellarNetwork,
    // This validator's Stellar signing secret ("S...").
    pub stellar_seed: String,
    // The shared custody account ("G...").
    pub bridge_account: String,
    // Horizon API endpoint.
    pub horizon_url: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct BridgeNodeConfig {
    // Websocket endpoint of a tfchain node.
    pub tfchain_url: String,
    // Validator key material: a secret uri, mnemonic or hex seed.
    pub tfchain_seed: String,
    // Checkpoint file for the Stellar cursor and tfchain height.
    pub persistency_file: PathBuf,
    // Reset both checkpoints to zero at startup, re-scanning the custody
    // account's full history. Replays are absorbed on chain.
    #[serde(default)]
    pub rescan_bridge_account: bool,
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
    pub stellar: StellarConfig,
}

fn default_metrics_port() -> u16 {
    9184
}

impl Config for BridgeNodeConfig {}
