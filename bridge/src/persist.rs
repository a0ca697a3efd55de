// Copyright (c) ThreeFold Tech
// SPDX-License-Identifier: Apache-2.0

//! Durable checkpoint for the two resume points: the Stellar paging cursor
//! and the last processed tfchain block height. Both are advisory; the
//! on-chain idempotency markers remain the source of truth, so a stale
//! checkpoint only causes replays that the chain absorbs.

use crate::error::{BridgeError, BridgeResult};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Blockheight {
    #[serde(default)]
    pub last_height: u64,
    #[serde(default)]
    pub stellar_cursor: String,
}

#[derive(Debug)]
pub struct ChainPersistency {
    path: PathBuf,
}

impl ChainPersistency {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Read the checkpoint. A missing file yields zero-valued defaults so a
    /// fresh validator starts from the beginning of both streams.
    pub fn get_height(&self) -> BridgeResult<Blockheight> {
        match fs::read_to_string(&self.path) {
            Ok(content) => serde_json::from_str(&content)
                .map_err(|e| BridgeError::StorageError(format!("corrupt checkpoint: {e}"))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Blockheight::default()),
            Err(e) => Err(BridgeError::StorageError(e.to_string())),
        }
    }

    pub fn save_stellar_cursor(&self, cursor: &str) -> BridgeResult<()> {
        let mut snapshot = self.get_height()?;
        snapshot.stellar_cursor = cursor.to_string();
        self.save(&snapshot)
    }

    pub fn save_height(&self, height: u64) -> BridgeResult<()> {
        let mut snapshot = self.get_height()?;
        snapshot.last_height = height;
        self.save(&snapshot)
    }

    /// Write-to-temp, fsync, rename. The checkpoint is either the old
    /// snapshot or the new one, never a torn write.
    fn save(&self, snapshot: &Blockheight) -> BridgeResult<()> {
        let content = serde_json::to_string_pretty(snapshot)
            .map_err(|e| BridgeError::StorageError(e.to_string()))?;
        let tmp = self.tmp_path();
        let io_err = |e: std::io::Error| BridgeError::StorageError(e.to_string());

        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp)
            .map_err(io_err)?;
        file.write_all(content.as_bytes()).map_err(io_err)?;
        file.sync_all().map_err(io_err)?;
        drop(file);

        fs::rename(&tmp, &self.path).map_err(io_err)?;
        if let Some(dir) = self.path.parent() {
            // Persist the rename itself where the filesystem requires it
            if let Ok(dir_handle) = File::open(dir) {
                let _ = dir_handle.sync_all();
            }
        }
        Ok(())
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
