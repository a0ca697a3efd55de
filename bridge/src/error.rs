// Copyright (c) ThreeFold Tech
// SPDX-License-Identifier: Apache-2.0

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
    // A refund for this deposit hash is already executed on chain.
    // Treated as success by the mint retry loop.
    TransactionAlreadyRefunded(String),
    // A mint for this id is already executed on chain.
    TransactionAlreadyMinted(String),
    // A payout for this burn id is already executed on chain.
    TransactionAlreadyBurned(u64),
    // The configured account is not enrolled in the bridge validator set.
    NotAValidator,
    // A burn was flagged ready with an empty signature set.
    NoSignatures(u64),
    // Deposit memo could not be parsed or resolved.
    InvalidMemo(String),
    // Not a well-formed Stellar strkey address.
    InvalidStellarAddress(String),
    // Horizon API failure
    HorizonError(String),
    // Chain RPC failure
    SubstrateRpcError(String),
    // Persistency file failure
    StorageError(String),
    // Failure to encode/decode wire data
    SerializationError(String),
    // Uncategorized error
    Generic(String),
}

impl BridgeError {
    /// Returns a short string identifying the error type for metrics labels
    pub fn error_type(&self) -> &'static str {
        match self {
            BridgeError::TransactionAlreadyRefunded(_) => "already_refunded",
            BridgeError::TransactionAlreadyMinted(_) => "already_minted",
            BridgeError::TransactionAlreadyBurned(_) => "already_burned",
            BridgeError::NotAValidator => "not_a_validator",
            BridgeError::NoSignatures(_) => "no_signatures",
            BridgeError::InvalidMemo(_) => "invalid_memo",
            BridgeError::InvalidStellarAddress(_) => "invalid_stellar_address",
            BridgeError::HorizonError(_) => "horizon_error",
            BridgeError::SubstrateRpcError(_) => "substrate_rpc_error",
            BridgeError::StorageError(_) => "storage_error",
            BridgeError::SerializationError(_) => "serialization_error",
            BridgeError::Generic(_) => "generic",
        }
    }
}

impl fmt::Display for BridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BridgeError::TransactionAlreadyRefunded(hash) => {
                write!(f, "deposit {hash} is already refunded")
            }
            BridgeError::TransactionAlreadyMinted(id) => {
                write!(f, "mint {id} is already executed")
            }
            BridgeError::TransactionAlreadyBurned(id) => {
                write!(f, "burn {id} is already executed")
            }
            BridgeError::NotAValidator => {
                write!(f, "account is not a validator for the bridge runtime")
            }
            BridgeError::NoSignatures(id) => {
                write!(f, "burn {id} is ready with zero signatures")
            }
            BridgeError::InvalidMemo(memo) => write!(f, "invalid deposit memo: {memo}"),
            BridgeError::InvalidStellarAddress(addr) => {
                write!(f, "invalid stellar address: {addr}")
            }
            BridgeError::HorizonError(msg) => write!(f, "horizon error: {msg}"),
            BridgeError::SubstrateRpcError(msg) => write!(f, "tfchain rpc error: {msg}"),
            BridgeError::StorageError(msg) => write!(f, "storage error: {msg}"),
            BridgeError::SerializationError(msg) => write!(f, "serialization error: {msg}"),
            BridgeError::Generic(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for BridgeError {}

pub type BridgeResult<T> = Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    /// error_type values are used as Prometheus label values and must stay
    /// lowercase snake_case
    #[test]
    fn test_error_type_valid_prometheus_labels() {
        let errors = vec![
            BridgeError::TransactionAlreadyRefunded("ab".to_string()),
            BridgeError::TransactionAlreadyMinted("ab".to_string()),
            BridgeError::TransactionAlreadyBurned(1),
            BridgeError::NotAValidator,
            BridgeError::NoSignatures(9),
            BridgeError::InvalidMemo("x".to_string()),
            BridgeError::InvalidStellarAddress("x".to_string()),
            BridgeError::HorizonError("x".to_string()),
            BridgeError::SubstrateRpcError("x".to_string()),
            BridgeError::StorageError("x".to_string()),
            BridgeError::SerializationError("x".to_string()),
            BridgeError::Generic("x".to_string()),
        ];
        for error in errors {
            let error_type = error.error_type();
            assert!(!error_type.is_empty());
            for c in error_type.chars() {
                assert!(
                    c.is_ascii_lowercase() || c == '_',
                    "error_type '{}' contains invalid character '{}'",
                    error_type,
                    c
                );
            }
            assert!(!error_type.starts_with('_'));
            assert!(!error_type.ends_with('_'));
        }
    }

    #[test]
    fn test_error_type_payload_independence() {
        let err1 = BridgeError::HorizonError("short".to_string());
        let err2 = BridgeError::HorizonError("a much longer error message".to_string());
        assert_eq!(err1.error_type(), err2.error_type());
    }

    #[test]
    fn test_display_carries_identifier() {
        let err = BridgeError::NoSignatures(9);
        assert!(format!("{err}").contains('9'));
        let err = BridgeError::TransactionAlreadyRefunded("cafe".to_string());
        assert!(format!("{err}").contains("cafe"));
    }
}
