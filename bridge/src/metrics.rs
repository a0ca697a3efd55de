// Copyright (c) ThreeFold Tech
// SPDX-License-Identifier: Apache-2.0

use crate::error::BridgeError;
use prometheus::{
    register_int_counter_vec_with_registry, register_int_counter_with_registry,
    register_int_gauge_with_registry, IntCounter, IntCounterVec, IntGauge, Registry,
};

#[derive(Clone, Debug)]
pub struct BridgeMetrics {
    pub(crate) mints_proposed: IntCounter,
    pub(crate) mint_retries: IntCounter,
    pub(crate) refunds_initiated: IntCounter,
    pub(crate) refunds_executed: IntCounter,
    pub(crate) withdraws_signed: IntCounter,
    pub(crate) withdraws_executed: IntCounter,
    pub(crate) deposits_skipped: IntCounter,
    pub(crate) handler_errors_total: IntCounterVec,
    pub(crate) last_processed_height: IntGauge,
}

impl BridgeMetrics {
    pub fn new(registry: &Registry) -> Self {
        Self {
            mints_proposed: register_int_counter_with_registry!(
                "bridge_mints_proposed",
                "Total number of mint extrinsics proposed or voted",
                registry,
            )
            .unwrap(),
            mint_retries: register_int_counter_with_registry!(
                "bridge_mint_retries",
                "Total number of mint attempts that had to be retried",
                registry,
            )
            .unwrap(),
            refunds_initiated: register_int_counter_with_registry!(
                "bridge_refunds_initiated",
                "Total number of deposits routed to the refund path",
                registry,
            )
            .unwrap(),
            refunds_executed: register_int_counter_with_registry!(
                "bridge_refunds_executed",
                "Total number of refund payouts submitted to Stellar",
                registry,
            )
            .unwrap(),
            withdraws_signed: register_int_counter_with_registry!(
                "bridge_withdraws_signed",
                "Total number of burn payouts this validator co-signed",
                registry,
            )
            .unwrap(),
            withdraws_executed: register_int_counter_with_registry!(
                "bridge_withdraws_executed",
                "Total number of burn payouts submitted to Stellar",
                registry,
            )
            .unwrap(),
            deposits_skipped: register_int_counter_with_registry!(
                "bridge_deposits_skipped",
                "Total number of deposits skipped (already minted or return memo)",
                registry,
            )
            .unwrap(),
            handler_errors_total: register_int_counter_vec_with_registry!(
                "bridge_handler_errors_total",
                "Fatal handler errors by error type",
                &["error_type"],
                registry,
            )
            .unwrap(),
            last_processed_height: register_int_gauge_with_registry!(
                "bridge_last_processed_height",
                "Last tfchain block height whose bridge events were processed",
                registry,
            )
            .unwrap(),
        }
    }

    pub fn new_for_testing() -> Self {
        Self::new(&Registry::new())
    }

    pub fn handler_errors(&self, error: &BridgeError) {
        self.handler_errors_total
            .with_label_values(&[error.error_type()])
            .inc();
    }
}
