// Copyright (c) ThreeFold Tech
// SPDX-License-Identifier: Apache-2.0

pub mod bridge;
pub mod config;
pub mod encoding;
pub mod error;
pub mod events;
pub mod horizon;
pub mod memo;
pub mod metrics;
pub mod node;
pub mod persist;
pub mod server;
pub mod stellar_tx;
pub mod stellar_wallet;
pub mod tfchain_client;
pub mod types;

#[cfg(test)]
pub mod stellar_wallet_mock;

#[cfg(test)]
pub mod tfchain_client_mock;

#[macro_export]
macro_rules! retry_with_max_elapsed_time {
    ($func:expr, $max_elapsed_time:expr) => {{
        // The following delay sequence (in secs) will be used, applied with jitter
        // 0.4, 0.8, 1.6, 3.2, 6.4, 12.8, 25.6, 30, 60, 120, 120 ...
        let backoff = backoff::ExponentialBackoff {
            initial_interval: Duration::from_millis(400),
            randomization_factor: 0.1,
            multiplier: 2.0,
            max_interval: Duration::from_secs(120),
            max_elapsed_time: Some($max_elapsed_time),
            ..Default::default()
        };
        backoff::future::retry(backoff, || {
            let fut = async {
                let result = $func.await;
                match result {
                    Ok(_) => {
                        return Ok(result);
                    }
                    Err(e) => {
                        // For simplicity we treat every error as transient so we can retry until max_elapsed_time
                        tracing::debug!("Retrying due to error: {:?}", e);
                        return Err(backoff::Error::transient(e));
                    }
                }
            };
            std::boxed::Box::pin(fut)
        })
        .await
    }};
}
