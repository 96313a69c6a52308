// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Ships one serialized batch to the downstream collector.
//!
//! Each attempt is a single POST with a per-request timeout. A transport error or any status
//! outside 2xx fails the attempt; the response body is read and discarded. Failed attempts are
//! retried after a fixed delay until the attempt budget is spent. Cancellation is checked before
//! every attempt and also interrupts an in-flight request or an inter-attempt sleep.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::CONTENT_TYPE;
use reqwest::{StatusCode, Url};
use std::error::Error;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::errors::DeliveryError;
use crate::http_utils::build_client;

/// A successful delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivered {
    /// Attempts made, including the successful one.
    pub attempts: u32,
    pub status: StatusCode,
}

#[async_trait]
pub trait BatchSender {
    /// Delivers `payload`, a JSON array of records, as one unit.
    async fn send(
        &self,
        cancel: &CancellationToken,
        payload: Bytes,
    ) -> Result<Delivered, DeliveryError>;
}

#[derive(Debug, Clone)]
pub struct DeliveryClient {
    client: reqwest::Client,
    endpoint: String,
    retry_attempts: u32,
    retry_delay: Duration,
}

impl DeliveryClient {
    pub fn new(config: &Config) -> Result<Self, Box<dyn Error>> {
        let client = build_client(config.request_timeout)?;
        Ok(DeliveryClient {
            client,
            endpoint: config.post_endpoint.clone(),
            retry_attempts: config.retry_attempts,
            retry_delay: config.retry_delay,
        })
    }

    fn endpoint_url(&self) -> Result<Url, DeliveryError> {
        let url = Url::parse(&self.endpoint).map_err(|e| {
            DeliveryError::RequestConstruction(format!("invalid endpoint {}: {e}", self.endpoint))
        })?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            scheme => Err(DeliveryError::RequestConstruction(format!(
                "unsupported scheme {scheme} in endpoint {}",
                self.endpoint
            ))),
        }
    }

    async fn attempt(&self, url: Url, payload: Bytes) -> Result<StatusCode, reqwest::Error> {
        let response = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .body(payload)
            .send()
            .await?;
        let status = response.status();
        if let Err(e) = response.bytes().await {
            warn!("Failed to read response body: {e}");
        }
        Ok(status)
    }
}

#[async_trait]
impl BatchSender for DeliveryClient {
    async fn send(
        &self,
        cancel: &CancellationToken,
        payload: Bytes,
    ) -> Result<Delivered, DeliveryError> {
        let url = self.endpoint_url()?;
        let start = Instant::now();
        let mut attempts = 0;

        while attempts < self.retry_attempts {
            if cancel.is_cancelled() {
                debug!("Delivery cancelled before attempt {}", attempts + 1);
                return Err(DeliveryError::Cancelled { attempts });
            }
            attempts += 1;

            let result = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    debug!("Delivery cancelled during attempt {attempts}");
                    return Err(DeliveryError::Cancelled { attempts });
                }
                result = self.attempt(url.clone(), payload.clone()) => result,
            };

            match result {
                Ok(status) if status.is_success() => {
                    info!(
                        status_code = status.as_u16(),
                        attempt = attempts,
                        duration_ms = start.elapsed().as_millis() as u64,
                        "Request sent successfully"
                    );
                    return Ok(Delivered { attempts, status });
                }
                Ok(status) => warn!(
                    status_code = status.as_u16(),
                    attempt = attempts,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Request failed to send"
                ),
                Err(e) if e.is_builder() => {
                    return Err(DeliveryError::RequestConstruction(e.to_string()));
                }
                Err(e) => warn!(attempt = attempts, "Failed to send request: {e}"),
            }

            if attempts < self.retry_attempts {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => {
                        debug!("Delivery cancelled while waiting to retry");
                        return Err(DeliveryError::Cancelled { attempts });
                    }
                    () = tokio::time::sleep(self.retry_delay) => {}
                }
            }
        }

        error!(
            "Failed to send request after {} ms and {} attempts",
            start.elapsed().as_millis(),
            attempts
        );
        Err(DeliveryError::RetriesExhausted { attempts })
    }
}
