// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use thiserror::Error;

/// Terminal outcomes of a delivery that did not succeed.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// Shutdown was requested before or during an attempt. Not counted as a failure.
    #[error("delivery cancelled after {attempts} attempts")]
    Cancelled { attempts: u32 },

    #[error("failed to send request after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },

    /// The endpoint could not be turned into a request. Never retried.
    #[error("failed to create request: {0}")]
    RequestConstruction(String),
}

impl DeliveryError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, DeliveryError::Cancelled { .. })
    }
}

/// A batch that was dropped. This is what travels through the error sink.
#[derive(Debug, Error)]
pub enum FlushError {
    #[error("failed to marshal payload: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("delivery failed: {0}")]
    Delivery(#[from] DeliveryError),
}
