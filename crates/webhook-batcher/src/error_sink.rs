// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Single-slot conduit carrying the first unrecovered flush failure to the process.
//!
//! Only the first unread failure is kept. Later failures are logged and dropped while the slot
//! is occupied.

use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::warn;

use crate::errors::FlushError;

#[must_use]
pub fn channel() -> (ErrorSink, ErrorReceiver) {
    let (tx, rx) = mpsc::channel(1);
    (ErrorSink { tx }, ErrorReceiver { rx })
}

/// Writing half, owned by the flusher.
#[derive(Debug, Clone)]
pub struct ErrorSink {
    tx: mpsc::Sender<FlushError>,
}

impl ErrorSink {
    /// Stores `error` if the slot is free. Returns whether it was stored.
    pub fn report(&self, error: FlushError) -> bool {
        match self.tx.try_send(error) {
            Ok(()) => true,
            Err(TrySendError::Full(error)) => {
                warn!("Error channel is full, dropping: {error}");
                false
            }
            Err(TrySendError::Closed(error)) => {
                warn!("Error channel is closed, dropping: {error}");
                false
            }
        }
    }
}

/// Reading half, owned by the process shutdown path.
#[derive(Debug)]
pub struct ErrorReceiver {
    rx: mpsc::Receiver<FlushError>,
}

impl ErrorReceiver {
    /// Waits for a reported failure. Returns `None` once every sink is dropped.
    pub async fn recv(&mut self) -> Option<FlushError> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<FlushError> {
        self.rx.try_recv().ok()
    }
}
