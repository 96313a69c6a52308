// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Background control loop that drains the aggregator and ships each batch.
//!
//! The loop waits on three events:
//! - cancellation: exit at once, without a final flush
//! - interval tick: flush
//! - flush request from the aggregator: flush, then restart the interval from now
//!
//! Deliveries are awaited inside the loop, so at most one batch is in flight and batches reach
//! the collector in the order they were drained.

use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::aggregator::{Aggregator, FlushSignal};
use crate::delivery::{BatchSender, Delivered};
use crate::error_sink::ErrorSink;
use crate::errors::FlushError;

pub struct Flusher {
    aggregator: Arc<Aggregator>,
    signal: FlushSignal,
    sender: Arc<dyn BatchSender + Send + Sync>,
    error_sink: ErrorSink,
    interval: Duration,
}

impl Flusher {
    pub fn new(
        aggregator: Arc<Aggregator>,
        signal: FlushSignal,
        sender: Arc<dyn BatchSender + Send + Sync>,
        error_sink: ErrorSink,
        interval: Duration,
    ) -> Self {
        Flusher {
            aggregator,
            signal,
            sender,
            error_sink,
            interval,
        }
    }

    /// Runs until `cancel` fires. Records still pending at that point are not flushed.
    pub async fn run(mut self, cancel: CancellationToken) {
        debug!("Flusher started, interval {:?}", self.interval);

        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut signal_open = true;

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    info!("Flushing buffer by ticker");
                    self.flush_and_report(&cancel).await;
                }
                triggered = self.signal.triggered(), if signal_open => {
                    if !triggered {
                        signal_open = false;
                        continue;
                    }
                    info!("Flushing buffer by batch");
                    self.flush_and_report(&cancel).await;
                    ticker.reset();
                }
            }
        }

        debug!(
            "Flusher stopped with {} records pending",
            self.aggregator.len()
        );
    }

    /// Drains the aggregator and delivers the batch.
    ///
    /// Returns `Ok(None)` when nothing was pending.
    pub async fn flush(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Option<Delivered>, FlushError> {
        let batch = self.aggregator.drain_all();
        if batch.is_empty() {
            info!("Buffer is empty, skipping flush");
            return Ok(None);
        }

        info!(size = batch.len(), "Processing buffer");
        let payload = Bytes::from(serde_json::to_vec(&batch)?);
        drop(batch);

        let delivered = self.sender.send(cancel, payload).await?;
        Ok(Some(delivered))
    }

    async fn flush_and_report(&self, cancel: &CancellationToken) {
        match self.flush(cancel).await {
            Ok(_) => {}
            Err(FlushError::Delivery(e)) if e.is_cancelled() => {
                debug!("Flush interrupted by shutdown, batch dropped");
            }
            Err(e) => {
                error!("Failed to flush batch: {e}");
                self.error_sink.report(e);
            }
        }
    }
}
