// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Pending-record buffer shared by every ingestion connection and drained by the flusher.
//!
//! Producers append under a short-held lock. The flusher takes the whole pending vector in one
//! swap, so lock hold time does not depend on batch size and records added while a batch is
//! being delivered always land in the next batch.
//!
//! When an append brings the pending count to the configured batch size, the aggregator posts a
//! flush request on a one-slot channel. Requests coalesce: while one is pending, further
//! requests are no-ops.

use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::trace;

use crate::record::Record;

/// Accumulates records until the flusher drains them.
///
/// # Example
///
/// ```rust
/// use webhook_batcher::aggregator::Aggregator;
/// use webhook_batcher::record::Record;
///
/// let (aggregator, _signal) = Aggregator::new(2);
/// aggregator.add(Record::new(Default::default()));
/// assert_eq!(aggregator.len(), 1);
///
/// let batch = aggregator.drain_all();
/// assert_eq!(batch.len(), 1);
/// assert!(aggregator.is_empty());
/// ```
#[derive(Debug)]
pub struct Aggregator {
    /// Records in insertion order.
    pending: Mutex<Vec<Record>>,

    /// Pending count at which a flush is requested. Also the capacity of a fresh buffer.
    batch_size: usize,

    /// Sending half of the one-slot flush request channel.
    flush_tx: mpsc::Sender<()>,
}

/// Receiving half of the flush request channel, owned by the flusher.
#[derive(Debug)]
pub struct FlushSignal {
    rx: mpsc::Receiver<()>,
}

impl FlushSignal {
    /// Waits for the next flush request.
    ///
    /// Returns `false` once the aggregator is dropped and no request can ever arrive.
    pub async fn triggered(&mut self) -> bool {
        self.rx.recv().await.is_some()
    }
}

impl Aggregator {
    #[must_use]
    pub fn new(batch_size: usize) -> (Self, FlushSignal) {
        let (flush_tx, rx) = mpsc::channel(1);
        let aggregator = Aggregator {
            pending: Mutex::new(Vec::with_capacity(batch_size)),
            batch_size,
            flush_tx,
        };
        (aggregator, FlushSignal { rx })
    }

    /// Appends a record. Never blocks on delivery and never fails.
    pub fn add(&self, record: Record) {
        let should_flush = {
            let mut pending = self.lock();
            pending.push(record);
            pending.len() >= self.batch_size
        };

        if should_flush {
            self.request_flush();
        }
    }

    /// Takes every pending record, leaving a fresh buffer sized for one batch.
    ///
    /// The returned vector may be empty.
    pub fn drain_all(&self) -> Vec<Record> {
        let fresh = Vec::with_capacity(self.batch_size);
        std::mem::replace(&mut *self.lock(), fresh)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    fn request_flush(&self) {
        match self.flush_tx.try_send(()) {
            Ok(()) => trace!("Batch size reached, flush requested"),
            // a request is already pending
            Err(TrySendError::Full(())) => {}
            Err(TrySendError::Closed(())) => trace!("Flusher stopped, flush request dropped"),
        }
    }

    // The vector is always left in a valid state, so a poisoned lock is still usable.
    fn lock(&self) -> MutexGuard<'_, Vec<Record>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Map, Value};
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    fn record(id: u64) -> Record {
        let mut fields = Map::new();
        fields.insert("id".to_string(), json!(id));
        Record::new(fields)
    }

    fn id_of(record: &Record) -> u64 {
        record.fields().get("id").and_then(Value::as_u64).unwrap()
    }

    #[test]
    fn test_drain_preserves_insertion_order() {
        let (aggregator, _signal) = Aggregator::new(100);
        for id in 0..5 {
            aggregator.add(record(id));
        }

        let batch = aggregator.drain_all();
        let ids: Vec<u64> = batch.iter().map(id_of).collect();
        assert_eq!(ids, vec![0, 1, 2, 3, 4]);
        assert!(aggregator.is_empty());
    }

    #[test]
    fn test_drain_empty_returns_empty_batch() {
        let (aggregator, _signal) = Aggregator::new(10);
        assert!(aggregator.drain_all().is_empty());
    }

    #[test]
    fn test_drain_leaves_buffer_sized_for_batch() {
        let (aggregator, _signal) = Aggregator::new(64);
        aggregator.add(record(1));
        let _ = aggregator.drain_all();
        assert!(aggregator.lock().capacity() >= 64);
    }

    #[tokio::test]
    async fn test_no_signal_below_threshold() {
        let (aggregator, mut signal) = Aggregator::new(3);
        aggregator.add(record(1));
        aggregator.add(record(2));

        assert!(signal.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_signal_at_threshold() {
        let (aggregator, mut signal) = Aggregator::new(3);
        for id in 0..3 {
            aggregator.add(record(id));
        }

        assert!(signal.triggered().await);
    }

    #[tokio::test]
    async fn test_signals_coalesce() {
        let (aggregator, mut signal) = Aggregator::new(2);
        // every add from the second one on is at or above the threshold
        for id in 0..10 {
            aggregator.add(record(id));
        }

        assert!(signal.rx.try_recv().is_ok());
        assert!(signal.rx.try_recv().is_err());
        assert_eq!(aggregator.len(), 10);
    }

    #[tokio::test]
    async fn test_signal_reports_closed_when_aggregator_dropped() {
        let (aggregator, mut signal) = Aggregator::new(2);
        drop(aggregator);
        assert!(!signal.triggered().await);
    }

    #[test]
    fn test_add_after_flusher_stopped() {
        let (aggregator, signal) = Aggregator::new(1);
        drop(signal);
        aggregator.add(record(1));
        assert_eq!(aggregator.len(), 1);
    }

    #[test]
    fn test_concurrent_add_and_drain_never_loses_or_duplicates() {
        const PRODUCERS: u64 = 8;
        const PER_PRODUCER: u64 = 500;

        let (aggregator, _signal) = Aggregator::new(16);
        let aggregator = Arc::new(aggregator);

        let producers: Vec<_> = (0..PRODUCERS)
            .map(|p| {
                let aggregator = Arc::clone(&aggregator);
                thread::spawn(move || {
                    for i in 0..PER_PRODUCER {
                        aggregator.add(record(p * PER_PRODUCER + i));
                    }
                })
            })
            .collect();

        let drainer = {
            let aggregator = Arc::clone(&aggregator);
            thread::spawn(move || {
                let mut drained = Vec::new();
                for _ in 0..200 {
                    drained.extend(aggregator.drain_all());
                    thread::yield_now();
                }
                drained
            })
        };

        for producer in producers {
            producer.join().unwrap();
        }
        let mut drained = drainer.join().unwrap();
        drained.extend(aggregator.drain_all());

        let total = (PRODUCERS * PER_PRODUCER) as usize;
        assert_eq!(drained.len(), total);
        let unique: HashSet<u64> = drained.iter().map(id_of).collect();
        assert_eq!(unique.len(), total);
    }

    #[test]
    fn test_per_producer_order_survives_interleaving() {
        let (aggregator, _signal) = Aggregator::new(4);
        let aggregator = Arc::new(aggregator);

        let producers: Vec<_> = (0..4u64)
            .map(|p| {
                let aggregator = Arc::clone(&aggregator);
                thread::spawn(move || {
                    for i in 0..100 {
                        aggregator.add(record(p * 1000 + i));
                    }
                })
            })
            .collect();
        for producer in producers {
            producer.join().unwrap();
        }

        let batch = aggregator.drain_all();
        for p in 0..4u64 {
            let ids: Vec<u64> = batch
                .iter()
                .map(id_of)
                .filter(|id| id / 1000 == p)
                .collect();
            let mut sorted = ids.clone();
            sorted.sort_unstable();
            assert_eq!(ids, sorted);
        }
    }
}
