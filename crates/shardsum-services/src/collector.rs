//! Result collector: the meeting point for a known number of block results.
//!
//! Sized at construction to the number of blocks in the batch. Tasks
//! report concurrently; the coordinator waits once and receives every
//! result, in arrival order.

use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use shardsum_core::BlockResult;
use tokio::sync::watch;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CollectorError {
    #[error("collector already holds all {expected} expected results")]
    Overflow { expected: usize },
    #[error("results were already drained")]
    AlreadyDrained,
    #[error("timed out with {received} of {expected} results")]
    Timeout { received: usize, expected: usize },
}

struct State {
    received: Vec<BlockResult>,
    /// Total reports accepted. Unlike `received.len()` this survives the drain.
    count: usize,
    drained: bool,
}

pub struct ResultCollector {
    expected: usize,
    state: Mutex<State>,
    count_tx: watch::Sender<usize>,
}

impl ResultCollector {
    pub fn new(expected: usize) -> Self {
        let (count_tx, _) = watch::channel(0);
        Self {
            expected,
            state: Mutex::new(State {
                received: Vec::with_capacity(expected),
                count: 0,
                drained: false,
            }),
            count_tx,
        }
    }

    pub fn expected(&self) -> usize {
        self.expected
    }

    /// Reports accepted so far.
    pub fn received(&self) -> usize {
        self.lock().count
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // A panic while holding the lock cannot leave `State` half-written.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Accept one result. Safe to call from many tasks at once.
    ///
    /// The append and the count publish happen under the same lock, so a
    /// waiter can never observe the final count before the final result
    /// is stored.
    pub fn report(&self, result: BlockResult) -> Result<(), CollectorError> {
        let mut state = self.lock();
        if state.count >= self.expected {
            tracing::warn!(
                expected = self.expected,
                offset = result.offset(),
                "result rejected, collector is full"
            );
            return Err(CollectorError::Overflow {
                expected: self.expected,
            });
        }
        state.received.push(result);
        state.count += 1;
        self.count_tx.send_replace(state.count);
        Ok(())
    }

    /// Wait until every expected result has arrived, then take them all.
    ///
    /// Returns immediately when zero results are expected. With no timeout
    /// this waits forever if a task never reports.
    pub async fn wait_for_all(&self) -> Result<Vec<BlockResult>, CollectorError> {
        let mut count_rx = self.count_tx.subscribe();
        let expected = self.expected;
        // The sender lives in `self`, so the channel cannot close while we wait.
        let _ = count_rx.wait_for(|count| *count >= expected).await;
        self.drain()
    }

    /// `wait_for_all` bounded by `timeout`.
    pub async fn wait_for_all_timeout(
        &self,
        timeout: Duration,
    ) -> Result<Vec<BlockResult>, CollectorError> {
        match tokio::time::timeout(timeout, self.wait_for_all()).await {
            Ok(results) => results,
            Err(_) => Err(CollectorError::Timeout {
                received: self.received(),
                expected: self.expected,
            }),
        }
    }

    fn drain(&self) -> Result<Vec<BlockResult>, CollectorError> {
        let mut state = self.lock();
        if state.drained {
            return Err(CollectorError::AlreadyDrained);
        }
        state.drained = true;
        Ok(std::mem::take(&mut state.received))
    }
}
