//! Retry scheduler.
//!
//! Failed batches with attempts left are parked here until their backoff
//! elapses, ordered by sequence so the oldest batch of the partition goes
//! back out first. Batches out of attempts come back as exhausted.

use crate::batch::RecordBatch;
use crate::error::ProducerError;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

/// Exponential backoff: `initial * 2^(retry - 1)`, capped at `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self { initial, max }
    }

    /// Delay before retry number `retry` (1-based).
    pub fn delay(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(31);
        self.initial.saturating_mul(1u32 << exponent).min(self.max)
    }
}

/// What happened to a failed batch.
#[derive(Debug)]
pub enum RetryDecision {
    /// The batch will be sent again at `ready_at`.
    Scheduled {
        sequence: u64,
        /// The attempt number the retry will be
        next_attempt: u32,
        delay: Duration,
        ready_at: Instant,
        error: ProducerError,
    },
    /// No attempts left. Every record of the batch fails with `error`.
    Exhausted {
        batch: RecordBatch,
        error: ProducerError,
    },
}

#[derive(Debug)]
struct ScheduledRetry {
    batch: RecordBatch,
    ready_at: Instant,
}

/// Parks failed batches until they may be re-sent.
#[derive(Debug)]
pub struct RetryScheduler {
    max_retries: u32,
    backoff: Backoff,
    pending: VecDeque<ScheduledRetry>,
}

impl RetryScheduler {
    pub fn new(max_retries: u32, backoff: Backoff) -> Self {
        Self {
            max_retries,
            backoff,
            pending: VecDeque::new(),
        }
    }

    /// Handle a failed send of `batch`.
    ///
    /// A batch may be sent `max_retries + 1` times in total.
    pub fn on_failure(&mut self, batch: RecordBatch, reason: String, now: Instant) -> RetryDecision {
        let attempts = batch.attempts();
        if attempts > self.max_retries {
            return RetryDecision::Exhausted {
                batch,
                error: ProducerError::TerminalSendFailure { attempts, reason },
            };
        }

        let delay = self.backoff.delay(attempts);
        let ready_at = now + delay;
        let sequence = batch.sequence();
        let position = self
            .pending
            .iter()
            .position(|scheduled| scheduled.batch.sequence() > sequence)
            .unwrap_or(self.pending.len());
        self.pending
            .insert(position, ScheduledRetry { batch, ready_at });

        RetryDecision::Scheduled {
            sequence,
            next_attempt: attempts + 1,
            delay,
            ready_at,
            error: ProducerError::TransientSendFailure(reason),
        }
    }

    /// The oldest parked batch, if its backoff has elapsed.
    pub fn pop_ready(&mut self, now: Instant) -> Option<RecordBatch> {
        if self.pending.front()?.ready_at <= now {
            self.pending.pop_front().map(|scheduled| scheduled.batch)
        } else {
            None
        }
    }

    /// When the oldest parked batch becomes ready.
    pub fn next_ready_at(&self) -> Option<Instant> {
        self.pending.front().map(|scheduled| scheduled.ready_at)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub(crate) fn clear(&mut self) {
        self.pending.clear();
    }
}
