//! Flush state machine over the pending queue.
//!
//! Four things trigger a flush: the queue reaching the batch size, the
//! periodic timer, the page being hidden or unloaded, and scheduled retries.
//! Only one batch is ever in flight. A flush requested while another is in
//! flight is remembered and served once the running flight succeeds.
//!
//! On failure the batch goes back to the front of the queue and the shared
//! retry counter grows. While the counter is within the configured attempts
//! a retry is scheduled after `retry_delay * retry_count`; past that the
//! batch waits for the next timer tick or size trigger. Any success resets
//! the counter.

use crate::collector::types::EventRecord;
use crate::config::BatchConfig;
use crate::core::queue::EventQueue;
use crate::delivery::SharedDeliveryLog;
use crate::transport::Transport;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Result of one flush request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Nothing was queued
    Empty,
    /// Another flush was in flight; this request was folded into it
    Coalesced,
    /// Every batch sent by this flight was accepted
    Delivered { batches: usize, records: usize },
    /// A batch was rejected and put back at the front of the queue
    Failed {
        requeued: usize,
        retry_count: u32,
        /// Delay of the scheduled retry, `None` once attempts are exhausted
        retry_in: Option<Duration>,
    },
}

/// Result of draining the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainReport {
    pub delivered: usize,
    pub remaining: usize,
}

struct BatchState {
    queue: EventQueue,
    retry_count: u32,
    in_flight: bool,
    flush_pending: bool,
    stopped: bool,
    runtime: Option<Handle>,
    timer: Option<JoinHandle<()>>,
    retry_task: Option<JoinHandle<()>>,
}

enum Begin {
    Batch(Vec<EventRecord>),
    Busy,
    Empty,
}

/// Owns the queue, the retry counter and the timer handles of one tracker.
pub struct Batcher<T: Transport> {
    config: BatchConfig,
    transport: T,
    state: Mutex<BatchState>,
    flight: watch::Sender<bool>,
    log: SharedDeliveryLog,
}

impl<T: Transport> Batcher<T> {
    pub fn new(config: BatchConfig, transport: T, log: SharedDeliveryLog) -> Arc<Self> {
        let config = BatchConfig {
            size: config.size.max(1),
            ..config
        };
        let (flight, _) = watch::channel(false);

        Arc::new(Self {
            config,
            transport,
            state: Mutex::new(BatchState {
                queue: EventQueue::new(),
                retry_count: 0,
                in_flight: false,
                flush_pending: false,
                stopped: false,
                runtime: None,
                timer: None,
                retry_task: None,
            }),
            flight,
            log,
        })
    }

    fn state(&self) -> MutexGuard<'_, BatchState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Number of queued records.
    pub fn len(&self) -> usize {
        self.state().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state().queue.is_empty()
    }

    /// Consecutive failed attempts since the last success.
    pub fn retry_count(&self) -> u32 {
        self.state().retry_count
    }

    /// Whether a batch is currently being transmitted.
    pub fn in_flight(&self) -> bool {
        self.state().in_flight
    }

    /// Copy of the queued records, front first.
    pub fn pending(&self) -> Vec<EventRecord> {
        self.state().queue.iter().cloned().collect()
    }

    /// Whether the timer is running.
    pub fn is_started(&self) -> bool {
        self.state().runtime.is_some()
    }

    /// Attach to a runtime and start the periodic flush timer.
    pub fn start(self: &Arc<Self>, runtime: Handle) {
        let mut state = self.state();
        if state.runtime.is_some() {
            return;
        }

        if self.config.timeout.is_zero() {
            tracing::warn!("Batch timeout is zero; periodic flushing disabled");
        } else {
            let timer = runtime.spawn(run_timer(Arc::downgrade(self), self.config.timeout));
            state.timer = Some(timer);
        }
        state.runtime = Some(runtime);
        state.stopped = false;

        // Records queued before start may already fill a batch.
        if state.queue.len() >= self.config.size {
            self.kick(&mut state);
        }
    }

    /// Cancel the timer and any scheduled retry. Queued records stay queued,
    /// and a flight still running when this is called schedules no retry.
    pub fn stop(&self) {
        let mut state = self.state();
        state.stopped = true;
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
        if let Some(retry) = state.retry_task.take() {
            retry.abort();
        }
        state.runtime = None;
    }

    /// Discard everything still queued, recording it as dropped.
    pub fn discard(&self) -> usize {
        let dropped = self.state().queue.clear();
        if dropped > 0 {
            self.log.record_dropped(dropped as u64);
            tracing::warn!(dropped, "Discarding undelivered events");
        }
        dropped
    }

    /// Append a record. Reaching the batch size starts a flush right away
    /// once the batcher has been started.
    pub fn enqueue(self: &Arc<Self>, record: EventRecord) {
        let mut state = self.state();
        let len = state.queue.push(record);
        self.log.record_queued();

        if len >= self.config.size && state.runtime.is_some() {
            self.kick(&mut state);
        }
    }

    /// Flush and wait for the outcome.
    pub async fn flush(self: &Arc<Self>) -> FlushOutcome {
        let batch = {
            let mut state = self.state();
            match self.begin(&mut state) {
                Begin::Batch(batch) => batch,
                Begin::Busy => return FlushOutcome::Coalesced,
                Begin::Empty => return FlushOutcome::Empty,
            }
        };
        self.run_flight(batch).await
    }

    /// Start a flush without waiting for it. The batch leaves the queue
    /// before this returns; the network call may never complete.
    pub fn flush_detached(self: &Arc<Self>) {
        let mut state = self.state();
        self.kick(&mut state);
    }

    /// Flush repeatedly until the queue is empty or a batch fails.
    pub async fn drain(self: &Arc<Self>) -> DrainReport {
        let mut delivered = 0;
        loop {
            match self.flush().await {
                FlushOutcome::Delivered { records, .. } => delivered += records,
                FlushOutcome::Coalesced => {
                    let mut flight = self.flight.subscribe();
                    let _ = flight.wait_for(|busy| !*busy).await;
                }
                FlushOutcome::Empty | FlushOutcome::Failed { .. } => break,
            }
        }
        DrainReport {
            delivered,
            remaining: self.len(),
        }
    }

    fn begin(&self, state: &mut BatchState) -> Begin {
        if state.in_flight {
            state.flush_pending = true;
            return Begin::Busy;
        }
        if state.queue.is_empty() {
            return Begin::Empty;
        }
        state.in_flight = true;
        self.flight.send_replace(true);
        Begin::Batch(state.queue.take_batch(self.config.size))
    }

    fn end(&self, state: &mut BatchState) {
        state.in_flight = false;
        state.flush_pending = false;
        self.flight.send_replace(false);
    }

    /// Take a batch now and transmit it on the runtime.
    fn kick(self: &Arc<Self>, state: &mut BatchState) {
        if state.stopped {
            tracing::debug!("Batcher stopped; flush skipped");
            return;
        }
        let Some(runtime) = state.runtime.clone().or_else(|| Handle::try_current().ok()) else {
            tracing::warn!("No async runtime available; flush skipped");
            return;
        };
        if let Begin::Batch(batch) = self.begin(state) {
            let this = Arc::clone(self);
            runtime.spawn(async move {
                this.run_flight(batch).await;
            });
        }
    }

    async fn run_flight(self: &Arc<Self>, mut batch: Vec<EventRecord>) -> FlushOutcome {
        let mut batches = 0;
        let mut records = 0;

        loop {
            let result = self.transport.submit_batch(&batch).await;

            let mut state = self.state();
            match result {
                Ok(_) => {
                    state.retry_count = 0;
                    batches += 1;
                    records += batch.len();
                    self.log.record_batch_sent(batch.len() as u64);
                    tracing::debug!(batch_size = batch.len(), "Delivered event batch");

                    if state.flush_pending && !state.queue.is_empty() {
                        state.flush_pending = false;
                        batch = state.queue.take_batch(self.config.size);
                        continue;
                    }

                    self.end(&mut state);
                    return FlushOutcome::Delivered { batches, records };
                }
                Err(e) => {
                    let requeued = batch.len();
                    state.queue.requeue_front(batch);
                    state.retry_count += 1;
                    self.log.record_batch_failed();

                    let retry_count = state.retry_count;
                    // Attempts 1..=retry_attempts get the 1s/2s/3s schedule.
                    let retry_in = if retry_count <= self.config.retry_attempts {
                        let delay = self.config.retry_delay_for(retry_count);
                        self.schedule_retry(&mut state, delay).then_some(delay)
                    } else {
                        None
                    };

                    tracing::warn!(
                        error = %e,
                        batch_size = requeued,
                        retry_count,
                        retry_in_ms = retry_in.map(|d| d.as_millis() as u64),
                        "Failed to send event batch; re-queued"
                    );

                    self.end(&mut state);
                    return FlushOutcome::Failed {
                        requeued,
                        retry_count,
                        retry_in,
                    };
                }
            }
        }
    }

    /// Returns whether a retry task was spawned.
    fn schedule_retry(self: &Arc<Self>, state: &mut BatchState, delay: Duration) -> bool {
        if state.stopped {
            return false;
        }
        let Some(runtime) = state.runtime.clone().or_else(|| Handle::try_current().ok()) else {
            return false;
        };
        if let Some(previous) = state.retry_task.take() {
            previous.abort();
        }

        let batcher = Arc::downgrade(self);
        state.retry_task = Some(runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(batcher) = batcher.upgrade() else {
                return;
            };
            // Release our own slot so a failure below does not abort this task.
            drop(batcher.state().retry_task.take());
            batcher.flush().await;
        }));
        self.log.record_retry_scheduled();
        true
    }
}

impl<T: Transport> Drop for Batcher<T> {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
        if let Some(retry) = state.retry_task.take() {
            retry.abort();
        }
    }
}

async fn run_timer<T: Transport>(batcher: Weak<Batcher<T>>, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        ticker.tick().await;
        let Some(batcher) = batcher.upgrade() else {
            break;
        };
        if !batcher.is_empty() {
            batcher.flush().await;
        }
    }
}
