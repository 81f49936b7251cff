//! Scripted transport for tracker tests.

use crate::collector::types::EventRecord;
use crate::transport::{
    BatchReceipt, BatchResponse, TrackReceipt, TrackResponse, Transport, TransportError,
};
use chrono::Utc;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

struct MockInner {
    attempts: Mutex<Vec<Vec<EventRecord>>>,
    delivered: Mutex<Vec<Vec<EventRecord>>>,
    failures_left: AtomicUsize,
    held: watch::Sender<bool>,
    calls: watch::Sender<usize>,
}

/// Records every call and fails or stalls on demand.
#[derive(Clone)]
pub struct MockTransport {
    inner: Arc<MockInner>,
}

/// Stalls submissions until released.
pub struct Gate {
    held: watch::Sender<bool>,
}

impl Gate {
    pub fn release(&self) {
        self.held.send_replace(false);
    }
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MockInner {
                attempts: Mutex::new(Vec::new()),
                delivered: Mutex::new(Vec::new()),
                failures_left: AtomicUsize::new(0),
                held: watch::channel(false).0,
                calls: watch::channel(0).0,
            }),
        }
    }

    /// Fail the next `count` submissions.
    pub fn fail_next(&self, count: usize) {
        self.inner.failures_left.store(count, Ordering::SeqCst);
    }

    /// Stall submissions until the returned gate is released.
    pub fn hold(&self) -> Gate {
        self.inner.held.send_replace(true);
        Gate {
            held: self.inner.held.clone(),
        }
    }

    /// Every batch submission attempt, in call order.
    pub fn batches(&self) -> Vec<Vec<EventRecord>> {
        self.inner.attempts.lock().unwrap().clone()
    }

    /// Batches that were accepted.
    pub fn delivered(&self) -> Vec<Vec<EventRecord>> {
        self.inner.delivered.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        *self.inner.calls.borrow()
    }

    /// Wait until at least `count` batch submissions have started.
    pub async fn wait_for_calls(&self, count: usize) {
        let mut calls = self.inner.calls.subscribe();
        let _ = calls.wait_for(|c| *c >= count).await;
    }

    async fn settle(&self) -> Result<(), TransportError> {
        let mut held = self.inner.held.subscribe();
        let _ = held.wait_for(|h| !*h).await;

        let failed = self
            .inner
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            Err(TransportError::Server {
                status: 503,
                message: "scripted failure".to_string(),
            })
        } else {
            Ok(())
        }
    }
}

impl Transport for MockTransport {
    fn submit_one<'a>(
        &'a self,
        _record: &'a EventRecord,
    ) -> BoxFuture<'a, Result<TrackResponse, TransportError>> {
        async move {
            self.settle().await?;
            Ok(TrackResponse {
                success: true,
                message: None,
                data: Some(TrackReceipt {
                    event_id: uuid::Uuid::new_v4().to_string(),
                    timestamp: Utc::now(),
                }),
            })
        }
        .boxed()
    }

    fn submit_batch<'a>(
        &'a self,
        records: &'a [EventRecord],
    ) -> BoxFuture<'a, Result<BatchResponse, TransportError>> {
        async move {
            self.inner.attempts.lock().unwrap().push(records.to_vec());
            self.inner.calls.send_modify(|c| *c += 1);

            self.settle().await?;
            self.inner.delivered.lock().unwrap().push(records.to_vec());
            Ok(BatchResponse {
                success: true,
                message: None,
                data: Some(BatchReceipt {
                    event_ids: records
                        .iter()
                        .map(|_| uuid::Uuid::new_v4().to_string())
                        .collect(),
                    count: records.len(),
                }),
            })
        }
        .boxed()
    }
}
