//! Bounded analytics buffer with batched flushing

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use crossbeam::queue::ArrayQueue;
use parking_lot::Mutex as SyncMutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::{Mutex, Notify};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cache::TaskSupervisor;
use crate::error::{Error, Result};

/// Buffer configuration
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct AnalyticsConfig {
    /// Events held before the oldest are dropped
    pub capacity: usize,
    /// Events per sink call
    pub batch_size: usize,
    /// Periodic flush interval for the background flusher
    pub flush_interval_secs: u64,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            capacity: 1_000,
            batch_size: 50,
            flush_interval_secs: 30,
        }
    }
}

impl AnalyticsConfig {
    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 || self.batch_size == 0 {
            return Err(Error::Config(
                "analytics.capacity and analytics.batch_size must be at least 1".into(),
            ));
        }
        if self.flush_interval_secs == 0 {
            return Err(Error::Config(
                "analytics.flush_interval_secs must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_secs)
    }
}

/// One tracked event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsEvent {
    pub id: Uuid,
    pub name: String,
    pub properties: Map<String, Value>,
    pub occurred_at: DateTime<Utc>,
}

impl AnalyticsEvent {
    pub fn new(name: impl Into<String>, properties: Map<String, Value>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            properties,
            occurred_at: Utc::now(),
        }
    }
}

/// Destination for event batches
#[async_trait]
pub trait AnalyticsSink: Send + Sync {
    /// Deliver one batch; an error leaves the batch queued for the next flush
    async fn send_batch(&self, events: &[AnalyticsEvent]) -> Result<()>;
}

/// Sink collecting batches in memory (tests, local debugging)
#[derive(Debug, Default)]
pub struct MemorySink {
    batches: SyncMutex<Vec<Vec<AnalyticsEvent>>>,
    failing: std::sync::atomic::AtomicBool,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent sends fail until reset
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Relaxed);
    }

    pub fn batches(&self) -> Vec<Vec<AnalyticsEvent>> {
        self.batches.lock().clone()
    }

    pub fn events(&self) -> Vec<AnalyticsEvent> {
        self.batches.lock().iter().flatten().cloned().collect()
    }
}

#[async_trait]
impl AnalyticsSink for MemorySink {
    async fn send_batch(&self, events: &[AnalyticsEvent]) -> Result<()> {
        if self.failing.load(Ordering::Relaxed) {
            return Err(Error::AnalyticsSink("memory sink set to fail".into()));
        }
        self.batches.lock().push(events.to_vec());
        Ok(())
    }
}

/// Bounded event queue in front of an [`AnalyticsSink`]
pub struct AnalyticsBuffer {
    queue: ArrayQueue<AnalyticsEvent>,
    sink: Arc<dyn AnalyticsSink>,
    config: AnalyticsConfig,
    /// One flush at a time
    flush_lock: Mutex<()>,
    batch_ready: Notify,
    dropped: AtomicU64,
    sent: AtomicU64,
}

impl AnalyticsBuffer {
    pub fn new(config: AnalyticsConfig, sink: Arc<dyn AnalyticsSink>) -> Self {
        Self {
            queue: ArrayQueue::new(config.capacity.max(1)),
            sink,
            config,
            flush_lock: Mutex::new(()),
            batch_ready: Notify::new(),
            dropped: AtomicU64::new(0),
            sent: AtomicU64::new(0),
        }
    }

    /// Queue an event; when full the oldest queued event is dropped
    pub fn track(&self, name: impl Into<String>, properties: Map<String, Value>) -> Uuid {
        let event = AnalyticsEvent::new(name, properties);
        let id = event.id;
        self.enqueue(event);
        id
    }

    fn enqueue(&self, event: AnalyticsEvent) {
        if self.queue.force_push(event).is_some() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        if self.queue.len() >= self.config.batch_size {
            self.batch_ready.notify_one();
        }
    }

    /// Send everything queued, one batch per sink call
    ///
    /// On a sink failure the failed batch is put back (subject to capacity)
    /// and the error returned; events queued behind it stay queued.
    pub async fn flush(&self) -> Result<usize> {
        let _guard = self.flush_lock.lock().await;
        let mut sent = 0;

        loop {
            let batch: Vec<AnalyticsEvent> = std::iter::from_fn(|| self.queue.pop())
                .take(self.config.batch_size)
                .collect();
            if batch.is_empty() {
                break;
            }

            if let Err(e) = self.sink.send_batch(&batch).await {
                let count = batch.len();
                for event in batch {
                    if self.queue.push(event).is_err() {
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                    }
                }
                warn!(events = count, error = %e, "Analytics flush failed, batch requeued");
                return Err(e);
            }

            sent += batch.len();
            self.sent.fetch_add(batch.len() as u64, Ordering::Relaxed);
        }

        if sent > 0 {
            debug!(events = sent, "Flushed analytics events");
        }
        Ok(sent)
    }

    /// Flush every `flush_interval` or when a batch fills, until shutdown
    ///
    /// A final flush runs when the supervisor shuts down.
    pub fn spawn_flusher(self: &Arc<Self>, supervisor: &TaskSupervisor) -> bool {
        let buffer = Arc::clone(self);
        let period = self.config.flush_interval();

        supervisor.spawn_loop("analytics-flush", move |token| async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                    _ = buffer.batch_ready.notified() => {}
                }
                // Errors are logged in flush; the events stay queued
                let _ = buffer.flush().await;
            }

            match buffer.flush().await {
                Ok(sent) => info!(events = sent, "Analytics flusher stopped"),
                Err(e) => warn!(error = %e, pending = buffer.len(), "Final analytics flush failed"),
            }
        })
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    pub fn config(&self) -> &AnalyticsConfig {
        &self.config
    }
}

impl std::fmt::Debug for AnalyticsBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalyticsBuffer")
            .field("queued", &self.queue.len())
            .field("capacity", &self.queue.capacity())
            .field("dropped", &self.dropped())
            .field("sent", &self.sent())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
