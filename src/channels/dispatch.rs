//! Bounded event intake and the worker pool that drains it.

use super::BridgeEvent;
use crate::config::AdmissionPolicy;
use crate::error::BridgeError;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{Notify, OwnedMutexGuard, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::Duration;

// ---------------------------------------------------------------------------
// Queue
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Accepted,
    /// Admitted after evicting the oldest queued event.
    Evicted,
    Rejected,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueStats {
    pub depth: usize,
    pub capacity: usize,
    pub accepted: u64,
    pub evicted: u64,
    pub rejected: u64,
}

/// Fixed-capacity FIFO with an admission policy for when it is full.
pub struct EventQueue<T> {
    name: &'static str,
    items: Mutex<VecDeque<T>>,
    capacity: usize,
    policy: AdmissionPolicy,
    has_items: Notify,
    has_space: Notify,
    closed: AtomicBool,
    accepted: AtomicU64,
    evicted: AtomicU64,
    rejected: AtomicU64,
}

impl<T> EventQueue<T> {
    pub fn new(name: &'static str, capacity: usize, policy: AdmissionPolicy) -> Self {
        let capacity = capacity.max(1);
        Self {
            name,
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            policy,
            has_items: Notify::new(),
            has_space: Notify::new(),
            closed: AtomicBool::new(false),
            accepted: AtomicU64::new(0),
            evicted: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<T>> {
        self.items.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub async fn push(&self, item: T) -> Admission {
        loop {
            {
                let mut items = self.lock();
                if items.len() < self.capacity {
                    items.push_back(item);
                    self.accepted.fetch_add(1, Ordering::Relaxed);
                    self.has_items.notify_one();
                    return Admission::Accepted;
                }
                match self.policy {
                    AdmissionPolicy::Shed => {
                        self.rejected.fetch_add(1, Ordering::Relaxed);
                        tracing::warn!("{} queue full ({}), event rejected", self.name, self.capacity);
                        return Admission::Rejected;
                    }
                    AdmissionPolicy::DropOldest => {
                        items.pop_front();
                        items.push_back(item);
                        self.evicted.fetch_add(1, Ordering::Relaxed);
                        self.accepted.fetch_add(1, Ordering::Relaxed);
                        self.has_items.notify_one();
                        tracing::warn!("{} queue full ({}), oldest event dropped", self.name, self.capacity);
                        return Admission::Evicted;
                    }
                    AdmissionPolicy::Block => {}
                }
            }
            self.has_space.notified().await;
        }
    }

    /// Next event, waiting if empty. `None` once closed and drained.
    pub async fn pop(&self) -> Option<T> {
        loop {
            {
                let mut items = self.lock();
                if let Some(item) = items.pop_front() {
                    self.has_space.notify_one();
                    return Some(item);
                }
                if self.closed.load(Ordering::Acquire) {
                    return None;
                }
            }
            self.has_items.notified().await;
        }
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.has_items.notify_one();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            depth: self.len(),
            capacity: self.capacity,
            accepted: self.accepted.load(Ordering::Relaxed),
            evicted: self.evicted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }
}

// ---------------------------------------------------------------------------
// Per-key serialization
// ---------------------------------------------------------------------------

/// One async mutex per key, created on demand and dropped when idle.
#[derive(Default)]
pub struct KeyedLock {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

pub struct KeyGuard<'a> {
    owner: &'a KeyedLock,
    key: String,
    mutex: Arc<tokio::sync::Mutex<()>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl KeyedLock {
    fn map(&self) -> MutexGuard<'_, HashMap<String, Arc<tokio::sync::Mutex<()>>>> {
        self.locks.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub async fn lock(&self, key: &str) -> KeyGuard<'_> {
        let mutex = self.map().entry(key.to_string()).or_default().clone();
        let guard = mutex.clone().lock_owned().await;
        KeyGuard {
            owner: self,
            key: key.to_string(),
            mutex,
            guard: Some(guard),
        }
    }

    /// Keys with a holder or waiter.
    pub fn len(&self) -> usize {
        self.map().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        let mut map = self.owner.map();
        // Only the map and this guard still reference the mutex: nobody waits.
        if Arc::strong_count(&self.mutex) == 2 {
            map.remove(&self.key);
        }
    }
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// Where dispatched events end up.
#[async_trait]
pub trait EventSink: Send + Sync + 'static {
    async fn handle(&self, event: BridgeEvent) -> Result<(), BridgeError>;

    /// Called once an event has failed for good.
    fn failed(&self, _event: &BridgeEvent, _error: &BridgeError) {}
}

pub struct Dispatcher {
    name: &'static str,
    queue: Arc<EventQueue<BridgeEvent>>,
    sink: Arc<dyn EventSink>,
    permits: Arc<Semaphore>,
    max_concurrency: usize,
    locks: Arc<KeyedLock>,
    retry_delay: Duration,
}

impl Dispatcher {
    pub fn new(
        name: &'static str,
        queue: Arc<EventQueue<BridgeEvent>>,
        sink: Arc<dyn EventSink>,
        locks: Arc<KeyedLock>,
        max_concurrency: usize,
        retry_delay: Duration,
    ) -> Self {
        let max_concurrency = max_concurrency.max(1);
        Self {
            name,
            queue,
            sink,
            permits: Arc::new(Semaphore::new(max_concurrency)),
            max_concurrency,
            locks,
            retry_delay,
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Drain the queue until it is closed, then wait for in-flight handlers.
    pub async fn run(self) {
        while let Some(event) = self.queue.pop().await {
            let Ok(permit) = self.permits.clone().acquire_owned().await else {
                break;
            };
            let sink = self.sink.clone();
            let locks = self.locks.clone();
            let retry_delay = self.retry_delay;
            tokio::spawn(async move {
                process(sink.as_ref(), &locks, event, retry_delay).await;
                drop(permit);
            });
        }
        let _ = self.permits.acquire_many(self.max_concurrency as u32).await;
        tracing::info!("{} dispatcher stopped", self.name);
    }
}

async fn process(sink: &dyn EventSink, locks: &KeyedLock, event: BridgeEvent, retry_delay: Duration) {
    let _guard = match event.key() {
        Some(key) => Some(locks.lock(&key).await),
        None => None,
    };

    let mut result = sink.handle(event.clone()).await;
    if let Err(e) = &result {
        if event.retry_on_failure() && e.is_retryable() {
            tracing::debug!("{} failed ({}), retrying in {:?}", event.kind(), e, retry_delay);
            tokio::time::sleep(retry_delay).await;
            result = sink.handle(event.clone()).await;
        }
    }
    if let Err(e) = result {
        tracing::warn!("{} event failed: {}", event.kind(), e);
        sink.failed(&event, &e);
    }
}
