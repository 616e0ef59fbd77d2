//! Live subscriptions to remote slot definitions.
//!
//! A [`DefinitionStore`] delivers the current document for a slot key and
//! then every change to it, possibly more than once per change. The
//! [`DefinitionWatcher`] turns each delivery into a [`Resolution`] and hands
//! it to the subscriber.

use std::cell::Cell;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use async_stream::stream;
use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

use crate::definition::{Definition, Resolution};
use crate::error::StoreError;
use crate::materialize::Materializer;

/// Document snapshots for one key: `None` when the document does not exist.
pub type DocumentStream = Pin<Box<dyn Stream<Item = Result<Option<Value>, StoreError>> + Send>>;

/// Remote store of slot definition documents.
#[async_trait]
pub trait DefinitionStore: Send + Sync {
    /// Current document for `key`.
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;

    /// Initial snapshot of `key` followed by a snapshot per change.
    async fn listen(&self, key: &str) -> Result<DocumentStream, StoreError>;

    /// All documents whose `active` field is `true`, with their ids.
    async fn query_active(&self) -> Result<Vec<(String, Value)>, StoreError>;
}

/// Callback invoked with every resolution of a subscribed slot.
pub type SlotCallback = Arc<dyn Fn(Resolution) + Send + Sync>;

thread_local! {
    /// Address of the gate whose callback is running on this thread, or 0.
    static DELIVERING: Cell<usize> = const { Cell::new(0) };
}

/// Serializes callback delivery against unsubscribing.
///
/// Delivery checks the token and the generation while holding `delivering`
/// and keeps holding it for the whole callback. Once [`close`](Self::close)
/// returns no callback is running and none will start. The one exception is
/// a callback that closes its own gate, which returns immediately instead of
/// waiting on itself.
#[derive(Debug)]
struct DeliveryGate {
    token: CancellationToken,
    generation: AtomicU64,
    delivering: Mutex<()>,
}

impl DeliveryGate {
    fn new(token: CancellationToken) -> Self {
        Self {
            token,
            generation: AtomicU64::new(0),
            delivering: Mutex::new(()),
        }
    }

    fn address(&self) -> usize {
        std::ptr::from_ref(self).addr()
    }

    /// Starts a new generation, superseding every earlier one.
    fn advance(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Runs `callback` unless the gate is closed or `generation` is stale.
    /// Returns whether the callback ran.
    fn deliver(&self, callback: &SlotCallback, resolution: Resolution, generation: u64) -> bool {
        let _held = self
            .delivering
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if self.token.is_cancelled() || self.generation.load(Ordering::Acquire) != generation {
            return false;
        }
        let _restore = RestoreDelivering(DELIVERING.replace(self.address()));
        callback(resolution);
        true
    }

    /// Cancels the token and waits out a callback running on another thread.
    fn close(&self) {
        self.token.cancel();
        if DELIVERING.get() != self.address() {
            drop(
                self.delivering
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner),
            );
        }
    }
}

struct RestoreDelivering(usize);

impl Drop for RestoreDelivering {
    fn drop(&mut self) {
        DELIVERING.set(self.0);
    }
}

/// Handle to a live subscription. Dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes immediately"]
#[derive(Debug)]
pub struct Subscription {
    gate: Arc<DeliveryGate>,
}

impl Subscription {
    /// Stops callback delivery and cancels any fetch this subscription
    /// started. Safe to call more than once.
    ///
    /// If the callback is running on another thread this blocks until it
    /// returns, so no callback runs after `unsubscribe` returns.
    pub fn unsubscribe(&self) {
        if !self.gate.token.is_cancelled() {
            tracing::debug!("unsubscribing");
        }
        self.gate.close();
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.gate.token.is_cancelled()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.gate.close();
    }
}

/// Pull-based view of a subscription.
#[derive(Debug)]
pub struct SlotWatch {
    subscription: Subscription,
    resolutions: mpsc::UnboundedReceiver<Resolution>,
}

impl SlotWatch {
    /// Next resolution, or `None` once unsubscribed and drained.
    pub async fn next(&mut self) -> Option<Resolution> {
        self.resolutions.recv().await
    }

    pub fn unsubscribe(&self) {
        self.subscription.unsubscribe();
    }
}

/// Subscribes to slot definitions and materializes every push.
#[derive(Clone)]
pub struct DefinitionWatcher {
    store: Arc<dyn DefinitionStore>,
    materializer: Arc<Materializer>,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for DefinitionWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DefinitionWatcher")
            .field("shutdown", &self.shutdown.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl DefinitionWatcher {
    /// Creates a watcher. Cancelling `shutdown` ends every subscription made
    /// through it.
    #[must_use]
    pub fn new(
        store: Arc<dyn DefinitionStore>,
        materializer: Arc<Materializer>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            store,
            materializer,
            shutdown,
        }
    }

    /// Subscribes `callback` to the slot document `slot_key`.
    ///
    /// Must be called within a tokio runtime. Each push is materialized on
    /// its own task; a result is delivered only if no newer push arrived in
    /// the meantime.
    pub fn subscribe<F>(&self, slot_key: &str, callback: F) -> Subscription
    where
        F: Fn(Resolution) + Send + Sync + 'static,
    {
        let gate = Arc::new(DeliveryGate::new(self.shutdown.child_token()));
        let listener = Listener {
            slot_key: slot_key.to_string(),
            store: Arc::clone(&self.store),
            materializer: Arc::clone(&self.materializer),
            callback: Arc::new(callback),
            gate: Arc::clone(&gate),
        };
        tokio::spawn(listener.run());
        tracing::debug!(slot = slot_key, "subscribed");
        Subscription { gate }
    }

    /// Subscribes to `slot_key` and exposes the resolutions as a queue.
    pub fn watch(&self, slot_key: &str) -> SlotWatch {
        let (tx, resolutions) = mpsc::unbounded_channel();
        let subscription = self.subscribe(slot_key, move |resolution| {
            let _ = tx.send(resolution);
        });
        SlotWatch {
            subscription,
            resolutions,
        }
    }
}

struct Listener {
    slot_key: String,
    store: Arc<dyn DefinitionStore>,
    materializer: Arc<Materializer>,
    callback: SlotCallback,
    gate: Arc<DeliveryGate>,
}

impl Listener {
    async fn run(self) {
        let listened = tokio::select! {
            biased;
            () = self.gate.token.cancelled() => return,
            listened = self.store.listen(&self.slot_key) => listened,
        };
        let mut documents = match listened {
            Ok(documents) => documents,
            Err(e) => {
                tracing::error!(slot = %self.slot_key, error = %e, "cannot listen to slot");
                self.deliver_now(Resolution::Absent);
                return;
            }
        };

        loop {
            let next = tokio::select! {
                biased;
                () = self.gate.token.cancelled() => break,
                next = documents.next() => next,
            };
            let Some(push) = next else {
                tracing::debug!(slot = %self.slot_key, "definition stream ended");
                break;
            };
            self.on_push(push);
        }
    }

    fn on_push(&self, push: Result<Option<Value>, StoreError>) {
        let data = match push {
            Ok(Some(data)) => data,
            Ok(None) => {
                tracing::debug!(slot = %self.slot_key, "definition absent");
                self.deliver_now(Resolution::Absent);
                return;
            }
            Err(e) => {
                tracing::warn!(slot = %self.slot_key, error = %e, "definition push failed");
                self.deliver_now(Resolution::Absent);
                return;
            }
        };

        let definition = match Definition::from_document(&self.slot_key, &data) {
            Ok(Some(definition)) => definition,
            Ok(None) => {
                tracing::debug!(slot = %self.slot_key, "definition inactive");
                self.deliver_now(Resolution::Absent);
                return;
            }
            Err(e) => {
                tracing::warn!(slot = %self.slot_key, error = %e, "undecodable definition");
                self.deliver_now(Resolution::Absent);
                return;
            }
        };

        let generation = self.gate.advance();
        let slot_key = self.slot_key.clone();
        let materializer = Arc::clone(&self.materializer);
        let callback = Arc::clone(&self.callback);
        let gate = Arc::clone(&self.gate);

        tokio::spawn(async move {
            let resolution = materializer
                .resolve_cancellable(&slot_key, &definition, &gate.token)
                .await;
            if !gate.deliver(&callback, resolution, generation) {
                tracing::debug!(slot = %slot_key, "dropping stale resolution");
            }
        });
    }

    /// Delivers a result that needs no materialization, superseding any
    /// fetch still in flight.
    fn deliver_now(&self, resolution: Resolution) {
        let generation = self.gate.advance();
        self.gate.deliver(&self.callback, resolution, generation);
    }
}

/// In-process [`DefinitionStore`].
///
/// Every mutation is pushed to listeners of the affected key;
/// [`redeliver`](Self::redeliver) re-pushes the current state, as a remote
/// store does after a reconnect.
#[derive(Debug, Clone)]
pub struct MemoryDefinitionStore {
    inner: Arc<MemoryInner>,
}

#[derive(Debug)]
struct MemoryInner {
    documents: RwLock<HashMap<String, Value>>,
    changes: broadcast::Sender<String>,
    unavailable: RwLock<Option<String>>,
}

impl MemoryInner {
    fn check_available(&self) -> Result<(), StoreError> {
        let unavailable = self
            .unavailable
            .read()
            .map_err(|_| StoreError::Unavailable("store lock poisoned".to_string()))?;
        match unavailable.as_ref() {
            Some(reason) => Err(StoreError::Unavailable(reason.clone())),
            None => Ok(()),
        }
    }

    fn snapshot(&self, key: &str) -> Result<Option<Value>, StoreError> {
        self.check_available()?;
        let documents = self
            .documents
            .read()
            .map_err(|_| StoreError::Unavailable("store lock poisoned".to_string()))?;
        Ok(documents.get(key).cloned())
    }
}

impl Default for MemoryDefinitionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDefinitionStore {
    #[must_use]
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(MemoryInner {
                documents: RwLock::new(HashMap::new()),
                changes,
                unavailable: RwLock::new(None),
            }),
        }
    }

    /// Creates or replaces the document for `key`.
    pub fn set(&self, key: &str, data: Value) {
        if let Ok(mut documents) = self.inner.documents.write() {
            documents.insert(key.to_string(), data);
        }
        self.redeliver(key);
    }

    /// Deletes the document for `key`.
    pub fn remove(&self, key: &str) {
        if let Ok(mut documents) = self.inner.documents.write() {
            documents.remove(key);
        }
        self.redeliver(key);
    }

    /// Pushes the current state of `key` again without changing it.
    pub fn redeliver(&self, key: &str) {
        let _ = self.inner.changes.send(key.to_string());
    }

    /// Makes every operation fail with [`StoreError::Unavailable`] until
    /// called with `None`.
    pub fn set_unavailable(&self, reason: Option<&str>) {
        if let Ok(mut unavailable) = self.inner.unavailable.write() {
            *unavailable = reason.map(str::to_string);
        }
    }
}

#[async_trait]
impl DefinitionStore for MemoryDefinitionStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        self.inner.snapshot(key)
    }

    async fn listen(&self, key: &str) -> Result<DocumentStream, StoreError> {
        self.inner.check_available()?;

        let inner = Arc::clone(&self.inner);
        let key = key.to_string();
        let mut changes = inner.changes.subscribe();

        Ok(Box::pin(stream! {
            yield inner.snapshot(&key);
            loop {
                match changes.recv().await {
                    Ok(changed) if changed == key => {
                        yield inner.snapshot(&key);
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::debug!(skipped, "definition listener lagged, resyncing");
                        yield inner.snapshot(&key);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }))
    }

    async fn query_active(&self) -> Result<Vec<(String, Value)>, StoreError> {
        self.inner.check_available()?;
        let documents = self
            .inner
            .documents
            .read()
            .map_err(|_| StoreError::Unavailable("store lock poisoned".to_string()))?;

        let mut active: Vec<_> = documents
            .iter()
            .filter(|(_, data)| data.get("active").and_then(Value::as_bool) == Some(true))
            .map(|(id, data)| (id.clone(), data.clone()))
            .collect();
        active.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(active)
    }
}
