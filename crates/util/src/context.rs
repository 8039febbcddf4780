//! Ambient context-key service.
//!
//! The host owns the real context; the engine reads snapshots and listens for changes
//! through `ContextKeyService`. `InMemoryContextService` backs tests and the CLI.

use std::collections::BTreeSet;
use std::sync::RwLock;

use serde_json::Value;
use tokio::sync::broadcast;
use tracing::trace;

use crate::context_expr::{ContextExpr, ContextSnapshot};

/// Keys touched by a context update.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ContextChange {
    pub keys: BTreeSet<String>,
}

impl ContextChange {
    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            keys: keys.into_iter().map(Into::into).collect(),
        }
    }
}

/// Read access to the ambient context plus change notifications.
pub trait ContextKeyService: Send + Sync {
    /// Current values of every context key.
    fn snapshot(&self) -> ContextSnapshot;

    /// Subscribe to change notifications.
    fn subscribe(&self) -> broadcast::Receiver<ContextChange>;

    /// Evaluates `expression` against the current snapshot.
    fn matches(&self, expression: &ContextExpr) -> bool {
        expression.evaluate(&self.snapshot())
    }
}

/// Context service holding values in memory.
#[derive(Debug)]
pub struct InMemoryContextService {
    values: RwLock<ContextSnapshot>,
    event_tx: broadcast::Sender<ContextChange>,
}

impl Default for InMemoryContextService {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryContextService {
    pub fn new() -> Self {
        let (event_tx, _rx) = broadcast::channel(64);
        Self {
            values: RwLock::new(ContextSnapshot::new()),
            event_tx,
        }
    }

    /// Seeds the service with initial values without emitting a change.
    pub fn with_values(values: ContextSnapshot) -> Self {
        let service = Self::new();
        *service.values.write().expect("context lock poisoned") = values;
        service
    }

    /// Sets one key and notifies subscribers.
    pub fn set(&self, key: &str, value: impl Into<Value>) {
        self.set_many([(key.to_string(), value.into())]);
    }

    /// Sets several keys and emits a single change covering all of them.
    pub fn set_many<I>(&self, entries: I)
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        let mut keys = BTreeSet::new();
        {
            let mut values = self.values.write().expect("context lock poisoned");
            for (key, value) in entries {
                values.set(key.clone(), value);
                keys.insert(key);
            }
        }
        self.notify(keys);
    }

    /// Removes a key and notifies subscribers when it was present.
    pub fn remove(&self, key: &str) {
        let removed = self.values.write().expect("context lock poisoned").remove(key);
        if removed.is_some() {
            self.notify(BTreeSet::from([key.to_string()]));
        }
    }

    fn notify(&self, keys: BTreeSet<String>) {
        if keys.is_empty() {
            return;
        }
        trace!(?keys, "Context changed");
        // No receivers is fine; nobody is watching yet.
        let _ = self.event_tx.send(ContextChange { keys });
    }
}

impl ContextKeyService for InMemoryContextService {
    fn snapshot(&self) -> ContextSnapshot {
        self.values.read().expect("context lock poisoned").clone()
    }

    fn subscribe(&self) -> broadcast::Receiver<ContextChange> {
        self.event_tx.subscribe()
    }
}
