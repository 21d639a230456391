//! Namespaced pub/sub for instance lifecycle events

use std::{
    collections::HashMap,
    fmt::Debug,
    future::Future,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, PoisonError, RwLock,
    },
};

use futures::{
    future::{join_all, BoxFuture},
    FutureExt,
};

use crate::{errors::EmitError, types::DynError};

/// Namespace receiving the events of every namespace
pub const ANY_NAMESPACE: &str = "*";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleEvent {
    PreCreate,
    PostCreate,
    PreDestroy,
    PostDestroy,
}

pub type EventFuture = BoxFuture<'static, Result<(), DynError>>;
type Listener = Arc<dyn Fn(&str, LifecycleEvent) -> EventFuture + Send + Sync>;

#[derive(Default)]
struct Subscriptions {
    listeners: HashMap<(String, LifecycleEvent), Vec<(u64, Listener)>>,
}

/// Event bus, cloning it yields a handle to the same subscriptions
#[derive(Clone, Default)]
pub struct LifecycleEventBus {
    subscriptions: Arc<RwLock<Subscriptions>>,
    next_id: Arc<AtomicU64>,
}
impl Debug for LifecycleEventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let subscriptions = self
            .subscriptions
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("LifecycleEventBus")
            .field("subscriptions", &subscriptions.listeners.len())
            .finish()
    }
}

impl LifecycleEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes `listener` to `event` in `namespace`
    ///
    /// The listener receives the namespace the event was emitted in, which matters for [ANY_NAMESPACE].
    /// Calling the returned closure removes the subscription again.
    pub fn on<F, Fut>(
        &self,
        namespace: impl Into<String>,
        event: LifecycleEvent,
        listener: F,
    ) -> impl FnOnce() + Send + Sync + 'static
    where
        F: Fn(&str, LifecycleEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), DynError>> + Send + 'static,
    {
        let key = (namespace.into(), event);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let listener: Listener =
            Arc::new(move |namespace: &str, event: LifecycleEvent| listener(namespace, event).boxed());

        self.subscriptions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .listeners
            .entry(key.clone())
            .or_default()
            .push((id, listener));

        let subscriptions = self.subscriptions.clone();
        move || {
            let mut subscriptions = subscriptions.write().unwrap_or_else(PoisonError::into_inner);
            if let Some(listeners) = subscriptions.listeners.get_mut(&key) {
                listeners.retain(|(listener_id, _)| *listener_id != id);
                if listeners.is_empty() {
                    subscriptions.listeners.remove(&key);
                }
            }
        }
    }

    /// Runs every listener of `event` in `namespace` concurrently
    ///
    /// All listeners run to completion even if some fail, the failures are returned together.
    pub async fn emit(&self, namespace: &str, event: LifecycleEvent) -> Result<(), EmitError> {
        let listeners: Vec<Listener> = {
            let subscriptions = self
                .subscriptions
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            [namespace, ANY_NAMESPACE]
                .iter()
                .filter_map(|ns| subscriptions.listeners.get(&(ns.to_string(), event)))
                .flatten()
                .map(|(_, listener)| listener.clone())
                .collect()
        };

        if listeners.is_empty() {
            return Ok(());
        }

        let results = join_all(listeners.iter().map(|listener| listener(namespace, event))).await;

        let failures: Vec<Arc<DynError>> = results
            .into_iter()
            .filter_map(Result::err)
            .inspect(|error| {
                tracing::warn!("Listener for {:?} on '{}' failed: {}", event, namespace, error)
            })
            .map(Arc::new)
            .collect();

        if failures.is_empty() {
            Ok(())
        } else {
            Err(EmitError {
                namespace: namespace.to_string(),
                event,
                failures,
            })
        }
    }

    /// Number of subscriptions, wildcard ones included
    pub fn listener_count(&self) -> usize {
        self.subscriptions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .listeners
            .values()
            .map(Vec::len)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::sync::Mutex;

    fn recorder(bus: &LifecycleEventBus, namespace: &str, log: &Arc<Mutex<Vec<String>>>) -> impl FnOnce() {
        let log = log.clone();
        let label = namespace.to_string();
        bus.on(namespace.to_string(), LifecycleEvent::PostCreate, move |emitted, _| {
            log.lock().unwrap().push(format!("{label}:{emitted}"));
            async { Ok(()) }
        })
    }

    #[rstest]
    #[tokio::test]
    async fn emits_to_namespace_and_wildcard() {
        let bus = LifecycleEventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let _db = recorder(&bus, "Database", &log);
        let _all = recorder(&bus, ANY_NAMESPACE, &log);

        bus.emit("Database", LifecycleEvent::PostCreate).await.unwrap();
        bus.emit("Cache", LifecycleEvent::PostCreate).await.unwrap();
        bus.emit("Database", LifecycleEvent::PreCreate).await.unwrap();

        let mut log = log.lock().unwrap().clone();
        log.sort();
        assert_eq!(log, vec!["*:Cache", "*:Database", "Database:Database"]);
    }

    #[rstest]
    #[tokio::test]
    async fn unsubscribe_removes_listener() {
        let bus = LifecycleEventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let unsubscribe = recorder(&bus, "Database", &log);
        assert_eq!(bus.listener_count(), 1);

        unsubscribe();
        bus.emit("Database", LifecycleEvent::PostCreate).await.unwrap();

        assert_eq!(bus.listener_count(), 0);
        assert!(log.lock().unwrap().is_empty());
    }

    #[rstest]
    #[tokio::test]
    async fn failures_are_aggregated_without_stopping_others() {
        let bus = LifecycleEventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        for _ in 0..2 {
            let _ = bus.on("Database", LifecycleEvent::PreDestroy, |_, _| async {
                Err::<(), DynError>("listener failed".into())
            });
        }
        let _ok = {
            let log = log.clone();
            bus.on("Database", LifecycleEvent::PreDestroy, move |_, _| {
                log.lock().unwrap().push("ran".to_string());
                async { Ok(()) }
            })
        };

        let error = bus
            .emit("Database", LifecycleEvent::PreDestroy)
            .await
            .unwrap_err();

        assert_eq!(error.failures.len(), 2);
        assert_eq!(error.event, LifecycleEvent::PreDestroy);
        assert_eq!(*log.lock().unwrap(), vec!["ran".to_string()]);
    }
}
