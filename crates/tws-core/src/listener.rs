//! Listener registry: operation name -> handler for inbound calls.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::{Result, TwsError};

/// Handler invoked for an inbound call.
///
/// Closures `Fn(Value) -> impl Future<Output = anyhow::Result<Value>>` are
/// listeners through a blanket impl; use [`typed`] for serde-typed handlers.
#[async_trait]
pub trait Listener: Send + Sync + 'static {
    async fn handle(&self, input: Value) -> anyhow::Result<Value>;
}

#[async_trait]
impl<F, Fut> Listener for F
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    async fn handle(&self, input: Value) -> anyhow::Result<Value> {
        (self)(input).await
    }
}

/// Listener adapter decoding the input into `I` and encoding the output `O`.
pub struct Typed<F, I, O> {
    handler: F,
    _types: PhantomData<fn(I) -> O>,
}

/// Wrap a typed handler so it can be registered as a [`Listener`].
pub fn typed<F, Fut, I, O>(handler: F) -> Typed<F, I, O>
where
    F: Fn(I) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<O>> + Send + 'static,
    I: DeserializeOwned + Send + 'static,
    O: Serialize + Send + 'static,
{
    Typed {
        handler,
        _types: PhantomData,
    }
}

#[async_trait]
impl<F, Fut, I, O> Listener for Typed<F, I, O>
where
    F: Fn(I) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<O>> + Send + 'static,
    I: DeserializeOwned + Send + 'static,
    O: Serialize + Send + 'static,
{
    async fn handle(&self, input: Value) -> anyhow::Result<Value> {
        let input: I = serde_json::from_value(input)?;
        let output = (self.handler)(input).await?;
        Ok(serde_json::to_value(output)?)
    }
}

/// Registry of listeners for one engine.
#[derive(Clone, Default)]
pub struct ListenerRegistry {
    listeners: Arc<RwLock<HashMap<String, Arc<dyn Listener>>>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<dyn Listener>>> {
        self.listeners
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<dyn Listener>>> {
        self.listeners
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register `listener` for `operation`, replacing any previous one.
    pub fn on(&self, operation: impl Into<String>, listener: impl Listener) {
        self.write().insert(operation.into(), Arc::new(listener));
    }

    /// Remove the listener for `operation`. Returns whether one existed.
    pub fn remove(&self, operation: &str) -> bool {
        self.write().remove(operation).is_some()
    }

    pub fn contains(&self, operation: &str) -> bool {
        self.read().contains_key(operation)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Run the listener registered for `operation`.
    ///
    /// The registry lock is released before the handler runs, so a suspended
    /// handler never blocks registration or other dispatches.
    pub async fn dispatch(&self, operation: &str, input: Value) -> Result<Value> {
        let listener = self.read().get(operation).cloned();
        let listener = listener.ok_or_else(|| TwsError::Dispatch {
            operation: operation.to_string(),
            message: "no listener registered".to_string(),
        })?;

        listener.handle(input).await.map_err(|e| TwsError::Dispatch {
            operation: operation.to_string(),
            message: format!("listener failed: {:#}", e),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;
    use std::time::Duration;

    #[tokio::test]
    async fn test_dispatch_closure_listener() {
        let registry = ListenerRegistry::new();
        registry.on("echo", |input: Value| async move { anyhow::Ok(input) });

        let output = registry.dispatch("echo", json!({"a": 1})).await.unwrap();
        assert_eq!(output, json!({"a": 1}));
    }

    #[tokio::test]
    async fn test_missing_listener_is_dispatch_error() {
        let registry = ListenerRegistry::new();
        match registry.dispatch("productCreated", json!({})).await {
            Err(TwsError::Dispatch { operation, message }) => {
                assert_eq!(operation, "productCreated");
                assert!(message.contains("no listener"));
            }
            other => panic!("Expected Dispatch error, got: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_failing_listener_is_dispatch_error() {
        let registry = ListenerRegistry::new();
        registry.on("fail", |_input: Value| async move {
            Err::<Value, _>(anyhow::anyhow!("database unavailable"))
        });

        let err = registry.dispatch("fail", json!({})).await.unwrap_err();
        assert!(err.to_string().contains("database unavailable"));
    }

    #[tokio::test]
    async fn test_reregistering_replaces() {
        let registry = ListenerRegistry::new();
        registry.on("op", |_input: Value| async move { anyhow::Ok(json!("first")) });
        registry.on("op", |_input: Value| async move { anyhow::Ok(json!("second")) });

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.dispatch("op", json!(null)).await.unwrap(), json!("second"));
    }

    #[tokio::test]
    async fn test_remove_listener() {
        let registry = ListenerRegistry::new();
        registry.on("op", |input: Value| async move { anyhow::Ok(input) });

        assert!(registry.remove("op"));
        assert!(!registry.remove("op"));
        assert!(registry.is_empty());
    }

    #[derive(Deserialize)]
    struct Product {
        name: String,
        price: f64,
    }

    #[derive(Serialize)]
    struct Ack {
        message: String,
    }

    #[tokio::test]
    async fn test_typed_listener() {
        let registry = ListenerRegistry::new();
        registry.on(
            "productCreated",
            typed(|product: Product| async move {
                anyhow::Ok(Ack {
                    message: format!("{} at {}", product.name, product.price),
                })
            }),
        );

        let output = registry
            .dispatch("productCreated", json!({"name": "Product 1", "price": 10.0}))
            .await
            .unwrap();
        assert_eq!(output, json!({"message": "Product 1 at 10"}));

        // Input of the wrong shape is a listener failure, not a panic.
        let err = registry
            .dispatch("productCreated", json!({"name": 3}))
            .await
            .unwrap_err();
        assert!(matches!(err, TwsError::Dispatch { .. }));
    }

    #[tokio::test]
    async fn test_suspended_listener_does_not_block_registry() {
        let registry = ListenerRegistry::new();
        registry.on("slow", |_input: Value| async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            anyhow::Ok(json!("slow"))
        });

        let slow = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.dispatch("slow", json!(null)).await })
        };

        registry.on("fast", |_input: Value| async move { anyhow::Ok(json!("fast")) });
        assert_eq!(registry.dispatch("fast", json!(null)).await.unwrap(), json!("fast"));
        assert_eq!(slow.await.unwrap().unwrap(), json!("slow"));
    }
}
