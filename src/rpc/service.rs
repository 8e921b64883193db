//! API objects exposed through an [`RpcServer`](super::RpcServer).

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

/// Future returned by a method: the JSON result or an error message.
pub type MethodFuture = Pin<Box<dyn Future<Output = Result<Value, String>> + Send>>;

type Handler = Arc<dyn Fn(Value) -> MethodFuture + Send + Sync>;

/// A named set of callable methods.
///
/// Implement this directly for hand-rolled dispatch, or build one with
/// [`MethodTable`].
pub trait Service: Send + Sync + 'static {
    /// Names of the callable methods. Must not be empty.
    fn methods(&self) -> Vec<String>;

    /// Invoke `method` with `params`.
    ///
    /// Only called with names listed by [`methods`](Service::methods).
    fn call(&self, method: &str, params: Value) -> MethodFuture;
}

/// A [`Service`] assembled from typed async closures.
///
/// ```rust,ignore
/// let api = MethodTable::new()
///     .method("Echo", |text: String| async move { Ok::<_, String>(text) });
/// ```
#[derive(Default, Clone)]
pub struct MethodTable {
    handlers: BTreeMap<String, Handler>,
}

impl MethodTable {
    /// Empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `name`, replacing any previous handler with the same name.
    ///
    /// Parameters are deserialised into `P` before `handler` runs; a
    /// mismatch is reported to the caller as `invalid params: …`.
    #[must_use]
    pub fn method<P, R, F, Fut>(mut self, name: &str, handler: F) -> Self
    where
        P: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        F: Fn(P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, String>> + Send + 'static,
    {
        let handler: Handler = Arc::new(move |params: Value| -> MethodFuture {
            match serde_json::from_value::<P>(params) {
                Ok(params) => {
                    let pending = handler(params);
                    Box::pin(async move {
                        let result = pending.await?;
                        serde_json::to_value(result)
                            .map_err(|err| format!("failed to serialise result: {err}"))
                    })
                }
                Err(err) => Box::pin(async move { Err(format!("invalid params: {err}")) }),
            }
        });
        self.handlers.insert(name.to_owned(), handler);
        self
    }

    /// Number of registered methods.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether no methods are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl Service for MethodTable {
    fn methods(&self) -> Vec<String> {
        self.handlers.keys().cloned().collect()
    }

    fn call(&self, method: &str, params: Value) -> MethodFuture {
        match self.handlers.get(method) {
            Some(handler) => handler(params),
            None => {
                let message = format!("rpc: can't find method {method}");
                Box::pin(async move { Err(message) })
            }
        }
    }
}
