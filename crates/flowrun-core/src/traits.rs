use std::collections::BTreeMap;
use std::future::Future;

use futures::future::BoxFuture;
use serde_json::Value;

use crate::error::Result;
use crate::types::Args;

/// A unit of caller-supplied work: named inputs in, one JSON value out.
///
/// `call` is the blocking entry point and `call_async` the suspension-capable
/// one. Implementations with no real waiting to do only provide `call`; the
/// default `call_async` resolves immediately with the same result.
pub trait Callable: Send + Sync + 'static {
    fn call(&self, args: Args) -> Result<Value>;

    fn call_async(&self, args: Args) -> BoxFuture<'_, Result<Value>> {
        let result = self.call(args);
        Box::pin(async move { result })
    }
}

impl<F> Callable for F
where
    F: Fn(Args) -> Result<Value> + Send + Sync + 'static,
{
    fn call(&self, args: Args) -> Result<Value> {
        self(args)
    }
}

/// Adapter for callables whose real work is asynchronous.
///
/// The blocking path drives the future to completion on the current thread,
/// so it must not await anything that needs a running tokio reactor.
pub struct AsyncFn<F> {
    f: F,
}

impl<F> AsyncFn<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F, Fut> Callable for AsyncFn<F>
where
    F: Fn(Args) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    fn call(&self, args: Args) -> Result<Value> {
        futures::executor::block_on((self.f)(args))
    }

    fn call_async(&self, args: Args) -> BoxFuture<'_, Result<Value>> {
        Box::pin((self.f)(args))
    }
}

/// A named, described callable kept in a registry.
pub trait Tool: Callable {
    /// Tool name (used by ToolCall nodes).
    fn name(&self) -> &str;

    /// Human-readable description.
    fn description(&self) -> &str;
}

/// A closure packaged as a Tool.
pub struct FnTool {
    name: String,
    description: String,
    callable: Box<dyn Callable>,
}

impl FnTool {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        callable: impl Callable,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            callable: Box::new(callable),
        }
    }
}

impl Callable for FnTool {
    fn call(&self, args: Args) -> Result<Value> {
        self.callable.call(args)
    }

    fn call_async(&self, args: Args) -> BoxFuture<'_, Result<Value>> {
        self.callable.call_async(args)
    }
}

impl Tool for FnTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }
}

/// Tool lookup capability consumed by ToolCall nodes.
///
/// Resolution happens at call time, so re-binding a name changes behavior
/// without touching graph topology.
pub trait ToolInvoker: Send + Sync + 'static {
    /// Call a tool by name. Unknown names fail with `ToolNotFound`.
    fn call(&self, name: &str, args: Args) -> Result<Value>;

    /// Suspension-capable variant of `call`.
    fn call_async<'a>(&'a self, name: &'a str, args: Args) -> BoxFuture<'a, Result<Value>>;

    /// Registered tool names mapped to their descriptions.
    fn list(&self) -> BTreeMap<String, String>;
}
