use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use futures::future::BoxFuture;
use serde_json::Value;
use tracing::debug;

use flowrun_core::error::{FlowError, Result};
use flowrun_core::traits::{Callable, FnTool, Tool, ToolInvoker};
use flowrun_core::types::Args;

/// Registry of available tools.
///
/// Constructed once and handed to graph construction behind an `Arc`.
/// Registration takes `&self` so tools can be re-bound while graphs that
/// reference them by name stay untouched.
pub struct ToolRegistry {
    tools: RwLock<BTreeMap<String, Arc<dyn Tool>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: RwLock::new(BTreeMap::new()),
        }
    }

    /// Register a tool. Fails if the name is already taken.
    pub fn register(&self, tool: impl Tool) -> Result<()> {
        let name = tool.name().to_string();
        let mut tools = self.tools.write().unwrap_or_else(PoisonError::into_inner);
        if tools.contains_key(&name) {
            return Err(FlowError::ToolAlreadyRegistered(name));
        }
        debug!(tool = %name, "Registered tool");
        tools.insert(name, Arc::new(tool));
        Ok(())
    }

    /// Register a closure under `name`.
    pub fn register_fn(
        &self,
        name: impl Into<String>,
        description: impl Into<String>,
        callable: impl Callable,
    ) -> Result<()> {
        self.register(FnTool::new(name, description, callable))
    }

    /// Bind `tool` to its name, returning whatever was bound before.
    pub fn replace(&self, tool: impl Tool) -> Option<Arc<dyn Tool>> {
        let name = tool.name().to_string();
        debug!(tool = %name, "Re-bound tool");
        self.tools
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name, Arc::new(tool))
    }

    /// Unregister a tool by name.
    pub fn unregister(&self, name: &str) -> bool {
        self.tools
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
            .is_some()
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.tools.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn require(&self, name: &str) -> Result<Arc<dyn Tool>> {
        self.get(name)
            .ok_or_else(|| FlowError::ToolNotFound(name.to_string()))
    }

    /// Create a registry with all built-in tools registered.
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        for tool in crate::builtin::code_review::tools() {
            let name = tool.name().to_string();
            registry
                .tools
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(name, tool);
        }
        registry
    }
}

impl ToolInvoker for ToolRegistry {
    fn call(&self, name: &str, args: Args) -> Result<Value> {
        self.require(name)?.call(args)
    }

    fn call_async<'a>(&'a self, name: &'a str, args: Args) -> BoxFuture<'a, Result<Value>> {
        Box::pin(async move {
            let tool = self.require(name)?;
            tool.call_async(args).await
        })
    }

    fn list(&self) -> BTreeMap<String, String> {
        self.tools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(name, tool)| (name.clone(), tool.description().to_string()))
            .collect()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn constant(value: Value) -> impl Callable {
        move |_: Args| -> Result<Value> { Ok(value.clone()) }
    }

    #[test]
    fn test_register_and_call() {
        let registry = ToolRegistry::new();
        registry
            .register_fn("answer", "Always 42", constant(json!(42)))
            .unwrap();

        assert!(registry.contains("answer"));
        assert_eq!(registry.call("answer", Args::new()).unwrap(), json!(42));
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let registry = ToolRegistry::new();
        registry.register_fn("t", "first", constant(json!(1))).unwrap();
        let err = registry
            .register_fn("t", "second", constant(json!(2)))
            .unwrap_err();
        assert!(matches!(err, FlowError::ToolAlreadyRegistered(ref n) if n == "t"));
        assert_eq!(registry.call("t", Args::new()).unwrap(), json!(1));
    }

    #[test]
    fn test_unknown_tool() {
        let registry = ToolRegistry::new();
        let err = registry.call("missing", Args::new()).unwrap_err();
        assert!(matches!(err, FlowError::ToolNotFound(_)));
    }

    #[test]
    fn test_replace_rebinds_behavior() {
        let registry = ToolRegistry::new();
        registry.register_fn("t", "v1", constant(json!("old"))).unwrap();
        let previous = registry.replace(FnTool::new("t", "v2", constant(json!("new"))));

        assert!(previous.is_some());
        assert_eq!(registry.call("t", Args::new()).unwrap(), json!("new"));
        assert_eq!(registry.list().get("t").map(String::as_str), Some("v2"));
    }

    #[test]
    fn test_unregister() {
        let registry = ToolRegistry::new();
        registry.register_fn("t", "", constant(json!(null))).unwrap();
        assert!(registry.unregister("t"));
        assert!(!registry.unregister("t"));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_builtins_listed() {
        let registry = ToolRegistry::with_builtins();
        let listed = registry.list();
        for name in [
            "extract_functions",
            "check_complexity",
            "detect_issues",
            "suggest_improvements",
            "calculate_score",
        ] {
            assert!(listed.contains_key(name), "missing builtin {name}");
        }
    }

    #[tokio::test]
    async fn test_call_async() {
        let registry = ToolRegistry::with_builtins();
        let mut args = Args::new();
        args.insert("code".into(), json!("def foo():\n    pass"));
        let result = registry
            .call_async("extract_functions", args)
            .await
            .unwrap();
        assert_eq!(result["function_count"], json!(1));

        let err = registry.call_async("nope", Args::new()).await.unwrap_err();
        assert!(matches!(err, FlowError::ToolNotFound(_)));
    }
}
