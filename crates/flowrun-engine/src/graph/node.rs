use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;

use flowrun_core::error::{FlowError, Result};
use flowrun_core::traits::{Callable, ToolInvoker};
use flowrun_core::types::{json_type_name, Args, NodeType, State};

/// Label predicate evaluated by a Decision node.
pub type Predicate = Arc<dyn Fn(&State) -> String + Send + Sync>;

/// Boolean condition evaluated by a Loop node.
pub type Condition = Arc<dyn Fn(&State) -> bool + Send + Sync>;

/// Per-item transformation applied by a Batch node.
pub type ItemFn = Arc<dyn Fn(&Value) -> Result<Value> + Send + Sync>;

/// A node in a workflow graph.
///
/// Every variant transforms state; Decision and Loop leave it untouched and
/// carry the data the graph's routing policy consults afterwards.
#[derive(Debug, Clone)]
pub enum Node {
    Function(FunctionNode),
    ToolCall(ToolCallNode),
    Decision(DecisionNode),
    Loop(LoopNode),
    Batch(BatchNode),
}

impl Node {
    pub fn id(&self) -> &str {
        match self {
            Node::Function(n) => &n.id,
            Node::ToolCall(n) => &n.id,
            Node::Decision(n) => &n.id,
            Node::Loop(n) => &n.id,
            Node::Batch(n) => &n.id,
        }
    }

    pub fn node_type(&self) -> NodeType {
        match self {
            Node::Decision(_) => NodeType::Decision,
            Node::Loop(_) => NodeType::Loop,
            Node::Function(_) | Node::ToolCall(_) | Node::Batch(_) => NodeType::Standard,
        }
    }

    /// Variant name, as used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Node::Function(_) => "function",
            Node::ToolCall(_) => "tool_call",
            Node::Decision(_) => "decision",
            Node::Loop(_) => "loop",
            Node::Batch(_) => "batch",
        }
    }

    /// Blocking transformation.
    pub fn transform(&self, state: State) -> Result<State> {
        match self {
            Node::Function(n) => n.transform(state),
            Node::ToolCall(n) => n.transform(state),
            Node::Decision(_) | Node::Loop(_) => Ok(state),
            Node::Batch(n) => n.transform(state),
        }
    }

    /// Suspension-capable transformation with the same contract as `transform`.
    pub async fn transform_async(&self, state: State) -> Result<State> {
        match self {
            Node::Function(n) => n.transform_async(state).await,
            Node::ToolCall(n) => n.transform_async(state).await,
            Node::Decision(_) | Node::Loop(_) => Ok(state),
            Node::Batch(n) => n.transform(state),
        }
    }
}

/// Maps state keys onto a callable's named inputs.
#[derive(Debug, Clone, Default)]
struct InputMap(BTreeMap<String, String>);

impl InputMap {
    /// Keys absent from state are omitted, not defaulted.
    fn gather(&self, state: &State) -> Args {
        self.0
            .iter()
            .filter_map(|(state_key, param)| {
                state.get(state_key).map(|v| (param.clone(), v.clone()))
            })
            .collect()
    }
}

/// Fold a callable's result into state: mappings merge key by key,
/// anything else lands under `output_key`.
fn merge_result(mut state: State, output_key: &str, result: Value) -> State {
    match result {
        Value::Object(map) => state.merge(&map),
        scalar => state.set(output_key, scalar),
    }
    state
}

// ── FunctionNode ────────────────────────────────────────────────

/// Runs a caller-supplied callable against mapped state values.
#[derive(Clone)]
pub struct FunctionNode {
    id: String,
    func: Arc<dyn Callable>,
    inputs: InputMap,
    output_key: String,
}

impl FunctionNode {
    pub fn new(id: impl Into<String>, func: impl Callable) -> Self {
        let id = id.into();
        Self {
            output_key: format!("{}_result", id),
            id,
            func: Arc::new(func),
            inputs: InputMap::default(),
        }
    }

    /// Pass `state[state_key]` to the callable as `param`.
    pub fn with_input(mut self, state_key: impl Into<String>, param: impl Into<String>) -> Self {
        self.inputs.0.insert(state_key.into(), param.into());
        self
    }

    /// Add several `(state_key, param)` pairs.
    pub fn with_inputs<K, P>(mut self, pairs: impl IntoIterator<Item = (K, P)>) -> Self
    where
        K: Into<String>,
        P: Into<String>,
    {
        self.inputs
            .0
            .extend(pairs.into_iter().map(|(k, p)| (k.into(), p.into())));
        self
    }

    pub fn with_output_key(mut self, key: impl Into<String>) -> Self {
        self.output_key = key.into();
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn output_key(&self) -> &str {
        &self.output_key
    }

    pub fn transform(&self, state: State) -> Result<State> {
        let args = self.inputs.gather(&state);
        let result = self
            .func
            .call(args)
            .map_err(|e| FlowError::node_execution(&self.id, e))?;
        Ok(merge_result(state, &self.output_key, result))
    }

    pub async fn transform_async(&self, state: State) -> Result<State> {
        let args = self.inputs.gather(&state);
        let result = self
            .func
            .call_async(args)
            .await
            .map_err(|e| FlowError::node_execution(&self.id, e))?;
        Ok(merge_result(state, &self.output_key, result))
    }
}

impl std::fmt::Debug for FunctionNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionNode")
            .field("id", &self.id)
            .field("inputs", &self.inputs.0)
            .field("output_key", &self.output_key)
            .finish()
    }
}

impl From<FunctionNode> for Node {
    fn from(node: FunctionNode) -> Self {
        Node::Function(node)
    }
}

// ── ToolCallNode ────────────────────────────────────────────────

/// Calls a tool resolved by name through an injected invoker at call time.
#[derive(Clone)]
pub struct ToolCallNode {
    id: String,
    tool_name: String,
    tools: Arc<dyn ToolInvoker>,
    inputs: InputMap,
    output_key: String,
}

impl ToolCallNode {
    pub fn new(
        id: impl Into<String>,
        tool_name: impl Into<String>,
        tools: Arc<dyn ToolInvoker>,
    ) -> Self {
        let id = id.into();
        Self {
            output_key: format!("{}_result", id),
            id,
            tool_name: tool_name.into(),
            tools,
            inputs: InputMap::default(),
        }
    }

    pub fn with_input(mut self, state_key: impl Into<String>, param: impl Into<String>) -> Self {
        self.inputs.0.insert(state_key.into(), param.into());
        self
    }

    pub fn with_inputs<K, P>(mut self, pairs: impl IntoIterator<Item = (K, P)>) -> Self
    where
        K: Into<String>,
        P: Into<String>,
    {
        self.inputs
            .0
            .extend(pairs.into_iter().map(|(k, p)| (k.into(), p.into())));
        self
    }

    pub fn with_output_key(mut self, key: impl Into<String>) -> Self {
        self.output_key = key.into();
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn tool_name(&self) -> &str {
        &self.tool_name
    }

    pub fn transform(&self, state: State) -> Result<State> {
        let args = self.inputs.gather(&state);
        let result = self
            .tools
            .call(&self.tool_name, args)
            .map_err(|e| FlowError::node_execution(&self.id, e))?;
        Ok(merge_result(state, &self.output_key, result))
    }

    pub async fn transform_async(&self, state: State) -> Result<State> {
        let args = self.inputs.gather(&state);
        let result = self
            .tools
            .call_async(&self.tool_name, args)
            .await
            .map_err(|e| FlowError::node_execution(&self.id, e))?;
        Ok(merge_result(state, &self.output_key, result))
    }
}

impl std::fmt::Debug for ToolCallNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolCallNode")
            .field("id", &self.id)
            .field("tool_name", &self.tool_name)
            .field("inputs", &self.inputs.0)
            .field("output_key", &self.output_key)
            .finish()
    }
}

impl From<ToolCallNode> for Node {
    fn from(node: ToolCallNode) -> Self {
        Node::ToolCall(node)
    }
}

// ── DecisionNode ────────────────────────────────────────────────

/// Picks the next node by mapping a predicate's label through a branch table.
#[derive(Clone)]
pub struct DecisionNode {
    id: String,
    predicate: Predicate,
    branches: BTreeMap<String, String>,
}

impl DecisionNode {
    pub fn new<F, L, T>(
        id: impl Into<String>,
        predicate: F,
        branches: impl IntoIterator<Item = (L, T)>,
    ) -> Self
    where
        F: Fn(&State) -> String + Send + Sync + 'static,
        L: Into<String>,
        T: Into<String>,
    {
        Self {
            id: id.into(),
            predicate: Arc::new(predicate),
            branches: branches
                .into_iter()
                .map(|(label, target)| (label.into(), target.into()))
                .collect(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn branches(&self) -> &BTreeMap<String, String> {
        &self.branches
    }

    /// Evaluate the predicate without consulting the branch table.
    pub fn label(&self, state: &State) -> String {
        (self.predicate)(state)
    }

    /// Resolve the branch target for `state`.
    pub fn resolve(&self, state: &State) -> Result<String> {
        let label = self.label(state);
        match self.branches.get(&label) {
            Some(target) => Ok(target.clone()),
            None => Err(FlowError::UnresolvedBranch {
                node_id: self.id.clone(),
                label,
            }),
        }
    }
}

impl std::fmt::Debug for DecisionNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecisionNode")
            .field("id", &self.id)
            .field("branches", &self.branches)
            .finish()
    }
}

impl From<DecisionNode> for Node {
    fn from(node: DecisionNode) -> Self {
        Node::Decision(node)
    }
}

// ── LoopNode ────────────────────────────────────────────────────

/// Jumps back to `loop_back_to` while its condition holds.
#[derive(Clone)]
pub struct LoopNode {
    id: String,
    condition: Condition,
    loop_back_to: String,
}

impl LoopNode {
    pub fn new<F>(id: impl Into<String>, condition: F, loop_back_to: impl Into<String>) -> Self
    where
        F: Fn(&State) -> bool + Send + Sync + 'static,
    {
        Self {
            id: id.into(),
            condition: Arc::new(condition),
            loop_back_to: loop_back_to.into(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn loop_back_to(&self) -> &str {
        &self.loop_back_to
    }

    pub fn should_loop(&self, state: &State) -> bool {
        (self.condition)(state)
    }
}

impl std::fmt::Debug for LoopNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopNode")
            .field("id", &self.id)
            .field("loop_back_to", &self.loop_back_to)
            .finish()
    }
}

impl From<LoopNode> for Node {
    fn from(node: LoopNode) -> Self {
        Node::Loop(node)
    }
}

// ── BatchNode ───────────────────────────────────────────────────

/// Applies a per-item function to every element of a list in state.
#[derive(Clone)]
pub struct BatchNode {
    id: String,
    func: ItemFn,
    input_list_key: String,
    output_key: String,
}

impl BatchNode {
    pub fn new<F>(id: impl Into<String>, func: F, input_list_key: impl Into<String>) -> Self
    where
        F: Fn(&Value) -> Result<Value> + Send + Sync + 'static,
    {
        let id = id.into();
        Self {
            output_key: format!("{}_results", id),
            id,
            func: Arc::new(func),
            input_list_key: input_list_key.into(),
        }
    }

    pub fn with_output_key(mut self, key: impl Into<String>) -> Self {
        self.output_key = key.into();
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn output_key(&self) -> &str {
        &self.output_key
    }

    /// A missing list counts as empty; a present non-list value is an error.
    pub fn transform(&self, mut state: State) -> Result<State> {
        let results = match state.get(&self.input_list_key) {
            None => Vec::new(),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| (self.func)(item))
                .collect::<Result<Vec<_>>>()
                .map_err(|e| FlowError::node_execution(&self.id, e))?,
            Some(other) => {
                return Err(FlowError::node_execution(
                    &self.id,
                    format!(
                        "expected a list under '{}', got {}",
                        self.input_list_key,
                        json_type_name(other)
                    ),
                ))
            }
        };
        state.set(self.output_key.clone(), Value::Array(results));
        Ok(state)
    }
}

impl std::fmt::Debug for BatchNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchNode")
            .field("id", &self.id)
            .field("input_list_key", &self.input_list_key)
            .field("output_key", &self.output_key)
            .finish()
    }
}

impl From<BatchNode> for Node {
    fn from(node: BatchNode) -> Self {
        Node::Batch(node)
    }
}
