//! Workflow graphs and the engine that runs them.
//!
//! A `WorkflowGraph` holds `Node`s, single-successor edges and a start node.
//! Routing is decided by the graph: Decision nodes pick a branch from state,
//! Loop nodes jump back while their condition holds, everything else follows
//! its edge. The `GraphExecutor` walks the graph one node at a time and
//! records every step in an `ExecutionLog`.

pub mod executor;
pub mod log;
pub mod node;
pub mod workflow;

pub use executor::{ExecutionResult, GraphExecutor, RunOptions, DEFAULT_MAX_ITERATIONS};
pub use log::{ExecutionLog, ExecutionLogView, StateSnapshot, TraceAction, TraceEntry};
pub use node::{BatchNode, DecisionNode, FunctionNode, LoopNode, Node, ToolCallNode};
pub use workflow::WorkflowGraph;
