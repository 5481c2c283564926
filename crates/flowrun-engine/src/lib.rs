pub mod graph;
pub mod workflows;

pub use graph::{
    BatchNode, DecisionNode, ExecutionLog, ExecutionLogView, ExecutionResult, FunctionNode,
    GraphExecutor, LoopNode, Node, RunOptions, ToolCallNode, TraceAction, TraceEntry,
    WorkflowGraph,
};
pub use workflows::{run_code_review, ReviewOutcome};
