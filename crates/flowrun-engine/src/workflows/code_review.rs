//! Static code review: five analysis tools in a line, then a report.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

use flowrun_core::error::{FlowError, Result};
use flowrun_core::traits::ToolInvoker;
use flowrun_core::types::{Args, ExecutionStatus, State};
use flowrun_tools::ToolRegistry;

use crate::graph::{
    ExecutionLogView, ExecutionResult, FunctionNode, GraphExecutor, RunOptions, ToolCallNode,
    WorkflowGraph,
};

pub const GRAPH_ID: &str = "code-review-workflow";
pub const DEFAULT_QUALITY_THRESHOLD: f64 = 7.0;

/// Result of a review run, shaped for printing or serializing.
#[derive(Debug, Clone, Serialize)]
pub struct ReviewOutcome {
    pub final_state: State,
    pub execution_log: ExecutionLogView,
    pub run_id: String,
    pub status: ExecutionStatus,
    pub error: Option<String>,
}

impl ReviewOutcome {
    /// The `report` object written by the final node, if the run got that far.
    pub fn report(&self) -> Option<&Value> {
        self.final_state.get("report")
    }
}

/// Build the review graph against whatever registry `tools` resolves to.
pub fn create_code_review_workflow(tools: Arc<dyn ToolInvoker>) -> Result<WorkflowGraph> {
    let mut graph = WorkflowGraph::new(GRAPH_ID);

    graph
        .add_node(
            ToolCallNode::new("extract_functions", "extract_functions", tools.clone())
                .with_input("code", "code")
                .with_output_key("functions_data"),
            true,
        )?
        .add_node(
            ToolCallNode::new("check_complexity", "check_complexity", tools.clone())
                .with_input("code", "code")
                .with_output_key("complexity_data"),
            false,
        )?
        .add_node(
            ToolCallNode::new("detect_issues", "detect_issues", tools.clone())
                .with_input("code", "code")
                .with_output_key("issues_data"),
            false,
        )?
        .add_node(
            ToolCallNode::new("suggest_improvements", "suggest_improvements", tools.clone())
                .with_inputs([("code", "code"), ("issues", "issues")])
                .with_output_key("suggestions_data"),
            false,
        )?
        .add_node(
            ToolCallNode::new("calculate_score", "calculate_score", tools)
                .with_inputs([
                    ("complexity_score", "complexity_score"),
                    ("issue_count", "issue_count"),
                    ("has_critical_issues", "has_critical_issues"),
                    ("suggestion_count", "suggestion_count"),
                ])
                .with_output_key("quality_result"),
            false,
        )?
        .add_node(
            FunctionNode::new("generate_report", generate_report)
                .with_inputs([
                    ("quality_score", "quality_score"),
                    ("rating", "rating"),
                    ("function_count", "function_count"),
                    ("complexity_score", "complexity_score"),
                    ("issue_count", "issue_count"),
                    ("suggestion_count", "suggestion_count"),
                    ("quality_threshold", "quality_threshold"),
                ])
                .with_output_key("final_report"),
            false,
        )?;

    graph
        .add_edge("extract_functions", "check_complexity")?
        .add_edge("check_complexity", "detect_issues")?
        .add_edge("detect_issues", "suggest_improvements")?
        .add_edge("suggest_improvements", "calculate_score")?
        .add_edge("calculate_score", "generate_report")?;

    Ok(graph)
}

#[derive(Deserialize)]
struct ReportInput {
    quality_score: f64,
    rating: String,
    function_count: u64,
    complexity_score: f64,
    issue_count: u64,
    suggestion_count: u64,
    #[serde(default = "default_threshold")]
    quality_threshold: f64,
}

fn default_threshold() -> f64 {
    DEFAULT_QUALITY_THRESHOLD
}

fn generate_report(args: Args) -> Result<Value> {
    let input: ReportInput = serde_json::from_value(Value::Object(args))
        .map_err(|e| FlowError::callable(format!("generate_report: invalid input: {e}")))?;

    Ok(json!({
        "report": {
            "overall_quality_score": input.quality_score,
            "rating": input.rating,
            "summary": {
                "functions_found": input.function_count,
                "complexity_score": input.complexity_score,
                "total_issues": input.issue_count,
                "improvement_suggestions": input.suggestion_count,
            },
            "meets_threshold": input.quality_score >= input.quality_threshold,
        }
    }))
}

/// Review `code` with the built-in tools.
pub fn run_code_review(code: &str, quality_threshold: f64) -> Result<ReviewOutcome> {
    let tools: Arc<dyn ToolInvoker> = Arc::new(ToolRegistry::with_builtins());
    run_code_review_with(tools, code, quality_threshold, RunOptions::default())
}

/// Review `code` against a caller-supplied registry and run options.
///
/// The executor is dropped afterwards; use [`review_on`] to keep failed runs
/// inspectable.
pub fn run_code_review_with(
    tools: Arc<dyn ToolInvoker>,
    code: &str,
    quality_threshold: f64,
    options: RunOptions,
) -> Result<ReviewOutcome> {
    let executor = GraphExecutor::new(create_code_review_workflow(tools)?);
    review_on(&executor, code, quality_threshold, options)
}

/// Same as [`run_code_review_with`], awaiting each tool call.
pub async fn run_code_review_async(
    tools: Arc<dyn ToolInvoker>,
    code: &str,
    quality_threshold: f64,
    options: RunOptions,
) -> Result<ReviewOutcome> {
    let executor = GraphExecutor::new(create_code_review_workflow(tools)?);
    review_on_async(&executor, code, quality_threshold, options).await
}

/// Review `code` on a caller-owned executor, normally one built over
/// [`create_code_review_workflow`]. Every run, failed or not, stays
/// available through `executor.get_execution(run_id)`.
pub fn review_on(
    executor: &GraphExecutor,
    code: &str,
    quality_threshold: f64,
    options: RunOptions,
) -> Result<ReviewOutcome> {
    let result = executor.execute(initial_state(code, quality_threshold), options)?;
    Ok(outcome(result))
}

/// Same as [`review_on`], awaiting each tool call.
pub async fn review_on_async(
    executor: &GraphExecutor,
    code: &str,
    quality_threshold: f64,
    options: RunOptions,
) -> Result<ReviewOutcome> {
    let result = executor
        .execute_async(initial_state(code, quality_threshold), options)
        .await?;
    Ok(outcome(result))
}

fn initial_state(code: &str, quality_threshold: f64) -> State {
    State::new()
        .with("code", json!(code))
        .with("quality_threshold", json!(quality_threshold))
        .with("iteration", json!(0))
}

fn outcome(result: ExecutionResult) -> ReviewOutcome {
    let view = result.log.to_view();
    info!(
        run_id = %view.run_id,
        status = %view.status,
        quality_score = ?result.final_state.get_f64("quality_score"),
        "Code review finished"
    );

    ReviewOutcome {
        final_state: result.final_state,
        run_id: view.run_id.clone(),
        status: view.status,
        error: view.error.clone(),
        execution_log: view,
    }
}
