use std::sync::Arc;

use serde_json::{json, Value};

use flowrun_core::types::{Args, ExecutionStatus, State};
use flowrun_core::{AsyncFn, FlowError, Result};
use flowrun_engine::{
    DecisionNode, FunctionNode, GraphExecutor, LoopNode, RunOptions, TraceAction, WorkflowGraph,
};

fn int_arg(args: &Args, key: &str) -> i64 {
    args.get(key).and_then(Value::as_i64).unwrap_or(0)
}

#[test]
fn test_two_step_pipeline() {
    let mut graph = WorkflowGraph::new("pipeline");
    graph
        .add_node(
            FunctionNode::new("double", |args: Args| -> Result<Value> {
                Ok(json!({ "x": int_arg(&args, "x") * 2 }))
            })
            .with_input("x", "x"),
            true,
        )
        .unwrap()
        .add_node(
            FunctionNode::new("add_ten", |args: Args| -> Result<Value> {
                Ok(json!({ "x": int_arg(&args, "x") + 10 }))
            })
            .with_input("x", "x"),
            false,
        )
        .unwrap()
        .add_edge("double", "add_ten")
        .unwrap();

    let executor = GraphExecutor::new(graph);
    let result = executor
        .execute(State::new().with("x", json!(5)), RunOptions::new())
        .expect("run succeeds");

    assert_eq!(result.final_state.to_value(), json!({ "x": 20 }));
    assert_eq!(result.log.status(), ExecutionStatus::Completed);

    let ends: Vec<_> = result
        .log
        .entries()
        .iter()
        .filter(|e| e.action == TraceAction::NextNode && e.details.get("next") == Some(&Value::Null))
        .collect();
    assert_eq!(ends.len(), 1);

    let last = result.log.entries().last().unwrap();
    assert_eq!(last.action, TraceAction::NextNode);
    assert_eq!(last.node_id, "add_ten");
    assert_eq!(last.details.get("next"), Some(&Value::Null));
}

#[test]
fn test_decision_branch_resolution() {
    let mut graph = WorkflowGraph::new("grading");
    graph
        .add_node(
            DecisionNode::new(
                "grade",
                |s: &State| {
                    if s.get_i64("score").unwrap_or(0) >= 8 {
                        "high".to_string()
                    } else {
                        "low".to_string()
                    }
                },
                [("high", "pass"), ("low", "fail")],
            ),
            true,
        )
        .unwrap();
    for id in ["pass", "fail"] {
        graph
            .add_node(
                FunctionNode::new(id, move |_: Args| -> Result<Value> { Ok(json!(id)) })
                    .with_output_key("outcome"),
                false,
            )
            .unwrap();
    }

    let high = State::new().with("score", json!(9));
    let low = State::new().with("score", json!(5));
    assert_eq!(graph.get_next_node("grade", &high).unwrap(), Some("pass".to_string()));
    assert_eq!(graph.get_next_node("grade", &low).unwrap(), Some("fail".to_string()));

    let executor = GraphExecutor::new(graph);
    let result = executor.execute(low, RunOptions::new()).unwrap();
    assert_eq!(result.final_state.get_str("outcome"), Some("fail"));
}

#[test]
fn test_counting_loop() {
    let mut graph = WorkflowGraph::new("counter");
    graph
        .add_node(
            FunctionNode::new("increment", |args: Args| -> Result<Value> {
                Ok(json!({ "counter": int_arg(&args, "counter") + 1 }))
            })
            .with_input("counter", "counter"),
            true,
        )
        .unwrap()
        .add_node(
            LoopNode::new(
                "check",
                |s: &State| s.get_i64("counter").unwrap_or(0) < 5,
                "increment",
            ),
            false,
        )
        .unwrap()
        .add_edge("increment", "check")
        .unwrap();

    let executor = GraphExecutor::new(graph);
    let result = executor
        .execute(
            State::new().with("counter", json!(0)),
            RunOptions::new().with_max_iterations(100),
        )
        .unwrap();

    assert_eq!(result.final_state.get_i64("counter"), Some(5));
    assert_eq!(result.log.status(), ExecutionStatus::Completed);
    assert!(result.log.error().is_none());
}

#[test]
fn test_failing_node_is_recorded_and_reraised() {
    let mut graph = WorkflowGraph::new("broken");
    graph
        .add_node(
            FunctionNode::new("boom", |_: Args| -> Result<Value> {
                Err(FlowError::callable("division by zero"))
            }),
            true,
        )
        .unwrap();

    let executor = GraphExecutor::new(graph);
    let err = executor
        .execute(State::new(), RunOptions::new().with_run_id("scenario-d"))
        .unwrap_err();
    assert_eq!(err.to_string(), "Node 'boom' failed: division by zero");

    let log = executor.get_execution("scenario-d").expect("failed run is kept");
    assert_eq!(log.status(), ExecutionStatus::Failed);
    assert_eq!(log.error(), Some(err.to_string().as_str()));
    assert_eq!(
        log.count(TraceAction::ExecuteStart),
        log.count(TraceAction::ExecuteSuccess) + log.count(TraceAction::ExecuteError)
    );
}

#[test]
fn test_unconditional_loop_respects_cap() {
    let mut graph = WorkflowGraph::new("forever");
    graph
        .add_node(
            FunctionNode::new("tick", |args: Args| -> Result<Value> {
                Ok(json!({ "ticks": int_arg(&args, "ticks") + 1 }))
            })
            .with_input("ticks", "ticks"),
            true,
        )
        .unwrap()
        .add_node(LoopNode::new("again", |_: &State| true, "tick"), false)
        .unwrap()
        .add_edge("tick", "again")
        .unwrap();

    let executor = GraphExecutor::new(Arc::new(graph));
    let result = executor
        .execute(State::new(), RunOptions::new().with_max_iterations(10))
        .unwrap();

    assert_eq!(result.log.count(TraceAction::ExecuteStart), 10);
    assert_eq!(result.final_state.get_i64("ticks"), Some(5));
    assert_eq!(result.log.status(), ExecutionStatus::Completed);
    assert_eq!(result.log.error(), Some("Workflow exceeded max iterations (10)"));
}

#[tokio::test]
async fn test_async_runs_share_one_executor() {
    let mut graph = WorkflowGraph::new("shared");
    graph
        .add_node(
            FunctionNode::new("square", |args: Args| -> Result<Value> {
                let n = int_arg(&args, "n");
                Ok(json!(n * n))
            })
            .with_input("n", "n")
            .with_output_key("squared"),
            true,
        )
        .unwrap();
    let executor = GraphExecutor::new(graph);

    let (a, b) = tokio::join!(
        executor.execute_async(State::new().with("n", json!(3)), RunOptions::new()),
        executor.execute_async(State::new().with("n", json!(4)), RunOptions::new()),
    );
    assert_eq!(a.unwrap().final_state.get("squared"), Some(&json!(9)));
    assert_eq!(b.unwrap().final_state.get("squared"), Some(&json!(16)));
    assert_eq!(executor.run_ids().len(), 2);
}

#[tokio::test]
async fn test_failing_node_is_recorded_and_reraised_async() {
    let mut graph = WorkflowGraph::new("broken-async");
    graph
        .add_node(
            FunctionNode::new(
                "fetch",
                AsyncFn::new(|_: Args| async move {
                    tokio::task::yield_now().await;
                    Err::<Value, _>(FlowError::callable("connection refused"))
                }),
            ),
            true,
        )
        .unwrap();

    let executor = GraphExecutor::new(graph);
    let err = executor
        .execute_async(State::new(), RunOptions::new().with_run_id("scenario-d-async"))
        .await
        .unwrap_err();
    assert!(matches!(err, FlowError::NodeExecution { ref node_id, .. } if node_id == "fetch"));
    assert_eq!(err.to_string(), "Node 'fetch' failed: connection refused");

    let log = executor
        .get_execution("scenario-d-async")
        .expect("failed run is kept");
    assert_eq!(log.status(), ExecutionStatus::Failed);
    assert_eq!(log.error(), Some("Node 'fetch' failed: connection refused"));
    assert!(log.completed_at().is_some());
    assert_eq!(log.entries().last().unwrap().action, TraceAction::ExecuteError);
}
