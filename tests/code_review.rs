use std::sync::Arc;

use serde_json::{json, Value};

use flowrun_core::types::{Args, ExecutionStatus};
use flowrun_core::{FnTool, Result, ToolInvoker};
use flowrun_engine::workflows::code_review::{self, GRAPH_ID};
use flowrun_engine::RunOptions;
use flowrun_tools::ToolRegistry;

const MESSY: &str = r#"
def handler(event):
    try:
        print(event)
    except:
        pass
"#;

#[test]
fn test_review_flags_bare_except() {
    let outcome = code_review::run_code_review(MESSY, 7.0).expect("review runs");
    assert_eq!(outcome.status, ExecutionStatus::Completed);
    assert_eq!(outcome.execution_log.graph_id, GRAPH_ID);

    let state = &outcome.final_state;
    assert_eq!(state.get("has_critical_issues"), Some(&json!(true)));
    let report = outcome.report().expect("report written");
    assert_eq!(report["meets_threshold"], json!(false));
}

#[test]
fn test_rebinding_a_tool_changes_the_review() {
    let registry = Arc::new(ToolRegistry::with_builtins());
    registry.replace(FnTool::new(
        "calculate_score",
        "Always perfect",
        |_: Args| -> Result<Value> { Ok(json!({ "quality_score": 10.0, "rating": "Excellent" })) },
    ));

    let tools: Arc<dyn ToolInvoker> = registry;
    let outcome = code_review::run_code_review_with(
        tools,
        MESSY,
        9.0,
        RunOptions::new().with_run_id("rebound"),
    )
    .expect("review runs");

    assert_eq!(outcome.run_id, "rebound");
    let report = outcome.report().unwrap();
    assert_eq!(report["overall_quality_score"], json!(10.0));
    assert_eq!(report["meets_threshold"], json!(true));
}

#[test]
fn test_threshold_comes_from_state() {
    let code = "def ok():\n    \"\"\"Fine.\"\"\"\n    return 1\n";
    let strict = code_review::run_code_review(code, 10.5).unwrap();
    let lenient = code_review::run_code_review(code, 0.0).unwrap();
    assert_eq!(strict.report().unwrap()["meets_threshold"], json!(false));
    assert_eq!(lenient.report().unwrap()["meets_threshold"], json!(true));
    assert_eq!(strict.final_state.get_f64("quality_threshold"), Some(10.5));
}
