use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use futures::FutureExt;
use serde_json::{json, Map, Value};
use tracing::{debug, error, info, warn};

use flowrun_core::config::FlowConfig;
use flowrun_core::error::{FlowError, Result};
use flowrun_core::types::{ExecutionStatus, RunId, State};

use super::log::{ExecutionLog, TraceAction};
use super::workflow::WorkflowGraph;

pub const DEFAULT_MAX_ITERATIONS: usize = 100;

/// Node id recorded on entries that belong to the run rather than a node.
const SYSTEM_NODE: &str = "system";

/// Per-run knobs.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Generated when absent.
    pub run_id: Option<String>,
    /// Hard cap on node-steps for the run.
    pub max_iterations: usize,
}

impl RunOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &FlowConfig) -> Self {
        Self {
            run_id: None,
            max_iterations: config.executor.max_iterations,
        }
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            run_id: None,
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }
}

/// Outcome of a run that did not fail.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub final_state: State,
    pub log: ExecutionLog,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Blocking,
    Suspending,
}

/// Walks a [`WorkflowGraph`] one node at a time.
///
/// One executor can host any number of concurrent runs; each run's log lives
/// in the run registry under its run id, including runs that failed. The
/// graph is shared read-only across runs.
pub struct GraphExecutor {
    graph: Arc<WorkflowGraph>,
    runs: RwLock<HashMap<String, Arc<Mutex<ExecutionLog>>>>,
}

impl GraphExecutor {
    pub fn new(graph: impl Into<Arc<WorkflowGraph>>) -> Self {
        Self {
            graph: graph.into(),
            runs: RwLock::new(HashMap::new()),
        }
    }

    pub fn graph(&self) -> &WorkflowGraph {
        &self.graph
    }

    /// Run to completion on the calling thread.
    ///
    /// Returns the node's own error on failure; the failed run's log stays
    /// available through [`get_execution`](Self::get_execution).
    pub fn execute(&self, initial_state: State, options: RunOptions) -> Result<ExecutionResult> {
        // Blocking mode never awaits anything that can be pending.
        self.drive(initial_state, options, Mode::Blocking)
            .now_or_never()
            .unwrap_or_else(|| Err(FlowError::callable("blocking run was suspended")))
    }

    /// Run to completion, awaiting each node's suspension-capable transform.
    pub async fn execute_async(
        &self,
        initial_state: State,
        options: RunOptions,
    ) -> Result<ExecutionResult> {
        self.drive(initial_state, options, Mode::Suspending).await
    }

    /// Copy of the log for `run_id`, if that run was started here.
    pub fn get_execution(&self, run_id: &str) -> Option<ExecutionLog> {
        let runs = self.runs.read().unwrap_or_else(PoisonError::into_inner);
        runs.get(run_id).map(|handle| with_log(handle, |log| log.clone()))
    }

    /// Every run id this executor has seen, sorted.
    pub fn run_ids(&self) -> Vec<String> {
        let runs = self.runs.read().unwrap_or_else(PoisonError::into_inner);
        let mut ids: Vec<String> = runs.keys().cloned().collect();
        ids.sort();
        ids
    }

    async fn drive(
        &self,
        initial_state: State,
        options: RunOptions,
        mode: Mode,
    ) -> Result<ExecutionResult> {
        let run_id = options.run_id.unwrap_or_else(|| RunId::new().0);
        let max_iterations = options.max_iterations;

        // Structural problems never produce a logged run.
        self.graph.validate()?;
        for (node_id, target) in self.graph.dangling_targets() {
            warn!(node_id = %node_id, target = %target, "Routing target is not a node in the graph");
        }

        let handle = Arc::new(Mutex::new(ExecutionLog::new(&run_id, self.graph.id())));
        self.runs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(run_id.clone(), handle.clone());

        with_log(&handle, |log| {
            log.transition(ExecutionStatus::Running)?;
            log.save_state(&initial_state);
            Ok::<_, FlowError>(())
        })?;
        info!(run_id = %run_id, graph_id = %self.graph.id(), "Workflow run started");
        let _guard = AbortGuard {
            handle: handle.clone(),
            run_id: run_id.clone(),
        };

        let mut state = initial_state;
        let mut current = self.graph.start_node().map(str::to_string);
        let mut iterations = 0usize;

        while let Some(node_id) = current.clone() {
            if iterations >= max_iterations {
                break;
            }
            iterations += 1;

            let Some(node) = self.graph.node(&node_id) else {
                warn!(run_id = %run_id, node_id = %node_id, "Node not found, ending run");
                with_log(&handle, |log| {
                    log.add_entry(
                        &node_id,
                        TraceAction::Error,
                        None,
                        Some(format!("Node '{}' not found", node_id)),
                    )
                });
                current = None;
                break;
            };

            with_log(&handle, |log| {
                log.add_entry(&node_id, TraceAction::ExecuteStart, None, None)
            });
            debug!(run_id = %run_id, node_id = %node_id, kind = node.kind(), iteration = iterations, "Executing node");

            let outcome = match mode {
                Mode::Blocking => {
                    panic::catch_unwind(AssertUnwindSafe(|| node.transform(state.clone())))
                }
                Mode::Suspending => {
                    AssertUnwindSafe(node.transform_async(state.clone()))
                        .catch_unwind()
                        .await
                }
            }
            .unwrap_or_else(|payload| {
                Err(FlowError::node_execution(
                    &node_id,
                    format!("panicked: {}", panic_message(payload.as_ref())),
                ))
            });
            match outcome {
                Ok(next_state) => {
                    state = next_state;
                    with_log(&handle, |log| {
                        log.add_entry(&node_id, TraceAction::ExecuteSuccess, None, None);
                        log.save_state(&state);
                    });
                }
                Err(e) => {
                    with_log(&handle, |log| {
                        log.add_entry(&node_id, TraceAction::ExecuteError, None, Some(e.to_string()))
                    });
                    return fail(&handle, &run_id, e);
                }
            }

            let next = match self.graph.get_next_node(&node_id, &state) {
                Ok(next) => next,
                Err(e) => {
                    with_log(&handle, |log| {
                        log.add_entry(&node_id, TraceAction::RouteError, None, Some(e.to_string()))
                    });
                    return fail(&handle, &run_id, e);
                }
            };

            let mut details = Map::new();
            details.insert("next".to_string(), next.clone().map_or(Value::Null, Value::String));
            with_log(&handle, |log| {
                log.add_entry(&node_id, TraceAction::NextNode, Some(details), None)
            });
            current = next;
        }

        if current.is_some() {
            let message = format!("Workflow exceeded max iterations ({})", max_iterations);
            warn!(run_id = %run_id, max_iterations, "Iteration cap reached, stopping run");
            let mut details = Map::new();
            details.insert("max".to_string(), json!(max_iterations));
            with_log(&handle, |log| {
                log.add_entry(SYSTEM_NODE, TraceAction::MaxIterationsReached, Some(details), None);
                log.set_error(message);
            });
        }

        let log = with_log(&handle, |log| {
            log.transition(ExecutionStatus::Completed)?;
            Ok::<_, FlowError>(log.clone())
        })?;
        info!(
            run_id = %run_id,
            steps = iterations,
            snapshots = log.state_history().len(),
            "Workflow run completed"
        );

        Ok(ExecutionResult {
            final_state: state,
            log,
        })
    }
}

impl std::fmt::Debug for GraphExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphExecutor")
            .field("graph", &self.graph.id())
            .field("runs", &self.run_ids())
            .finish()
    }
}

fn with_log<R>(handle: &Mutex<ExecutionLog>, f: impl FnOnce(&mut ExecutionLog) -> R) -> R {
    let mut log = handle.lock().unwrap_or_else(PoisonError::into_inner);
    f(&mut log)
}

/// Fails a run that is dropped while still RUNNING, which happens when an
/// `execute_async` future is cancelled mid-node.
struct AbortGuard {
    handle: Arc<Mutex<ExecutionLog>>,
    run_id: String,
}

impl Drop for AbortGuard {
    fn drop(&mut self) {
        with_log(&self.handle, |log| {
            if log.status() != ExecutionStatus::Running {
                return;
            }
            warn!(run_id = %self.run_id, "Workflow run aborted before completion");
            log.add_entry(SYSTEM_NODE, TraceAction::Error, None, Some(ABORTED.to_string()));
            log.set_error(ABORTED);
            // Running -> Failed is always a legal transition.
            let _ = log.transition(ExecutionStatus::Failed);
        });
    }
}

const ABORTED: &str = "Workflow run aborted before completion";

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        *message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "unknown panic"
    }
}

/// Close the run as FAILED and hand the error back for re-raising.
fn fail(handle: &Mutex<ExecutionLog>, run_id: &str, error: FlowError) -> Result<ExecutionResult> {
    error!(run_id = %run_id, error = %error, "Workflow run failed");
    with_log(handle, |log| {
        log.set_error(error.to_string());
        log.transition(ExecutionStatus::Failed)
    })?;
    Err(error)
}
