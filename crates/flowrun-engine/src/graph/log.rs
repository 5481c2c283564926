use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use flowrun_core::error::{FlowError, Result};
use flowrun_core::types::{ExecutionStatus, State};

/// What happened at a trace point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceAction {
    ExecuteStart,
    ExecuteSuccess,
    ExecuteError,
    NextNode,
    RouteError,
    Error,
    MaxIterationsReached,
}

impl TraceAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ExecuteStart => "execute_start",
            Self::ExecuteSuccess => "execute_success",
            Self::ExecuteError => "execute_error",
            Self::NextNode => "next_node",
            Self::RouteError => "route_error",
            Self::Error => "error",
            Self::MaxIterationsReached => "max_iterations_reached",
        }
    }
}

impl std::fmt::Display for TraceAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single trace record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEntry {
    pub timestamp: DateTime<Utc>,
    pub node_id: String,
    pub action: TraceAction,
    #[serde(default)]
    pub details: Map<String, Value>,
    #[serde(default)]
    pub error: Option<String>,
}

/// A point-in-time copy of run state.
#[derive(Debug, Clone)]
pub struct StateSnapshot {
    pub timestamp: DateTime<Utc>,
    pub state: State,
}

/// Append-only record of one run.
///
/// Only the executor writes to it; everyone else reads through the getters
/// or the serialized [`ExecutionLogView`].
#[derive(Debug, Clone)]
pub struct ExecutionLog {
    run_id: String,
    graph_id: String,
    status: ExecutionStatus,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    error: Option<String>,
    entries: Vec<TraceEntry>,
    state_history: Vec<StateSnapshot>,
}

impl ExecutionLog {
    pub(crate) fn new(run_id: impl Into<String>, graph_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            graph_id: graph_id.into(),
            status: ExecutionStatus::Pending,
            started_at: None,
            completed_at: None,
            error: None,
            entries: Vec::new(),
            state_history: Vec::new(),
        }
    }

    pub(crate) fn add_entry(
        &mut self,
        node_id: impl Into<String>,
        action: TraceAction,
        details: Option<Map<String, Value>>,
        error: Option<String>,
    ) {
        self.entries.push(TraceEntry {
            timestamp: Utc::now(),
            node_id: node_id.into(),
            action,
            details: details.unwrap_or_default(),
            error,
        });
    }

    /// Snapshot `state`. Later writes to the live state never reach the
    /// snapshot since `State::set` copies shared storage before mutating.
    pub(crate) fn save_state(&mut self, state: &State) {
        self.state_history.push(StateSnapshot {
            timestamp: Utc::now(),
            state: state.clone(),
        });
    }

    /// Move to `next`, stamping start or completion time as appropriate.
    pub(crate) fn transition(&mut self, next: ExecutionStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(FlowError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        let now = Utc::now();
        match next {
            ExecutionStatus::Running => self.started_at = Some(now),
            s if s.is_terminal() => self.completed_at = Some(now),
            _ => {}
        }
        self.status = next;
        Ok(())
    }

    pub(crate) fn set_error(&mut self, error: impl Into<String>) {
        self.error = Some(error.into());
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn graph_id(&self) -> &str {
        &self.graph_id
    }

    pub fn status(&self) -> ExecutionStatus {
        self.status
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn entries(&self) -> &[TraceEntry] {
        &self.entries
    }

    pub fn state_history(&self) -> &[StateSnapshot] {
        &self.state_history
    }

    pub fn count(&self, action: TraceAction) -> usize {
        self.entries.iter().filter(|e| e.action == action).count()
    }

    /// Serializable summary. Snapshot contents are reduced to their count.
    pub fn to_view(&self) -> ExecutionLogView {
        ExecutionLogView {
            run_id: self.run_id.clone(),
            graph_id: self.graph_id.clone(),
            status: self.status,
            started_at: self.started_at,
            completed_at: self.completed_at,
            error: self.error.clone(),
            entries: self.entries.clone(),
            state_history_length: self.state_history.len(),
        }
    }
}

/// Transport form of an [`ExecutionLog`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionLogView {
    pub run_id: String,
    pub graph_id: String,
    pub status: ExecutionStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub entries: Vec<TraceEntry>,
    pub state_history_length: usize,
}
