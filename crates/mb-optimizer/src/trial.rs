//! Evaluation records and optimization run tracking.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique optimization run identifier.
pub type RunId = Uuid;

/// Whether the objective is minimized or maximized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObjectiveDirection {
    Maximize,
    Minimize,
}

impl Default for ObjectiveDirection {
    // Dakota minimizes objectives unless told otherwise.
    fn default() -> Self {
        Self::Minimize
    }
}

/// One completed function evaluation, as recorded in the solver's tabular
/// history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationRecord {
    pub eval_id: usize,
    pub interface: String,
    /// Flat parameter values in codec order.
    pub parameters: Vec<f64>,
    /// Response values in solver order (objectives, then constraints).
    pub responses: Vec<f64>,
}

impl EvaluationRecord {
    /// The primary objective (first response).
    pub fn objective(&self) -> Option<f64> {
        self.responses.first().copied()
    }
}

/// Lifecycle state for an optimization run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunState {
    Pending,
    Running,
    Completed,
    Failed,
}

/// Aggregate status of an optimization run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunStatus {
    pub id: RunId,
    pub problem: String,
    pub direction: ObjectiveDirection,
    pub state: RunState,
    pub evaluations_completed: usize,
    pub best: Option<EvaluationRecord>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl RunStatus {
    pub fn new(problem: impl Into<String>, direction: ObjectiveDirection) -> Self {
        Self {
            id: Uuid::new_v4(),
            problem: problem.into(),
            direction,
            state: RunState::Pending,
            evaluations_completed: 0,
            best: None,
            started_at: None,
            finished_at: None,
            error: None,
        }
    }

    pub fn mark_running(&mut self) {
        self.state = RunState::Running;
        self.started_at = Some(Utc::now());
    }

    pub fn mark_completed(&mut self) {
        self.state = RunState::Completed;
        self.finished_at = Some(Utc::now());
    }

    pub fn mark_failed(&mut self, error: String) {
        self.state = RunState::Failed;
        self.finished_at = Some(Utc::now());
        self.error = Some(error);
    }

    /// Count `record` and keep it if it improves on the current best.
    pub fn record(&mut self, record: &EvaluationRecord) {
        self.evaluations_completed += 1;
        self.update_best(record);
    }

    /// Update the best evaluation if `record` improves on it. Records without
    /// an objective or with a NaN objective never become the best.
    pub fn update_best(&mut self, record: &EvaluationRecord) {
        let Some(objective) = record.objective().filter(|v| !v.is_nan()) else {
            return;
        };
        let improves = match self.best.as_ref().and_then(EvaluationRecord::objective) {
            None => true,
            Some(current) => match self.direction {
                ObjectiveDirection::Maximize => objective > current,
                ObjectiveDirection::Minimize => objective < current,
            },
        };
        if improves {
            self.best = Some(record.clone());
        }
    }

    /// Wall-clock duration of a finished run.
    pub fn duration_seconds(&self) -> Option<i64> {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => Some((end - start).num_seconds()),
            _ => None,
        }
    }
}
