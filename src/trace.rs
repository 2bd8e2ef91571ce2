//! Turn trace
//!
//! Structured, replayable record of everything that happened in one
//! conversational turn. Plain serializable data with no presentation logic;
//! any display surface consumes these records as-is.

use crate::agents::router::Route;
use crate::agents::synthesizer::Synthesis;
use crate::executor::QueryResult;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Running,
    Success,
    Error,
}

/// One pipeline stage invocation. Created `running`, transitions exactly once
/// to `success` or `error`, immutable thereafter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentStep {
    pub agent_name: String,
    pub status: StepStatus,
    pub started_at: String,
    pub completed_at: Option<String>,
    pub output: Option<Value>,
    pub error: Option<String>,
}

impl AgentStep {
    pub fn start(agent_name: impl Into<String>) -> Self {
        Self {
            agent_name: agent_name.into(),
            status: StepStatus::Running,
            started_at: Utc::now().to_rfc3339(),
            completed_at: None,
            output: None,
            error: None,
        }
    }

    pub fn succeed(mut self, output: Value) -> Self {
        debug_assert_eq!(self.status, StepStatus::Running);
        self.status = StepStatus::Success;
        self.completed_at = Some(Utc::now().to_rfc3339());
        self.output = Some(output);
        self
    }

    pub fn fail(mut self, error: impl Into<String>) -> Self {
        debug_assert_eq!(self.status, StepStatus::Running);
        self.status = StepStatus::Error;
        self.completed_at = Some(Utc::now().to_rfc3339());
        self.error = Some(error.into());
        self
    }
}

/// Complete trace of one turn. One per-stage slot for each stage actually
/// visited, plus the flat ordered log of all steps.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TurnTrace {
    pub router_step: Option<AgentStep>,
    pub selected_route: Option<Route>,

    pub planner_step: Option<AgentStep>,
    pub generated_sql: Option<String>,
    pub sql_corrected: bool,
    pub original_sql_error: Option<String>,

    pub executor_step: Option<AgentStep>,
    pub execution_metadata: Option<Value>,

    pub synthesizer_step: Option<AgentStep>,
    pub synthesis_output: Option<Synthesis>,

    pub nondata_step: Option<AgentStep>,

    pub all_steps: Vec<AgentStep>,
}

impl TurnTrace {
    /// Record a just-started step in its stage slot and the ordered log.
    /// The step appears with status `running` until [`TurnTrace::close`]
    /// replaces it with the completed version.
    pub fn open(&mut self, step: &AgentStep, slot: StepSlot) {
        self.set_slot(step.clone(), slot);
        self.all_steps.push(step.clone());
    }

    /// Replace the opened step with its completed version, in both the
    /// stage slot and the ordered log. Stages run strictly sequentially,
    /// so the step being closed is the most recently opened one.
    pub fn close(&mut self, step: AgentStep, slot: StepSlot) {
        self.set_slot(step.clone(), slot);
        match self.all_steps.last_mut() {
            Some(last) if last.agent_name == step.agent_name => *last = step,
            _ => self.all_steps.push(step),
        }
    }

    fn set_slot(&mut self, step: AgentStep, slot: StepSlot) {
        match slot {
            StepSlot::Router => self.router_step = Some(step),
            StepSlot::Planner => self.planner_step = Some(step),
            StepSlot::Executor => self.executor_step = Some(step),
            StepSlot::Synthesizer => self.synthesizer_step = Some(step),
            StepSlot::NonData => self.nondata_step = Some(step),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum StepSlot {
    Router,
    Planner,
    Executor,
    Synthesizer,
    NonData,
}

/// One user message and everything the pipeline produced for it. Immutable
/// once the orchestrator returns it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub id: Uuid,
    pub user_message: String,
    pub trace: TurnTrace,
    pub result: Option<QueryResult>,
    pub final_answer: Option<String>,
}

impl ConversationTurn {
    pub fn new(user_message: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_message: user_message.into(),
            trace: TurnTrace::default(),
            result: None,
            final_answer: None,
        }
    }
}
