//! Generation-backed pipeline stages.

pub mod non_data;
pub mod planner;
pub mod router;
pub mod synthesizer;

pub use non_data::{NonDataAgent, NonDataAnswer};
pub use planner::{SqlPlan, SqlPlannerAgent};
pub use router::{Confidence, Route, RouteDecision, RouterAgent};
pub use synthesizer::{Synthesis, SynthesizerAgent};
