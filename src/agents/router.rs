//! Routing decision
//!
//! Classifies a user message into the data path (needs a warehouse query) or
//! the non-data path (answered conversationally). Ambiguous or malformed
//! routes deliberately fall back to `data`: a visible, correctable SQL result
//! beats silently under-serving a data question.

use crate::error::Result;
use crate::llm::{get_str, FieldSpec, GenerationBackend};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Route {
    #[serde(rename = "data")]
    Data,
    #[serde(rename = "non-data")]
    NonData,
}

impl Route {
    /// Normalize a raw route value; returns `None` for anything unrecognized.
    pub fn parse(raw: &str) -> Option<Route> {
        match raw.trim().to_lowercase().as_str() {
            "data" => Some(Route::Data),
            "non-data" => Some(Route::NonData),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Route::Data => "data",
            Route::NonData => "non-data",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

impl Confidence {
    pub fn parse_or_medium(raw: &str) -> Confidence {
        match raw.trim().to_lowercase().as_str() {
            "high" => Confidence::High,
            "low" => Confidence::Low,
            _ => Confidence::Medium,
        }
    }
}

/// Result of the routing decision with its reasoning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteDecision {
    pub route: Route,
    pub confidence: Confidence,
    pub rationale: String,
    pub user_intent: String,
}

const EXPECTED_FIELDS: FieldSpec<'static> = &[
    ("route", "str"),
    ("confidence", "str"),
    ("rationale", "str"),
    ("user_intent", "str"),
];

pub struct RouterAgent {
    llm: Arc<dyn GenerationBackend>,
    default_route: Route,
}

impl RouterAgent {
    pub fn new(llm: Arc<dyn GenerationBackend>, default_route: Route) -> Self {
        Self { llm, default_route }
    }

    /// Classify a user message. Fails only on generation-transport failure;
    /// malformed backend output is normalized, not surfaced.
    pub async fn route(&self, message: &str) -> Result<RouteDecision> {
        info!("Routing user message: {}", crate::llm::truncate(message, 100));

        let prompt = format!(
            "You are an intelligent query router for a data analytics system.\n\n\
             Analyze the user's message and determine if it:\n\
             - Requires DATABASE ACCESS (route='data'): Questions about products, sales, customers, \
             orders, categories, territories, or any business metrics/analytics\n\
             - Can be answered DIRECTLY (route='non-data'): Greetings, general questions, \
             system help, or topics unrelated to the database\n\n\
             User Message: \"{}\"\n\n\
             Provide:\n\
             1. route: 'data' or 'non-data'\n\
             2. confidence: 'high', 'medium', or 'low'\n\
             3. rationale: Brief explanation (1-2 sentences) of why you chose this route\n\
             4. user_intent: One-sentence summary of what the user wants to know",
            message
        );

        let rsp = self.llm.complete(&prompt, EXPECTED_FIELDS).await?;

        let raw_route = get_str(&rsp, "route", self.default_route.as_str());
        let route = Route::parse(&raw_route).unwrap_or_else(|| {
            warn!("Invalid route '{}', defaulting to '{}'", raw_route, self.default_route.as_str());
            self.default_route
        });

        let decision = RouteDecision {
            route,
            confidence: Confidence::parse_or_medium(&get_str(&rsp, "confidence", "medium")),
            rationale: get_str(&rsp, "rationale", "No rationale provided"),
            user_intent: get_str(&rsp, "user_intent", message),
        };

        info!(
            "Routing decision: route={}, confidence={:?}",
            decision.route.as_str(),
            decision.confidence
        );

        Ok(decision)
    }
}
