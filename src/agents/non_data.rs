//! Direct conversational answers for messages that do not need the warehouse.

use crate::error::Result;
use crate::llm::{get_str, FieldSpec, GenerationBackend};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// Fallback answer substituted by the orchestrator when generation fails.
pub const FALLBACK_ANSWER: &str =
    "I'm here to help with your questions about the data. Could you rephrase that?";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NonDataAnswer {
    pub answer: String,
    pub category: String,
    pub rationale: String,
}

const EXPECTED_FIELDS: FieldSpec<'static> = &[
    ("answer", "str"),
    ("category", "str"),
    ("rationale", "str"),
];

pub struct NonDataAgent {
    llm: Arc<dyn GenerationBackend>,
}

impl NonDataAgent {
    pub fn new(llm: Arc<dyn GenerationBackend>) -> Self {
        Self { llm }
    }

    pub async fn answer(&self, message: &str) -> Result<NonDataAnswer> {
        info!("Answering non-data question: {}", crate::llm::truncate(message, 100));

        let prompt = format!(
            "You are a helpful assistant for a business analytics platform.\n\n\
             The user has asked a question that doesn't require database access. \
             Provide a friendly, helpful, and informative response.\n\n\
             User Message: \"{}\"\n\n\
             Guidelines:\n\
             - For greetings: Be warm and offer help\n\
             - For help requests: Explain system capabilities (SQL analytics, data visualization)\n\
             - For general questions: Provide accurate, concise information\n\
             - Be professional but friendly\n\
             - Keep answers clear and well-structured (2-4 sentences)\n\n\
             Provide:\n\
             1. answer: Your complete response (2-4 sentences, helpful and friendly)\n\
             2. category: Type of question ('greeting', 'help', 'general_knowledge', 'other')\n\
             3. rationale: Brief note on how you interpreted the question",
            message
        );

        let rsp = self.llm.complete(&prompt, EXPECTED_FIELDS).await?;

        let result = NonDataAnswer {
            answer: get_str(&rsp, "answer", FALLBACK_ANSWER),
            category: get_str(&rsp, "category", "general"),
            rationale: get_str(&rsp, "rationale", "Responding to user query"),
        };

        info!("Non-data response generated: category={}", result.category);
        Ok(result)
    }
}
