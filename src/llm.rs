//! Generation backend
//!
//! The assistant core talks to an opaque text-generation service through the
//! [`GenerationBackend`] trait: hand it a prompt plus the expected output
//! shape, get back a structured map or a typed failure. The HTTP client here
//! targets an OpenAI-compatible chat endpoint and retries transient failures
//! with bounded exponential backoff; the orchestrator only ever sees a
//! terminal success or a `Generation` error.
//!
//! Models rarely return perfectly clean JSON, so parsing is layered:
//! strict parse first, then fence/control-character stripping, brace
//! balancing, quote repair, and finally a permissive pass that accepts
//! Python-style literals. Only when every layer fails does the call surface
//! a `Generation` error.

use crate::error::{AssistantError, Result};
use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

pub type JsonMap = serde_json::Map<String, Value>;

/// A single expected output field: (name, type tag such as "str" or "list").
pub type FieldSpec<'a> = &'a [(&'a str, &'a str)];

#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Complete a prompt into a structured map matching `expected_fields`.
    ///
    /// Callers must treat every field as optional and substitute their own
    /// defaults; the backend guarantees only that the returned value is a
    /// JSON object.
    async fn complete(&self, prompt: &str, expected_fields: FieldSpec<'_>) -> Result<JsonMap>;
}

/// HTTP client for an OpenAI-style chat completions endpoint.
pub struct HttpGenerationClient {
    api_key: String,
    base_url: String,
    model: String,
    max_retries: u32,
    base_delay: Duration,
    client: reqwest::Client,
}

impl HttpGenerationClient {
    pub fn new(api_key: String, base_url: String, model: String) -> Self {
        Self {
            api_key,
            base_url,
            model,
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
            client: reqwest::Client::new(),
        }
    }

    pub fn with_retry_policy(mut self, max_retries: u32, base_delay_ms: u64) -> Self {
        self.max_retries = max_retries;
        self.base_delay = Duration::from_millis(base_delay_ms);
        self
    }

    async fn call_once(&self, prompt: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": "You are a precise JSON-only responder. Always return valid JSON, no other text."},
                {"role": "user", "content": prompt}
            ],
            "temperature": 0.1,
            "max_tokens": 1500
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| AssistantError::Generation(format!("LLM API call failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AssistantError::Generation(format!(
                "LLM API returned status {}",
                status
            )));
        }

        let response_json: Value = response
            .json()
            .await
            .map_err(|e| AssistantError::Generation(format!("Failed to read LLM response: {}", e)))?;

        let content = response_json["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| AssistantError::Generation("No content in LLM response".to_string()))?;

        Ok(content.to_string())
    }
}

/// Retryable transport-level failures: rate limits and server errors.
fn is_transient(error: &AssistantError) -> bool {
    let msg = error.to_string();
    msg.contains("status 429")
        || msg.contains("status 500")
        || msg.contains("status 502")
        || msg.contains("status 503")
        || msg.contains("timed out")
}

/// Invoke `call` until it succeeds, fails non-transiently, or the attempt
/// bound is reached. Backoff doubles per attempt from `base_delay`.
async fn retry_transient<F, Fut>(max_retries: u32, base_delay: Duration, mut call: F) -> Result<String>
where
    F: FnMut(u32) -> Fut,
    Fut: std::future::Future<Output = Result<String>>,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match call(attempt).await {
            Ok(text) => return Ok(text),
            Err(e) if is_transient(&e) && attempt < max_retries => {
                let delay = base_delay * 2u32.pow(attempt - 1);
                warn!(
                    "Transient LLM failure on attempt {}/{}, retrying in {:?}: {}",
                    attempt, max_retries, delay, e
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

#[async_trait]
impl GenerationBackend for HttpGenerationClient {
    async fn complete(&self, prompt: &str, expected_fields: FieldSpec<'_>) -> Result<JsonMap> {
        let shape: Vec<String> = expected_fields
            .iter()
            .map(|(name, tag)| format!("{} ({})", name, tag))
            .collect();
        let full_prompt = format!(
            "You must output strictly valid JSON with the following keys and types: {}. \
             Do not include markdown fences or extraneous text.\n\n{}",
            shape.join(", "),
            prompt
        );
        debug!("LLM prompt (truncated): {}", truncate(&full_prompt, 300));

        let text = retry_transient(self.max_retries, self.base_delay, |_| {
            self.call_once(&full_prompt)
        })
        .await?;
        parse_structured(&text)
    }
}

/// Strip markdown code fences and control characters around a JSON block.
fn strip_code_fences(text: &str) -> String {
    let mut t: String = text
        .trim()
        .chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .collect();

    for prefix in ["```json", "```", "'''json", "'''"] {
        if t.starts_with(prefix) {
            t = t[prefix.len()..].to_string();
            break;
        }
    }
    for suffix in ["```", "'''"] {
        if t.ends_with(suffix) {
            t = t[..t.len() - suffix.len()].to_string();
            break;
        }
    }
    t.trim().to_string()
}

/// Append missing closing braces/brackets when the text starts with { or [.
fn balance_braces(text: &str) -> String {
    let t = text.trim();
    if t.starts_with('{') {
        let open = t.matches('{').count();
        let close = t.matches('}').count();
        if open > close {
            return format!("{}{}", t, "}".repeat(open - close));
        }
    } else if t.starts_with('[') {
        let open = t.matches('[').count();
        let close = t.matches(']').count();
        if open > close {
            return format!("{}{}", t, "]".repeat(open - close));
        }
    }
    t.to_string()
}

/// Repair an unterminated string value in truncated model output.
fn repair_quotes(text: &str) -> Option<String> {
    let quote_count = text.matches('"').count();
    if quote_count % 2 != 0 {
        let trimmed = text.trim_end();
        if !trimmed.ends_with('}') {
            return Some(format!("{}\"}}", trimmed));
        }
        return Some(format!("{}\"}}", &trimmed[..trimmed.len() - 1]));
    }
    if text.matches('{').count() > text.matches('}').count() {
        return Some(format!("{}}}", text.trim_end()));
    }
    None
}

lazy_static! {
    static ref PY_NONE: Regex = Regex::new(r"\bNone\b").unwrap();
    static ref PY_TRUE: Regex = Regex::new(r"\bTrue\b").unwrap();
    static ref PY_FALSE: Regex = Regex::new(r"\bFalse\b").unwrap();
}

/// Permissive last-resort parse accepting Python-style literals.
fn parse_permissive(text: &str) -> Option<JsonMap> {
    let mut t = text.replace('\'', "\"");
    t = PY_NONE.replace_all(&t, "null").into_owned();
    t = PY_TRUE.replace_all(&t, "true").into_owned();
    t = PY_FALSE.replace_all(&t, "false").into_owned();
    match serde_json::from_str::<Value>(&t) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

fn as_object(value: Value) -> Option<JsonMap> {
    match value {
        Value::Object(map) => Some(map),
        _ => None,
    }
}

/// Parse model output into a JSON object, repairing near-miss text.
///
/// Layered: strict parse, fence stripping, brace balancing, quote repair,
/// then a permissive literal pass. Anything still unparsable is a
/// `Generation` error.
pub fn parse_structured(text: &str) -> Result<JsonMap> {
    if let Ok(v) = serde_json::from_str::<Value>(text) {
        if let Some(map) = as_object(v) {
            return Ok(map);
        }
    }

    let cleaned = strip_code_fences(text);
    let healed = balance_braces(&cleaned);

    if let Ok(v) = serde_json::from_str::<Value>(&healed) {
        if let Some(map) = as_object(v) {
            return Ok(map);
        }
    }

    if let Some(repaired) = repair_quotes(&healed) {
        if let Ok(v) = serde_json::from_str::<Value>(&repaired) {
            if let Some(map) = as_object(v) {
                debug!("Structured-output repair succeeded after quote fix");
                return Ok(map);
            }
        }
    }

    if let Some(map) = parse_permissive(&healed) {
        debug!("Structured-output repair succeeded via permissive parse");
        return Ok(map);
    }

    Err(AssistantError::Generation(format!(
        "Backend did not return parsable structured output: {}",
        truncate(&healed, 200)
    )))
}

/// Char-boundary-safe prefix for log lines and error messages.
pub fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

/// Field extraction helpers. Every field is optional by contract.
pub fn get_str(map: &JsonMap, key: &str, default: &str) -> String {
    map.get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| default.to_string())
}

pub fn get_str_list(map: &JsonMap, key: &str) -> Vec<String> {
    map.get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

pub fn get_object<'a>(map: &'a JsonMap, key: &str) -> Option<&'a JsonMap> {
    map.get(key).and_then(Value::as_object)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_clean_json() {
        let map = parse_structured(r#"{"route": "data", "confidence": "high"}"#).unwrap();
        assert_eq!(map["route"], "data");
    }

    #[test]
    fn test_parse_fenced_json() {
        let map = parse_structured("```json\n{\"answer\": \"hello\"}\n```").unwrap();
        assert_eq!(map["answer"], "hello");
    }

    #[test]
    fn test_parse_truncated_object() {
        // Missing closing brace
        let map = parse_structured(r#"{"sql": "SELECT 1", "confidence": "low""#).unwrap();
        assert_eq!(map["sql"], "SELECT 1");
    }

    #[test]
    fn test_parse_unterminated_string() {
        let map = parse_structured(r#"{"summary": "Sales grew"#).unwrap();
        assert_eq!(map["summary"], "Sales grew");
    }

    #[test]
    fn test_parse_python_literals() {
        let map = parse_structured("{'chart_config': None, 'ok': True}").unwrap();
        assert_eq!(map["chart_config"], Value::Null);
        assert_eq!(map["ok"], Value::Bool(true));
    }

    #[test]
    fn test_parse_garbage_fails() {
        assert!(parse_structured("the model refuses to answer").is_err());
    }

    #[test]
    fn test_non_object_fails() {
        assert!(parse_structured("[1, 2, 3]").is_err());
    }

    #[test]
    fn test_transient_classification() {
        for status in ["429", "500", "502", "503"] {
            let e = AssistantError::Generation(format!("LLM API returned status {}", status));
            assert!(is_transient(&e), "status {} should be transient", status);
        }
        let timeout = AssistantError::Generation("operation timed out".to_string());
        assert!(is_transient(&timeout));

        let unauthorized =
            AssistantError::Generation("LLM API returned status 401 Unauthorized".to_string());
        assert!(!is_transient(&unauthorized));
        let unparsable =
            AssistantError::Generation("Backend did not return parsable structured output".to_string());
        assert!(!is_transient(&unparsable));
    }

    #[tokio::test]
    async fn test_retry_bounded_for_transient_failures() {
        let calls = std::sync::atomic::AtomicU32::new(0);
        let result = retry_transient(3, Duration::from_millis(1), |_| {
            calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            async { Err(AssistantError::Generation("LLM API returned status 503".to_string())) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_no_retry_for_non_transient_failures() {
        let calls = std::sync::atomic::AtomicU32::new(0);
        let result = retry_transient(3, Duration::from_millis(1), |_| {
            calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            async { Err(AssistantError::Generation("LLM API returned status 401".to_string())) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_recovers_after_transient_failure() {
        let result = retry_transient(3, Duration::from_millis(1), |attempt| async move {
            if attempt == 1 {
                Err(AssistantError::Generation("LLM API returned status 429".to_string()))
            } else {
                Ok(r#"{"ok": true}"#.to_string())
            }
        })
        .await;

        assert_eq!(result.unwrap(), r#"{"ok": true}"#);
    }

    #[test]
    fn test_field_helpers_default_when_absent() {
        let map = parse_structured(r#"{"present": "yes"}"#).unwrap();
        assert_eq!(get_str(&map, "present", "no"), "yes");
        assert_eq!(get_str(&map, "missing", "fallback"), "fallback");
        assert!(get_str_list(&map, "missing").is_empty());
        assert!(get_object(&map, "missing").is_none());
    }
}
