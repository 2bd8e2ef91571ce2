//! Result synthesis
//!
//! Turns a tabular query result into narrative insights plus an optional
//! Vega-Lite chart spec. Only a bounded preview of the rows is sent to the
//! generation backend; chart construction is pure post-processing over the
//! proposed field bindings and the actual rows, and any problem there
//! silently drops the chart rather than failing the turn.

use crate::error::Result;
use crate::llm::{get_object, get_str, get_str_list, FieldSpec, GenerationBackend, JsonMap};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};

/// Summary substituted when the backend returns nothing usable.
pub const FALLBACK_SUMMARY: &str = "Analysis completed.";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Synthesis {
    pub summary: String,
    pub key_findings: Vec<String>,
    pub detailed_analysis: String,
    pub recommendations: Vec<String>,
    /// Complete Vega-Lite v5 spec with embedded data, when charting applies.
    pub chart_spec: Option<Value>,
}

const EXPECTED_FIELDS: FieldSpec<'static> = &[
    ("summary", "str"),
    ("key_findings", "list"),
    ("detailed_analysis", "str"),
    ("recommendations", "list"),
    ("chart_config", "dict|null"),
];

pub struct SynthesizerAgent {
    llm: Arc<dyn GenerationBackend>,
    preview_rows: usize,
    chart_max_rows: usize,
}

impl SynthesizerAgent {
    pub fn new(llm: Arc<dyn GenerationBackend>, preview_rows: usize, chart_max_rows: usize) -> Self {
        Self {
            llm,
            preview_rows,
            chart_max_rows,
        }
    }

    pub async fn synthesize(&self, columns: &[String], rows: &[Vec<Value>]) -> Result<Synthesis> {
        let row_count = rows.len();
        info!("Synthesizing {} rows with {} columns", row_count, columns.len());

        let preview = rows.iter().take(self.preview_rows);
        let data_preview: Vec<String> = preview
            .map(|row| format!("  {}", serde_json::Value::Object(row_to_object(columns, row))))
            .collect();

        let prompt = format!(
            "You are a business intelligence analyst transforming query results into actionable insights.\n\n\
             TASK: Analyze the data and provide comprehensive business insights.\n\n\
             DATA SUMMARY:\n\
             - Total Rows: {}\n\
             - Columns: {}\n\n\
             DATA PREVIEW (first {} rows):\n{}\n\n\
             REQUIREMENTS:\n\
             1. summary: Write a 2-3 sentence executive summary of the key takeaway\n\
             2. key_findings: List 3-5 specific insights as bullet points (be specific with numbers/trends)\n\
             3. detailed_analysis: Provide a detailed paragraph (4-6 sentences) analyzing patterns, \
             trends, comparisons, or notable observations\n\
             4. recommendations: List 2-4 actionable business recommendations based on the data\n\
             5. chart_config: If the data is suitable for visualization, provide chart configuration. \
             Return an object with: 'mark' (bar/line/point), 'x_field' (column name for X-axis), \
             'x_type' (nominal/quantitative/temporal), 'y_field' (column for Y-axis), 'y_type'. \
             Return null if visualization isn't helpful. DO NOT include 'data' field.\n\n\
             BE SPECIFIC: Use actual values from the data, not generic statements.",
            row_count,
            columns.join(", "),
            data_preview.len(),
            data_preview.join("\n")
        );

        let rsp = self.llm.complete(&prompt, EXPECTED_FIELDS).await?;

        let chart_spec = get_object(&rsp, "chart_config")
            .and_then(|config| self.build_chart_spec(config, columns, rows));

        let synthesis = Synthesis {
            summary: get_str(&rsp, "summary", FALLBACK_SUMMARY),
            key_findings: get_str_list(&rsp, "key_findings"),
            detailed_analysis: get_str(&rsp, "detailed_analysis", "No detailed analysis available."),
            recommendations: get_str_list(&rsp, "recommendations"),
            chart_spec,
        };

        info!(
            "Synthesis complete: {} findings, {} recommendations, chart={}",
            synthesis.key_findings.len(),
            synthesis.recommendations.len(),
            if synthesis.chart_spec.is_some() { "yes" } else { "no" }
        );

        Ok(synthesis)
    }

    /// Build a complete Vega-Lite spec from the proposed bindings and a
    /// bounded sample of the actual rows. Returns `None` on any problem;
    /// a missing chart never fails the turn.
    fn build_chart_spec(
        &self,
        config: &JsonMap,
        columns: &[String],
        rows: &[Vec<Value>],
    ) -> Option<Value> {
        if columns.is_empty() {
            return None;
        }

        let x_field = get_str(config, "x_field", &columns[0]);
        let y_default = columns.get(1).unwrap_or(&columns[0]);
        let y_field = get_str(config, "y_field", y_default);

        if !columns.contains(&x_field) || !columns.contains(&y_field) {
            warn!(
                "Chart bindings reference unknown columns (x={}, y={}), dropping chart",
                x_field, y_field
            );
            return None;
        }

        let data_values: Vec<Value> = rows
            .iter()
            .take(self.chart_max_rows)
            .map(|row| Value::Object(row_to_object(columns, row)))
            .collect();

        let spec = serde_json::json!({
            "$schema": "https://vega.github.io/schema/vega-lite/v5.json",
            "data": {"values": data_values},
            "mark": get_str(config, "mark", "bar"),
            "width": 400,
            "height": 300,
            "encoding": {
                "x": {
                    "field": x_field,
                    "type": get_str(config, "x_type", "nominal"),
                },
                "y": {
                    "field": y_field,
                    "type": get_str(config, "y_type", "quantitative"),
                },
            },
        });

        info!("Built chart spec with {} data points", rows.len().min(self.chart_max_rows));
        Some(spec)
    }
}

fn row_to_object(columns: &[String], row: &[Value]) -> JsonMap {
    columns
        .iter()
        .cloned()
        .zip(row.iter().cloned())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent_for_chart_tests() -> SynthesizerAgent {
        struct NoopBackend;
        #[async_trait::async_trait]
        impl GenerationBackend for NoopBackend {
            async fn complete(
                &self,
                _prompt: &str,
                _expected: crate::llm::FieldSpec<'_>,
            ) -> crate::error::Result<JsonMap> {
                Ok(JsonMap::new())
            }
        }
        SynthesizerAgent::new(Arc::new(NoopBackend), 20, 100)
    }

    fn sample_table() -> (Vec<String>, Vec<Vec<Value>>) {
        let columns = vec!["Region".to_string(), "Total".to_string()];
        let rows = vec![
            vec![Value::from("North"), Value::from(120)],
            vec![Value::from("South"), Value::from(80)],
        ];
        (columns, rows)
    }

    #[test]
    fn test_chart_defaults_to_bar_mark() {
        let agent = agent_for_chart_tests();
        let (columns, rows) = sample_table();
        let config: JsonMap = serde_json::from_str(r#"{"x_field": "Region", "y_field": "Total"}"#).unwrap();

        let spec = agent.build_chart_spec(&config, &columns, &rows).unwrap();
        assert_eq!(spec["mark"], "bar");
        assert_eq!(spec["encoding"]["x"]["field"], "Region");
        assert_eq!(spec["encoding"]["y"]["type"], "quantitative");
        assert_eq!(spec["data"]["values"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_chart_dropped_when_binding_unknown() {
        let agent = agent_for_chart_tests();
        let (columns, rows) = sample_table();
        let config: JsonMap =
            serde_json::from_str(r#"{"x_field": "NoSuchColumn", "y_field": "Total"}"#).unwrap();

        assert!(agent.build_chart_spec(&config, &columns, &rows).is_none());
    }

    #[test]
    fn test_chart_dropped_for_empty_table() {
        let agent = agent_for_chart_tests();
        let config = JsonMap::new();
        assert!(agent.build_chart_spec(&config, &[], &[]).is_none());
    }

    #[test]
    fn test_chart_data_bounded() {
        let agent = agent_for_chart_tests();
        let columns = vec!["n".to_string()];
        let rows: Vec<Vec<Value>> = (0..250).map(|i| vec![Value::from(i)]).collect();
        let config = JsonMap::new();

        let spec = agent.build_chart_spec(&config, &columns, &rows).unwrap();
        assert_eq!(spec["data"]["values"].as_array().unwrap().len(), 100);
    }
}
