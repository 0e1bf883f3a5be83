//! Explanation Generator
//!
//! Short natural-language summary of a result set. Uses the generative backend
//! when one is configured, otherwise (or on any backend error) a deterministic
//! analyzer that looks at the SQL text and the shape of the rows.

use crate::executor::QueryResult;
use crate::llm::{complete_within, Strategy};
use serde_json::{Map, Value};
use tracing::{debug, warn};

pub const NO_RESULTS_MESSAGE: &str = "No results were found for this query.";

const SAMPLE_ROWS: usize = 5;

const EXPLAIN_SYSTEM_PROMPT: &str = "You are a fleet operations analyst. Given a question, the SQL that answered it and sample rows, \
write a 1-4 sentence summary of what the results show. Focus on insights (leaders, outliers, totals), \
not on the SQL itself. Do not invent values that are not in the rows.";

pub struct ExplanationGenerator {
    strategy: Strategy,
}

impl ExplanationGenerator {
    pub fn new(strategy: Strategy) -> Self {
        Self { strategy }
    }

    pub async fn explain(&self, question: &str, sql: &str, result: &QueryResult) -> String {
        if result.is_empty() {
            return NO_RESULTS_MESSAGE.to_string();
        }

        if let Strategy::RemoteBackend { backend, timeout } = &self.strategy {
            let prompt = explanation_prompt(question, sql, result);
            match complete_within(backend.as_ref(), *timeout, EXPLAIN_SYSTEM_PROMPT, &prompt).await {
                Ok(text) if !text.trim().is_empty() => {
                    return with_row_footer(text.trim(), result.count);
                }
                Ok(_) => warn!("⚠️  Backend returned an empty explanation, using result analyzer"),
                Err(e) => warn!("⚠️  Backend explanation failed, using result analyzer: {}", e),
            }
        }

        describe_result(sql, result)
    }
}

fn explanation_prompt(question: &str, sql: &str, result: &QueryResult) -> String {
    let sample: Vec<&Map<String, Value>> = result.rows.iter().take(SAMPLE_ROWS).collect();
    let sample_json = serde_json::to_string_pretty(&sample).unwrap_or_else(|_| "[]".to_string());
    format!(
        "Question: {}\nSQL executed: {}\nNumber of rows: {}\nSample rows (up to {}):\n{}",
        question, sql, result.count, SAMPLE_ROWS, sample_json
    )
}

/// Append `(<N> rows returned)` unless the text already states the count.
fn with_row_footer(text: &str, count: usize) -> String {
    let needle = count.to_string();
    let mentioned = text
        .split(|c: char| !c.is_ascii_digit())
        .any(|token| token == needle);
    if mentioned {
        text.to_string()
    } else {
        format!("{} ({} rows returned)", text, count)
    }
}

/// Deterministic explanation from the SQL text and result shape.
pub fn describe_result(sql: &str, result: &QueryResult) -> String {
    if result.is_empty() {
        return NO_RESULTS_MESSAGE.to_string();
    }

    let upper = sql.to_uppercase();
    let summary = single_count(&upper, result)
        .or_else(|| top_ranked(&upper, result))
        .or_else(|| averaged_groups(&upper, result))
        .or_else(|| grouped(&upper, result))
        .unwrap_or_else(|| format!("{} found.", plural(result.count, "result", "results")));

    let mut explanation = summary;
    for advisory in advisories(&upper) {
        explanation.push(' ');
        explanation.push_str(advisory);
    }
    debug!("Result analyzer: {}", explanation);
    explanation
}

fn single_count(upper: &str, result: &QueryResult) -> Option<String> {
    if result.count != 1 || !upper.contains("COUNT(") {
        return None;
    }
    let row = result.rows.first()?;
    let (column, value) = row.iter().find_map(|(k, v)| as_number(v).map(|n| (k, n)))?;
    let mut text = format!("The query counted {} ({}).", format_number(value), column);
    if let Some(label) = first_text(row) {
        text = format!("The query counted {} for {} ({}).", format_number(value), label, column);
    }
    Some(text)
}

fn top_ranked(upper: &str, result: &QueryResult) -> Option<String> {
    if !upper.contains("ORDER BY") {
        return None;
    }
    let row = result.rows.first()?;
    let key = first_text(row).unwrap_or_else(|| "the first row".to_string());
    let others = result.count - 1;

    let text = match ranked_value(row) {
        Some((column, value)) => format!(
            "{} leads with {}{}.",
            key,
            format_number(value),
            unit_for(column)
        ),
        None => format!("Most relevant result: {}.", key),
    };
    if others == 0 {
        Some(text)
    } else {
        Some(format!(
            "{} ({} ranked below).",
            text.trim_end_matches('.'),
            plural(others, "other row", "other rows")
        ))
    }
}

fn averaged_groups(upper: &str, result: &QueryResult) -> Option<String> {
    if !(upper.contains("AVG(") && upper.contains("GROUP BY")) {
        return None;
    }
    let column = result
        .columns
        .iter()
        .find(|c| c.to_lowercase().contains("avg"))
        .or_else(|| {
            result
                .columns
                .iter()
                .rev()
                .find(|c| result.rows.iter().any(|r| r.get(c.as_str()).and_then(as_number).is_some()))
        })?;

    let groups: Vec<(String, f64)> = result
        .rows
        .iter()
        .filter_map(|row| {
            let value = as_number(row.get(column)?)?;
            let label = first_text(row).unwrap_or_else(|| "?".to_string());
            Some((label, value))
        })
        .collect();
    if groups.is_empty() {
        return None;
    }

    let overall = groups.iter().map(|(_, v)| v).sum::<f64>() / groups.len() as f64;
    let (max_label, max_value) = groups
        .iter()
        .max_by(|a, b| a.1.total_cmp(&b.1))?;
    let (min_label, min_value) = groups
        .iter()
        .min_by(|a, b| a.1.total_cmp(&b.1))?;
    let unit = unit_for(column);

    Some(format!(
        "Overall average across {}: {:.2}{}. Highest: {} ({:.2}{}); lowest: {} ({:.2}{}).",
        plural(groups.len(), "group", "groups"),
        overall,
        unit,
        max_label,
        max_value,
        unit,
        min_label,
        min_value,
        unit
    ))
}

fn grouped(upper: &str, result: &QueryResult) -> Option<String> {
    if !upper.contains("GROUP BY") {
        return None;
    }
    Some(format!(
        "Results are grouped into {}.",
        plural(result.count, "group", "groups")
    ))
}

fn advisories(upper: &str) -> Vec<&'static str> {
    let mut notes = Vec::new();
    if upper.contains("'MAINTENANCE'") {
        notes.push("These trucks are in maintenance and unavailable for new trips.");
    }
    if upper.contains("'CRITICAL'") {
        notes.push("Critical alerts need immediate attention.");
    }
    if upper.contains("'SPEED'") || upper.contains("SPEED_KMH >") {
        notes.push("Speeding events should be reviewed with the drivers involved.");
    }
    notes
}

/// Last numeric column of a row that is not an identifier.
fn ranked_value(row: &Map<String, Value>) -> Option<(&str, f64)> {
    row.iter()
        .rev()
        .filter(|(k, _)| !k.ends_with("_id"))
        .find_map(|(k, v)| as_number(v).map(|n| (k.as_str(), n)))
}

fn first_text(row: &Map<String, Value>) -> Option<String> {
    row.values().find_map(|v| match v {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        _ => None,
    })
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
}

fn unit_for(column: &str) -> &'static str {
    let column = column.to_lowercase();
    if column.contains("alert") {
        " alerts"
    } else if column.contains("temp") {
        " °C"
    } else if column.contains("speed") {
        " km/h"
    } else if column.contains("km") || column.contains("distance") {
        " km"
    } else if column.contains("fuel") {
        "% fuel"
    } else if column.contains("duration") || column.contains("hours") {
        " hours"
    } else {
        ""
    }
}

fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{:.2}", value)
    }
}

fn plural(n: usize, one: &str, many: &str) -> String {
    if n == 1 {
        format!("1 {}", one)
    } else {
        format!("{} {}", n, many)
    }
}
