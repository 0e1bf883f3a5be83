//! Query Generator
//!
//! Turns a natural-language question into one candidate SQL string. The remote
//! strategy asks the generative backend; the template strategy matches an
//! ordered keyword rule list. Remote failures fall back to templates.

use crate::error::{LogiqError, Result};
use crate::llm::{complete_within, Strategy, StrategyKind};
use crate::schema::SchemaRegistry;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Query returned when no template rule matches.
pub const DEFAULT_TEMPLATE_SQL: &str = "SELECT * FROM trucks LIMIT 10;";

const BRANDS: [&str; 6] = ["volvo", "scania", "mercedes", "man", "daf", "iveco"];

/// Count cues for the brand rule; "hay" only counts when a brand is named.
const BRAND_COUNT_WORDS: &[&str] = &["cuántos", "cuantos", "cuántas", "cuantas", "cantidad", "hay", "how many", "count", "number of"];
const COUNT_WORDS: &[&str] = &["cuántos", "cuantos", "cuántas", "cuantas", "cantidad", "how many", "number of", "total number"];
const TRUCK_WORDS: &[&str] = &["camiones", "camión", "camion", "trucks", "truck"];
const TRIP_WORDS: &[&str] = &["viajes", "viaje", "trips", "trip"];
const DRIVER_WORDS: &[&str] = &["conductores", "conductor", "drivers", "driver"];
const ALERT_WORDS: &[&str] = &["alertas", "alerta", "alerts", "alert"];
const FUEL_WORDS: &[&str] = &["combustible", "fuel"];

/// One keyword rule: every group must contribute at least one keyword.
struct TemplateRule {
    name: &'static str,
    groups: &'static [&'static [&'static str]],
    sql: &'static str,
}

impl TemplateRule {
    fn matches(&self, words: &[&str]) -> bool {
        self.groups
            .iter()
            .all(|group| has_any(words, group))
    }
}

/// True when `phrase` appears as consecutive whole words.
fn has_phrase(words: &[&str], phrase: &str) -> bool {
    let parts: Vec<&str> = phrase.split_whitespace().collect();
    !parts.is_empty() && words.windows(parts.len()).any(|window| window == parts.as_slice())
}

fn has_any(words: &[&str], phrases: &[&str]) -> bool {
    phrases.iter().any(|phrase| has_phrase(words, phrase))
}

/// Evaluated in order after the brand rule; the first match wins.
static TEMPLATE_RULES: &[TemplateRule] = &[
    TemplateRule {
        name: "temperature_alerts",
        groups: &[ALERT_WORDS, &["temperatura", "temperature"]],
        sql: "SELECT truck_id, COUNT(*) as alerts FROM alerts WHERE alert_type = 'temperature' AND timestamp >= datetime('now', '-7 days') GROUP BY truck_id ORDER BY alerts DESC LIMIT 5;",
    },
    TemplateRule {
        name: "average_fuel_by_brand",
        groups: &[&["promedio", "average", "avg"], &["consumo", "combustible", "fuel", "consumption"]],
        sql: "SELECT t.brand, AVG(tele.fuel_level) as avg_fuel_level FROM trucks t JOIN telemetry tele ON t.truck_id = tele.truck_id WHERE tele.timestamp >= datetime('now','-30 days') GROUP BY t.brand;",
    },
    TemplateRule {
        name: "finished_trips_yesterday",
        groups: &[TRIP_WORDS, &["ayer", "finalizados", "yesterday", "finished", "completed"]],
        sql: "SELECT COUNT(*) as trips_finished FROM trips WHERE status = 'finished' AND date(end_time) = date('now','-1 day');",
    },
    TemplateRule {
        name: "critical_alerts",
        groups: &[ALERT_WORDS, &["críticas", "criticas", "crítica", "critica", "critical"]],
        sql: "SELECT * FROM alerts WHERE severity = 'critical' ORDER BY timestamp DESC LIMIT 10;",
    },
    TemplateRule {
        name: "trucks_in_maintenance",
        groups: &[&["mantenimiento", "maintenance"]],
        sql: "SELECT * FROM trucks WHERE status = 'maintenance' LIMIT 1000;",
    },
    TemplateRule {
        name: "top_delayed_routes",
        groups: &[&["rutas", "routes"], &["retrasos", "retraso", "delays", "delayed", "top", "slowest"]],
        sql: "WITH trip_delays AS (SELECT trip_id, origin, destination, (julianday(end_time) - julianday(start_time)) * 24 as duration_hours FROM trips WHERE status = 'finished') SELECT origin, destination, AVG(duration_hours) as avg_duration FROM trip_delays GROUP BY origin, destination ORDER BY avg_duration DESC LIMIT 5;",
    },
    TemplateRule {
        name: "top_driver_by_distance",
        groups: &[DRIVER_WORDS, &["kilómetros", "kilometros", "kilometers", "kilometres", "distance"]],
        sql: "SELECT d.name, d.driver_id, SUM(t.distance_km) as total_km FROM drivers d JOIN trucks tr ON d.driver_id = tr.driver_id JOIN trips t ON tr.truck_id = t.truck_id WHERE t.start_time >= datetime('now', '-30 days') GROUP BY d.driver_id ORDER BY total_km DESC LIMIT 1;",
    },
    TemplateRule {
        name: "speeding_alerts",
        groups: &[&["velocidad", "speed", "speeding"], &["excesiva", "exceso", "excessive", "speeding"]],
        sql: "SELECT * FROM alerts WHERE alert_type = 'speed' AND timestamp >= datetime('now', '-7 days') ORDER BY timestamp DESC LIMIT 20;",
    },
    TemplateRule {
        name: "low_fuel_trucks",
        groups: &[FUEL_WORDS, &["bajo", "low"]],
        sql: "SELECT DISTINCT t.truck_id, t.plate, t.brand, tele.fuel_level FROM trucks t JOIN telemetry tele ON t.truck_id = tele.truck_id WHERE tele.fuel_level < 20 ORDER BY tele.fuel_level ASC LIMIT 10;",
    },
    TemplateRule {
        name: "longest_trips_by_region",
        groups: &[TRIP_WORDS, &["largos", "región", "region", "long", "longest"]],
        sql: "SELECT t.region, tr.origin, tr.destination, tr.distance_km FROM trips tr JOIN trucks t ON tr.truck_id = t.truck_id ORDER BY tr.distance_km DESC LIMIT 10;",
    },
    TemplateRule {
        name: "count_trucks",
        groups: &[COUNT_WORDS, TRUCK_WORDS],
        sql: "SELECT COUNT(*) as total FROM trucks LIMIT 1000;",
    },
    TemplateRule {
        name: "count_trips",
        groups: &[COUNT_WORDS, TRIP_WORDS],
        sql: "SELECT COUNT(*) as total FROM trips LIMIT 1000;",
    },
    TemplateRule {
        name: "count_drivers",
        groups: &[COUNT_WORDS, DRIVER_WORDS],
        sql: "SELECT COUNT(*) as total FROM drivers LIMIT 1000;",
    },
];

const SAFETY_RULES: &str = "INSTRUCTIONS:
- ONLY generate a single valid SELECT query compatible with SQLite.
- Never include DDL/DML commands (CREATE, DROP, DELETE, UPDATE, INSERT, ALTER).
- Always add LIMIT if not present (maximum 1000).
- Use SQLite date functions: date(), datetime(), time().
- For relative dates use: datetime('now', '-N days/hours').
- Do not explain anything; return ONLY the SQL.
- The SQL must end with a semicolon (;).";

const FEW_SHOT_EXAMPLES: &str = r#"EXAMPLES:

1. NL: "Which truck had the most temperature alerts in the last week?"
SQL: SELECT truck_id, COUNT(*) as alerts FROM alerts WHERE alert_type = 'temperature' AND timestamp >= datetime('now', '-7 days') GROUP BY truck_id ORDER BY alerts DESC LIMIT 5;

2. NL: "Average fuel consumption per truck brand in the last 30 days"
SQL: SELECT t.brand, AVG(tele.fuel_level) as avg_fuel_level FROM trucks t JOIN telemetry tele ON t.truck_id = tele.truck_id WHERE tele.timestamp >= datetime('now','-30 days') GROUP BY t.brand;

3. NL: "How many trips were finished yesterday?"
SQL: SELECT COUNT(*) as trips_finished FROM trips WHERE status = 'finished' AND date(end_time) = date('now','-1 day');

4. NL: "Show the 10 latest critical alerts"
SQL: SELECT * FROM alerts WHERE severity = 'critical' ORDER BY timestamp DESC LIMIT 10;

5. NL: "List trucks currently in maintenance"
SQL: SELECT * FROM trucks WHERE status = 'maintenance';

6. NL: "Top 5 routes with the most delays"
SQL: WITH trip_delays AS (SELECT trip_id, origin, destination, (julianday(end_time) - julianday(start_time)) * 24 as duration_hours FROM trips WHERE status = 'finished') SELECT origin, destination, AVG(duration_hours) as avg_duration FROM trip_delays GROUP BY origin, destination ORDER BY avg_duration DESC LIMIT 5;"#;

lazy_static! {
    static ref CODE_FENCE: Regex = Regex::new(r"```(?:sql|SQL)?[ \t]*\n?").unwrap();
}

/// Candidate SQL plus the strategy that actually produced it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedQuery {
    pub sql: String,
    pub strategy: StrategyKind,
}

pub struct QueryGenerator {
    strategy: Strategy,
    schema: &'static SchemaRegistry,
}

impl QueryGenerator {
    pub fn new(strategy: Strategy, schema: &'static SchemaRegistry) -> Self {
        Self { strategy, schema }
    }

    pub fn strategy(&self) -> StrategyKind {
        self.strategy.kind()
    }

    pub async fn generate(&self, question: &str) -> Result<GeneratedQuery> {
        if question.trim().is_empty() {
            return Err(LogiqError::GenerationFailed("question is empty".to_string()));
        }

        if let Strategy::RemoteBackend { backend, timeout } = &self.strategy {
            let prompt = format!("NL: {}\nSQL:", question.trim());
            let remote = complete_within(backend.as_ref(), *timeout, &self.system_prompt(), &prompt)
                .await
                .and_then(|raw| {
                    let sql = clean_sql_response(&raw);
                    if sql.is_empty() {
                        Err(LogiqError::Llm("LLM response contained no SQL".to_string()))
                    } else {
                        Ok(sql)
                    }
                });

            match remote {
                Ok(sql) => {
                    info!("🤖 {} generated SQL: {}", backend.name(), sql);
                    return Ok(GeneratedQuery {
                        sql,
                        strategy: StrategyKind::RemoteBackend,
                    });
                }
                Err(e) => warn!("⚠️  Backend generation failed, falling back to templates: {}", e),
            }
        }

        let sql = template_sql(question);
        info!("📝 Template SQL: {}", sql);
        Ok(GeneratedQuery {
            sql,
            strategy: StrategyKind::TemplateFallback,
        })
    }

    /// Instruction preamble: schema, safety rules and few-shot examples.
    pub fn system_prompt(&self) -> String {
        format!(
            "You are an expert assistant that writes safe SQL for a SQLite database with the following tables and columns:\n\nCANONICAL SCHEMA:\n{}\n\n{}\n\n{}\n\nNow write SQL for the following question.",
            self.schema.prompt_description(),
            SAFETY_RULES,
            FEW_SHOT_EXAMPLES
        )
    }
}

/// Remove markdown fences and comment-style lines from a backend response.
pub fn clean_sql_response(raw: &str) -> String {
    let without_fences = CODE_FENCE.replace_all(raw.trim(), "");
    without_fences
        .lines()
        .filter(|line| {
            let line = line.trim_start();
            !line.starts_with('#') && !line.starts_with("--")
        })
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

/// Deterministic keyword → template translation.
pub fn template_sql(question: &str) -> String {
    let question = question.to_lowercase();
    let words: Vec<&str> = question
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();

    for brand in BRANDS {
        if !words.contains(&brand) {
            continue;
        }
        if has_any(&words, BRAND_COUNT_WORDS) {
            return format!(
                "SELECT COUNT(*) as total, brand FROM trucks WHERE LOWER(brand) = '{}' GROUP BY brand LIMIT 1000;",
                brand
            );
        }
        if has_any(&words, TRUCK_WORDS) {
            return format!("SELECT * FROM trucks WHERE LOWER(brand) = '{}' LIMIT 1000;", brand);
        }
    }

    TEMPLATE_RULES
        .iter()
        .find(|rule| rule.matches(&words))
        .map(|rule| {
            debug!("template rule matched: {}", rule.name);
            rule.sql.to_string()
        })
        .unwrap_or_else(|| DEFAULT_TEMPLATE_SQL.to_string())
}
