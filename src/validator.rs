//! Query Validator
//!
//! Lexical guard between generated SQL and the fleet store. Checks, in order:
//! read-only start keyword, single statement, banned tokens, table references
//! against the schema registry, and a bounded LIMIT clause.
//!
//! This is a pattern matcher, not a parser. Sufficiently obfuscated SQL can
//! get past it; the executor opens the store read-only as a second line.
//! `ValidatorOptions::ast_check` adds a structural parse on top.

use crate::error::{LogiqError, Result};
use crate::schema::SchemaRegistry;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sqlparser::ast::Statement;
use sqlparser::dialect::SQLiteDialect;
use sqlparser::parser::Parser;
use std::collections::BTreeSet;
use std::fmt;
use tracing::{debug, warn};

pub const DEFAULT_LIMIT: u64 = 1000;
pub const MAX_LIMIT: u64 = 10_000;

/// Substrings that may never appear in a query (compared upper-cased).
/// The `;`-prefixed entries can no longer trigger since the statement check
/// runs first; they stay so the list matches the published denylist.
pub const BANNED_TOKENS: [&str; 22] = [
    ";DROP", ";DELETE", ";UPDATE", ";INSERT", ";ALTER", ";EXEC",
    "DROP ", "DELETE ", "UPDATE ", "INSERT ", "ALTER ", "EXEC ",
    "PRAGMA", "ATTACH", "DETACH", "CREATE ", "TRUNCATE",
    "--", "/*", "*/", "UNION ALL", "UNION SELECT",
];

lazy_static! {
    static ref TABLE_REF: Regex =
        Regex::new(r#"(?i)\b(?:FROM|JOIN|INTO|UPDATE|TABLE)\s+["`\[]?(\w+)"#).unwrap();
    // `, other_table` directly after a FROM target (old-style comma joins)
    static ref COMMA_TABLE: Regex =
        Regex::new(r#"(?i)^\s*(?:(?:AS\s+)?\w+)?\s*,\s*["`\[]?(\w+)"#).unwrap();
    static ref WITH_PREFIX: Regex = Regex::new(r"(?i)^\s*WITH(?:\s+RECURSIVE)?\b").unwrap();
    // `name [(col, ...)] AS [[NOT] MATERIALIZED] (` at the head of a WITH list entry
    static ref CTE_HEAD: Regex = Regex::new(
        r"(?i)^\s*(\w+)(?:\s*\([\w\s,]*\))?\s+AS\s*(?:(?:NOT\s+)?MATERIALIZED\s*)?\("
    )
    .unwrap();
    static ref LIMIT_KEYWORD: Regex = Regex::new(r"(?i)\bLIMIT\b").unwrap();
    // Only plain decimal row counts, optionally `, n` or `OFFSET n`, then the end of the (sub)query
    static ref LIMIT_ARGS: Regex =
        Regex::new(r"(?i)^\s+(\d+)(?:\s*,\s*(\d+)|\s+OFFSET\s+\d+)?\s*(?:$|\))").unwrap();
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatorOptions {
    /// Require at least one table reference
    pub strict: bool,
    pub default_limit: u64,
    pub max_limit: u64,
    /// Additionally require the text to parse as exactly one query statement
    pub ast_check: bool,
}

impl Default for ValidatorOptions {
    fn default() -> Self {
        Self {
            strict: true,
            default_limit: DEFAULT_LIMIT,
            max_limit: MAX_LIMIT,
            ast_check: false,
        }
    }
}

/// SQL that passed every validator rule. Only [`QueryValidator::validate`] builds one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedQuery {
    sql: String,
    tables: BTreeSet<String>,
    limit_added: bool,
}

impl ValidatedQuery {
    pub fn as_str(&self) -> &str {
        &self.sql
    }

    /// Registered tables the query reads from
    pub fn tables(&self) -> &BTreeSet<String> {
        &self.tables
    }

    pub fn limit_added(&self) -> bool {
        self.limit_added
    }

    pub fn into_string(self) -> String {
        self.sql
    }
}

impl fmt::Display for ValidatedQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.sql)
    }
}

/// Outcome of [`QueryValidator::validate_and_explain`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub sql: String,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

pub struct QueryValidator {
    schema: &'static SchemaRegistry,
    options: ValidatorOptions,
}

impl QueryValidator {
    pub fn new(schema: &'static SchemaRegistry, options: ValidatorOptions) -> Self {
        Self { schema, options }
    }

    pub fn options(&self) -> &ValidatorOptions {
        &self.options
    }

    pub fn validate(&self, candidate: &str) -> Result<ValidatedQuery> {
        let trimmed = candidate.trim();
        if trimmed.is_empty() {
            return Err(LogiqError::EmptyQuery);
        }

        let upper = trimmed.to_uppercase();
        if !(starts_with_keyword(&upper, "SELECT") || starts_with_keyword(&upper, "WITH")) {
            let head: String = trimmed.chars().take(20).collect();
            return Err(LogiqError::NotReadOnly(head));
        }

        // Strip one trailing terminator; anything left is a second statement.
        let body = trimmed.strip_suffix(';').unwrap_or(trimmed).trim_end();
        if body.contains(';') {
            return Err(LogiqError::MultipleStatements);
        }

        if let Some(token) = find_banned_token(&upper) {
            warn!("🚫 Banned token in candidate query: {:?}", token);
            return Err(LogiqError::BannedToken(token.to_string()));
        }

        let referenced = referenced_tables(body);
        let local = cte_names(body);
        let unknown: Vec<String> = referenced
            .iter()
            .filter(|t| !self.schema.contains(t) && !local.contains(*t))
            .cloned()
            .collect();
        if !unknown.is_empty() {
            return Err(LogiqError::UnknownTable(unknown));
        }

        if self.options.strict && referenced.is_empty() {
            return Err(LogiqError::NoTableReferenced);
        }

        let masked = mask_quoted(body);
        let mut top_level_limit = false;
        for (args, depth) in limit_clauses(&masked) {
            let value = limit_value(args, self.options.max_limit)?;
            if value > self.options.max_limit {
                return Err(LogiqError::LimitTooHigh {
                    value,
                    max: self.options.max_limit,
                });
            }
            top_level_limit |= depth == 0;
        }

        let mut sql = body.to_string();
        let limit_added = !top_level_limit;
        if limit_added {
            sql = format!("{} LIMIT {}", sql, self.options.default_limit);
        }

        sql.push(';');

        if self.options.ast_check {
            check_single_query(&sql)?;
        }

        let tables = referenced
            .into_iter()
            .filter(|t| self.schema.contains(t))
            .collect();

        debug!("✅ SQL validated: {}", sql);
        Ok(ValidatedQuery {
            sql,
            tables,
            limit_added,
        })
    }

    /// Validate and report instead of failing; adds a warning when a LIMIT was appended.
    pub fn validate_and_explain(&self, candidate: &str) -> ValidationReport {
        match self.validate(candidate) {
            Ok(validated) => {
                let mut warnings = Vec::new();
                if validated.limit_added() {
                    warnings.push(format!(
                        "LIMIT {} was added automatically",
                        self.options.default_limit
                    ));
                }
                ValidationReport {
                    valid: true,
                    sql: validated.into_string(),
                    errors: Vec::new(),
                    warnings,
                }
            }
            Err(e) => ValidationReport {
                valid: false,
                sql: candidate.to_string(),
                errors: vec![e.to_string()],
                warnings: Vec::new(),
            },
        }
    }
}

fn starts_with_keyword(upper: &str, keyword: &str) -> bool {
    upper.starts_with(keyword)
        && !upper[keyword.len()..]
            .chars()
            .next()
            .map_or(false, |c| c.is_alphanumeric() || c == '_')
}

fn find_banned_token(upper: &str) -> Option<&'static str> {
    BANNED_TOKENS.iter().copied().find(|token| upper.contains(token))
}

/// Lower-cased identifiers following FROM / JOIN / INTO / UPDATE / TABLE,
/// plus comma-joined tables in a FROM list.
pub fn referenced_tables(sql: &str) -> BTreeSet<String> {
    let mut tables = BTreeSet::new();
    for caps in TABLE_REF.captures_iter(sql) {
        let Some(whole) = caps.get(0) else { continue };
        tables.insert(caps[1].to_lowercase());

        let mut rest = &sql[whole.end()..];
        while let Some(next) = COMMA_TABLE.captures(rest) {
            tables.insert(next[1].to_lowercase());
            let consumed = next.get(0).map(|m| m.end()).unwrap_or(rest.len());
            rest = &rest[consumed..];
        }
    }
    tables
}

/// Names declared in the query's own top-level WITH list.
fn cte_names(sql: &str) -> BTreeSet<String> {
    let masked = mask_quoted(sql);
    let mut names = BTreeSet::new();
    let Some(prefix) = WITH_PREFIX.find(&masked) else {
        return names;
    };

    let mut pos = prefix.end();
    while let Some(head) = CTE_HEAD.captures(&masked[pos..]) {
        let Some(whole) = head.get(0) else { break };
        names.insert(head[1].to_lowercase());

        // the match ends just past the opening parenthesis of the CTE body
        let Some(close) = closing_paren(&masked, pos + whole.end() - 1) else {
            break;
        };
        let rest = masked[close + 1..].trim_start();
        match rest.strip_prefix(',') {
            Some(next) => pos = masked.len() - next.len(),
            None => break,
        }
    }
    names
}

/// Byte index of the `)` matching the `(` at `open`.
fn closing_paren(text: &str, open: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (i, c) in text[open..].char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(open + i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Replace the contents of quoted strings and identifiers with spaces.
fn mask_quoted(sql: &str) -> String {
    let mut masked = String::with_capacity(sql.len());
    let mut closing: Option<char> = None;
    for c in sql.chars() {
        match closing {
            Some(end) if c == end => {
                closing = None;
                masked.push(c);
            }
            Some(_) => masked.push(' '),
            None => {
                closing = match c {
                    '\'' => Some('\''),
                    '"' => Some('"'),
                    '`' => Some('`'),
                    '[' => Some(']'),
                    _ => None,
                };
                masked.push(c);
            }
        }
    }
    masked
}

/// Text following each LIMIT keyword, with the parenthesis depth of the keyword.
fn limit_clauses(masked: &str) -> Vec<(&str, usize)> {
    LIMIT_KEYWORD
        .find_iter(masked)
        .map(|m| {
            let depth = masked[..m.start()].chars().fold(0usize, |depth, c| match c {
                '(' => depth + 1,
                ')' => depth.saturating_sub(1),
                _ => depth,
            });
            (&masked[m.end()..], depth)
        })
        .collect()
}

/// Largest row count named by one LIMIT clause. Both numbers of `LIMIT a, b`
/// count; anything but plain decimals is refused.
fn limit_value(args: &str, max: u64) -> Result<u64> {
    let caps = LIMIT_ARGS.captures(args).ok_or_else(|| {
        let shown: String = args.trim_start().chars().take(20).collect();
        LogiqError::InvalidLimit {
            clause: shown.trim_end().to_string(),
            max,
        }
    })?;
    Ok([caps.get(1), caps.get(2)]
        .into_iter()
        .flatten()
        .map(|m| m.as_str().parse::<u64>().unwrap_or(u64::MAX))
        .max()
        .unwrap_or(0))
}

fn check_single_query(sql: &str) -> Result<()> {
    let statements = Parser::parse_sql(&SQLiteDialect {}, sql)
        .map_err(|e| LogiqError::NotReadOnly(format!("unparseable query: {}", e)))?;
    match statements.as_slice() {
        [Statement::Query(_)] => Ok(()),
        [_] => Err(LogiqError::NotReadOnly("statement is not a query".to_string())),
        _ => Err(LogiqError::MultipleStatements),
    }
}
