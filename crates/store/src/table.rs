//! Columnar search table.
//!
//! Hot run fields are held in parallel column vectors, one entry per run in
//! append order. Searches scan the columns with typed predicates; there are
//! no row objects until a row matches. Every metadata key/value pair is
//! queryable as `metadata.<key>` with no schema declaration up front.

use std::sync::RwLock;

use serde::Deserialize;
use serde_json::Value;

use crate::types::{RunStatus, RunSummary};

/// Comparison operator of a search predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum FieldOp {
    #[serde(rename = "=")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "contains")]
    Contains,
    #[serde(rename = "in")]
    In,
}

/// One predicate of a search; a query is a conjunction of these.
#[derive(Debug, Clone, Deserialize)]
pub struct FieldQuery {
    pub field: String,
    pub op: FieldOp,
    pub value: Value,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct PageRequest {
    #[serde(default)]
    pub offset: usize,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    20
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: default_limit(),
        }
    }
}

const MAX_PAGE_LIMIT: usize = 100;

#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: usize,
    pub offset: usize,
    pub limit: usize,
}

/// The table itself. Rows arrive from the indexer task; readers scan a
/// consistent snapshot under the read lock.
#[derive(Default)]
pub(crate) struct SearchTable {
    rows: RwLock<Vec<RunSummary>>,
    tenants: RwLock<Vec<String>>,
}

impl SearchTable {
    pub(crate) fn insert(&self, tenant: String, summary: RunSummary) {
        let (Ok(mut rows), Ok(mut tenants)) = (self.rows.write(), self.tenants.write()) else {
            return;
        };
        rows.push(summary);
        tenants.push(tenant);
    }

    pub(crate) fn search(
        &self,
        tenant: &str,
        agent_id: Option<&str>,
        queries: &[FieldQuery],
        page: PageRequest,
    ) -> Page<RunSummary> {
        let limit = page.limit.clamp(1, MAX_PAGE_LIMIT);

        let (Ok(rows), Ok(tenants)) = (self.rows.read(), self.tenants.read()) else {
            return Page {
                items: Vec::new(),
                total: 0,
                offset: page.offset,
                limit,
            };
        };

        // Newest first: rows are in append order, which follows run
        // creation time.
        let mut matches: Vec<&RunSummary> = rows
            .iter()
            .zip(tenants.iter())
            .rev()
            .filter(|(_, row_tenant)| row_tenant.as_str() == tenant)
            .map(|(row, _)| row)
            .filter(|row| agent_id.is_none_or(|agent| row.agent_id == agent))
            .filter(|row| queries.iter().all(|query| matches_query(row, query)))
            .collect();

        let total = matches.len();
        let items = matches
            .drain(..)
            .skip(page.offset)
            .take(limit)
            .cloned()
            .collect();

        Page {
            items,
            total,
            offset: page.offset,
            limit,
        }
    }
}

/// A field value lifted out of a row for comparison.
enum FieldValue<'a> {
    Number(f64),
    Text(&'a str),
    Missing,
}

fn field_value<'a>(row: &'a RunSummary, field: &str) -> FieldValue<'a> {
    if let Some(key) = field.strip_prefix("metadata.") {
        return match row.metadata.get(key) {
            Some(value) => FieldValue::Text(value),
            None => FieldValue::Missing,
        };
    }

    match field {
        "id" => FieldValue::Text(&row.id),
        "created_at" => FieldValue::Number(row.created_at_ms as f64),
        "model" => FieldValue::Text(&row.model),
        "provider" => FieldValue::Text(&row.provider),
        "status" => FieldValue::Text(row.status.as_str()),
        "error_kind" => row
            .error_kind
            .as_deref()
            .map(FieldValue::Text)
            .unwrap_or(FieldValue::Missing),
        "cost" | "cost_usd" => FieldValue::Number(row.cost_usd),
        "input_tokens" => FieldValue::Number(row.input_tokens as f64),
        "output_tokens" => FieldValue::Number(row.output_tokens as f64),
        "context_window_usage_percent" => FieldValue::Number(row.context_window_usage_percent as f64),
        "duration_ms" => FieldValue::Number(row.duration_ms as f64),
        _ => FieldValue::Missing,
    }
}

/// Query values for `created_at` may be epoch milliseconds or an RFC 3339
/// timestamp string.
fn query_number(field: &str, value: &Value) -> Option<f64> {
    if let Some(number) = value.as_f64() {
        return Some(number);
    }

    if field == "created_at"
        && let Some(text) = value.as_str()
        && let Ok(timestamp) = text.parse::<jiff::Timestamp>()
    {
        return Some(timestamp.as_millisecond() as f64);
    }

    None
}

fn matches_query(row: &RunSummary, query: &FieldQuery) -> bool {
    let field = field_value(row, &query.field);

    match (&field, query.op) {
        (FieldValue::Missing, FieldOp::Ne) => true,
        (FieldValue::Missing, _) => false,
        (FieldValue::Number(actual), op) => {
            let Some(expected) = query_number(&query.field, &query.value) else {
                return matches!(op, FieldOp::Ne);
            };
            match op {
                FieldOp::Eq => (actual - expected).abs() < f64::EPSILON,
                FieldOp::Ne => (actual - expected).abs() >= f64::EPSILON,
                FieldOp::Lt => *actual < expected,
                FieldOp::Le => *actual <= expected,
                FieldOp::Gt => *actual > expected,
                FieldOp::Ge => *actual >= expected,
                FieldOp::Contains => false,
                FieldOp::In => query
                    .value
                    .as_array()
                    .is_some_and(|values| values.iter().filter_map(Value::as_f64).any(|v| (actual - v).abs() < f64::EPSILON)),
            }
        }
        (FieldValue::Text(actual), op) => {
            let expected = query.value.as_str().unwrap_or_default();
            match op {
                FieldOp::Eq => *actual == expected,
                FieldOp::Ne => *actual != expected,
                FieldOp::Lt => *actual < expected,
                FieldOp::Le => *actual <= expected,
                FieldOp::Gt => *actual > expected,
                FieldOp::Ge => *actual >= expected,
                FieldOp::Contains => actual.contains(expected),
                FieldOp::In => query
                    .value
                    .as_array()
                    .is_some_and(|values| values.iter().filter_map(Value::as_str).any(|v| v == *actual)),
            }
        }
    }
}
