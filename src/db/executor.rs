//! Query execution engine.
//!
//! One SQL string goes in, one [`QueryOutcome`] comes out. The statement is
//! first prepared so its result metadata decides the dispatch: statements
//! that produce columns are fetched as rows (an empty result set is still a
//! result set), everything else executes for its affected-row count. A
//! statement the backend refuses to prepare is sent unprepared and reported
//! by its affected-row count. No SQL text inspection is involved. Execution
//! failures never propagate as `Err`:
//! they are folded into [`QueryOutcome::Failure`] so a caller running many
//! datasources can report partial success.

use crate::db::pool::DbPool;
use crate::db::row::{JsonRow, RowToJson};
use serde_json::Value as JsonValue;
use std::time::Instant;
use tracing::{debug, warn};

/// Normalized result of executing one statement against one datasource.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutcome {
    /// The statement produced a result set (possibly empty).
    Rows(Vec<JsonRow>),
    /// The statement produced no result set; this many rows were affected.
    Affected(u64),
    /// Execution failed; the driver's error text.
    Failure(String),
}

impl QueryOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, QueryOutcome::Failure(_))
    }

    /// JSON rendering for tool payloads.
    pub fn to_json(&self) -> JsonValue {
        match self {
            QueryOutcome::Rows(rows) => {
                JsonValue::Array(rows.iter().cloned().map(JsonValue::Object).collect())
            }
            QueryOutcome::Affected(n) => serde_json::json!({ "affected_rows": n }),
            QueryOutcome::Failure(msg) => serde_json::json!({ "error": msg }),
        }
    }
}

/// Execute one statement against one pool.
///
/// Connections check out from the pool per call and return on every path,
/// including failure (RAII on the sqlx side).
pub async fn execute(pool: &DbPool, sql: &str) -> QueryOutcome {
    let start = Instant::now();
    debug!(sql = %sql, "executing statement");

    let outcome = match pool {
        DbPool::MySql(p) => mysql::run(p, sql).await,
        DbPool::Postgres(p) => postgres::run(p, sql).await,
        DbPool::SQLite(p) => sqlite::run(p, sql).await,
    };

    let elapsed_ms = start.elapsed().as_millis();
    match &outcome {
        QueryOutcome::Rows(rows) => {
            debug!(rows = rows.len(), elapsed_ms, "statement returned rows")
        }
        QueryOutcome::Affected(n) => {
            debug!(affected = n, elapsed_ms, "statement affected rows")
        }
        QueryOutcome::Failure(msg) => warn!(error = %msg, elapsed_ms, "statement failed"),
    }
    outcome
}

// Per-backend drivers. Identical shape; the row, completion, and describe
// types differ per database, which is what keeps these from collapsing into
// one generic function.

mod mysql {
    use super::*;
    use sqlx::{Executor, MySqlPool};

    pub async fn run(pool: &MySqlPool, sql: &str) -> QueryOutcome {
        let describe = match pool.describe(sql).await {
            Ok(d) => d,
            // Some statements cannot be prepared (USE, certain admin
            // commands) yet run fine unprepared.
            Err(_) => {
                return match pool.execute(sql).await {
                    Ok(done) => QueryOutcome::Affected(done.rows_affected()),
                    Err(e) => QueryOutcome::Failure(e.to_string()),
                };
            }
        };
        if describe.columns().is_empty() {
            match sqlx::query(sql).execute(pool).await {
                Ok(done) => QueryOutcome::Affected(done.rows_affected()),
                Err(e) => QueryOutcome::Failure(e.to_string()),
            }
        } else {
            match sqlx::query(sql).fetch_all(pool).await {
                Ok(rows) => QueryOutcome::Rows(rows.iter().map(|r| r.to_json_row()).collect()),
                Err(e) => QueryOutcome::Failure(e.to_string()),
            }
        }
    }
}

mod postgres {
    use super::*;
    use sqlx::{Executor, PgPool};

    pub async fn run(pool: &PgPool, sql: &str) -> QueryOutcome {
        let describe = match pool.describe(sql).await {
            Ok(d) => d,
            // Some statements cannot be prepared (USE, certain admin
            // commands) yet run fine unprepared.
            Err(_) => {
                return match pool.execute(sql).await {
                    Ok(done) => QueryOutcome::Affected(done.rows_affected()),
                    Err(e) => QueryOutcome::Failure(e.to_string()),
                };
            }
        };
        if describe.columns().is_empty() {
            match sqlx::query(sql).execute(pool).await {
                Ok(done) => QueryOutcome::Affected(done.rows_affected()),
                Err(e) => QueryOutcome::Failure(e.to_string()),
            }
        } else {
            match sqlx::query(sql).fetch_all(pool).await {
                Ok(rows) => QueryOutcome::Rows(rows.iter().map(|r| r.to_json_row()).collect()),
                Err(e) => QueryOutcome::Failure(e.to_string()),
            }
        }
    }
}

mod sqlite {
    use super::*;
    use sqlx::{Executor, SqlitePool};

    pub async fn run(pool: &SqlitePool, sql: &str) -> QueryOutcome {
        let describe = match pool.describe(sql).await {
            Ok(d) => d,
            // Some statements cannot be prepared (USE, certain admin
            // commands) yet run fine unprepared.
            Err(_) => {
                return match pool.execute(sql).await {
                    Ok(done) => QueryOutcome::Affected(done.rows_affected()),
                    Err(e) => QueryOutcome::Failure(e.to_string()),
                };
            }
        };
        if describe.columns().is_empty() {
            match sqlx::query(sql).execute(pool).await {
                Ok(done) => QueryOutcome::Affected(done.rows_affected()),
                Err(e) => QueryOutcome::Failure(e.to_string()),
            }
        } else {
            match sqlx::query(sql).fetch_all(pool).await {
                Ok(rows) => QueryOutcome::Rows(rows.iter().map(|r| r.to_json_row()).collect()),
                Err(e) => QueryOutcome::Failure(e.to_string()),
            }
        }
    }
}
