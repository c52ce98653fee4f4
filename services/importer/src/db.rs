//! PostgreSQL access for the importer
//!
//! Pool-level helpers run outside any file transaction (DDL, truncation,
//! lookups, the import run audit). Per-file writes take a `&mut PgConnection`
//! so they run inside the caller's transaction.

use crate::aggregate::ElectorateEntry;
use crate::error::Result;
use crate::model::{ElectionType, HistoricalResult, Municipality};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgConnection, PgPool};
use std::collections::HashMap;
use uuid::Uuid;

/// Table creation, in dependency order. Every statement is idempotent.
const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS municipalities (
        id SERIAL PRIMARY KEY,
        name TEXT NOT NULL,
        display_name TEXT NOT NULL,
        state TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        CONSTRAINT municipalities_state_name_unique UNIQUE (state, name)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS electorate (
        id SERIAL PRIMARY KEY,
        municipality_id INT NOT NULL UNIQUE REFERENCES municipalities(id),
        nominal_list BIGINT NOT NULL,
        registered_voters BIGINT,
        sections INT NOT NULL DEFAULT 0
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS historical_results (
        id SERIAL PRIMARY KEY,
        municipality_id INT NOT NULL REFERENCES municipalities(id),
        election_year INT NOT NULL,
        election_type TEXT NOT NULL
            CHECK (election_type IN ('municipal', 'state_legislature', 'governor')),
        party TEXT NOT NULL,
        votes BIGINT NOT NULL,
        percentage DOUBLE PRECISION NOT NULL,
        turnout_percentage DOUBLE PRECISION NOT NULL,
        CONSTRAINT historical_results_unique
            UNIQUE (municipality_id, election_year, election_type, party)
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS historical_results_year_type_idx
        ON historical_results (election_year, election_type)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS import_runs (
        run_id UUID PRIMARY KEY,
        kind TEXT NOT NULL,
        path TEXT NOT NULL,
        election_type TEXT,
        election_year INT,
        content_hash TEXT,
        status TEXT NOT NULL,
        error TEXT,
        detail JSONB NOT NULL DEFAULT '{}',
        started_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        finished_at TIMESTAMPTZ
    )
    "#,
];

pub async fn connect(db_url: &str, max_connections: u32) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(db_url)
        .await?;
    Ok(pool)
}

pub async fn ensure_schema(pool: &PgPool) -> Result<()> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}

pub async fn truncate_electorate(pool: &PgPool) -> Result<()> {
    sqlx::query("TRUNCATE electorate RESTART IDENTITY")
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn truncate_results(pool: &PgPool) -> Result<()> {
    sqlx::query("TRUNCATE historical_results RESTART IDENTITY")
        .execute(pool)
        .await?;
    Ok(())
}

// =============================================================================
// MUNICIPALITIES
// =============================================================================

pub async fn load_municipalities(pool: &PgPool, state: &str) -> Result<Vec<Municipality>> {
    let rows: Vec<Municipality> = sqlx::query_as(
        "SELECT id, name, display_name, state FROM municipalities WHERE state = $1 ORDER BY id",
    )
    .bind(state)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Get or create a municipality by canonical name, returning (id, created)
pub async fn get_or_create_municipality(
    conn: &mut PgConnection,
    state: &str,
    name: &str,
    display_name: &str,
) -> Result<(i32, bool)> {
    let existing: Option<(i32,)> =
        sqlx::query_as("SELECT id FROM municipalities WHERE state = $1 AND name = $2")
            .bind(state)
            .bind(name)
            .fetch_optional(&mut *conn)
            .await?;

    if let Some((id,)) = existing {
        return Ok((id, false));
    }

    let (id,): (i32,) = sqlx::query_as(
        "INSERT INTO municipalities (name, display_name, state) VALUES ($1, $2, $3) RETURNING id",
    )
    .bind(name)
    .bind(display_name)
    .bind(state)
    .fetch_one(&mut *conn)
    .await?;

    Ok((id, true))
}

// =============================================================================
// ELECTORATE
// =============================================================================

pub async fn upsert_electorate(
    conn: &mut PgConnection,
    municipality_id: i32,
    entry: &ElectorateEntry,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO electorate (municipality_id, nominal_list, registered_voters, sections)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (municipality_id) DO UPDATE
        SET nominal_list = EXCLUDED.nominal_list,
            registered_voters = EXCLUDED.registered_voters,
            sections = EXCLUDED.sections
        "#,
    )
    .bind(municipality_id)
    .bind(entry.nominal_list)
    .bind(entry.registered_voters)
    .bind(entry.sections)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Nominal list per municipality of `state`, used as the turnout fallback
pub async fn load_nominal_lists(pool: &PgPool, state: &str) -> Result<HashMap<i32, i64>> {
    let rows: Vec<(i32, i64)> = sqlx::query_as(
        r#"
        SELECT e.municipality_id, e.nominal_list
        FROM electorate e
        JOIN municipalities m ON m.id = e.municipality_id
        WHERE m.state = $1
        "#,
    )
    .bind(state)
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().collect())
}

// =============================================================================
// HISTORICAL RESULTS
// =============================================================================

/// Insert one aggregated row. Returns `false` when the uniqueness constraint
/// already holds a row for the same (municipality, year, type, party).
pub async fn insert_result(conn: &mut PgConnection, result: &HistoricalResult) -> Result<bool> {
    let outcome = sqlx::query(
        r#"
        INSERT INTO historical_results
            (municipality_id, election_year, election_type, party, votes, percentage, turnout_percentage)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT ON CONSTRAINT historical_results_unique DO NOTHING
        "#,
    )
    .bind(result.municipality_id)
    .bind(result.election_year)
    .bind(result.election_type.as_str())
    .bind(&result.party)
    .bind(result.votes)
    .bind(result.percentage)
    .bind(result.turnout_percentage)
    .execute(&mut *conn)
    .await?;

    Ok(outcome.rows_affected() == 1)
}

pub async fn count_results(pool: &PgPool, year: i32, election_type: ElectionType) -> Result<i64> {
    let (count,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM historical_results WHERE election_year = $1 AND election_type = $2",
    )
    .bind(year)
    .bind(election_type.as_str())
    .fetch_one(pool)
    .await?;
    Ok(count)
}

// =============================================================================
// IMPORT RUNS
// =============================================================================

/// Describes the file an import run is about
#[derive(Debug, Clone)]
pub struct RunTarget<'a> {
    pub kind: &'a str,
    pub path: &'a str,
    pub election_type: Option<ElectionType>,
    pub election_year: Option<i32>,
}

pub async fn create_import_run(pool: &PgPool, target: &RunTarget<'_>) -> Result<Uuid> {
    let run_id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO import_runs (run_id, kind, path, election_type, election_year, status)
        VALUES ($1, $2, $3, $4, $5, 'running')
        "#,
    )
    .bind(run_id)
    .bind(target.kind)
    .bind(target.path)
    .bind(target.election_type.map(|t| t.as_str()))
    .bind(target.election_year)
    .execute(pool)
    .await?;
    Ok(run_id)
}

pub async fn finish_import_run(
    pool: &PgPool,
    run_id: Uuid,
    status: &str,
    content_hash: Option<&str>,
    error: Option<&str>,
    detail: serde_json::Value,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE import_runs
        SET finished_at = now(), status = $2, content_hash = COALESCE($3, content_hash),
            error = $4, detail = detail || $5
        WHERE run_id = $1
        "#,
    )
    .bind(run_id)
    .bind(status)
    .bind(content_hash)
    .bind(error)
    .bind(detail)
    .execute(pool)
    .await?;
    Ok(())
}
