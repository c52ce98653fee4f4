//! API Service - Read-only API over Guardianes historical electoral results
//!
//! Endpoints:
//! - GET /health - Health check
//! - GET /municipalities - Search/list municipalities with their electorate
//! - GET /results - Query historical results with filters
//! - GET /compare - Compare party results between two election years
//! - GET /dashboard - Per-party totals for one election
//! - GET /imports - Import run audit trail

use anyhow::Context;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use importer::percentage::{percentage, round2};
use serde::{Deserialize, Serialize};
use sqlx::{postgres::PgPoolOptions, PgPool, Row};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::error;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

const ELECTION_TYPES: [&str; 3] = ["municipal", "state_legislature", "governor"];

// ============================================================================
// State
// ============================================================================

#[derive(Clone)]
struct AppState {
    pool: PgPool,
}

// ============================================================================
// Response types
// ============================================================================

#[derive(Serialize)]
struct HealthResponse {
    ok: bool,
    version: &'static str,
}

#[derive(Serialize, sqlx::FromRow)]
struct MunicipalityResponse {
    id: i32,
    name: String,
    display_name: String,
    state: String,
    nominal_list: Option<i64>,
    registered_voters: Option<i64>,
    sections: Option<i32>,
}

#[derive(Serialize, sqlx::FromRow)]
struct ResultResponse {
    municipality_id: i32,
    municipality_name: String,
    election_year: i32,
    election_type: String,
    party: String,
    votes: i64,
    percentage: f64,
    turnout_percentage: f64,
}

#[derive(Serialize)]
struct CompareRow {
    municipality_id: i32,
    municipality_name: String,
    party: String,
    votes_a: Option<i64>,
    votes_b: Option<i64>,
    percentage_a: Option<f64>,
    percentage_b: Option<f64>,
    delta_votes: Option<i64>,
    pct_change: Option<f64>,
    /// Percentage points gained or lost
    swing: Option<f64>,
}

#[derive(Serialize)]
struct CompareResponse {
    election_type: String,
    year_a: i32,
    year_b: i32,
    rows: Vec<CompareRow>,
}

#[derive(Serialize)]
struct DashboardResponse {
    election_type: String,
    year: i32,
    total_votes: i64,
    municipalities: i64,
    previous_year: Option<i32>,
    previous_total_votes: Option<i64>,
    change_pct: Option<f64>,
    parties: Vec<DashboardParty>,
    available_years: Vec<i32>,
}

#[derive(Serialize)]
struct DashboardParty {
    party: String,
    votes: i64,
    share: f64,
    municipalities_won: i64,
    previous_votes: Option<i64>,
    previous_share: Option<f64>,
    swing: Option<f64>,
}

#[derive(Serialize, sqlx::FromRow)]
struct ImportRunResponse {
    run_id: Uuid,
    kind: String,
    path: String,
    election_type: Option<String>,
    election_year: Option<i32>,
    content_hash: Option<String>,
    status: String,
    error: Option<String>,
    detail: serde_json::Value,
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

// ============================================================================
// Query params
// ============================================================================

#[derive(Deserialize)]
struct MunicipalitiesQuery {
    query: Option<String>,
    state: Option<String>,
    limit: Option<i64>,
}

#[derive(Deserialize)]
struct ResultsQuery {
    municipality_id: Option<i32>,
    year: Option<i32>,
    election_type: Option<String>,
    party: Option<String>,
    limit: Option<i64>,
}

#[derive(Deserialize)]
struct CompareQuery {
    election_type: String,
    year_a: i32,
    year_b: i32,
    municipality_id: Option<i32>,
}

#[derive(Deserialize)]
struct DashboardQuery {
    election_type: Option<String>,
    year: Option<i32>,
}

#[derive(Deserialize)]
struct ImportsQuery {
    status: Option<String>,
    limit: Option<i64>,
}

// ============================================================================
// Helpers
// ============================================================================

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
        .into_response()
}

fn db_error(e: sqlx::Error) -> Response {
    error!("Database error: {}", e);
    error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

fn check_election_type(election_type: &str) -> Result<(), Response> {
    if ELECTION_TYPES.contains(&election_type) {
        Ok(())
    } else {
        Err(error_response(
            StatusCode::BAD_REQUEST,
            format!(
                "Unknown election_type '{}'. Expected one of: {}",
                election_type,
                ELECTION_TYPES.join(", ")
            ),
        ))
    }
}

/// Relative change from `a` to `b` in percent; `None` unless `a` is positive
fn pct_change(a: i64, b: i64) -> Option<f64> {
    (a > 0).then(|| percentage(b - a, a))
}

/// Most recent year strictly before `year` (years sorted descending)
fn previous_election(available_years: &[i32], year: i32) -> Option<i32> {
    available_years.iter().copied().find(|&y| y < year)
}

// ============================================================================
// Handlers
// ============================================================================

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        ok: true,
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn municipalities_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<MunicipalitiesQuery>,
) -> Response {
    let limit = params.limit.unwrap_or(100).min(1000);
    // Matches against the canonical (upper-case, accent-free) name as well
    let pattern = params.query.map(|q| format!("%{}%", q.trim().to_lowercase()));

    let rows: Result<Vec<MunicipalityResponse>, _> = sqlx::query_as(
        r#"
        SELECT m.id, m.name, m.display_name, m.state,
               e.nominal_list, e.registered_voters, e.sections
        FROM municipalities m
        LEFT JOIN electorate e ON e.municipality_id = m.id
        WHERE ($1::text IS NULL OR LOWER(m.display_name) LIKE $1 OR LOWER(m.name) LIKE $1)
          AND ($2::text IS NULL OR m.state = $2)
        ORDER BY m.name
        LIMIT $3
        "#,
    )
    .bind(pattern)
    .bind(params.state)
    .bind(limit)
    .fetch_all(&state.pool)
    .await;

    match rows {
        Ok(m) => Json(serde_json::json!({ "municipalities": m })).into_response(),
        Err(e) => db_error(e),
    }
}

async fn results_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ResultsQuery>,
) -> Response {
    if let Some(t) = &params.election_type {
        if let Err(resp) = check_election_type(t) {
            return resp;
        }
    }
    let limit = params.limit.unwrap_or(500).min(5000);

    // Build dynamic query
    let mut query = String::from(
        r#"
        SELECT r.municipality_id, m.display_name as municipality_name,
               r.election_year, r.election_type, r.party,
               r.votes, r.percentage, r.turnout_percentage
        FROM historical_results r
        JOIN municipalities m ON m.id = r.municipality_id
        WHERE 1=1
        "#,
    );

    let mut idx = 1;
    if params.municipality_id.is_some() {
        query.push_str(&format!(" AND r.municipality_id = ${}", idx));
        idx += 1;
    }
    if params.year.is_some() {
        query.push_str(&format!(" AND r.election_year = ${}", idx));
        idx += 1;
    }
    if params.election_type.is_some() {
        query.push_str(&format!(" AND r.election_type = ${}", idx));
        idx += 1;
    }
    if params.party.is_some() {
        query.push_str(&format!(" AND r.party = ${}", idx));
        idx += 1;
    }
    query.push_str(&format!(
        " ORDER BY r.election_year DESC, m.name, r.votes DESC LIMIT ${}",
        idx
    ));

    let mut q = sqlx::query_as::<_, ResultResponse>(&query);
    if let Some(mid) = params.municipality_id {
        q = q.bind(mid);
    }
    if let Some(year) = params.year {
        q = q.bind(year);
    }
    if let Some(t) = params.election_type {
        q = q.bind(t);
    }
    if let Some(party) = params.party {
        q = q.bind(party.to_uppercase());
    }
    q = q.bind(limit);

    match q.fetch_all(&state.pool).await {
        Ok(results) => Json(serde_json::json!({ "results": results })).into_response(),
        Err(e) => db_error(e),
    }
}

async fn compare_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<CompareQuery>,
) -> Response {
    if let Err(resp) = check_election_type(&params.election_type) {
        return resp;
    }

    let rows = sqlx::query(
        r#"
        WITH year_a AS (
            SELECT municipality_id, party, votes, percentage
            FROM historical_results
            WHERE election_type = $1 AND election_year = $2
              AND ($4::int IS NULL OR municipality_id = $4)
        ),
        year_b AS (
            SELECT municipality_id, party, votes, percentage
            FROM historical_results
            WHERE election_type = $1 AND election_year = $3
              AND ($4::int IS NULL OR municipality_id = $4)
        )
        SELECT
            COALESCE(a.municipality_id, b.municipality_id) as municipality_id,
            m.display_name as municipality_name,
            COALESCE(a.party, b.party) as party,
            a.votes as votes_a,
            b.votes as votes_b,
            a.percentage as percentage_a,
            b.percentage as percentage_b
        FROM year_a a
        FULL OUTER JOIN year_b b
            ON a.municipality_id = b.municipality_id AND a.party = b.party
        JOIN municipalities m ON m.id = COALESCE(a.municipality_id, b.municipality_id)
        ORDER BY m.name, party
        "#,
    )
    .bind(&params.election_type)
    .bind(params.year_a)
    .bind(params.year_b)
    .bind(params.municipality_id)
    .fetch_all(&state.pool)
    .await;

    let rows = match rows {
        Ok(rows) => rows,
        Err(e) => return db_error(e),
    };

    let compare_rows: Vec<CompareRow> = rows
        .iter()
        .map(|row| {
            let votes_a: Option<i64> = row.get("votes_a");
            let votes_b: Option<i64> = row.get("votes_b");
            let percentage_a: Option<f64> = row.get("percentage_a");
            let percentage_b: Option<f64> = row.get("percentage_b");

            let (delta_votes, pct) = match (votes_a, votes_b) {
                (Some(a), Some(b)) => (Some(b - a), pct_change(a, b)),
                _ => (None, None),
            };
            let swing = match (percentage_a, percentage_b) {
                (Some(a), Some(b)) => Some(round2(b - a)),
                _ => None,
            };

            CompareRow {
                municipality_id: row.get("municipality_id"),
                municipality_name: row.get("municipality_name"),
                party: row.get("party"),
                votes_a,
                votes_b,
                percentage_a,
                percentage_b,
                delta_votes,
                pct_change: pct,
                swing,
            }
        })
        .collect();

    Json(CompareResponse {
        election_type: params.election_type,
        year_a: params.year_a,
        year_b: params.year_b,
        rows: compare_rows,
    })
    .into_response()
}

/// Votes per party for one election: (party, votes, municipalities won)
async fn party_totals(
    pool: &PgPool,
    election_type: &str,
    year: i32,
) -> Result<Vec<(String, i64, i64)>, sqlx::Error> {
    sqlx::query_as(
        r#"
        WITH ranked AS (
            SELECT municipality_id, party, votes,
                   RANK() OVER (PARTITION BY municipality_id ORDER BY votes DESC) as place
            FROM historical_results
            WHERE election_type = $1 AND election_year = $2
        )
        SELECT party,
               SUM(votes)::bigint as votes,
               COUNT(*) FILTER (WHERE place = 1) as won
        FROM ranked
        GROUP BY party
        ORDER BY votes DESC, party
        "#,
    )
    .bind(election_type)
    .bind(year)
    .fetch_all(pool)
    .await
}

async fn dashboard_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<DashboardQuery>,
) -> Response {
    let election_type = params.election_type.unwrap_or_else(|| "municipal".to_string());
    if let Err(resp) = check_election_type(&election_type) {
        return resp;
    }

    let years: Result<Vec<(i32,)>, _> = sqlx::query_as(
        r#"
        SELECT DISTINCT election_year
        FROM historical_results
        WHERE election_type = $1
        ORDER BY election_year DESC
        "#,
    )
    .bind(&election_type)
    .fetch_all(&state.pool)
    .await;

    let available_years: Vec<i32> = match years {
        Ok(rows) => rows.into_iter().map(|(y,)| y).collect(),
        Err(e) => return db_error(e),
    };

    // Default to most recent election
    let year = match params.year.or_else(|| available_years.first().copied()) {
        Some(y) if available_years.contains(&y) => y,
        _ => {
            return error_response(
                StatusCode::NOT_FOUND,
                format!("No {} results available", election_type),
            )
        }
    };
    let previous_year = previous_election(&available_years, year);

    let parties = match party_totals(&state.pool, &election_type, year).await {
        Ok(rows) => rows,
        Err(e) => return db_error(e),
    };
    let previous = match previous_year {
        Some(prev) => match party_totals(&state.pool, &election_type, prev).await {
            Ok(rows) => Some(rows),
            Err(e) => return db_error(e),
        },
        None => None,
    };

    let municipalities: i64 = match sqlx::query_as::<_, (i64,)>(
        r#"
        SELECT COUNT(DISTINCT municipality_id)
        FROM historical_results
        WHERE election_type = $1 AND election_year = $2
        "#,
    )
    .bind(&election_type)
    .bind(year)
    .fetch_one(&state.pool)
    .await
    {
        Ok((count,)) => count,
        Err(e) => return db_error(e),
    };

    let total_votes: i64 = parties.iter().map(|(_, votes, _)| votes).sum();
    let previous_total_votes: Option<i64> = previous
        .as_ref()
        .map(|rows| rows.iter().map(|(_, votes, _)| votes).sum());
    let change_pct = previous_total_votes.and_then(|prev| pct_change(prev, total_votes));

    let dashboard_parties: Vec<DashboardParty> = parties
        .iter()
        .map(|(party, votes, won)| {
            let previous_votes = previous.as_ref().and_then(|rows| {
                rows.iter()
                    .find(|(p, _, _)| p == party)
                    .map(|(_, v, _)| *v)
            });
            let share_now = percentage(*votes, total_votes);
            let previous_share = match (previous_votes, previous_total_votes) {
                (Some(v), Some(total)) => Some(percentage(v, total)),
                _ => None,
            };

            DashboardParty {
                party: party.clone(),
                votes: *votes,
                share: share_now,
                municipalities_won: *won,
                previous_votes,
                previous_share,
                swing: previous_share.map(|prev| round2(share_now - prev)),
            }
        })
        .collect();

    Json(DashboardResponse {
        election_type,
        year,
        total_votes,
        municipalities,
        previous_year,
        previous_total_votes,
        change_pct,
        parties: dashboard_parties,
        available_years,
    })
    .into_response()
}

async fn imports_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ImportsQuery>,
) -> Response {
    let limit = params.limit.unwrap_or(50).min(500);

    let runs: Result<Vec<ImportRunResponse>, _> = sqlx::query_as(
        r#"
        SELECT run_id, kind, path, election_type, election_year, content_hash,
               status, error, detail, started_at, finished_at
        FROM import_runs
        WHERE ($1::text IS NULL OR status = $1)
        ORDER BY started_at DESC
        LIMIT $2
        "#,
    )
    .bind(params.status)
    .bind(limit)
    .fetch_all(&state.pool)
    .await;

    match runs {
        Ok(r) => Json(serde_json::json!({ "imports": r })).into_response(),
        Err(e) => db_error(e),
    }
}

// ============================================================================
// Main
// ============================================================================

fn router(state: Arc<AppState>) -> Router {
    // CORS for web frontend
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/municipalities", get(municipalities_handler))
        .route("/results", get(results_handler))
        .route("/compare", get(compare_handler))
        .route("/dashboard", get(dashboard_handler))
        .route("/imports", get(imports_handler))
        .layer(cors)
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let db_url = std::env::var("DB_URL").context("DB_URL env var missing")?;
    let bind = std::env::var("API_BIND").unwrap_or_else(|_| "127.0.0.1:8080".to_string());

    println!("=== Guardianes Historical Results API ===");
    println!("Connecting to database...");

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&db_url)
        .await
        .context("Failed to connect to database")?;

    println!("Database connected");

    let app = router(Arc::new(AppState { pool }));

    println!("API listening on http://{}", bind);
    println!("\nEndpoints:");
    println!("  GET /health");
    println!("  GET /municipalities?query=&state=&limit=");
    println!("  GET /results?municipality_id=&year=&election_type=&party=&limit=");
    println!("  GET /compare?election_type=&year_a=&year_b=&municipality_id=");
    println!("  GET /dashboard?election_type=&year=");
    println!("  GET /imports?status=&limit=");

    let listener = tokio::net::TcpListener::bind(&bind).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
