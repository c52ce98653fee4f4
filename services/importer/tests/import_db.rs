//! Database round trip. Runs only when TEST_DB_URL points at a scratch
//! PostgreSQL database; otherwise every test returns early.

use importer::config::RowPolicy;
use importer::db;
use importer::model::ElectionType;
use importer::orchestrator::{FileState, ImportSettings, Importer};
use importer::source::{discover_plan, ELECTORATE_FILE_NAME};
use sqlx::PgPool;
use std::path::Path;
use uuid::Uuid;

async fn test_pool() -> Option<PgPool> {
    let url = std::env::var("TEST_DB_URL").ok()?;
    Some(db::connect(&url, 2).await.expect("connect to TEST_DB_URL"))
}

fn settings(state: &str) -> ImportSettings {
    ImportSettings {
        state: state.to_string(),
        electorate_policy: RowPolicy::Abort,
        results_policy: RowPolicy::Skip,
        // Other tests may share the database: never truncate
        keep_existing: true,
    }
}

fn write_fixtures(dir: &Path) {
    std::fs::write(
        dir.join(ELECTORATE_FILE_NAME),
        "MUNICIPIO,SECCION,LISTA_NOMINAL,PADRON\n\
         Acapulco de Juárez,0001,600,650\n\
         Acapulco de Juárez,0002,400,420\n",
    )
    .unwrap();
    std::fs::write(
        dir.join("municipal2021.csv"),
        "MUNICIPIO,PAN,PRI,TOTAL_VOTOS,LISTA_NOMINAL\n\
         Acapulco,100,50,200,1000\n\
         Acapulco,50,25,100,500\n",
    )
    .unwrap();
}

async fn votes(pool: &PgPool, state: &str, party: &str) -> i64 {
    let (votes,): (i64,) = sqlx::query_as(
        r#"
        SELECT r.votes
        FROM historical_results r
        JOIN municipalities m ON m.id = r.municipality_id
        WHERE m.state = $1 AND r.party = $2
          AND r.election_year = 2021 AND r.election_type = 'municipal'
        "#,
    )
    .bind(state)
    .bind(party)
    .fetch_one(pool)
    .await
    .unwrap();
    votes
}

#[tokio::test]
async fn test_import_is_idempotent() {
    let Some(pool) = test_pool().await else {
        eprintln!("TEST_DB_URL not set, skipping");
        return;
    };
    let state = format!("Test-{}", Uuid::new_v4());
    let dir = tempfile::tempdir().unwrap();
    write_fixtures(dir.path());

    // The results file names the municipality without "de Juárez"
    std::fs::write(
        dir.path().join(ELECTORATE_FILE_NAME),
        "MUNICIPIO,SECCION,LISTA_NOMINAL\nAcapulco,0001,600\nAcapulco,0002,400\n",
    )
    .unwrap();

    let plan = discover_plan(dir.path()).await.unwrap();

    let mut importer = Importer::new(pool.clone(), settings(&state));
    let first = importer.import_all(&plan).await.unwrap();
    assert_eq!(first.failed(), 0);
    assert_eq!(first.files[0].municipalities_created, 1);
    assert_eq!(first.files[1].state, FileState::Committed);
    assert_eq!(first.files[1].inserted, 2);
    assert_eq!(first.files[1].duplicates, 0);

    let mut importer = Importer::new(pool.clone(), settings(&state));
    let second = importer.import_all(&plan).await.unwrap();
    assert_eq!(second.failed(), 0);
    assert_eq!(second.files[0].municipalities_created, 0);
    assert_eq!(second.files[1].inserted, 0);
    assert_eq!(second.files[1].duplicates, 2);

    assert_eq!(votes(&pool, &state, "PAN").await, 150);
    assert_eq!(votes(&pool, &state, "PRI").await, 75);

    let count = db::count_results(&pool, 2021, ElectionType::Municipal).await.unwrap();
    assert!(count >= 2);
}

#[tokio::test]
async fn test_unresolved_results_file_rolls_back() {
    let Some(pool) = test_pool().await else {
        eprintln!("TEST_DB_URL not set, skipping");
        return;
    };
    let state = format!("Test-{}", Uuid::new_v4());
    let dir = tempfile::tempdir().unwrap();
    write_fixtures(dir.path());

    // "Acapulco" does not match "ACAPULCO DE JUAREZ": nothing resolves
    let plan = discover_plan(dir.path()).await.unwrap();
    let mut importer = Importer::new(pool.clone(), settings(&state));
    let summary = importer.import_all(&plan).await.unwrap();

    assert_eq!(summary.failed(), 1);
    let results = &summary.files[1];
    assert_eq!(results.state, FileState::RolledBack);
    assert_eq!(results.unresolved_names, vec!["Acapulco"]);
    assert!(results.error.as_deref().unwrap().contains("AMBIGUITY"));

    let electorate = &summary.files[0];
    assert_eq!(electorate.state, FileState::Committed);
    assert!(importer.index().get("ACAPULCO DE JUAREZ").is_some());
}

#[tokio::test]
async fn test_failed_file_does_not_stop_later_files() {
    let Some(pool) = test_pool().await else {
        eprintln!("TEST_DB_URL not set, skipping");
        return;
    };
    let state = format!("Test-{}", Uuid::new_v4());
    let dir = tempfile::tempdir().unwrap();
    write_fixtures(dir.path());
    std::fs::write(
        dir.path().join(ELECTORATE_FILE_NAME),
        "MUNICIPIO,LISTA_NOMINAL\nAcapulco,1000\n",
    )
    .unwrap();
    // Imported before municipal2021.csv; no MUNICIPIO column
    std::fs::write(
        dir.path().join("state_legislature2018.csv"),
        "DISTRITO,PAN\nI,10\n",
    )
    .unwrap();

    let plan = discover_plan(dir.path()).await.unwrap();
    let mut importer = Importer::new(pool.clone(), settings(&state));
    let summary = importer.import_all(&plan).await.unwrap();

    assert_eq!(summary.files.len(), 3);
    assert_eq!(summary.failed(), 1);

    let legislature = &summary.files[1];
    assert_eq!(legislature.election_type, Some(ElectionType::StateLegislature));
    assert_eq!(legislature.state, FileState::RolledBack);
    assert_eq!(legislature.inserted, 0);

    let municipal = &summary.files[2];
    assert_eq!(municipal.election_type, Some(ElectionType::Municipal));
    assert_eq!(municipal.state, FileState::Committed);
    assert_eq!(municipal.inserted, 2);
    assert_eq!(votes(&pool, &state, "PAN").await, 150);
}
