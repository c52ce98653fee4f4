//! Import orchestration
//!
//! Sequence:
//! 1. Preflight: every planned file must exist
//! 2. Ensure schema, load the municipality lookup for the state
//! 3. Electorate phase (truncate, import, municipalities created lazily)
//! 4. Results phase (truncate, import each `{electionType}{year}.csv`)
//!
//! Files are imported one at a time. Each file is parsed and aggregated in
//! memory, then written inside a single transaction: a write failure rolls
//! back that file only and the orchestration moves on to the next one.

use crate::aggregate::{aggregate_electorate, aggregate_results, Aggregation, ElectorateTotals, RowStats};
use crate::config::RowPolicy;
use crate::db::{self, RunTarget};
use crate::delimiter::delimiter_name;
use crate::error::{ImportError, Result};
use crate::lookup::MunicipalityIndex;
use crate::model::{ElectionType, HistoricalResult};
use crate::schema::{ElectorateLayout, HeaderReport, ResultsLayout};
use crate::source::{csv_reader, read_source, ImportPlan, ResultsSource, SourceFile};
use serde::Serialize;
use sqlx::{PgConnection, PgPool};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};
use uuid::Uuid;

/// Lifecycle of one file import
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FileState {
    NotStarted,
    HeaderRead,
    Streaming,
    Committed,
    RolledBack,
}

impl FileState {
    pub fn can_advance_to(self, next: FileState) -> bool {
        use FileState::*;
        matches!(
            (self, next),
            (NotStarted, HeaderRead)
                | (HeaderRead, Streaming)
                | (Streaming, Committed)
                | (NotStarted | HeaderRead | Streaming, RolledBack)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, FileState::Committed | FileState::RolledBack)
    }
}

impl fmt::Display for FileState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FileState::NotStarted => "not_started",
            FileState::HeaderRead => "header_read",
            FileState::Streaming => "streaming",
            FileState::Committed => "committed",
            FileState::RolledBack => "rolled_back",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FileKind {
    Electorate,
    Results,
}

impl FileKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileKind::Electorate => "electorate",
            FileKind::Results => "results",
        }
    }
}

/// Outcome of one file, printed in the summary and stored with its run
#[derive(Debug, Clone, Serialize)]
pub struct FileReport {
    pub kind: FileKind,
    pub path: PathBuf,
    pub election_type: Option<ElectionType>,
    pub election_year: Option<i32>,
    pub state: FileState,
    pub delimiter: Option<&'static str>,
    pub encoding: Option<&'static str>,
    pub content_hash: Option<String>,
    pub header: HeaderReport,
    pub stats: RowStats,
    pub unresolved_names: Vec<String>,
    pub municipalities_created: usize,
    pub inserted: usize,
    pub duplicates: usize,
    pub error: Option<String>,
}

impl FileReport {
    pub fn new(
        kind: FileKind,
        path: &Path,
        election_type: Option<ElectionType>,
        election_year: Option<i32>,
    ) -> Self {
        Self {
            kind,
            path: path.to_path_buf(),
            election_type,
            election_year,
            state: FileState::NotStarted,
            delimiter: None,
            encoding: None,
            content_hash: None,
            header: HeaderReport::default(),
            stats: RowStats::default(),
            unresolved_names: Vec::new(),
            municipalities_created: 0,
            inserted: 0,
            duplicates: 0,
            error: None,
        }
    }

    pub fn advance(&mut self, next: FileState) -> Result<()> {
        if !self.state.can_advance_to(next) {
            return Err(ImportError::InvalidTransition {
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        self.state = next;
        Ok(())
    }

    /// Record a failure; non-terminal files end up rolled back
    pub fn fail(&mut self, err: &ImportError) {
        self.error = Some(err.to_string());
        if !self.state.is_terminal() {
            self.state = FileState::RolledBack;
        }
    }

    /// Forget write counters after a rollback; none of those rows exist
    pub fn discard_writes(&mut self) {
        self.inserted = 0;
        self.duplicates = 0;
        self.municipalities_created = 0;
    }

    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }

    fn set_source(&mut self, file: &SourceFile) {
        self.encoding = Some(file.encoding);
        self.content_hash = Some(file.content_hash.clone());
    }

    fn set_header(&mut self, header: &HeaderReport) {
        if !header.missing.is_empty() {
            warn!("{}: missing columns {:?}", self.path.display(), header.missing);
        }
        if !header.unknown.is_empty() {
            warn!("{}: unknown columns {:?}", self.path.display(), header.unknown);
        }
        self.header = header.clone();
    }

    /// `committed`, `rolled_back`, or `parsed` for a successful dry run
    pub fn status(&self) -> &'static str {
        match self.state {
            FileState::Committed => "committed",
            FileState::RolledBack => "rolled_back",
            _ if self.error.is_none() => "parsed",
            _ => "failed",
        }
    }

    fn detail(&self) -> serde_json::Value {
        serde_json::json!({
            "stats": self.stats,
            "header": self.header,
            "delimiter": self.delimiter,
            "encoding": self.encoding,
            "unresolved_names": self.unresolved_names,
            "municipalities_created": self.municipalities_created,
            "inserted": self.inserted,
            "duplicates": self.duplicates,
        })
    }

    fn label(&self) -> String {
        match (self.election_type, self.election_year) {
            (Some(t), Some(y)) => format!("{} {}", t, y),
            _ => self.kind.as_str().to_string(),
        }
    }
}

/// All file reports of one orchestration
#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportSummary {
    pub files: Vec<FileReport>,
    pub municipalities_known: usize,
}

impl ImportSummary {
    pub fn failed(&self) -> usize {
        self.files.iter().filter(|f| !f.succeeded()).count()
    }

    pub fn total_inserted(&self) -> usize {
        self.files
            .iter()
            .filter(|f| f.kind == FileKind::Results)
            .map(|f| f.inserted)
            .sum()
    }

    pub fn print(&self) {
        println!("\n=== Import Summary ===");
        for f in &self.files {
            println!(
                "  [{:<11}] {:<22} {}",
                f.status(),
                f.label(),
                f.path.display()
            );
            println!(
                "      read={} aggregated={} skipped={} unresolved={} created={} inserted={} duplicates={}",
                f.stats.rows_read,
                f.stats.rows_aggregated,
                f.stats.rows_skipped,
                f.stats.rows_unresolved,
                f.municipalities_created,
                f.inserted,
                f.duplicates
            );
            for name in f.unresolved_names.iter().take(5) {
                println!("      unresolved: '{}'", name);
            }
            if f.unresolved_names.len() > 5 {
                println!("      ... and {} more", f.unresolved_names.len() - 5);
            }
            if let Some(err) = &f.error {
                println!("      error: {}", err);
            }
        }
        println!("{:-<60}", "");
        println!("Files: {} ({} failed)", self.files.len(), self.failed());
        println!("Historical results inserted: {}", self.total_inserted());
        println!("Municipalities known: {}", self.municipalities_known);
    }
}

// =============================================================================
// PARSING (no database)
// =============================================================================

/// Header + stream of an electorate file
pub fn parse_electorate(
    file: &SourceFile,
    policy: RowPolicy,
    report: &mut FileReport,
) -> Result<ElectorateTotals> {
    let (mut reader, delimiter) = csv_reader(&file.content)?;
    report.delimiter = Some(delimiter_name(delimiter));
    let layout = ElectorateLayout::from_headers(reader.headers()?)?;
    report.set_header(&layout.report);
    report.advance(FileState::HeaderRead)?;

    report.advance(FileState::Streaming)?;
    let totals = aggregate_electorate(ElectorateTotals::new(), reader.records(), &layout, policy)?;
    report.stats = totals.stats.clone();
    Ok(totals)
}

/// Header + stream of a results file
pub fn parse_results(
    file: &SourceFile,
    index: &MunicipalityIndex,
    policy: RowPolicy,
    report: &mut FileReport,
) -> Result<Aggregation> {
    let (mut reader, delimiter) = csv_reader(&file.content)?;
    report.delimiter = Some(delimiter_name(delimiter));
    let layout = ResultsLayout::from_headers(reader.headers()?)?;
    report.set_header(&layout.report);
    report.advance(FileState::HeaderRead)?;

    report.advance(FileState::Streaming)?;
    let aggregation = aggregate_results(Aggregation::new(), reader.records(), &layout, index, policy)?;
    report.stats = aggregation.stats.clone();
    report.unresolved_names = aggregation.unresolved_names.iter().cloned().collect();
    Ok(aggregation)
}

/// Aggregated rows for a results file, failing when rows were read but
/// nothing insertable came out of them
fn results_for(
    aggregation: Aggregation,
    source: &ResultsSource,
    fallback_nominal: &HashMap<i32, i64>,
) -> Result<Vec<HistoricalResult>> {
    let stats = aggregation.stats.clone();
    let results = aggregation.into_results(source.year, source.election_type, fallback_nominal);
    if results.is_empty() && stats.rows_read > 0 {
        let reason = if stats.rows_aggregated > 0 {
            format!(
                "No non-zero votes in {} aggregated rows",
                stats.rows_aggregated
            )
        } else {
            format!(
                "No results aggregated from {} rows ({} unresolved, {} skipped)",
                stats.rows_read, stats.rows_unresolved, stats.rows_skipped
            )
        };
        return Err(ImportError::AmbiguousFormat(reason));
    }
    if stats.rows_read == 0 {
        warn!("{}: no data rows", source.path.display());
    }
    Ok(results)
}

// =============================================================================
// PERSISTENCE
// =============================================================================

async fn write_electorate(
    conn: &mut PgConnection,
    state: &str,
    totals: &ElectorateTotals,
    staged: &mut MunicipalityIndex,
    report: &mut FileReport,
) -> Result<()> {
    for (canonical, entry) in &totals.entries {
        let (id, created) =
            db::get_or_create_municipality(&mut *conn, state, canonical, &entry.display_name).await?;
        if created {
            info!("Created municipality {} ({})", entry.display_name, id);
            report.municipalities_created += 1;
        }
        staged.insert(canonical.clone(), id);
        db::upsert_electorate(&mut *conn, id, entry).await?;
        report.inserted += 1;
    }
    Ok(())
}

async fn write_results(
    conn: &mut PgConnection,
    results: &[HistoricalResult],
    report: &mut FileReport,
) -> Result<()> {
    for result in results {
        if db::insert_result(&mut *conn, result).await? {
            report.inserted += 1;
        } else {
            report.duplicates += 1;
        }
    }
    Ok(())
}

// =============================================================================
// ORCHESTRATION
// =============================================================================

#[derive(Debug, Clone)]
pub struct ImportSettings {
    /// State the municipalities belong to
    pub state: String,
    pub electorate_policy: RowPolicy,
    pub results_policy: RowPolicy,
    /// Skip the per-phase TRUNCATE and rely on conflict-skipping inserts
    pub keep_existing: bool,
}

pub struct Importer {
    pool: PgPool,
    settings: ImportSettings,
    index: MunicipalityIndex,
}

impl Importer {
    pub fn new(pool: PgPool, settings: ImportSettings) -> Self {
        Self {
            pool,
            settings,
            index: MunicipalityIndex::new(),
        }
    }

    pub fn index(&self) -> &MunicipalityIndex {
        &self.index
    }

    /// Create tables and load the lookup for the configured state
    pub async fn prepare(&mut self) -> Result<()> {
        db::ensure_schema(&self.pool).await?;
        let municipalities = db::load_municipalities(&self.pool, &self.settings.state).await?;
        self.index = MunicipalityIndex::from_municipalities(&municipalities);
        info!(
            "Loaded {} municipalities for {}",
            self.index.len(),
            self.settings.state
        );
        Ok(())
    }

    /// Run the whole plan. Only a missing source or a failure outside a file
    /// transaction (DDL, truncation) is returned as `Err`; per-file failures
    /// are in the summary.
    pub async fn import_all(&mut self, plan: &ImportPlan) -> Result<ImportSummary> {
        plan.preflight().await?;
        self.prepare().await?;

        let mut summary = ImportSummary::default();

        info!("Electorate phase: {}", plan.electorate.display());
        if !self.settings.keep_existing {
            db::truncate_electorate(&self.pool).await?;
        }
        summary
            .files
            .push(self.import_electorate_file(&plan.electorate).await?);

        info!("Results phase: {} file(s)", plan.results.len());
        if !self.settings.keep_existing {
            db::truncate_results(&self.pool).await?;
        }
        let fallback_nominal = db::load_nominal_lists(&self.pool, &self.settings.state).await?;
        for source in &plan.results {
            summary
                .files
                .push(self.import_results_file(source, &fallback_nominal).await?);
        }

        summary.municipalities_known = self.index.len();
        Ok(summary)
    }

    /// Import one electorate file in its own transaction. `Err` only for a
    /// missing file; other failures are recorded in the report.
    pub async fn import_electorate_file(&mut self, path: &Path) -> Result<FileReport> {
        let mut report = FileReport::new(FileKind::Electorate, path, None, None);
        let target = RunTarget {
            kind: FileKind::Electorate.as_str(),
            path: &path.to_string_lossy(),
            election_type: None,
            election_year: None,
        };
        let run_id = self.start_run(&target, &mut report).await;
        if run_id.is_none() {
            return Ok(report);
        }

        let outcome = self.run_electorate(path, &mut report).await;
        self.finish(run_id, &mut report, outcome).await
    }

    /// Import one results file in its own transaction. `Err` only for a
    /// missing file; other failures are recorded in the report.
    pub async fn import_results_file(
        &mut self,
        source: &ResultsSource,
        fallback_nominal: &HashMap<i32, i64>,
    ) -> Result<FileReport> {
        let mut report = FileReport::new(
            FileKind::Results,
            &source.path,
            Some(source.election_type),
            Some(source.year),
        );
        let target = RunTarget {
            kind: FileKind::Results.as_str(),
            path: &source.path.to_string_lossy(),
            election_type: Some(source.election_type),
            election_year: Some(source.year),
        };
        let run_id = self.start_run(&target, &mut report).await;
        if run_id.is_none() {
            return Ok(report);
        }

        let outcome = self.run_results(source, fallback_nominal, &mut report).await;
        self.finish(run_id, &mut report, outcome).await
    }

    async fn run_electorate(&mut self, path: &Path, report: &mut FileReport) -> Result<()> {
        let file = read_source(path).await?;
        report.set_source(&file);
        let totals = parse_electorate(&file, self.settings.electorate_policy, report)?;

        // New ids only become visible once the transaction commits
        let mut staged = self.index.clone();
        let mut tx = self.pool.begin().await?;
        let written = write_electorate(&mut tx, &self.settings.state, &totals, &mut staged, report).await;
        match written {
            Ok(()) => tx.commit().await?,
            Err(e) => {
                tx.rollback().await?;
                report.discard_writes();
                return Err(e);
            }
        }

        report.advance(FileState::Committed)?;
        self.index = staged;
        Ok(())
    }

    async fn run_results(
        &mut self,
        source: &ResultsSource,
        fallback_nominal: &HashMap<i32, i64>,
        report: &mut FileReport,
    ) -> Result<()> {
        let file = read_source(&source.path).await?;
        report.set_source(&file);
        let aggregation = parse_results(&file, &self.index, self.settings.results_policy, report)?;
        let results = results_for(aggregation, source, fallback_nominal)?;

        let mut tx = self.pool.begin().await?;
        let written = write_results(&mut tx, &results, report).await;
        match written {
            Ok(()) => tx.commit().await?,
            Err(e) => {
                tx.rollback().await?;
                report.discard_writes();
                return Err(e);
            }
        }

        report.advance(FileState::Committed)?;
        Ok(())
    }

    async fn start_run(&self, target: &RunTarget<'_>, report: &mut FileReport) -> Option<Uuid> {
        match db::create_import_run(&self.pool, target).await {
            Ok(id) => Some(id),
            Err(e) => {
                error!("Could not register import run for {}: {}", target.path, e);
                report.fail(&e);
                None
            }
        }
    }

    async fn finish(
        &self,
        run_id: Option<Uuid>,
        report: &mut FileReport,
        outcome: Result<()>,
    ) -> Result<FileReport> {
        let fatal = match outcome {
            Ok(()) => {
                info!(
                    "{} committed: {} inserted, {} duplicates",
                    report.path.display(),
                    report.inserted,
                    report.duplicates
                );
                None
            }
            Err(e) => {
                error!("{} rolled back: {}", report.path.display(), e);
                report.fail(&e);
                matches!(e, ImportError::SourceNotFound(_)).then_some(e)
            }
        };

        if let Some(run_id) = run_id {
            if let Err(e) = db::finish_import_run(
                &self.pool,
                run_id,
                report.status(),
                report.content_hash.as_deref(),
                report.error.as_deref(),
                report.detail(),
            )
            .await
            {
                error!("Could not finish import run {}: {}", run_id, e);
            }
        }

        match fatal {
            Some(e) => Err(e),
            None => Ok(report.clone()),
        }
    }
}

/// Parse and aggregate the whole plan without a database.
///
/// Municipalities are numbered from the electorate file (canonical name
/// order) so results files resolve against it exactly as a real import on
/// an empty database would.
pub async fn dry_run(plan: &ImportPlan, settings: &ImportSettings) -> Result<ImportSummary> {
    plan.preflight().await?;
    let mut summary = ImportSummary::default();
    let mut index = MunicipalityIndex::new();
    let mut fallback_nominal = HashMap::new();

    let mut report = FileReport::new(FileKind::Electorate, &plan.electorate, None, None);
    let file = read_source(&plan.electorate).await?;
    report.set_source(&file);
    match parse_electorate(&file, settings.electorate_policy, &mut report) {
        Ok(totals) => {
            for (id, (canonical, entry)) in (1..).zip(&totals.entries) {
                index.insert(canonical.clone(), id);
                fallback_nominal.insert(id, entry.nominal_list);
            }
            report.municipalities_created = totals.entries.len();
            report.inserted = totals.entries.len();
        }
        Err(e) => report.fail(&e),
    }
    summary.files.push(report);

    for source in &plan.results {
        let mut report = FileReport::new(
            FileKind::Results,
            &source.path,
            Some(source.election_type),
            Some(source.year),
        );
        let file = read_source(&source.path).await?;
        report.set_source(&file);
        let outcome = parse_results(&file, &index, settings.results_policy, &mut report)
            .and_then(|aggregation| results_for(aggregation, source, &fallback_nominal));
        match outcome {
            Ok(results) => report.inserted = results.len(),
            Err(e) => report.fail(&e),
        }
        summary.files.push(report);
    }

    summary.municipalities_known = index.len();
    Ok(summary)
}
