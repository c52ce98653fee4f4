//! Per-file aggregation of precinct rows.
//!
//! A results file carries one row per polling station (casilla) or section.
//! Rows are folded into one bucket per (municipality, party). The state is a
//! plain value: created per file, threaded through [`aggregate_results`],
//! returned to the caller, then turned into insertable rows.

use crate::config::RowPolicy;
use crate::error::{ImportError, Result};
use crate::lookup::MunicipalityIndex;
use crate::model::{AggregationKey, ElectionType, HistoricalResult};
use crate::normalize::normalize_name;
use crate::percentage::percentage;
use crate::schema::{
    ElectorateLayout, ElectorateRecord, ResultRecord, ResultsLayout, COL_LISTA_NOMINAL, COL_PADRON,
};
use csv::StringRecord;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, warn};

/// Accumulator for one (municipality, party) pair
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Bucket {
    pub votes: i64,
    /// Last `TOTAL_VOTOS` seen on a row that touched this bucket
    pub total_votes: i64,
    /// Last `LISTA_NOMINAL` seen on a row that touched this bucket
    pub nominal_list: i64,
}

/// Row counters reported per file
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RowStats {
    pub rows_read: usize,
    pub rows_aggregated: usize,
    pub rows_skipped: usize,
    pub rows_unresolved: usize,
    pub invalid_fields: usize,
    pub inconsistent_totals: usize,
}

impl RowStats {
    /// Book a row-level error under `policy`; returns it back when the policy aborts
    fn absorb(&mut self, policy: RowPolicy, err: ImportError) -> Result<()> {
        if policy == RowPolicy::Abort || !err.is_row_level() {
            return Err(err);
        }
        match &err {
            ImportError::UnresolvedMunicipality { .. } => self.rows_unresolved += 1,
            _ => self.rows_skipped += 1,
        }
        warn!("Skipping row: {}", err);
        Ok(())
    }
}

/// Physical line a row starts on (header is line 1). The csv reader skips
/// blank lines and quoted fields may span lines, so the ordinal is only a
/// fallback for records without a position.
fn row_line(idx: usize, row: &std::result::Result<StringRecord, csv::Error>) -> usize {
    let position = match row {
        Ok(record) => record.position(),
        Err(e) => e.position(),
    };
    position.map_or(idx + 2, |p| p.line() as usize)
}

fn overflow(line: usize, column: &str) -> ImportError {
    ImportError::RowParse {
        line,
        reason: format!("{} total exceeds the supported range", column),
    }
}

// =============================================================================
// HISTORICAL RESULTS
// =============================================================================

#[derive(Debug, Clone, Default)]
pub struct Aggregation {
    buckets: BTreeMap<AggregationKey, Bucket>,
    pub stats: RowStats,
    /// Distinct raw names that did not resolve
    pub unresolved_names: BTreeSet<String>,
}

impl Aggregation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bucket(&self, municipality_id: i32, party: &str) -> Option<&Bucket> {
        self.buckets
            .iter()
            .find(|(k, _)| k.municipality_id == municipality_id && k.party == party)
            .map(|(_, b)| b)
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Fold one typed row into its buckets.
    ///
    /// Fails with `UnresolvedMunicipality` when the name has no match; the
    /// row then contributes nothing. Zero-vote parties are not recorded.
    pub fn add_record(&mut self, record: &ResultRecord, index: &MunicipalityIndex) -> Result<i32> {
        let municipality_id = match index.resolve(&record.municipality) {
            Some(id) => id,
            None => {
                self.unresolved_names.insert(record.municipality.clone());
                return Err(ImportError::UnresolvedMunicipality {
                    line: record.line,
                    name: record.municipality.clone(),
                });
            }
        };

        // Sums are checked before any bucket changes so an overflowing row
        // contributes nothing
        let mut sums = Vec::with_capacity(record.votes.len());
        for &(party, votes) in &record.votes {
            if votes == 0 {
                continue;
            }
            let key = AggregationKey { municipality_id, party };
            let current = self.buckets.get(&key).map_or(0, |b| b.votes);
            let sum = current
                .checked_add(votes)
                .ok_or_else(|| overflow(record.line, party))?;
            sums.push((key, sum));
        }

        self.stats.invalid_fields += record.invalid_fields.len();
        if record.totals_consistent() == Some(false) {
            self.stats.inconsistent_totals += 1;
            debug!(
                "Line {}: VOTOS_VALIDOS + VOTOS_NULOS != TOTAL_VOTOS for '{}'",
                record.line, record.municipality
            );
        }

        for (key, sum) in sums {
            let bucket = self.buckets.entry(key).or_default();
            bucket.votes = sum;
            if let Some(total) = record.total_votes {
                bucket.total_votes = total;
            }
            if let Some(nominal) = record.nominal_list {
                bucket.nominal_list = nominal;
            }
        }

        self.stats.rows_aggregated += 1;
        Ok(municipality_id)
    }

    /// Turn buckets into insertable rows, ordered by (municipality, party).
    ///
    /// `fallback_nominal` supplies the turnout denominator for buckets whose
    /// file had no `LISTA_NOMINAL` value.
    pub fn into_results(
        self,
        year: i32,
        election_type: ElectionType,
        fallback_nominal: &HashMap<i32, i64>,
    ) -> Vec<HistoricalResult> {
        self.buckets
            .into_iter()
            .map(|(key, bucket)| {
                let nominal = if bucket.nominal_list > 0 {
                    bucket.nominal_list
                } else {
                    fallback_nominal.get(&key.municipality_id).copied().unwrap_or(0)
                };
                HistoricalResult {
                    municipality_id: key.municipality_id,
                    election_year: year,
                    election_type,
                    party: key.party.to_string(),
                    votes: bucket.votes,
                    percentage: percentage(bucket.votes, bucket.total_votes),
                    turnout_percentage: percentage(bucket.total_votes, nominal),
                }
            })
            .collect()
    }
}

/// Stream the data rows of one results file into `aggregation`.
///
/// Row-level failures follow `policy`; any other error (or a row-level one
/// under `Abort`) ends the stream and is returned.
pub fn aggregate_results<I>(
    mut aggregation: Aggregation,
    rows: I,
    layout: &ResultsLayout,
    index: &MunicipalityIndex,
    policy: RowPolicy,
) -> Result<Aggregation>
where
    I: IntoIterator<Item = std::result::Result<StringRecord, csv::Error>>,
{
    for (idx, row) in rows.into_iter().enumerate() {
        let line = row_line(idx, &row);
        aggregation.stats.rows_read += 1;

        let outcome = row
            .map_err(|e| ImportError::RowParse {
                line,
                reason: format!("CSV parse error: {}", e),
            })
            .and_then(|row| layout.record(line, &row))
            .and_then(|record| aggregation.add_record(&record, index));

        if let Err(err) = outcome {
            aggregation.stats.absorb(policy, err)?;
        }
    }
    Ok(aggregation)
}

// =============================================================================
// ELECTORATE
// =============================================================================

/// Electorate totals for one municipality, summed over its sections
#[derive(Debug, Clone, PartialEq)]
pub struct ElectorateEntry {
    /// Trimmed raw name of the first row seen
    pub display_name: String,
    pub nominal_list: i64,
    pub registered_voters: Option<i64>,
    pub sections: i32,
}

#[derive(Debug, Clone, Default)]
pub struct ElectorateTotals {
    /// Keyed by canonical name
    pub entries: BTreeMap<String, ElectorateEntry>,
    pub stats: RowStats,
}

impl ElectorateTotals {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_record(&mut self, record: &ElectorateRecord) -> Result<()> {
        let canonical = normalize_name(&record.municipality);
        if canonical.is_empty() {
            return Err(ImportError::UnresolvedMunicipality {
                line: record.line,
                name: record.municipality.clone(),
            });
        }

        let previous = self.entries.get(&canonical);
        let nominal_list = previous
            .map_or(0, |e| e.nominal_list)
            .checked_add(record.nominal_list)
            .ok_or_else(|| overflow(record.line, COL_LISTA_NOMINAL))?;
        let registered_voters = match record.registered_voters {
            Some(padron) => Some(
                previous
                    .and_then(|e| e.registered_voters)
                    .unwrap_or(0)
                    .checked_add(padron)
                    .ok_or_else(|| overflow(record.line, COL_PADRON))?,
            ),
            None => previous.and_then(|e| e.registered_voters),
        };

        let entry = self
            .entries
            .entry(canonical)
            .or_insert_with(|| ElectorateEntry {
                display_name: record.municipality.clone(),
                nominal_list: 0,
                registered_voters: None,
                sections: 0,
            });
        entry.nominal_list = nominal_list;
        entry.registered_voters = registered_voters;
        entry.sections += 1;

        self.stats.rows_aggregated += 1;
        Ok(())
    }
}

/// Stream the data rows of an electorate file.
///
/// A row whose municipality name is blank only costs that row, whatever
/// the policy. Malformed rows follow `policy`.
pub fn aggregate_electorate<I>(
    mut totals: ElectorateTotals,
    rows: I,
    layout: &ElectorateLayout,
    policy: RowPolicy,
) -> Result<ElectorateTotals>
where
    I: IntoIterator<Item = std::result::Result<StringRecord, csv::Error>>,
{
    for (idx, row) in rows.into_iter().enumerate() {
        let line = row_line(idx, &row);
        totals.stats.rows_read += 1;

        let outcome = row
            .map_err(|e| ImportError::RowParse {
                line,
                reason: format!("CSV parse error: {}", e),
            })
            .and_then(|row| layout.record(line, &row))
            .and_then(|record| totals.add_record(&record));

        match outcome {
            Ok(()) => {}
            Err(err @ ImportError::UnresolvedMunicipality { .. }) => {
                warn!("Rejecting electorate row: {}", err);
                totals.stats.rows_unresolved += 1;
            }
            Err(err) => totals.stats.absorb(policy, err)?,
        }
    }
    Ok(totals)
}
