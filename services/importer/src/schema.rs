//! Header schemas and typed records for the two file classes.
//!
//! Column names are matched on their canonical form (see `normalize`), with
//! spaces turned into underscores, so `Total Votos`, `TOTAL_VOTOS` and
//! `total votos` all land on the same column. Missing optional columns and
//! unknown columns are reported, never silently ignored.

use crate::error::{ImportError, Result};
use crate::model::PARTY_CODES;
use crate::normalize::normalize_name;
use csv::StringRecord;
use serde::Serialize;
use std::collections::HashMap;

pub const COL_MUNICIPIO: &str = "MUNICIPIO";
pub const COL_TOTAL_VOTOS: &str = "TOTAL_VOTOS";
pub const COL_LISTA_NOMINAL: &str = "LISTA_NOMINAL";
pub const COL_VOTOS_VALIDOS: &str = "VOTOS_VALIDOS";
pub const COL_VOTOS_NULOS: &str = "VOTOS_NULOS";
pub const COL_PADRON: &str = "PADRON";
pub const COL_SECCION: &str = "SECCION";

/// Known spellings per canonical column (explicit, not inferred)
const COLUMN_ALIASES: &[(&str, &[&str])] = &[
    (COL_MUNICIPIO, &["MUNICIPIO", "NOMBRE_MUNICIPIO", "MUNICIPIO_NOMBRE"]),
    (COL_TOTAL_VOTOS, &["TOTAL_VOTOS", "VOTACION_TOTAL", "TOTAL_VOTOS_CALCULADOS"]),
    (COL_LISTA_NOMINAL, &["LISTA_NOMINAL", "LISTA_NOMINAL_CASILLA"]),
    (COL_VOTOS_VALIDOS, &["VOTOS_VALIDOS", "VOTACION_VALIDA"]),
    (COL_VOTOS_NULOS, &["VOTOS_NULOS", "NULOS"]),
    (COL_PADRON, &["PADRON", "PADRON_ELECTORAL"]),
    (COL_SECCION, &["SECCION", "ID_SECCION"]),
];

/// Canonical form of a header cell
pub fn canonical_header(raw: &str) -> String {
    let name = normalize_name(raw.trim_start_matches('\u{feff}')).replace(' ', "_");
    for (canonical, aliases) in COLUMN_ALIASES {
        if aliases.contains(&name.as_str()) {
            return canonical.to_string();
        }
    }
    name
}

/// Warnings produced while matching a header row against a schema
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HeaderReport {
    pub missing: Vec<String>,
    pub unknown: Vec<String>,
}

impl HeaderReport {
    pub fn is_clean(&self) -> bool {
        self.missing.is_empty() && self.unknown.is_empty()
    }
}

/// Canonical header name -> column index
#[derive(Debug, Clone)]
struct HeaderIndex {
    columns: HashMap<String, usize>,
    names: Vec<String>,
}

impl HeaderIndex {
    fn new(headers: &StringRecord) -> Self {
        let names: Vec<String> = headers.iter().map(canonical_header).collect();
        let mut columns = HashMap::new();
        for (idx, name) in names.iter().enumerate() {
            // First occurrence wins on duplicated headers
            columns.entry(name.clone()).or_insert(idx);
        }
        Self { columns, names }
    }

    fn get(&self, name: &str) -> Option<usize> {
        self.columns.get(name).copied()
    }

    fn unknown(&self, known: &[&str]) -> Vec<String> {
        self.names
            .iter()
            .filter(|n| !n.is_empty() && !known.contains(&n.as_str()))
            .cloned()
            .collect()
    }
}

fn check_width(line: usize, expected: usize, record: &StringRecord) -> Result<()> {
    if record.len() != expected {
        return Err(ImportError::RowParse {
            line,
            reason: format!("Expected {} fields, found {}", expected, record.len()),
        });
    }
    Ok(())
}

/// Parse a vote/voter count.
///
/// `Ok(None)` for empty cells and `-`, `Err(())` for anything that is not a
/// non-negative whole number. Thousands separators are tolerated.
pub fn parse_count(raw: &str) -> std::result::Result<Option<i64>, ()> {
    let cleaned = raw.trim().replace(',', "");
    if cleaned.is_empty() || cleaned == "-" {
        return Ok(None);
    }
    if let Ok(v) = cleaned.parse::<i64>() {
        return if v >= 0 { Ok(Some(v)) } else { Err(()) };
    }
    match cleaned.parse::<f64>() {
        // `i64::MAX as f64` rounds up to 2^63, which is already out of range
        Ok(f) if f.is_finite() && f >= 0.0 && f < i64::MAX as f64 && f.fract() == 0.0 => {
            Ok(Some(f as i64))
        }
        _ => Err(()),
    }
}

// =============================================================================
// HISTORICAL RESULTS
// =============================================================================

/// Typed view of one results row (year and election type come from the file)
#[derive(Debug, Clone, PartialEq)]
pub struct ResultRecord {
    pub line: usize,
    pub municipality: String,
    /// Parties present in the header, in `PARTY_CODES` order, 0 when empty
    pub votes: Vec<(&'static str, i64)>,
    pub total_votes: Option<i64>,
    pub nominal_list: Option<i64>,
    pub valid_votes: Option<i64>,
    pub null_votes: Option<i64>,
    /// Non-numeric cells that were read as zero / absent
    pub invalid_fields: Vec<String>,
}

impl ResultRecord {
    /// `valid + null == total`, when all three are present
    pub fn totals_consistent(&self) -> Option<bool> {
        match (self.valid_votes, self.null_votes, self.total_votes) {
            (Some(valid), Some(null), Some(total)) => Some(valid + null == total),
            _ => None,
        }
    }
}

/// Column positions of a results file, resolved once from the header
#[derive(Debug, Clone)]
pub struct ResultsLayout {
    municipality: usize,
    parties: Vec<(&'static str, usize)>,
    total_votes: Option<usize>,
    nominal_list: Option<usize>,
    valid_votes: Option<usize>,
    null_votes: Option<usize>,
    width: usize,
    pub report: HeaderReport,
}

impl ResultsLayout {
    pub fn from_headers(headers: &StringRecord) -> Result<Self> {
        let index = HeaderIndex::new(headers);

        let municipality = index.get(COL_MUNICIPIO).ok_or_else(|| {
            ImportError::AmbiguousFormat(format!(
                "No {} column found. Headers: {:?}",
                COL_MUNICIPIO, index.names
            ))
        })?;

        let mut report = HeaderReport::default();
        let mut parties = Vec::new();
        for &party in PARTY_CODES {
            match index.get(party) {
                Some(idx) => parties.push((party, idx)),
                None => report.missing.push(party.to_string()),
            }
        }
        if parties.is_empty() {
            return Err(ImportError::AmbiguousFormat(format!(
                "No party columns found. Expected some of: {}",
                PARTY_CODES.join(", ")
            )));
        }

        let mut optional = |name: &str| {
            let idx = index.get(name);
            if idx.is_none() {
                report.missing.push(name.to_string());
            }
            idx
        };
        let total_votes = optional(COL_TOTAL_VOTOS);
        let nominal_list = optional(COL_LISTA_NOMINAL);
        let valid_votes = optional(COL_VOTOS_VALIDOS);
        let null_votes = optional(COL_VOTOS_NULOS);

        let mut known: Vec<&str> = PARTY_CODES.to_vec();
        known.extend([
            COL_MUNICIPIO,
            COL_TOTAL_VOTOS,
            COL_LISTA_NOMINAL,
            COL_VOTOS_VALIDOS,
            COL_VOTOS_NULOS,
        ]);
        report.unknown = index.unknown(&known);

        Ok(Self {
            municipality,
            parties,
            total_votes,
            nominal_list,
            valid_votes,
            null_votes,
            width: headers.len(),
            report,
        })
    }

    pub fn parties(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.parties.iter().map(|(p, _)| *p)
    }

    /// Validate and type one data row. `line` is 1-based with the header on line 1.
    pub fn record(&self, line: usize, row: &StringRecord) -> Result<ResultRecord> {
        check_width(line, self.width, row)?;

        let mut invalid_fields = Vec::new();
        let mut count_at = |name: &str, idx: Option<usize>| -> Option<i64> {
            let raw = idx.and_then(|i| row.get(i))?;
            match parse_count(raw) {
                Ok(v) => v,
                Err(()) => {
                    invalid_fields.push(format!("{}='{}'", name, raw.trim()));
                    None
                }
            }
        };

        let votes = self
            .parties
            .iter()
            .map(|&(party, idx)| (party, count_at(party, Some(idx)).unwrap_or(0)))
            .collect();
        let total_votes = count_at(COL_TOTAL_VOTOS, self.total_votes);
        let nominal_list = count_at(COL_LISTA_NOMINAL, self.nominal_list);
        let valid_votes = count_at(COL_VOTOS_VALIDOS, self.valid_votes);
        let null_votes = count_at(COL_VOTOS_NULOS, self.null_votes);

        Ok(ResultRecord {
            line,
            municipality: row.get(self.municipality).unwrap_or("").trim().to_string(),
            votes,
            total_votes,
            nominal_list,
            valid_votes,
            null_votes,
            invalid_fields,
        })
    }
}

// =============================================================================
// ELECTORATE
// =============================================================================

/// Typed view of one electorate row (usually one electoral section)
#[derive(Debug, Clone, PartialEq)]
pub struct ElectorateRecord {
    pub line: usize,
    pub municipality: String,
    pub nominal_list: i64,
    pub registered_voters: Option<i64>,
    pub section: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ElectorateLayout {
    municipality: usize,
    nominal_list: usize,
    registered_voters: Option<usize>,
    section: Option<usize>,
    width: usize,
    pub report: HeaderReport,
}

impl ElectorateLayout {
    pub fn from_headers(headers: &StringRecord) -> Result<Self> {
        let index = HeaderIndex::new(headers);

        let required = |name: &str| {
            index.get(name).ok_or_else(|| {
                ImportError::AmbiguousFormat(format!(
                    "No {} column found in electorate file. Headers: {:?}",
                    name, index.names
                ))
            })
        };
        let municipality = required(COL_MUNICIPIO)?;
        let nominal_list = required(COL_LISTA_NOMINAL)?;

        let mut report = HeaderReport::default();
        let registered_voters = index.get(COL_PADRON);
        if registered_voters.is_none() {
            report.missing.push(COL_PADRON.to_string());
        }
        let section = index.get(COL_SECCION);
        if section.is_none() {
            report.missing.push(COL_SECCION.to_string());
        }
        report.unknown =
            index.unknown(&[COL_MUNICIPIO, COL_LISTA_NOMINAL, COL_PADRON, COL_SECCION]);

        Ok(Self {
            municipality,
            nominal_list,
            registered_voters,
            section,
            width: headers.len(),
            report,
        })
    }

    pub fn record(&self, line: usize, row: &StringRecord) -> Result<ElectorateRecord> {
        check_width(line, self.width, row)?;

        let raw_nominal = row.get(self.nominal_list).unwrap_or("");
        let nominal_list = match parse_count(raw_nominal) {
            Ok(Some(v)) => v,
            _ => {
                return Err(ImportError::RowParse {
                    line,
                    reason: format!("Invalid '{}' value '{}'", COL_LISTA_NOMINAL, raw_nominal.trim()),
                })
            }
        };

        let registered_voters = match self.registered_voters.and_then(|i| row.get(i)) {
            Some(raw) => parse_count(raw).map_err(|()| ImportError::RowParse {
                line,
                reason: format!("Invalid '{}' value '{}'", COL_PADRON, raw.trim()),
            })?,
            None => None,
        };

        let section = self
            .section
            .and_then(|i| row.get(i))
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        Ok(ElectorateRecord {
            line,
            municipality: row.get(self.municipality).unwrap_or("").trim().to_string(),
            nominal_list,
            registered_voters,
            section,
        })
    }
}
