//! Domain types shared by the import phases

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Party columns recognized in historical results files.
/// `NA` (Nueva Alianza) only appears in some years.
pub const PARTY_CODES: &[&str] = &["PAN", "PRI", "PRD", "PVEM", "PT", "MC", "MORENA", "NA"];

/// Classification of a contest, used to partition historical results
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElectionType {
    /// Ayuntamientos (municipal councils)
    Municipal,
    /// Diputaciones locales
    StateLegislature,
    /// Gubernatura
    Governor,
}

impl ElectionType {
    pub const ALL: [ElectionType; 3] = [
        ElectionType::Municipal,
        ElectionType::StateLegislature,
        ElectionType::Governor,
    ];

    /// Value stored in `historical_results.election_type`
    pub fn as_str(&self) -> &'static str {
        match self {
            ElectionType::Municipal => "municipal",
            ElectionType::StateLegislature => "state_legislature",
            ElectionType::Governor => "governor",
        }
    }

    /// Accepts the stored slug plus the Spanish names used in file names
    pub fn from_slug(slug: &str) -> Option<Self> {
        match slug.trim().to_lowercase().replace('-', "_").as_str() {
            "municipal" | "ayuntamiento" | "ayuntamientos" => Some(ElectionType::Municipal),
            "state_legislature" | "statelegislature" | "diputado" | "diputados"
            | "diputaciones" => Some(ElectionType::StateLegislature),
            "governor" | "gobernador" | "gubernatura" => Some(ElectionType::Governor),
            _ => None,
        }
    }
}

impl fmt::Display for ElectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ElectionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ElectionType::from_slug(s).ok_or_else(|| format!("unknown election type '{}'", s))
    }
}

/// Row of the `municipalities` table
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct Municipality {
    pub id: i32,
    /// Canonical (normalized) name, the join key
    pub name: String,
    pub display_name: String,
    pub state: String,
}

/// One accumulator bucket within a single file's import pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AggregationKey {
    pub municipality_id: i32,
    pub party: &'static str,
}

/// Row of the `historical_results` table, written once per bucket
#[derive(Debug, Clone, PartialEq)]
pub struct HistoricalResult {
    pub municipality_id: i32,
    pub election_year: i32,
    pub election_type: ElectionType,
    pub party: String,
    pub votes: i64,
    pub percentage: f64,
    pub turnout_percentage: f64,
}
