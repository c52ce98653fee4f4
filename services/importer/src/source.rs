//! Source files: reading, decoding, dialect detection and the import plan

use crate::delimiter::{delimiter_name, detect_delimiter};
use crate::error::{ImportError, Result};
use crate::model::ElectionType;
use encoding_rs::{Encoding, UTF_8, WINDOWS_1252};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};

/// Default electorate file name inside the data directory
pub const ELECTORATE_FILE_NAME: &str = "electorado.csv";

/// Raw file content, decoded to text
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub path: PathBuf,
    pub content: String,
    pub content_hash: String,
    pub encoding: &'static str,
    pub size_bytes: usize,
}

/// Read and decode a source file. A missing file is `SourceNotFound`.
pub async fn read_source(path: &Path) -> Result<SourceFile> {
    let bytes = match fs::read(path).await {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ImportError::SourceNotFound(path.to_path_buf()))
        }
        Err(e) => return Err(e.into()),
    };

    let (content, encoding) = decode(&bytes);
    Ok(SourceFile {
        path: path.to_path_buf(),
        content,
        content_hash: content_hash(&bytes),
        encoding,
        size_bytes: bytes.len(),
    })
}

/// Decode as UTF-8, falling back to Windows-1252 (common in INE/IEPC
/// exports). A byte-order mark decides the encoding when present and is
/// never part of the returned text.
pub fn decode(bytes: &[u8]) -> (String, &'static str) {
    if let Some((encoding, bom_len)) = Encoding::for_bom(bytes) {
        let (text, _) = encoding.decode_without_bom_handling(&bytes[bom_len..]);
        return (text.into_owned(), encoding.name());
    }
    match UTF_8.decode_without_bom_handling_and_without_replacement(bytes) {
        Some(text) => (text.into_owned(), UTF_8.name()),
        None => {
            let (text, _) = WINDOWS_1252.decode_without_bom_handling(bytes);
            (text.into_owned(), WINDOWS_1252.name())
        }
    }
}

pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("sha256:{:x}", hasher.finalize())
}

/// CSV reader over `content` using the delimiter detected on its first line
pub fn csv_reader(content: &str) -> Result<(csv::Reader<&[u8]>, u8)> {
    let header_line = content.lines().next().unwrap_or("");
    let delimiter = detect_delimiter(header_line).ok_or_else(|| {
        ImportError::AmbiguousFormat(format!(
            "No delimiter (| tab , ;) found in header line '{}'",
            header_line.chars().take(80).collect::<String>()
        ))
    })?;
    debug!("Detected {} delimiter", delimiter_name(delimiter));

    let reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true) // width is checked per row by the schema
        .trim(csv::Trim::All)
        .from_reader(content.as_bytes());

    Ok((reader, delimiter))
}

/// `{electionType}{year}.csv`, e.g. `municipal2021.csv`, `gubernatura_2015.csv`
pub fn parse_results_file_name(file_name: &str) -> Option<(ElectionType, i32)> {
    let lower = file_name.to_lowercase();
    let stem = lower.strip_suffix(".csv")?;
    if stem.len() < 5 || !stem.is_char_boundary(stem.len() - 4) {
        return None;
    }

    let (prefix, year_str) = stem.split_at(stem.len() - 4);
    if !year_str.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let year: i32 = year_str.parse().ok()?;
    if !(1900..=2100).contains(&year) {
        return None;
    }

    let election_type = ElectionType::from_slug(prefix.trim_end_matches(['_', '-', ' ']))?;
    Some((election_type, year))
}

// =============================================================================
// IMPORT PLAN
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultsSource {
    pub election_type: ElectionType,
    pub year: i32,
    pub path: PathBuf,
}

/// Files to import, in order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportPlan {
    #[serde(default)]
    pub state: Option<String>,
    pub electorate: PathBuf,
    #[serde(default)]
    pub results: Vec<ResultsSource>,
}

impl ImportPlan {
    /// Results in (year, type) order so re-runs process files identically
    pub fn sort(&mut self) {
        self.results
            .sort_by(|a, b| (a.year, a.election_type).cmp(&(b.year, b.election_type)));
    }

    /// Keep only the requested years / types (empty filter keeps all)
    pub fn retain(&mut self, years: &[i32], types: &[ElectionType]) {
        self.results.retain(|r| {
            (years.is_empty() || years.contains(&r.year))
                && (types.is_empty() || types.contains(&r.election_type))
        });
    }

    /// Every planned path, electorate first
    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        std::iter::once(self.electorate.as_path()).chain(self.results.iter().map(|r| r.path.as_path()))
    }

    /// Fails with `SourceNotFound` on the first planned file that is missing
    pub async fn preflight(&self) -> Result<()> {
        for path in self.paths() {
            if !fs::try_exists(path).await.unwrap_or(false) {
                return Err(ImportError::SourceNotFound(path.to_path_buf()));
            }
        }
        Ok(())
    }
}

/// Load an explicit plan from JSON. Relative paths are taken relative to
/// the plan file's directory.
pub async fn load_plan(path: &Path) -> Result<ImportPlan> {
    let content = match fs::read_to_string(path).await {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ImportError::SourceNotFound(path.to_path_buf()))
        }
        Err(e) => return Err(e.into()),
    };
    let mut plan: ImportPlan =
        serde_json::from_str(&content).map_err(|e| ImportError::Plan(e.to_string()))?;

    let base = path.parent().unwrap_or_else(|| Path::new("."));
    if plan.electorate.is_relative() {
        plan.electorate = base.join(&plan.electorate);
    }
    for source in &mut plan.results {
        if source.path.is_relative() {
            source.path = base.join(&source.path);
        }
    }
    plan.sort();
    Ok(plan)
}

/// Build a plan from a data directory: `electorado.csv` plus every file
/// named `{electionType}{year}.csv`. Other files are ignored with a warning.
pub async fn discover_plan(data_dir: &Path) -> Result<ImportPlan> {
    let mut entries = match fs::read_dir(data_dir).await {
        Ok(e) => e,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ImportError::SourceNotFound(data_dir.to_path_buf()))
        }
        Err(e) => return Err(e.into()),
    };

    let mut results = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let file_name = entry.file_name().to_string_lossy().to_string();
        if file_name.eq_ignore_ascii_case(ELECTORATE_FILE_NAME) {
            continue;
        }
        match parse_results_file_name(&file_name) {
            Some((election_type, year)) => results.push(ResultsSource {
                election_type,
                year,
                path: entry.path(),
            }),
            None if file_name.to_lowercase().ends_with(".csv") => {
                warn!("Ignoring {}: not named {{electionType}}{{year}}.csv", file_name)
            }
            None => {}
        }
    }

    let mut plan = ImportPlan {
        state: None,
        electorate: data_dir.join(ELECTORATE_FILE_NAME),
        results,
    };
    plan.sort();
    info!(
        "Discovered {} results file(s) in {}",
        plan.results.len(),
        data_dir.display()
    );
    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;

    // -------------------------------------------------------------------------
    // DECODING
    // -------------------------------------------------------------------------

    #[test]
    fn test_decode_utf8() {
        let (text, encoding) = decode("MUNICIPIO\nAcapulco de Juárez\n".as_bytes());
        assert_eq!(text, "MUNICIPIO\nAcapulco de Juárez\n");
        assert_eq!(encoding, "UTF-8");
    }

    #[test]
    fn test_decode_strips_bom() {
        let mut bytes = vec![0xEF, 0xBB, 0xBF];
        bytes.extend_from_slice(b"MUNICIPIO|PAN\n");
        let (text, encoding) = decode(&bytes);
        assert_eq!(text, "MUNICIPIO|PAN\n");
        assert_eq!(encoding, "UTF-8");
    }

    #[test]
    fn test_decode_windows_1252_fallback() {
        // "Juárez" with á as 0xE1
        let bytes = b"Ju\xe1rez";
        let (text, encoding) = decode(bytes);
        assert_eq!(text, "Juárez");
        assert_eq!(encoding, "windows-1252");
    }

    #[test]
    fn test_content_hash_format() {
        let hash = content_hash(b"abc");
        assert_eq!(
            hash,
            "sha256:ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    // -------------------------------------------------------------------------
    // CSV DIALECT
    // -------------------------------------------------------------------------

    #[test]
    fn test_csv_reader_uses_detected_delimiter() {
        let content = "MUNICIPIO|PAN|PRI\nTaxco|1|2\n";
        let (mut reader, delimiter) = csv_reader(content).unwrap();
        assert_eq!(delimiter, b'|');
        let headers = reader.headers().unwrap().clone();
        assert_eq!(headers.len(), 3);
        let first = reader.records().next().unwrap().unwrap();
        assert_eq!(&first[0], "Taxco");
    }

    #[test]
    fn test_csv_reader_single_column_is_ambiguous() {
        let result = csv_reader("MUNICIPIO\nTaxco\n");
        assert!(matches!(result, Err(ImportError::AmbiguousFormat(_))));
    }

    // -------------------------------------------------------------------------
    // FILE NAMES
    // -------------------------------------------------------------------------

    #[test]
    fn test_parse_results_file_name() {
        assert_eq!(
            parse_results_file_name("municipal2021.csv"),
            Some((ElectionType::Municipal, 2021))
        );
        assert_eq!(
            parse_results_file_name("Ayuntamientos_2018.CSV"),
            Some((ElectionType::Municipal, 2018))
        );
        assert_eq!(
            parse_results_file_name("diputados-2015.csv"),
            Some((ElectionType::StateLegislature, 2015))
        );
        assert_eq!(
            parse_results_file_name("gubernatura2021.csv"),
            Some((ElectionType::Governor, 2021))
        );
    }

    #[test]
    fn test_parse_results_file_name_rejects_others() {
        assert_eq!(parse_results_file_name("electorado.csv"), None);
        assert_eq!(parse_results_file_name("municipal2021.xlsx"), None);
        assert_eq!(parse_results_file_name("senado2018.csv"), None);
        assert_eq!(parse_results_file_name("municipal21.csv"), None);
        assert_eq!(parse_results_file_name("2021.csv"), None);
    }

    // -------------------------------------------------------------------------
    // PLAN
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_discover_plan_orders_and_filters() {
        let dir = tempfile::tempdir().unwrap();
        for name in [
            "electorado.csv",
            "gubernatura2021.csv",
            "municipal2021.csv",
            "municipal2018.csv",
            "notas.csv",
            "README.txt",
        ] {
            std::fs::write(dir.path().join(name), "MUNICIPIO,PAN\n").unwrap();
        }

        let plan = discover_plan(dir.path()).await.unwrap();
        assert_eq!(plan.electorate, dir.path().join("electorado.csv"));
        let order: Vec<(i32, ElectionType)> =
            plan.results.iter().map(|r| (r.year, r.election_type)).collect();
        assert_eq!(
            order,
            vec![
                (2018, ElectionType::Municipal),
                (2021, ElectionType::Municipal),
                (2021, ElectionType::Governor),
            ]
        );
        plan.preflight().await.unwrap();
    }

    #[tokio::test]
    async fn test_discover_plan_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("no-such-dir");
        assert!(matches!(
            discover_plan(&missing).await,
            Err(ImportError::SourceNotFound(p)) if p == missing
        ));
    }

    #[tokio::test]
    async fn test_preflight_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("electorado.csv"), "MUNICIPIO,LISTA_NOMINAL\n").unwrap();
        let plan = ImportPlan {
            state: None,
            electorate: dir.path().join("electorado.csv"),
            results: vec![ResultsSource {
                election_type: ElectionType::Municipal,
                year: 2021,
                path: dir.path().join("municipal2021.csv"),
            }],
        };
        match plan.preflight().await {
            Err(ImportError::SourceNotFound(p)) => assert!(p.ends_with("municipal2021.csv")),
            other => panic!("expected SourceNotFound, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_load_plan_resolves_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        let plan_path = dir.path().join("plan.json");
        std::fs::write(
            &plan_path,
            r#"{
                "state": "Guerrero",
                "electorate": "electorado.csv",
                "results": [
                    { "election_type": "governor", "year": 2021, "path": "g2021.csv" },
                    { "election_type": "municipal", "year": 2015, "path": "/abs/m2015.csv" }
                ]
            }"#,
        )
        .unwrap();

        let plan = load_plan(&plan_path).await.unwrap();
        assert_eq!(plan.state.as_deref(), Some("Guerrero"));
        assert_eq!(plan.electorate, dir.path().join("electorado.csv"));
        assert_eq!(plan.results[0].year, 2015);
        assert_eq!(plan.results[0].path, PathBuf::from("/abs/m2015.csv"));
        assert_eq!(plan.results[1].path, dir.path().join("g2021.csv"));
    }

    #[tokio::test]
    async fn test_load_plan_invalid_json() {
        let dir = tempfile::tempdir().unwrap();
        let plan_path = dir.path().join("plan.json");
        std::fs::write(&plan_path, "{ \"results\": 3 }").unwrap();
        assert!(matches!(load_plan(&plan_path).await, Err(ImportError::Plan(_))));
    }

    #[test]
    fn test_plan_retain() {
        let source = |t: ElectionType, y: i32| ResultsSource {
            election_type: t,
            year: y,
            path: PathBuf::from(format!("{}{}.csv", t, y)),
        };
        let mut plan = ImportPlan {
            state: None,
            electorate: PathBuf::from("electorado.csv"),
            results: vec![
                source(ElectionType::Municipal, 2018),
                source(ElectionType::Municipal, 2021),
                source(ElectionType::Governor, 2021),
            ],
        };
        plan.retain(&[2021], &[]);
        assert_eq!(plan.results.len(), 2);
        plan.retain(&[], &[ElectionType::Governor]);
        assert_eq!(plan.results.len(), 1);
        assert_eq!(plan.paths().count(), 2);
    }
}
