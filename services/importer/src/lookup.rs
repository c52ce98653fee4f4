//! In-memory municipality lookup (canonical name -> id)

use crate::model::Municipality;
use crate::normalize::normalize_name;
use std::collections::HashMap;

/// Loaded once per orchestration, extended as the electorate phase creates
/// municipalities. Keys are canonical names.
#[derive(Debug, Clone, Default)]
pub struct MunicipalityIndex {
    ids: HashMap<String, i32>,
}

impl MunicipalityIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_municipalities(rows: &[Municipality]) -> Self {
        let ids = rows.iter().map(|m| (m.name.clone(), m.id)).collect();
        Self { ids }
    }

    /// Look up an already canonical name
    pub fn get(&self, canonical: &str) -> Option<i32> {
        self.ids.get(canonical).copied()
    }

    /// Normalize a raw name and look it up. Empty names never resolve.
    pub fn resolve(&self, raw: &str) -> Option<i32> {
        let canonical = normalize_name(raw);
        if canonical.is_empty() {
            return None;
        }
        self.get(&canonical)
    }

    pub fn insert(&mut self, canonical: String, id: i32) {
        self.ids.insert(canonical, id);
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn municipality(id: i32, name: &str) -> Municipality {
        Municipality {
            id,
            name: normalize_name(name),
            display_name: name.to_string(),
            state: "Guerrero".to_string(),
        }
    }

    #[test]
    fn test_resolve_is_case_and_accent_insensitive() {
        let index = MunicipalityIndex::from_municipalities(&[
            municipality(1, "Acapulco de Juárez"),
            municipality(2, "Chilpancingo de los Bravo"),
        ]);
        assert_eq!(index.resolve("ACAPULCO DE JUAREZ"), Some(1));
        assert_eq!(index.resolve("  acapulco   de juárez "), Some(1));
        assert_eq!(index.resolve("Chilpancingo de los Bravo"), Some(2));
        assert_eq!(index.resolve("Chilpancingo"), None);
    }

    #[test]
    fn test_empty_name_never_resolves() {
        let mut index = MunicipalityIndex::new();
        index.insert(String::new(), 9);
        assert_eq!(index.resolve("   "), None);
    }

    #[test]
    fn test_insert_extends_index() {
        let mut index = MunicipalityIndex::new();
        assert!(index.is_empty());
        index.insert(normalize_name("Tixtla de Guerrero"), 7);
        assert_eq!(index.len(), 1);
        assert_eq!(index.resolve("TIXTLA DE GUERRERO"), Some(7));
    }
}
