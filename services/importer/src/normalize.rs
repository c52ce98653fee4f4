//! Canonical municipality names
//!
//! Names arrive from several CSV sources with different casing, accents and
//! spacing ("Acapulco de Juárez", "ACAPULCO DE JUAREZ ", "acapulco  de juarez").
//! All of them must meet on a single join key.

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Uppercase, strip diacritics (NFD minus combining marks), trim and
/// collapse internal whitespace to single spaces.
///
/// Total: never fails, empty input yields an empty string. Matching on the
/// result is exact; a name that differs in some other special character
/// simply does not match.
pub fn normalize_name(raw: &str) -> String {
    let stripped: String = raw
        .to_uppercase()
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .collect();

    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Same as [`normalize_name`] for optional values; `None` yields `""`.
pub fn normalize_opt(raw: Option<&str>) -> String {
    raw.map(normalize_name).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_and_accent_insensitive() {
        assert_eq!(normalize_name("Álvarez"), normalize_name("ALVAREZ"));
        assert_eq!(normalize_name("Álvarez"), "ALVAREZ");
    }

    #[test]
    fn test_whitespace_collapsed_and_trimmed() {
        assert_eq!(
            normalize_name("  Acapulco   de\tJuárez \n"),
            "ACAPULCO DE JUAREZ"
        );
    }

    #[test]
    fn test_enie_loses_tilde() {
        assert_eq!(normalize_name("Cuajinicuilapa de Peña"), "CUAJINICUILAPA DE PENA");
    }

    #[test]
    fn test_empty_and_blank() {
        assert_eq!(normalize_name(""), "");
        assert_eq!(normalize_name("   "), "");
        assert_eq!(normalize_opt(None), "");
        assert_eq!(normalize_opt(Some(" tixtla ")), "TIXTLA");
    }

    #[test]
    fn test_idempotent() {
        let samples = [
            "Chilpancingo de los Bravo",
            "  Zihuatanejo   de Azueta ",
            "José Joaquín de Herrera",
            "Tlacoachistlahuaca",
            "Ñuu Savi",
            "ǰ ẖ ǅ",
            "",
        ];
        for s in samples {
            let once = normalize_name(s);
            assert_eq!(normalize_name(&once), once, "not idempotent for {:?}", s);
        }
    }

    #[test]
    fn test_precomposed_and_decomposed_match() {
        // "é" as one code point vs "e" + combining acute
        assert_eq!(normalize_name("Juárez"), normalize_name("Jua\u{0301}rez"));
    }

    #[test]
    fn test_unhandled_punctuation_is_kept() {
        // Not fuzzy: a hyphen keeps the names apart
        assert_ne!(normalize_name("Ixcateopan-Cuauhtémoc"), normalize_name("Ixcateopan Cuauhtémoc"));
    }
}
