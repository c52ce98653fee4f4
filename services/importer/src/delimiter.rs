//! CSV dialect detection from a header line

/// Candidate delimiters, in tie-break priority order
pub const DELIMITER_CANDIDATES: [u8; 4] = [b'|', b'\t', b',', b';'];

/// Pick the delimiter that occurs most often in `line`.
///
/// Ties resolve to the earliest candidate in [`DELIMITER_CANDIDATES`].
/// Returns `None` when no candidate occurs at all; callers treat that as an
/// ambiguous format instead of assuming a single-column file.
pub fn detect_delimiter(line: &str) -> Option<u8> {
    let mut best: Option<(u8, usize)> = None;

    for &candidate in &DELIMITER_CANDIDATES {
        let count = line.bytes().filter(|&b| b == candidate).count();
        if count == 0 {
            continue;
        }
        match best {
            Some((_, best_count)) if count <= best_count => {}
            _ => best = Some((candidate, count)),
        }
    }

    best.map(|(delimiter, _)| delimiter)
}

/// Printable name for log lines
pub fn delimiter_name(delimiter: u8) -> &'static str {
    match delimiter {
        b'|' => "pipe",
        b'\t' => "tab",
        b',' => "comma",
        b';' => "semicolon",
        _ => "other",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_candidate() {
        assert_eq!(detect_delimiter("A|B|C"), Some(b'|'));
        assert_eq!(detect_delimiter("A,B,C"), Some(b','));
        assert_eq!(detect_delimiter("A;B;C"), Some(b';'));
        assert_eq!(detect_delimiter("A\tB\tC"), Some(b'\t'));
    }

    #[test]
    fn test_highest_count_wins() {
        assert_eq!(detect_delimiter("A;B|C|D"), Some(b'|'));
        assert_eq!(detect_delimiter("MUNICIPIO;PAN;PRI;NOTA, OBS"), Some(b';'));
    }

    #[test]
    fn test_tie_goes_to_priority_order() {
        assert_eq!(detect_delimiter("A,B;C"), Some(b','));
        assert_eq!(detect_delimiter("A|B,C"), Some(b'|'));
        assert_eq!(detect_delimiter("A\tB|C"), Some(b'|'));
    }

    #[test]
    fn test_no_candidate_is_ambiguous() {
        assert_eq!(detect_delimiter("MUNICIPIO"), None);
        assert_eq!(detect_delimiter(""), None);
    }

    #[test]
    fn test_delimiter_names() {
        assert_eq!(delimiter_name(b'|'), "pipe");
        assert_eq!(delimiter_name(b'\t'), "tab");
        assert_eq!(delimiter_name(b','), "comma");
        assert_eq!(delimiter_name(b';'), "semicolon");
    }
}
