//! Text normalization shared by extraction, signatures and the rule store.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref WHITESPACE: Regex = Regex::new(r"\s+").unwrap();
    static ref EMAIL: Regex =
        Regex::new(r"(?i)^[A-Z0-9._%+-]+@[A-Z0-9.-]+\.[A-Z]{2,}$").unwrap();
    static ref PHONE: Regex = Regex::new(r"^\+?\d[\d\s\-()]{6,}\d$").unwrap();
    static ref NON_DIGIT: Regex = Regex::new(r"\D+").unwrap();
    static ref DATE_LIKE: Regex =
        Regex::new(r"^\d{1,4}[-/.]\d{1,2}[-/.]\d{1,4}$").unwrap();
    static ref IDENTIFIER: Regex = Regex::new(r"^[A-Z][A-Z0-9_]*$").unwrap();
}

/// Lower-cased question text with collapsed whitespace. Used as the
/// `question_norm` key of the rule store and for pattern predicates.
pub fn normalize_question(text: &str) -> String {
    collapse_whitespace(text).to_lowercase()
}

pub fn collapse_whitespace(text: &str) -> String {
    WHITESPACE.replace_all(text.trim(), " ").to_string()
}

pub fn is_email(value: &str) -> bool {
    EMAIL.is_match(value.trim())
}

pub fn is_phone(value: &str) -> bool {
    let v = value.trim();
    !DATE_LIKE.is_match(v)
        && PHONE.is_match(v)
        && v.chars().filter(|c| c.is_ascii_digit()).count() >= 7
}

/// Canonical form of a filter value for signatures and merges:
/// emails lower-cased, phones reduced to digits, everything else trimmed,
/// whitespace-collapsed and case-folded.
pub fn normalize_value(value: &str) -> String {
    let v = value.trim();
    if v.is_empty() {
        return String::new();
    }
    if is_email(v) {
        return v.to_lowercase();
    }
    if is_phone(v) {
        return NON_DIGIT.replace_all(v, "").to_string();
    }
    collapse_whitespace(v).to_lowercase()
}

/// `owner department` / `owner-department` / ` OWNER_DEPARTMENT ` all become
/// `OWNER_DEPARTMENT`.
pub fn canonical_column(raw: &str) -> String {
    let cleaned = raw.trim().trim_matches('"');
    collapse_whitespace(cleaned)
        .replace(['-', ' '], "_")
        .to_uppercase()
}

/// A bare `and`/`or` left over where a value was expected
pub fn is_connector(value: &str) -> bool {
    let v = value.trim();
    v.eq_ignore_ascii_case("and") || v.eq_ignore_ascii_case("or") || v == "&" || v == "|"
}

/// Identifiers that may be spliced into SQL text.
pub fn is_safe_identifier(name: &str) -> bool {
    IDENTIFIER.is_match(name)
}

/// Strip matching quotes and trailing punctuation from a literal.
pub fn clean_literal(raw: &str) -> String {
    let mut v = raw.trim().trim_end_matches(['.', ',', ';', '?', '!']).trim();
    if v.len() >= 2 {
        let first = v.chars().next();
        let last = v.chars().last();
        if first == last && matches!(first, Some('"') | Some('\'')) {
            v = &v[1..v.len() - 1];
        }
    }
    v.trim().to_string()
}

/// Order-preserving, case-insensitive de-duplication.
pub fn dedup_ci<I, S>(values: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for v in values {
        let v = v.as_ref().trim();
        if v.is_empty() {
            continue;
        }
        if seen.insert(v.to_lowercase()) {
            out.push(v.to_string());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_value_kinds() {
        assert_eq!(normalize_value("  Home   Care "), "home care");
        assert_eq!(normalize_value("John.Doe@Example.COM"), "john.doe@example.com");
        assert_eq!(normalize_value("+966 55-123 4567"), "966551234567");
        assert_eq!(normalize_value("   "), "");
    }

    #[test]
    fn test_canonical_column() {
        assert_eq!(canonical_column("owner department"), "OWNER_DEPARTMENT");
        assert_eq!(canonical_column(" request-type "), "REQUEST_TYPE");
        assert_eq!(canonical_column("\"ENTITY\""), "ENTITY");
    }

    #[test]
    fn test_is_connector() {
        assert!(is_connector(" OR "));
        assert!(is_connector("and"));
        assert!(!is_connector("Oracle"));
    }

    #[test]
    fn test_clean_literal() {
        assert_eq!(clean_literal("'Renewal';"), "Renewal");
        assert_eq!(clean_literal("\"IT dept\"."), "IT dept");
        assert_eq!(clean_literal("x"), "x");
    }

    #[test]
    fn test_dedup_ci_preserves_first_spelling() {
        let out = dedup_ci(vec!["Alice", "alice ", "Bob", "ALICE", ""]);
        assert_eq!(out, vec!["Alice".to_string(), "Bob".to_string()]);
    }

    #[test]
    fn test_email_and_phone_detection() {
        assert!(is_email("a.b@corp.io"));
        assert!(!is_email("not an email"));
        assert!(is_phone("0551234567"));
        assert!(!is_phone("2024"));
        assert!(!is_phone("12-10"));
        assert!(!is_phone("2023-01-31"));
    }

    #[test]
    fn test_safe_identifier() {
        assert!(is_safe_identifier("CONTRACT_STAKEHOLDER_1"));
        assert!(!is_safe_identifier("X; DROP TABLE"));
        assert!(!is_safe_identifier("lower"));
    }
}
