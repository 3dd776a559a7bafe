//! Line classification and record construction.
//!
//! Each source line is either a [`Record`], a malformed line that the loader
//! counts and skips, or a fatal error that stops the run. The caller decides
//! what to do with each outcome; nothing here touches the database.
//!
//! The dot-key check guards against a data quirk in large GloVe-style dumps
//! where a run of separator characters ends up in the key position. It is
//! kept exactly as observed: any key starting with `.` is rejected.

use crate::error::{LineError, LookupError, MalformedReason};

/// One (key, vector) row ready for insertion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub key: String,
    /// Bracketed, `", "`-separated literal, e.g. `[1.0, 2.0]`.
    pub vector: String,
}

impl Record {
    /// Build a record from already-split tokens; the first token is the key.
    fn from_tokens(tokens: &[&str]) -> Result<Self, LineError> {
        let Some((key, components)) = tokens.split_first() else {
            return Err(LineError::Malformed(MalformedReason::TokenCount {
                expected: 2,
                found: 0,
            }));
        };
        if tokens.iter().any(|token| token.contains('\0')) {
            return Err(LineError::NulByte);
        }

        Ok(Self {
            key: key.to_string(),
            vector: format!("[{}]", components.join(", ")),
        })
    }
}

/// Classify a line, returning a record when it has the expected shape.
///
/// A line is malformed when its key starts with `.` or when it does not have
/// exactly `dimensions + 1` whitespace-separated tokens. An empty line has no
/// tokens and is malformed too.
pub fn parse_line(line: &str, dimensions: usize) -> Result<Record, LineError> {
    let tokens: Vec<&str> = line.split_whitespace().collect();

    if let Some(first) = tokens.first() {
        if *first == "." || first.starts_with('.') {
            return Err(LineError::Malformed(MalformedReason::DotKey));
        }
    }

    // Saturates for absurd dimensionalities; no line can reach usize::MAX tokens.
    let expected = dimensions.saturating_add(1);
    if tokens.len() != expected {
        return Err(LineError::Malformed(MalformedReason::TokenCount {
            expected,
            found: tokens.len(),
        }));
    }

    Record::from_tokens(&tokens)
}

/// Parse a pgvector text literal such as `"[0.1, 0.2, 0.3]"`.
pub fn parse_pgvector(text: &str) -> Result<Vec<f32>, LookupError> {
    let trimmed = text.trim();
    let inner = trimmed
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .ok_or_else(|| LookupError::InvalidVector(text.to_string()))?;

    if inner.trim().is_empty() {
        return Ok(Vec::new());
    }

    inner
        .split(',')
        .map(|component| {
            component
                .trim()
                .parse::<f32>()
                .map_err(|_| LookupError::InvalidVector(text.to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_bracketed_vector_from_remaining_tokens() {
        let record = parse_line("cat 1.0 2.0\n", 2).expect("well-formed line");
        assert_eq!(record.key, "cat");
        assert_eq!(record.vector, "[1.0, 2.0]");
    }

    #[test]
    fn tolerates_mixed_whitespace_and_crlf() {
        let record = parse_line("dog\t3.0   -4.5e-2\r\n", 2).expect("well-formed line");
        assert_eq!(record.key, "dog");
        assert_eq!(record.vector, "[3.0, -4.5e-2]");
    }

    #[test]
    fn components_are_kept_verbatim() {
        let record = parse_line("x 0.000 1e10 -0", 3).expect("well-formed line");
        assert_eq!(record.vector, "[0.000, 1e10, -0]");
    }

    #[test]
    fn dot_keys_are_malformed() {
        for line in [". 0.0 0.0", ".. 0.0 0.0", ".hidden 1.0 2.0"] {
            assert_eq!(
                parse_line(line, 2),
                Err(LineError::Malformed(MalformedReason::DotKey)),
                "line {line:?}"
            );
        }
    }

    #[test]
    fn dots_inside_the_key_are_fine() {
        let record = parse_line("e.g. 1.0 2.0", 2).expect("well-formed line");
        assert_eq!(record.key, "e.g.");
    }

    #[test]
    fn wrong_token_count_is_malformed() {
        assert_eq!(
            parse_line("cat 1.0", 2),
            Err(LineError::Malformed(MalformedReason::TokenCount {
                expected: 3,
                found: 2
            }))
        );
        // Multi-word keys such as "New York" shift the count.
        assert_eq!(
            parse_line("New York 1.0 2.0", 2),
            Err(LineError::Malformed(MalformedReason::TokenCount {
                expected: 3,
                found: 4
            }))
        );
    }

    #[test]
    fn empty_and_blank_lines_are_malformed() {
        for line in ["", "\n", "   \t  "] {
            let err = parse_line(line, 2).expect_err("blank line");
            assert!(!err.is_fatal());
        }
    }

    #[test]
    fn maximal_dimensionality_never_matches() {
        for line in ["", "cat 1.0 2.0"] {
            let err = parse_line(line, usize::MAX).expect_err("cannot match");
            assert!(matches!(
                err,
                LineError::Malformed(MalformedReason::TokenCount {
                    expected: usize::MAX,
                    ..
                })
            ));
        }
    }

    #[test]
    fn nul_in_token_is_fatal() {
        let err = parse_line("ca\0t 1.0 2.0", 2).expect_err("NUL byte");
        assert_eq!(err, LineError::NulByte);
        assert!(err.is_fatal());
    }

    #[test]
    fn parses_pgvector_text() {
        let vector = parse_pgvector(" [0.5, -1, 2.25] ").expect("valid literal");
        assert_eq!(vector, vec![0.5, -1.0, 2.25]);
        assert!(parse_pgvector("[]").expect("empty literal").is_empty());
    }

    #[test]
    fn rejects_invalid_pgvector_text() {
        assert!(parse_pgvector("0.5, 1.0").is_err());
        assert!(parse_pgvector("[0.5, abc]").is_err());
    }
}
