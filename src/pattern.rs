//! Literal or regex patterns shared by the `Replace` normalizer and the
//! `Split` pre-tokenizer.

use fancy_regex::Regex;

use crate::error::Result;

/// A compiled search pattern.
#[derive(Debug, Clone)]
pub enum Pattern {
    Literal(String),
    Regex(Regex),
}

impl Pattern {
    /// Compiles `pattern` with `fancy_regex`.
    ///
    /// # Errors
    ///
    /// Returns [`TokenizerError::Regex`](crate::TokenizerError::Regex) if the
    /// pattern fails to compile.
    pub fn regex(pattern: &str) -> Result<Self> {
        Ok(Self::Regex(Regex::new(pattern)?))
    }

    pub fn literal(pattern: impl Into<String>) -> Self {
        Self::Literal(pattern.into())
    }

    /// Byte ranges of every non-empty, non-overlapping match in `text`.
    ///
    /// # Errors
    ///
    /// Returns [`TokenizerError::Regex`](crate::TokenizerError::Regex) if the
    /// regex engine fails while matching (e.g. backtracking limit exceeded).
    pub fn find_matches(&self, text: &str) -> Result<Vec<(usize, usize)>> {
        match self {
            Self::Literal(literal) => {
                if literal.is_empty() {
                    return Ok(Vec::new());
                }
                Ok(text
                    .match_indices(literal.as_str())
                    .map(|(start, m)| (start, start + m.len()))
                    .collect())
            }
            Self::Regex(regex) => {
                let mut matches = Vec::new();
                for m in regex.find_iter(text) {
                    let m = m?;
                    if m.start() < m.end() {
                        matches.push((m.start(), m.end()));
                    }
                }
                Ok(matches)
            }
        }
    }

    /// Cuts `text` into consecutive pieces, flagging which ones are matches.
    ///
    /// The pieces cover `text` exactly, in order.
    pub(crate) fn split_pieces(&self, text: &str) -> Result<Vec<((usize, usize), bool)>> {
        let mut pieces = Vec::new();
        let mut cursor = 0;

        for (start, end) in self.find_matches(text)? {
            if start > cursor {
                pieces.push(((cursor, start), false));
            }
            pieces.push(((start, end), true));
            cursor = end;
        }
        if cursor < text.len() {
            pieces.push(((cursor, text.len()), false));
        }

        Ok(pieces)
    }
}
