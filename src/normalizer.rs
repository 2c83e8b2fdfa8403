//! Text normalizers applied to pending splits before pre-tokenization.

use crate::{error::Result, pattern::Pattern, pretokenized::NormalizedString, types::Offsets};

/// A normalization strategy, compiled once from its config form.
#[derive(Debug, Clone)]
pub enum Normalizer {
    Lowercase,
    /// Trims whitespace from the chosen ends.
    Strip { left: bool, right: bool },
    /// Replaces every match of `pattern` with `content`.
    Replace { pattern: Pattern, content: String },
    /// Prepends a fixed string to non-empty text, aligned to its first char.
    Prepend(String),
    /// Applies each normalizer in order.
    Sequence(Vec<Normalizer>),
}

impl Normalizer {
    /// Returns `ns` with this strategy applied to its normalized text.
    ///
    /// # Errors
    ///
    /// Only `Replace` with a regex pattern can fail, when the regex engine
    /// errors while matching.
    pub fn normalize(&self, ns: &NormalizedString) -> Result<NormalizedString> {
        match self {
            Self::Lowercase => Ok(ns.map_chars(char::to_lowercase)),
            Self::Strip { left, right } => {
                let text = ns.get();
                let start = if *left {
                    text.len() - text.trim_start().len()
                } else {
                    0
                };
                let end = if *right { text.trim_end().len() } else { text.len() };
                Ok(ns.transform(
                    text.char_indices()
                        .zip(ns.alignments().iter().copied())
                        .filter(|((i, _), _)| (start..end.max(start)).contains(i))
                        .map(|((_, c), a)| (c, a)),
                ))
            }
            Self::Replace { pattern, content } => {
                let text = ns.get();
                let mut chars = text
                    .char_indices()
                    .zip(ns.alignments().iter().copied())
                    .peekable();
                let mut out = Vec::with_capacity(ns.alignments().len());

                for (start, end) in pattern.find_matches(text)? {
                    while let Some(((_, c), a)) = chars.next_if(|((i, _), _)| *i < start) {
                        out.push((c, a));
                    }
                    // the replacement spans everything the match covered
                    let mut span: Option<Offsets> = None;
                    while let Some((_, a)) = chars.next_if(|((i, _), _)| *i < end) {
                        span = Some(span.map_or(a, |(s, _)| (s, a.1)));
                    }
                    if let Some(span) = span {
                        out.extend(content.chars().map(|c| (c, span)));
                    }
                }
                out.extend(chars.map(|((_, c), a)| (c, a)));

                Ok(ns.transform(out))
            }
            Self::Prepend(prefix) => {
                let Some(&first) = ns.alignments().first() else {
                    return Ok(ns.clone());
                };
                Ok(ns.transform(
                    prefix
                        .chars()
                        .map(|c| (c, first))
                        .chain(ns.chars_with_alignments()),
                ))
            }
            Self::Sequence(normalizers) => normalizers
                .iter()
                .try_fold(ns.clone(), |acc, normalizer| normalizer.normalize(&acc)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(normalizer: &Normalizer, text: &str) -> String {
        normalizer
            .normalize(&NormalizedString::from(text))
            .expect("normalization should succeed")
            .get()
            .to_owned()
    }

    #[test]
    fn test_lowercase() {
        assert_eq!(run(&Normalizer::Lowercase, "HeLLo ÄÖ"), "hello äö");
    }

    #[test]
    fn test_strip() {
        let both = Normalizer::Strip {
            left: true,
            right: true,
        };
        let left = Normalizer::Strip {
            left: true,
            right: false,
        };
        assert_eq!(run(&both, "  hi \n"), "hi");
        assert_eq!(run(&left, "  hi \n"), "hi \n");
    }

    #[test]
    fn test_replace_literal_and_regex() {
        let literal = Normalizer::Replace {
            pattern: Pattern::literal(" "),
            content: "▁".to_owned(),
        };
        assert_eq!(run(&literal, "a b c"), "a▁b▁c");

        let regex = Normalizer::Replace {
            pattern: Pattern::regex(r"\s+").expect("pattern should compile"),
            content: " ".to_owned(),
        };
        assert_eq!(run(&regex, "a \t b\n\nc"), "a b c");
    }

    #[test]
    fn test_prepend_skips_empty() {
        let prepend = Normalizer::Prepend("▁".to_owned());
        assert_eq!(run(&prepend, "hey"), "▁hey");
        assert_eq!(run(&prepend, ""), "");
    }

    #[test]
    fn test_sequence_keeps_original_and_offset() {
        let sequence = Normalizer::Sequence(vec![
            Normalizer::Replace {
                pattern: Pattern::literal(" "),
                content: "▁".to_owned(),
            },
            Normalizer::Prepend("▁".to_owned()),
            Normalizer::Lowercase,
        ]);
        let ns = NormalizedString::new("Hello World", 4);
        let out = sequence.normalize(&ns).expect("normalization should succeed");
        assert_eq!(out.get(), "▁hello▁world");
        assert_eq!(out.get_original(), "Hello World");
        assert_eq!(out.offset(), 4);
        assert_eq!(out.original_offsets((6, 12)), Some((9, 15)));
    }

    #[test]
    fn test_alignments_follow_edits() {
        let strip = Normalizer::Strip {
            left: true,
            right: true,
        };
        let stripped = strip
            .normalize(&NormalizedString::from("  hi "))
            .expect("normalization should succeed");
        assert_eq!(stripped.alignments(), &[(2, 3), (3, 4)]);
        assert_eq!(stripped.offset(), 2);

        let collapse = Normalizer::Replace {
            pattern: Pattern::regex(r"\s+").expect("pattern should compile"),
            content: "_".to_owned(),
        };
        let collapsed = collapse
            .normalize(&NormalizedString::from("a \t b"))
            .expect("normalization should succeed");
        assert_eq!(collapsed.get(), "a_b");
        assert_eq!(collapsed.alignments(), &[(0, 1), (1, 4), (4, 5)]);

        let prepend = Normalizer::Prepend("▁".to_owned());
        let prepended = prepend
            .normalize(&NormalizedString::new("hey", 7))
            .expect("normalization should succeed");
        assert_eq!(prepended.alignments(), &[(7, 8), (7, 8), (8, 9), (9, 10)]);
        assert_eq!(prepended.original_offsets((0, 4)), Some((7, 10)));
    }
}
