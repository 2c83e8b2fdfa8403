//! Pre-tokenizers: cut pending splits into word-sized fragments.

use serde::Deserialize;

use crate::{
    error::Result,
    pattern::Pattern,
    pretokenized::{NormalizedString, PreTokenizedString, Split},
};

/// What happens to the delimiter matched by a [`PreTokenizer::Split`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum SplitBehavior {
    /// The delimiter is dropped.
    Removed,
    /// The delimiter becomes its own fragment.
    Isolated,
    /// The delimiter is glued to the end of the fragment before it.
    MergedWithPrevious,
    /// The delimiter is glued to the start of the fragment after it.
    MergedWithNext,
}

/// A pre-tokenization strategy, compiled once from its config form.
#[derive(Debug, Clone)]
pub enum PreTokenizer {
    /// Splits on whitespace and drops it.
    WhitespaceSplit,
    Split {
        pattern: Pattern,
        behavior: SplitBehavior,
        /// Treat the text between matches as the delimiters instead.
        invert: bool,
    },
    Sequence(Vec<PreTokenizer>),
}

impl PreTokenizer {
    /// Splits every pending split of `pretokenized`. Finalized splits are kept.
    ///
    /// # Errors
    ///
    /// Fails only when a regex pattern errors while matching.
    pub fn pre_tokenize(&self, pretokenized: &mut PreTokenizedString) -> Result<()> {
        match self {
            Self::WhitespaceSplit => pretokenized.split(|_, ns| -> Result<Vec<Split>> {
                Ok(slices(&ns, whitespace_ranges(ns.get())))
            }),
            Self::Split {
                pattern,
                behavior,
                invert,
            } => pretokenized.split(|_, ns| -> Result<Vec<Split>> {
                let pieces = pattern
                    .split_pieces(ns.get())?
                    .into_iter()
                    .map(|(offsets, is_match)| (offsets, is_match != *invert));
                Ok(slices(&ns, apply_behavior(pieces, *behavior)))
            }),
            Self::Sequence(pretokenizers) => pretokenizers
                .iter()
                .try_for_each(|pretokenizer| pretokenizer.pre_tokenize(pretokenized)),
        }
    }
}

/// Pending splits for byte ranges of `ns`.
fn slices(ns: &NormalizedString, ranges: Vec<(usize, usize)>) -> Vec<Split> {
    ranges
        .into_iter()
        .filter_map(|(start, end)| ns.slice(start..end))
        .map(Split::from)
        .collect()
}

fn whitespace_ranges(text: &str) -> Vec<(usize, usize)> {
    let mut ranges = Vec::new();
    let mut start = None;

    for (i, c) in text.char_indices() {
        match (c.is_whitespace(), start) {
            (true, Some(s)) => {
                ranges.push((s, i));
                start = None;
            }
            (false, None) => start = Some(i),
            _ => {}
        }
    }
    if let Some(s) = start {
        ranges.push((s, text.len()));
    }

    ranges
}

fn apply_behavior(
    pieces: impl DoubleEndedIterator<Item = ((usize, usize), bool)>,
    behavior: SplitBehavior,
) -> Vec<(usize, usize)> {
    match behavior {
        SplitBehavior::Removed => pieces
            .filter(|(_, is_match)| !is_match)
            .map(|(offsets, _)| offsets)
            .collect(),
        SplitBehavior::Isolated => pieces.map(|(offsets, _)| offsets).collect(),
        SplitBehavior::MergedWithPrevious => {
            let mut ranges: Vec<(usize, usize)> = Vec::new();
            let mut previous_match = false;
            for (offsets, is_match) in pieces {
                match ranges.last_mut() {
                    Some(last) if is_match && !previous_match => last.1 = offsets.1,
                    _ => ranges.push(offsets),
                }
                previous_match = is_match;
            }
            ranges
        }
        SplitBehavior::MergedWithNext => {
            let mut ranges: Vec<(usize, usize)> = Vec::new();
            let mut previous_match = false;
            for (offsets, is_match) in pieces.rev() {
                match ranges.last_mut() {
                    Some(last) if is_match && !previous_match => last.0 = offsets.0,
                    _ => ranges.push(offsets),
                }
                previous_match = is_match;
            }
            ranges.reverse();
            ranges
        }
    }
}
