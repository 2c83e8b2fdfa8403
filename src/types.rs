//! Type aliases and shared types for BPE merging and encoding.
//!
//! These type aliases provide semantic clarity throughout the codebase.

use rustc_hash::FxHashMap;

/// Represents a token identifier in the vocabulary.
pub type TokenId = u32;

/// Merge rank: the position of a merge rule in the ordered merge list.
///
/// Lower values represent earlier merges (e.g., 0 = first merge, 1 = second merge)
/// and are applied first.
pub type Rank = u32;

/// Half-open `[start, end)` range into a text.
///
/// Byte-granular while inside a [`Word`](crate::Word), code-point-granular once
/// passed through a [`BytesToCharOffsetConverter`](crate::BytesToCharOffsetConverter).
pub type Offsets = (usize, usize);

/// Ranked merge table consulted by [`Word::merge_all`](crate::Word::merge_all).
pub type MergeMap = FxHashMap<Pair, PairVal>;

/// Vocabulary mapping token strings to their ids.
pub type Vocab = FxHashMap<String, TokenId>;

/// A pair of adjacent token ids.
///
/// Used as the lookup key into the merge table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Pair(pub TokenId, pub TokenId);

/// What a [`Pair`] collapses into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PairVal {
    /// Priority of the merge. Lower ranks are applied first.
    pub rank: Rank,
    /// Vocabulary id of the merged symbol.
    pub new_id: TokenId,
}

/// Signed adjacency-count delta emitted by [`Word::merge`](crate::Word::merge).
///
/// Consumed by whoever keeps pair frequencies during training.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WChange {
    pub left: TokenId,
    pub right: TokenId,
    pub delta: i32,
}

impl WChange {
    pub(crate) fn new(left: TokenId, right: TokenId, delta: i32) -> Self {
        Self { left, right, delta }
    }
}

/// A finalized token: vocabulary id, its string form, and code-point offsets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub id: TokenId,
    pub value: String,
    pub offsets: Offsets,
}

impl Token {
    pub fn new(id: TokenId, value: impl Into<String>, offsets: Offsets) -> Self {
        Self {
            id,
            value: value.into(),
            offsets,
        }
    }
}
