//! Pre-tokenized string pipeline.
//!
//! A [`PreTokenizedString`] keeps the original text plus an ordered list of
//! [`Split`]s. Each split is either pending (still text) or finalized (carries
//! tokens). Every pipeline stage (added-token extraction, normalization,
//! pre-tokenization, the model) only touches pending splits, so stages compose
//! without redoing or losing work an earlier stage already finalized.

use std::{convert::Infallible, ops::Range};

use rayon::prelude::*;

use crate::{
    error::{Result, TokenizerError},
    types::{Offsets, Token, TokenId},
};

/// A fragment of text together with its normalized form.
///
/// Every char of the normalized text carries the half-open range of input
/// code points it came from, so normalized offsets can always be mapped back
/// into the input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedString {
    original: String,
    normalized: String,
    /// Input code-point range behind each char of `normalized`.
    alignments: Vec<Offsets>,
    /// Code-point index of `original` within the full input.
    original_offset: usize,
}

impl NormalizedString {
    /// An unnormalized fragment starting at code point `offset` of the input.
    pub fn new(text: impl Into<String>, offset: usize) -> Self {
        let text = text.into();
        let alignments = (0..text.chars().count())
            .map(|i| (offset + i, offset + i + 1))
            .collect();
        Self {
            normalized: text.clone(),
            original: text,
            alignments,
            original_offset: offset,
        }
    }

    /// The normalized view of the fragment.
    pub fn get(&self) -> &str {
        &self.normalized
    }

    pub fn get_original(&self) -> &str {
        &self.original
    }

    /// Input range behind each normalized char.
    pub fn alignments(&self) -> &[Offsets] {
        &self.alignments
    }

    /// Code-point index in the input where the normalized text starts.
    pub fn offset(&self) -> usize {
        self.alignments
            .first()
            .map_or(self.original_offset, |&(start, _)| start)
    }

    pub fn len(&self) -> usize {
        self.normalized.len()
    }

    pub fn is_empty(&self) -> bool {
        self.normalized.is_empty()
    }

    /// Normalized chars paired with their input ranges.
    pub fn chars_with_alignments(&self) -> impl Iterator<Item = (char, Offsets)> + '_ {
        self.normalized.chars().zip(self.alignments.iter().copied())
    }

    /// Rebuilds the normalized text from `chars`, each with its input range.
    ///
    /// The original text is kept as is.
    pub fn transform(&self, chars: impl IntoIterator<Item = (char, Offsets)>) -> Self {
        let (normalized, alignments) = chars.into_iter().unzip();
        Self {
            original: self.original.clone(),
            normalized,
            alignments,
            original_offset: self.original_offset,
        }
    }

    /// Replaces each normalized char with the chars `f` yields for it.
    pub fn map_chars<F, I>(&self, mut f: F) -> Self
    where
        F: FnMut(char) -> I,
        I: IntoIterator<Item = char>,
    {
        self.transform(
            self.chars_with_alignments()
                .flat_map(|(c, a)| f(c).into_iter().map(move |m| (m, a))),
        )
    }

    /// Maps a code-point range of the normalized text to a range of the input.
    ///
    /// Returns `None` if the range is not inside the normalized text.
    pub fn original_offsets(&self, (start, end): Offsets) -> Option<Offsets> {
        if start > end || end > self.alignments.len() {
            return None;
        }
        if start == end {
            let at = self
                .alignments
                .get(start)
                .map_or_else(|| self.original_end(), |&(s, _)| s);
            return Some((at, at));
        }
        Some((self.alignments.get(start)?.0, self.alignments.get(end - 1)?.1))
    }

    fn original_end(&self) -> usize {
        self.alignments
            .last()
            .map_or(self.original_offset, |&(_, end)| end)
    }

    /// Sub-fragment for a byte range of the normalized text.
    ///
    /// The original text is cut down to the input range the slice covers.
    /// Returns `None` if the range is out of bounds or not on char boundaries.
    pub fn slice(&self, range: Range<usize>) -> Option<Self> {
        let normalized = self.normalized.get(range.clone())?;
        let first = self.normalized.get(..range.start)?.chars().count();
        let alignments = self
            .alignments
            .get(first..first + normalized.chars().count())?
            .to_vec();

        let (start, end) = match (alignments.first(), alignments.last()) {
            (Some(&(start, _)), Some(&(_, end))) => (start, end.max(start)),
            _ => {
                let at = self
                    .alignments
                    .get(first)
                    .map_or_else(|| self.original_end(), |&(s, _)| s);
                (at, at)
            }
        };
        let original = self
            .original
            .chars()
            .skip(start.saturating_sub(self.original_offset))
            .take(end - start)
            .collect();

        Some(Self {
            original,
            normalized: normalized.to_owned(),
            alignments,
            original_offset: start,
        })
    }
}

impl From<&str> for NormalizedString {
    fn from(text: &str) -> Self {
        Self::new(text, 0)
    }
}

impl From<String> for NormalizedString {
    fn from(text: String) -> Self {
        Self::new(text, 0)
    }
}

/// One fragment of a [`PreTokenizedString`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Split {
    normalized: NormalizedString,
    tokens: Option<Vec<Token>>,
}

impl Split {
    /// A split still waiting for normalization, splitting and tokenization.
    pub fn pending(normalized: NormalizedString) -> Self {
        Self {
            normalized,
            tokens: None,
        }
    }

    /// A split whose tokens are already known. Offsets are relative to the split.
    pub fn finalized(normalized: NormalizedString, tokens: Vec<Token>) -> Self {
        Self {
            normalized,
            tokens: Some(tokens),
        }
    }

    pub fn normalized(&self) -> &NormalizedString {
        &self.normalized
    }

    pub fn tokens(&self) -> Option<&[Token]> {
        self.tokens.as_deref()
    }

    pub fn is_finalized(&self) -> bool {
        self.tokens.is_some()
    }
}

impl From<NormalizedString> for Split {
    fn from(normalized: NormalizedString) -> Self {
        Self::pending(normalized)
    }
}

/// Output of the pipeline: ids, token strings and code-point offsets in lock-step.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Encoding {
    ids: Vec<TokenId>,
    tokens: Vec<String>,
    offsets: Vec<Offsets>,
}

impl Encoding {
    pub fn get_ids(&self) -> &[TokenId] {
        &self.ids
    }

    pub fn get_tokens(&self) -> &[String] {
        &self.tokens
    }

    pub fn get_offsets(&self) -> &[Offsets] {
        &self.offsets
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    fn push(&mut self, token: Token) {
        self.ids.push(token.id);
        self.tokens.push(token.value);
        self.offsets.push(token.offsets);
    }
}

/// The original text plus its ordered splits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreTokenizedString {
    original: String,
    splits: Vec<Split>,
}

impl PreTokenizedString {
    /// Builds a string from explicit splits. They should cover `original` in order.
    pub fn from_splits(original: impl Into<String>, splits: Vec<Split>) -> Self {
        Self {
            original: original.into(),
            splits,
        }
    }

    pub fn original(&self) -> &str {
        &self.original
    }

    pub fn splits(&self) -> &[Split] {
        &self.splits
    }

    /// Normalizes every pending split with `f`.
    ///
    /// Finalized splits keep their text and tokens untouched. Splits are never
    /// merged or reordered.
    pub fn normalize<F>(&mut self, mut f: F)
    where
        F: FnMut(&NormalizedString) -> NormalizedString,
    {
        let Ok(()) = self.try_normalize(|ns| Ok::<_, Infallible>(f(ns)));
    }

    /// Fallible form of [`normalize`](Self::normalize).
    ///
    /// # Errors
    ///
    /// Stops at and returns the first error `f` produces.
    pub fn try_normalize<F, E>(&mut self, mut f: F) -> Result<(), E>
    where
        F: FnMut(&NormalizedString) -> Result<NormalizedString, E>,
    {
        for split in self.splits.iter_mut().filter(|s| !s.is_finalized()) {
            split.normalized = f(&split.normalized)?;
        }
        Ok(())
    }

    /// Replaces each pending split with the splits `f` cuts it into.
    ///
    /// `f` receives the split's index and may return finalized splits (e.g. for
    /// added tokens). Empty pending splits it returns are dropped.
    ///
    /// # Errors
    ///
    /// Stops at and returns the first error `f` produces.
    pub fn split<F, E>(&mut self, mut f: F) -> Result<(), E>
    where
        F: FnMut(usize, NormalizedString) -> Result<Vec<Split>, E>,
    {
        let mut new_splits = Vec::with_capacity(self.splits.len());

        for (i, split) in std::mem::take(&mut self.splits).into_iter().enumerate() {
            if split.is_finalized() {
                new_splits.push(split);
                continue;
            }
            new_splits.extend(
                f(i, split.normalized)?
                    .into_iter()
                    .filter(|s| s.is_finalized() || !s.normalized.is_empty()),
            );
        }

        self.splits = new_splits;
        Ok(())
    }

    /// Attaches `f`'s tokens to every pending split, freezing it.
    ///
    /// Splits are independent and `f` only reads shared state, so they are
    /// tokenized in parallel on the Rayon pool.
    ///
    /// # Errors
    ///
    /// Returns an error produced by `f`; which split's error wins is unspecified.
    pub fn tokenize<F, E>(&mut self, f: F) -> Result<(), E>
    where
        F: Fn(&NormalizedString) -> Result<Vec<Token>, E> + Sync,
        E: Send,
    {
        self.splits
            .par_iter_mut()
            .filter(|split| !split.is_finalized())
            .try_for_each(|split| {
                let tokens = f(&split.normalized)?;
                split.tokens = Some(tokens);
                Ok(())
            })
    }

    /// Flattens the finalized splits into an [`Encoding`].
    ///
    /// Token offsets are mapped from the split's normalized text back to
    /// input code points through [`NormalizedString::original_offsets`]. Offsets
    /// outside the split are only shifted by [`NormalizedString::offset`].
    ///
    /// # Errors
    ///
    /// Returns [`TokenizerError::PendingSplit`] if a split was never tokenized.
    pub fn into_encoding(self) -> Result<Encoding> {
        let mut encoding = Encoding::default();

        for split in self.splits {
            let Some(tokens) = split.tokens else {
                return Err(TokenizerError::PendingSplit(split.normalized.normalized));
            };
            for mut token in tokens {
                token.offsets = split
                    .normalized
                    .original_offsets(token.offsets)
                    .unwrap_or_else(|| {
                        let shift = split.normalized.offset();
                        (token.offsets.0 + shift, token.offsets.1 + shift)
                    });
                encoding.push(token);
            }
        }

        Ok(encoding)
    }
}

impl From<&str> for PreTokenizedString {
    fn from(text: &str) -> Self {
        Self {
            original: text.to_owned(),
            splits: vec![Split::pending(NormalizedString::from(text))],
        }
    }
}
