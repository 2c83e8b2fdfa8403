//! BPE model: vocabulary, ranked merges and the per-fragment encoder.
//!
//! [`BpeBuilder`] resolves string merges into a [`MergeMap`] once; afterwards
//! the model is read-only, which is what lets the pipeline tokenize splits in
//! parallel and lets cached results stand in for fresh ones.

use std::{
    num::NonZeroUsize,
    sync::{Mutex, PoisonError},
};

use lru::LruCache;
use rustc_hash::FxHashMap;

use crate::{
    converter::BytesToCharOffsetConverter,
    error::BpeError,
    types::{MergeMap, Pair, PairVal, Rank, Token, TokenId, Vocab},
    word::{DEFAULT_DROPOUT_SEED, Dropout, Word},
};

/// Number of fragments remembered by the encode cache unless configured otherwise.
pub const DEFAULT_CACHE_CAPACITY: usize = 10_000;

type Cache = Mutex<LruCache<String, Word>>;

/// Builder for [`Bpe`].
#[derive(Debug, Clone)]
pub struct BpeBuilder {
    vocab: Vocab,
    merges: Vec<(String, String)>,
    dropout: Option<f32>,
    dropout_seed: u64,
    unk_token: Option<String>,
    continuing_subword_prefix: Option<String>,
    end_of_word_suffix: Option<String>,
    fuse_unk: bool,
    byte_fallback: bool,
    cache_capacity: usize,
}

impl Default for BpeBuilder {
    fn default() -> Self {
        Self {
            vocab: Vocab::default(),
            merges: Vec::new(),
            dropout: None,
            dropout_seed: DEFAULT_DROPOUT_SEED,
            unk_token: None,
            continuing_subword_prefix: None,
            end_of_word_suffix: None,
            fuse_unk: false,
            byte_fallback: false,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
        }
    }
}

impl BpeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the vocabulary and the merge list. Merge order is merge priority.
    pub fn vocab_and_merges(mut self, vocab: Vocab, merges: Vec<(String, String)>) -> Self {
        self.vocab = vocab;
        self.merges = merges;
        self
    }

    pub fn dropout(mut self, p: f32) -> Self {
        self.dropout = Some(p);
        self
    }

    pub fn dropout_seed(mut self, seed: u64) -> Self {
        self.dropout_seed = seed;
        self
    }

    pub fn unk_token(mut self, unk_token: impl Into<String>) -> Self {
        self.unk_token = Some(unk_token.into());
        self
    }

    pub fn continuing_subword_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.continuing_subword_prefix = Some(prefix.into());
        self
    }

    pub fn end_of_word_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.end_of_word_suffix = Some(suffix.into());
        self
    }

    pub fn fuse_unk(mut self, fuse_unk: bool) -> Self {
        self.fuse_unk = fuse_unk;
        self
    }

    pub fn byte_fallback(mut self, byte_fallback: bool) -> Self {
        self.byte_fallback = byte_fallback;
        self
    }

    /// Capacity of the encode cache. `0` disables caching.
    pub fn cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }

    /// Validates the settings and resolves the merges into a [`MergeMap`].
    ///
    /// A merge `(left, right)` produces `left + right`, with the continuing
    /// subword prefix stripped from `right` first. When the same pair is listed
    /// twice the earlier rank wins.
    ///
    /// # Errors
    ///
    /// - [`BpeError::InvalidDropout`] if the dropout is outside `[0, 1)`.
    /// - [`BpeError::UnkTokenOutOfVocabulary`] if the unk token has no id.
    /// - [`BpeError::MergeTokenOutOfVocabulary`] if a merge side or its result
    ///   has no id.
    pub fn build(self) -> Result<Bpe, BpeError> {
        let dropout = self
            .dropout
            .map(|p| Dropout::new(p).map(|d| d.with_seed(self.dropout_seed)))
            .transpose()?;

        let unk = match self.unk_token {
            Some(token) => match self.vocab.get(&token) {
                Some(&id) => Some((token, id)),
                None => return Err(BpeError::UnkTokenOutOfVocabulary(token)),
            },
            None => None,
        };

        let prefix = self.continuing_subword_prefix.as_deref().unwrap_or("");
        let lookup = |token: &str| {
            self.vocab
                .get(token)
                .copied()
                .ok_or_else(|| BpeError::MergeTokenOutOfVocabulary(token.to_owned()))
        };

        let mut merges = MergeMap::default();
        for (rank, (left, right)) in self.merges.iter().enumerate() {
            let left_id = lookup(left)?;
            let right_id = lookup(right)?;
            let merged = format!("{left}{}", right.strip_prefix(prefix).unwrap_or(right));
            let new_id = lookup(&merged)?;

            merges.entry(Pair(left_id, right_id)).or_insert(PairVal {
                rank: rank as Rank,
                new_id,
            });
        }

        let vocab_r = self
            .vocab
            .iter()
            .map(|(token, &id)| (id, token.clone()))
            .collect();

        log::debug!(
            "built BPE model: {} tokens, {} merges ({} unique)",
            self.vocab.len(),
            self.merges.len(),
            merges.len()
        );

        Ok(Bpe {
            cache: new_cache(self.cache_capacity),
            cache_capacity: self.cache_capacity,
            vocab: self.vocab,
            vocab_r,
            merges,
            merge_list: self.merges,
            dropout,
            unk,
            continuing_subword_prefix: self.continuing_subword_prefix,
            end_of_word_suffix: self.end_of_word_suffix,
            fuse_unk: self.fuse_unk,
            byte_fallback: self.byte_fallback,
        })
    }
}

fn new_cache(capacity: usize) -> Option<Cache> {
    NonZeroUsize::new(capacity).map(|cap| Mutex::new(LruCache::new(cap)))
}

/// A built BPE model.
#[derive(Debug)]
pub struct Bpe {
    vocab: Vocab,
    vocab_r: FxHashMap<TokenId, String>,
    merges: MergeMap,
    merge_list: Vec<(String, String)>,
    dropout: Option<Dropout>,
    unk: Option<(String, TokenId)>,
    continuing_subword_prefix: Option<String>,
    end_of_word_suffix: Option<String>,
    fuse_unk: bool,
    byte_fallback: bool,
    cache: Option<Cache>,
    cache_capacity: usize,
}

impl Clone for Bpe {
    /// Clones the model with an empty cache.
    fn clone(&self) -> Self {
        Self {
            vocab: self.vocab.clone(),
            vocab_r: self.vocab_r.clone(),
            merges: self.merges.clone(),
            merge_list: self.merge_list.clone(),
            dropout: self.dropout,
            unk: self.unk.clone(),
            continuing_subword_prefix: self.continuing_subword_prefix.clone(),
            end_of_word_suffix: self.end_of_word_suffix.clone(),
            fuse_unk: self.fuse_unk,
            byte_fallback: self.byte_fallback,
            cache: new_cache(self.cache_capacity),
            cache_capacity: self.cache_capacity,
        }
    }
}

impl Bpe {
    pub fn builder() -> BpeBuilder {
        BpeBuilder::new()
    }

    /// Shorthand for a model with only a vocabulary and merges.
    ///
    /// # Errors
    ///
    /// See [`BpeBuilder::build`].
    pub fn new(vocab: Vocab, merges: Vec<(String, String)>) -> Result<Self, BpeError> {
        BpeBuilder::new().vocab_and_merges(vocab, merges).build()
    }

    pub fn token_to_id(&self, token: &str) -> Option<TokenId> {
        self.vocab.get(token).copied()
    }

    pub fn id_to_token(&self, id: TokenId) -> Option<&str> {
        self.vocab_r.get(&id).map(String::as_str)
    }

    pub fn vocab_size(&self) -> usize {
        self.vocab.len()
    }

    pub fn get_vocab(&self) -> &Vocab {
        &self.vocab
    }

    /// The merge list in rank order, as it was given to the builder.
    pub fn merges(&self) -> &[(String, String)] {
        &self.merge_list
    }

    pub fn dropout(&self) -> Option<&Dropout> {
        self.dropout.as_ref()
    }

    pub fn unk_token(&self) -> Option<&str> {
        self.unk.as_ref().map(|(token, _)| token.as_str())
    }

    /// Drops every cached fragment.
    pub fn clear_cache(&self) {
        if let Some(cache) = &self.cache {
            cache.lock().unwrap_or_else(PoisonError::into_inner).clear();
            log::trace!("cleared BPE encode cache");
        }
    }

    /// Encodes one fragment into tokens with code-point offsets relative to `text`.
    ///
    /// # Errors
    ///
    /// Returns [`BpeError::UnknownSymbol`] when a character is not in the
    /// vocabulary, byte fallback cannot cover it and no unk token is set.
    pub fn tokenize(&self, text: &str) -> Result<Vec<Token>, BpeError> {
        if text.is_empty() {
            return Ok(Vec::new());
        }

        let cache = self.cache.as_ref().filter(|_| !self.dropout_active());

        if let Some(cache) = cache {
            let hit = cache
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .get(text)
                .cloned();
            if let Some(word) = hit {
                return Ok(self.word_to_tokens(&word, text));
            }
        }

        let word = self.merge_word(text)?;
        let tokens = self.word_to_tokens(&word, text);

        if let Some(cache) = cache {
            cache
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .put(text.to_owned(), word);
        }

        Ok(tokens)
    }

    fn dropout_active(&self) -> bool {
        self.dropout.is_some_and(|d| d.probability() > 0.0)
    }

    /// Builds the initial symbols of `text` and runs the merge engine on them.
    fn merge_word(&self, text: &str) -> Result<Word, BpeError> {
        let mut word = Word::with_capacity(text.len());
        let mut pending_unk: Option<(TokenId, usize)> = None;
        let mut chars = text.char_indices().peekable();

        while let Some((start, _)) = chars.next() {
            let end = chars.peek().map_or(text.len(), |&(i, _)| i);
            let raw = &text[start..end];
            let byte_len = raw.len();

            let mut symbol = raw.to_owned();
            if start > 0
                && let Some(prefix) = &self.continuing_subword_prefix
            {
                symbol.insert_str(0, prefix);
            }
            if end == text.len()
                && let Some(suffix) = &self.end_of_word_suffix
            {
                symbol.push_str(suffix);
            }

            if let Some(&id) = self.vocab.get(&symbol) {
                if let Some((unk_id, unk_len)) = pending_unk.take() {
                    word.add(unk_id, unk_len);
                }
                word.add(id, byte_len);
                continue;
            }

            if self.byte_fallback
                && let Some(ids) = self.byte_fallback_ids(raw)
            {
                if let Some((unk_id, unk_len)) = pending_unk.take() {
                    word.add(unk_id, unk_len);
                }
                for id in ids {
                    word.add(id, 1);
                }
                continue;
            }

            let Some((_, unk_id)) = &self.unk else {
                return Err(BpeError::UnknownSymbol(symbol));
            };
            pending_unk = match pending_unk {
                Some((id, len)) if self.fuse_unk => Some((id, len + byte_len)),
                Some((id, len)) => {
                    word.add(id, len);
                    Some((*unk_id, byte_len))
                }
                None => Some((*unk_id, byte_len)),
            };
        }

        if let Some((unk_id, unk_len)) = pending_unk {
            word.add(unk_id, unk_len);
        }

        word.merge_all(&self.merges, self.dropout.as_ref());
        Ok(word)
    }

    /// Ids of the `<0xXX>` tokens for every byte of `raw`, if all exist.
    fn byte_fallback_ids(&self, raw: &str) -> Option<Vec<TokenId>> {
        raw.bytes()
            .map(|b| self.vocab.get(&format!("<{b:#04X}>")).copied())
            .collect()
    }

    fn word_to_tokens(&self, word: &Word, text: &str) -> Vec<Token> {
        let converter = BytesToCharOffsetConverter::new(text);
        word.ids()
            .into_iter()
            .zip(word.offsets())
            .map(|(id, offsets)| {
                let value = self.id_to_token(id).unwrap_or_default();
                let offsets = converter.convert(offsets).unwrap_or(offsets);
                Token::new(id, value, offsets)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vocab(tokens: &[&str]) -> Vocab {
        tokens
            .iter()
            .enumerate()
            .map(|(id, token)| ((*token).to_owned(), id as TokenId))
            .collect()
    }

    fn merges(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(l, r)| ((*l).to_owned(), (*r).to_owned()))
            .collect()
    }

    fn values(tokens: &[Token]) -> Vec<&str> {
        tokens.iter().map(|t| t.value.as_str()).collect()
    }

    fn priority_model() -> BpeBuilder {
        BpeBuilder::new().vocab_and_merges(
            vocab(&[
                "Ä", " ", "1", "0", "Ä ", "10", "100", "1000", "Ä 1000", "00",
            ]),
            merges(&[
                ("Ä", " "),
                ("1", "0"),
                ("10", "0"),
                ("100", "0"),
                ("Ä ", "1000"),
                ("0", "0"),
            ]),
        )
    }

    #[test]
    fn test_rank_priority_end_to_end() {
        let bpe = priority_model().build().expect("model should build");
        let tokens = bpe.tokenize("Ä 1000").expect("encode should succeed");
        assert_eq!(values(&tokens), vec!["Ä 1000"]);
        assert_eq!(tokens[0].id, 8);
        assert_eq!(tokens[0].offsets, (0, 6));
    }

    #[test]
    fn test_byte_fallback() {
        let bpe = BpeBuilder::new()
            .vocab_and_merges(
                vocab(&["<unk>", "a", "<0xF0>", "<0x9F>", "<0x98>", "<0x80>"]),
                Vec::new(),
            )
            .unk_token("<unk>")
            .byte_fallback(true)
            .build()
            .expect("model should build");

        let tokens = bpe.tokenize("a😀").expect("encode should succeed");
        assert_eq!(
            values(&tokens),
            vec!["a", "<0xF0>", "<0x9F>", "<0x98>", "<0x80>"]
        );
        let offsets: Vec<_> = tokens.iter().map(|t| t.offsets).collect();
        assert_eq!(offsets, vec![(0, 1), (1, 2), (1, 2), (1, 2), (1, 2)]);

        // bytes missing from the vocabulary fall back to unk
        let tokens = bpe.tokenize("é").expect("encode should succeed");
        assert_eq!(values(&tokens), vec!["<unk>"]);
    }

    #[test]
    fn test_unk_fusing() {
        let base = BpeBuilder::new()
            .vocab_and_merges(vocab(&["<unk>", "a"]), Vec::new())
            .unk_token("<unk>");

        let fused = base.clone().fuse_unk(true).build().expect("model should build");
        let tokens = fused.tokenize("abca").expect("encode should succeed");
        assert_eq!(values(&tokens), vec!["a", "<unk>", "a"]);
        assert_eq!(tokens[1].offsets, (1, 3));

        let unfused = base.build().expect("model should build");
        let tokens = unfused.tokenize("abca").expect("encode should succeed");
        assert_eq!(values(&tokens), vec!["a", "<unk>", "<unk>", "a"]);
        assert_eq!(tokens[2].offsets, (2, 3));
    }

    #[test]
    fn test_unknown_symbol_without_unk() {
        let bpe = Bpe::new(vocab(&["a"]), Vec::new()).expect("model should build");
        assert_eq!(
            bpe.tokenize("ab"),
            Err(BpeError::UnknownSymbol("b".to_owned()))
        );
    }

    #[test]
    fn test_build_errors() {
        assert_eq!(
            Bpe::new(vocab(&["a", "b"]), merges(&[("a", "b")])).err(),
            Some(BpeError::MergeTokenOutOfVocabulary("ab".to_owned()))
        );
        assert_eq!(
            Bpe::new(vocab(&["a"]), merges(&[("a", "c")])).err(),
            Some(BpeError::MergeTokenOutOfVocabulary("c".to_owned()))
        );
        assert_eq!(
            BpeBuilder::new().unk_token("<unk>").build().err(),
            Some(BpeError::UnkTokenOutOfVocabulary("<unk>".to_owned()))
        );
        assert_eq!(
            BpeBuilder::new().dropout(1.0).build().err(),
            Some(BpeError::InvalidDropout(1.0))
        );
    }

    #[test]
    fn test_duplicate_merge_keeps_first_rank() {
        let bpe = Bpe::new(
            vocab(&["a", "b", "c", "ab", "bc"]),
            merges(&[("b", "c"), ("a", "b"), ("b", "c")]),
        )
        .expect("model should build");
        assert_eq!(bpe.merges().len(), 3);
        let tokens = bpe.tokenize("abc").expect("encode should succeed");
        assert_eq!(values(&tokens), vec!["a", "bc"]);
    }

    #[test]
    fn test_continuing_subword_prefix() {
        let bpe = BpeBuilder::new()
            .vocab_and_merges(vocab(&["a", "##b", "##c", "ab"]), merges(&[("a", "##b")]))
            .continuing_subword_prefix("##")
            .build()
            .expect("model should build");
        let tokens = bpe.tokenize("abc").expect("encode should succeed");
        assert_eq!(values(&tokens), vec!["ab", "##c"]);
        assert_eq!(tokens[1].offsets, (2, 3));
    }

    #[test]
    fn test_end_of_word_suffix() {
        let bpe = BpeBuilder::new()
            .vocab_and_merges(vocab(&["a", "b</w>", "ab</w>"]), merges(&[("a", "b</w>")]))
            .end_of_word_suffix("</w>")
            .build()
            .expect("model should build");
        let tokens = bpe.tokenize("ab").expect("encode should succeed");
        assert_eq!(values(&tokens), vec!["ab</w>"]);
        assert_eq!(tokens[0].offsets, (0, 2));
    }

    #[test]
    fn test_multibyte_offsets_are_code_points() {
        let bpe = Bpe::new(vocab(&["L", "ö", "w", "e", "öw"]), merges(&[("ö", "w")]))
            .expect("model should build");
        let tokens = bpe.tokenize("Löwe").expect("encode should succeed");
        assert_eq!(values(&tokens), vec!["L", "öw", "e"]);
        let offsets: Vec<_> = tokens.iter().map(|t| t.offsets).collect();
        assert_eq!(offsets, vec![(0, 1), (1, 3), (3, 4)]);
    }

    #[test]
    fn test_cache_matches_fresh_encode() {
        let cached = priority_model().build().expect("model should build");
        let uncached = priority_model()
            .cache_capacity(0)
            .build()
            .expect("model should build");

        for text in ["Ä 1000", "1000", "00 Ä", "Ä 1000"] {
            let first = cached.tokenize(text).expect("encode should succeed");
            let second = cached.tokenize(text).expect("encode should succeed");
            assert_eq!(first, second);
            assert_eq!(first, uncached.tokenize(text).expect("encode should succeed"));
        }

        cached.clear_cache();
        assert_eq!(
            values(&cached.tokenize("1000").expect("encode should succeed")),
            vec!["1000"]
        );
    }

    #[test]
    fn test_seeded_dropout_is_reproducible() {
        let bpe = priority_model()
            .dropout(0.5)
            .dropout_seed(7)
            .build()
            .expect("model should build");
        let first = bpe.tokenize("Ä 1000").expect("encode should succeed");
        for _ in 0..5 {
            assert_eq!(bpe.tokenize("Ä 1000").expect("encode should succeed"), first);
        }
        assert_eq!(bpe.dropout().map(Dropout::seed), Some(7));
    }

    #[test]
    fn test_empty_text() {
        let bpe = priority_model().build().expect("model should build");
        assert!(bpe.tokenize("").expect("encode should succeed").is_empty());
    }
}
