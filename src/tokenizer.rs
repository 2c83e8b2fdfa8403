//! The encoding pipeline.
//!
//! `encode` runs these stages over a [`PreTokenizedString`]:
//! 1. Added tokens with `normalized: false` are cut out of the raw text as
//!    finalized splits.
//! 2. The normalizer rewrites the remaining splits.
//! 3. Added tokens with `normalized: true` are cut out of the normalized text.
//! 4. The pre-tokenizer cuts the rest into word-sized fragments.
//! 5. The BPE model tokenizes every fragment (in parallel via Rayon).

use std::{path::Path, str::FromStr};

use fancy_regex::Regex;
use rayon::prelude::*;
use rustc_hash::FxHashMap;

use crate::{
    config::{AddedTokenConfig, TokenizerConfig},
    error::{Result, TokenizerError},
    model::Bpe,
    normalizer::Normalizer,
    pre_tokenizer::PreTokenizer,
    pretokenized::{Encoding, NormalizedString, PreTokenizedString, Split},
    types::{Token, TokenId},
};

/// A token matched verbatim in the input and kept out of the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddedToken {
    pub id: TokenId,
    pub content: String,
    pub special: bool,
    /// Matched against the normalized text instead of the raw input.
    pub normalized: bool,
    /// Only matched when no word char touches either side.
    pub single_word: bool,
    /// Whitespace on the left is swallowed into the token.
    pub lstrip: bool,
    /// Whitespace on the right is swallowed into the token.
    pub rstrip: bool,
}

impl AddedToken {
    /// Special tokens match the raw input, the others the normalized text.
    pub fn new(id: TokenId, content: impl Into<String>, special: bool) -> Self {
        Self {
            id,
            content: content.into(),
            special,
            normalized: !special,
            single_word: false,
            lstrip: false,
            rstrip: false,
        }
    }

    #[must_use]
    pub fn normalized(mut self, normalized: bool) -> Self {
        self.normalized = normalized;
        self
    }

    #[must_use]
    pub fn single_word(mut self, single_word: bool) -> Self {
        self.single_word = single_word;
        self
    }

    #[must_use]
    pub fn lstrip(mut self, lstrip: bool) -> Self {
        self.lstrip = lstrip;
        self
    }

    #[must_use]
    pub fn rstrip(mut self, rstrip: bool) -> Self {
        self.rstrip = rstrip;
        self
    }
}

impl From<&AddedTokenConfig> for AddedToken {
    fn from(config: &AddedTokenConfig) -> Self {
        Self::new(config.id, config.content.as_str(), config.special)
            .normalized(config.normalized)
            .single_word(config.single_word)
            .lstrip(config.lstrip)
            .rstrip(config.rstrip)
    }
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Longest-first alternation over `contents`, so a token wins over any
/// token that is its prefix.
fn added_matcher<'a>(contents: impl Iterator<Item = &'a str>) -> Result<Option<Regex>> {
    let mut contents: Vec<&str> = contents.collect();
    if contents.is_empty() {
        return Ok(None);
    }
    contents.sort_unstable_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));

    let pattern = contents
        .iter()
        .map(|s| fancy_regex::escape(s))
        .collect::<Vec<_>>()
        .join("|");
    Ok(Some(Regex::new(&pattern)?))
}

/// Normalizer, pre-tokenizer and BPE model wired into one pipeline.
#[derive(Debug, Clone)]
pub struct Tokenizer {
    normalizer: Option<Normalizer>,
    pre_tokenizer: Option<PreTokenizer>,
    model: Bpe,
    added_tokens: FxHashMap<String, AddedToken>,
    added_ids: FxHashMap<TokenId, String>,
    raw_pattern: Option<Regex>,
    normalized_pattern: Option<Regex>,
}

impl Tokenizer {
    /// A tokenizer that feeds the whole input straight to `model`.
    pub fn new(model: Bpe) -> Self {
        Self {
            normalizer: None,
            pre_tokenizer: None,
            model,
            added_tokens: FxHashMap::default(),
            added_ids: FxHashMap::default(),
            raw_pattern: None,
            normalized_pattern: None,
        }
    }

    pub fn with_normalizer(mut self, normalizer: Normalizer) -> Self {
        self.normalizer = Some(normalizer);
        self
    }

    pub fn with_pre_tokenizer(mut self, pre_tokenizer: PreTokenizer) -> Self {
        self.pre_tokenizer = Some(pre_tokenizer);
        self
    }

    /// Registers `tokens` and recompiles the added-token matchers.
    ///
    /// Tokens with empty content are ignored. A later token with the same
    /// content replaces an earlier one.
    ///
    /// # Errors
    ///
    /// Returns [`TokenizerError::Regex`] if a matcher fails to compile.
    pub fn with_added_tokens(mut self, tokens: impl IntoIterator<Item = AddedToken>) -> Result<Self> {
        for token in tokens.into_iter().filter(|t| !t.content.is_empty()) {
            self.added_ids.insert(token.id, token.content.clone());
            self.added_tokens.insert(token.content.clone(), token);
        }

        let (normalized, raw): (Vec<&AddedToken>, Vec<&AddedToken>) =
            self.added_tokens.values().partition(|t| t.normalized);
        let raw_pattern = added_matcher(raw.iter().map(|t| t.content.as_str()))?;
        let normalized_pattern = added_matcher(normalized.iter().map(|t| t.content.as_str()))?;

        self.raw_pattern = raw_pattern;
        self.normalized_pattern = normalized_pattern;

        Ok(self)
    }

    /// Builds every stage described by `config`.
    ///
    /// # Errors
    ///
    /// Fails if the model cannot be built or a pattern does not compile.
    pub fn from_config(config: &TokenizerConfig) -> Result<Self> {
        let mut tokenizer = Self::new(config.model.build()?);
        if let Some(normalizer) = &config.normalizer {
            tokenizer = tokenizer.with_normalizer(normalizer.try_into()?);
        }
        if let Some(pre_tokenizer) = &config.pre_tokenizer {
            tokenizer = tokenizer.with_pre_tokenizer(pre_tokenizer.try_into()?);
        }
        tokenizer.with_added_tokens(config.added_tokens.iter().map(AddedToken::from))
    }

    /// Loads a `tokenizer.json` file.
    ///
    /// # Errors
    ///
    /// See [`TokenizerConfig::from_file`] and [`Tokenizer::from_config`].
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_config(&TokenizerConfig::from_file(path)?)
    }

    pub fn get_model(&self) -> &Bpe {
        &self.model
    }

    pub fn get_normalizer(&self) -> Option<&Normalizer> {
        self.normalizer.as_ref()
    }

    pub fn get_pre_tokenizer(&self) -> Option<&PreTokenizer> {
        self.pre_tokenizer.as_ref()
    }

    pub fn get_added_tokens(&self) -> impl Iterator<Item = &AddedToken> {
        self.added_tokens.values()
    }

    /// Added tokens take precedence over the model vocabulary.
    pub fn token_to_id(&self, token: &str) -> Option<TokenId> {
        self.added_tokens
            .get(token)
            .map(|t| t.id)
            .or_else(|| self.model.token_to_id(token))
    }

    pub fn id_to_token(&self, id: TokenId) -> Option<&str> {
        self.added_ids
            .get(&id)
            .map(String::as_str)
            .or_else(|| self.model.id_to_token(id))
    }

    /// Encodes `text` into ids, token strings and code-point offsets.
    ///
    /// Every offset is a code-point range of `text`, mapped back through
    /// the normalizer's edits.
    ///
    /// # Errors
    ///
    /// Returns the first error raised by a stage, e.g.
    /// [`BpeError::UnknownSymbol`](crate::BpeError::UnknownSymbol).
    pub fn encode(&self, text: &str) -> Result<Encoding> {
        let mut pretokenized = PreTokenizedString::from(text);

        if let Some(pattern) = &self.raw_pattern {
            pretokenized.split(|_, ns| self.split_on_added_tokens(pattern, &ns))?;
        }
        if let Some(normalizer) = &self.normalizer {
            pretokenized.try_normalize(|ns| normalizer.normalize(ns))?;
        }
        if let Some(pattern) = &self.normalized_pattern {
            pretokenized.split(|_, ns| self.split_on_added_tokens(pattern, &ns))?;
        }
        if let Some(pre_tokenizer) = &self.pre_tokenizer {
            pre_tokenizer.pre_tokenize(&mut pretokenized)?;
        }
        pretokenized.tokenize(|ns| self.model.tokenize(ns.get()))?;

        pretokenized.into_encoding()
    }

    /// Encodes several texts in parallel.
    ///
    /// # Errors
    ///
    /// Returns an error if any text fails to encode.
    pub fn encode_batch(&self, texts: &[&str]) -> Result<Vec<Encoding>> {
        texts.par_iter().map(|text| self.encode(text)).collect()
    }

    /// Cuts `ns` into pending text and finalized added-token splits.
    ///
    /// A match is skipped when it overlaps whitespace an earlier token
    /// swallowed, or when a `single_word` token touches a word char.
    fn split_on_added_tokens(&self, pattern: &Regex, ns: &NormalizedString) -> Result<Vec<Split>> {
        let text = ns.get();
        let mut splits = Vec::new();
        let mut segment_start = 0;

        for mat in pattern.find_iter(text) {
            let mat = mat?;
            if mat.start() < segment_start {
                continue;
            }
            let Some(token) = self.added_tokens.get(mat.as_str()) else {
                continue;
            };
            if token.single_word
                && (text[..mat.start()].chars().next_back().is_some_and(is_word_char)
                    || text[mat.end()..].chars().next().is_some_and(is_word_char))
            {
                continue;
            }

            let start = if token.lstrip {
                segment_start + text[segment_start..mat.start()].trim_end().len()
            } else {
                mat.start()
            };
            let end = if token.rstrip {
                let rest = &text[mat.end()..];
                mat.end() + rest.len() - rest.trim_start().len()
            } else {
                mat.end()
            };

            if start > segment_start
                && let Some(normal) = ns.slice(segment_start..start)
            {
                splits.push(Split::pending(normal));
            }
            if let Some(added) = ns.slice(start..end) {
                let char_len = added.alignments().len();
                let tokens = vec![Token::new(token.id, token.content.as_str(), (0, char_len))];
                splits.push(Split::finalized(added, tokens));
            }
            segment_start = end;
        }
        if segment_start < text.len()
            && let Some(normal) = ns.slice(segment_start..text.len())
        {
            splits.push(Split::pending(normal));
        }

        Ok(splits)
    }
}

impl FromStr for Tokenizer {
    type Err = TokenizerError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_config(&s.parse()?)
    }
}
