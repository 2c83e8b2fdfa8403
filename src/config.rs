//! Loading of HuggingFace-style `tokenizer.json` files.
//!
//! Only the parts the pipeline runs are typed. `truncation`, `padding`,
//! `post_processor` and `decoder` are carried as raw JSON so a config
//! round-trips through this crate without losing them.

use std::{fs, path::Path, str::FromStr};

use serde::Deserialize;
use serde_json::Value;

use crate::{
    error::{ConfigError, Result, TokenizerError},
    model::{Bpe, BpeBuilder},
    normalizer::Normalizer,
    pattern::Pattern,
    pre_tokenizer::{PreTokenizer, SplitBehavior},
    types::{TokenId, Vocab},
};

/// Top-level `tokenizer.json` document.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenizerConfig {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub truncation: Option<Value>,
    #[serde(default)]
    pub padding: Option<Value>,
    #[serde(default)]
    pub added_tokens: Vec<AddedTokenConfig>,
    #[serde(default)]
    pub normalizer: Option<NormalizerConfig>,
    #[serde(default)]
    pub pre_tokenizer: Option<PreTokenizerConfig>,
    #[serde(default)]
    pub post_processor: Option<Value>,
    #[serde(default)]
    pub decoder: Option<Value>,
    pub model: ModelConfig,
}

impl TokenizerConfig {
    /// Reads and parses a config file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read and
    /// [`ConfigError::Json`] if it is not a valid config.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let config: Self = fs::read_to_string(path)?.parse()?;
        log::debug!(
            "loaded tokenizer config from {} ({} added tokens)",
            path.display(),
            config.added_tokens.len()
        );
        Ok(config)
    }
}

impl FromStr for TokenizerConfig {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(serde_json::from_str(s)?)
    }
}

/// An entry of `added_tokens`.
///
/// Every flag is applied by [`AddedToken`](crate::AddedToken). A missing
/// `normalized` reads as `false`, so the token matches the raw input.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AddedTokenConfig {
    pub id: TokenId,
    pub content: String,
    #[serde(default)]
    pub single_word: bool,
    #[serde(default)]
    pub lstrip: bool,
    #[serde(default)]
    pub rstrip: bool,
    #[serde(default)]
    pub normalized: bool,
    #[serde(default)]
    pub special: bool,
}

/// Literal or regex pattern as written in the config.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub enum PatternConfig {
    String(String),
    Regex(String),
}

impl TryFrom<&PatternConfig> for Pattern {
    type Error = TokenizerError;

    fn try_from(config: &PatternConfig) -> Result<Self> {
        match config {
            PatternConfig::String(literal) => Ok(Pattern::literal(literal.as_str())),
            PatternConfig::Regex(regex) => Pattern::regex(regex),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type")]
pub enum NormalizerConfig {
    Lowercase,
    Strip {
        #[serde(default = "default_true")]
        strip_left: bool,
        #[serde(default = "default_true")]
        strip_right: bool,
    },
    Replace {
        pattern: PatternConfig,
        content: String,
    },
    Prepend {
        prepend: String,
    },
    Sequence {
        normalizers: Vec<NormalizerConfig>,
    },
}

fn default_true() -> bool {
    true
}

impl TryFrom<&NormalizerConfig> for Normalizer {
    type Error = TokenizerError;

    fn try_from(config: &NormalizerConfig) -> Result<Self> {
        Ok(match config {
            NormalizerConfig::Lowercase => Normalizer::Lowercase,
            NormalizerConfig::Strip {
                strip_left,
                strip_right,
            } => Normalizer::Strip {
                left: *strip_left,
                right: *strip_right,
            },
            NormalizerConfig::Replace { pattern, content } => Normalizer::Replace {
                pattern: pattern.try_into()?,
                content: content.clone(),
            },
            NormalizerConfig::Prepend { prepend } => Normalizer::Prepend(prepend.clone()),
            NormalizerConfig::Sequence { normalizers } => Normalizer::Sequence(
                normalizers
                    .iter()
                    .map(Normalizer::try_from)
                    .collect::<Result<_>>()?,
            ),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type")]
pub enum PreTokenizerConfig {
    WhitespaceSplit,
    Split {
        pattern: PatternConfig,
        behavior: SplitBehavior,
        #[serde(default)]
        invert: bool,
    },
    Sequence {
        pretokenizers: Vec<PreTokenizerConfig>,
    },
}

impl TryFrom<&PreTokenizerConfig> for PreTokenizer {
    type Error = TokenizerError;

    fn try_from(config: &PreTokenizerConfig) -> Result<Self> {
        Ok(match config {
            PreTokenizerConfig::WhitespaceSplit => PreTokenizer::WhitespaceSplit,
            PreTokenizerConfig::Split {
                pattern,
                behavior,
                invert,
            } => PreTokenizer::Split {
                pattern: pattern.try_into()?,
                behavior: *behavior,
                invert: *invert,
            },
            PreTokenizerConfig::Sequence { pretokenizers } => PreTokenizer::Sequence(
                pretokenizers
                    .iter()
                    .map(PreTokenizer::try_from)
                    .collect::<Result<_>>()?,
            ),
        })
    }
}

/// One merge rule: `"left right"` or `["left", "right"]`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum MergeEntry {
    Joined(String),
    Parts(Vec<String>),
}

/// The `model` section. Only BPE models are supported.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    #[serde(rename = "type", default)]
    pub model_type: Option<String>,
    #[serde(default)]
    pub dropout: Option<f32>,
    #[serde(default)]
    pub dropout_seed: Option<u64>,
    #[serde(default)]
    pub unk_token: Option<String>,
    #[serde(default)]
    pub continuing_subword_prefix: Option<String>,
    #[serde(default)]
    pub end_of_word_suffix: Option<String>,
    #[serde(default)]
    pub fuse_unk: bool,
    #[serde(default)]
    pub byte_fallback: bool,
    #[serde(default)]
    pub vocab: Vocab,
    #[serde(default)]
    pub merges: Vec<MergeEntry>,
}

impl ModelConfig {
    /// Merges as ordered `(left, right)` pairs.
    ///
    /// Pair entries that do not have exactly two sides are skipped with a
    /// warning. A joined entry is split at its first space.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MalformedMerge`] for a joined entry with no space.
    pub fn flattened_merges(&self) -> Result<Vec<(String, String)>, ConfigError> {
        let mut merges = Vec::with_capacity(self.merges.len());

        for (i, entry) in self.merges.iter().enumerate() {
            match entry {
                MergeEntry::Joined(joined) => {
                    let (left, right) = joined
                        .split_once(' ')
                        .ok_or_else(|| ConfigError::MalformedMerge(joined.clone()))?;
                    merges.push((left.to_owned(), right.to_owned()));
                }
                MergeEntry::Parts(parts) => match parts.as_slice() {
                    [left, right] => merges.push((left.clone(), right.clone())),
                    _ => log::warn!(
                        "skipping merge #{i}: expected 2 parts, got {}",
                        parts.len()
                    ),
                },
            }
        }

        Ok(merges)
    }

    /// Builds the BPE model described by this section.
    ///
    /// A missing `type` is read as BPE.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnsupportedModel`] for non-BPE models, plus any
    /// error from [`ModelConfig::flattened_merges`] or [`BpeBuilder::build`].
    pub fn build(&self) -> Result<Bpe> {
        if let Some(model_type) = &self.model_type
            && model_type != "BPE"
        {
            return Err(ConfigError::UnsupportedModel(model_type.clone()).into());
        }

        let mut builder = BpeBuilder::new()
            .vocab_and_merges(self.vocab.clone(), self.flattened_merges()?)
            .fuse_unk(self.fuse_unk)
            .byte_fallback(self.byte_fallback);
        if let Some(p) = self.dropout {
            builder = builder.dropout(p);
        }
        if let Some(seed) = self.dropout_seed {
            builder = builder.dropout_seed(seed);
        }
        if let Some(unk) = &self.unk_token {
            builder = builder.unk_token(unk.as_str());
        }
        if let Some(prefix) = &self.continuing_subword_prefix {
            builder = builder.continuing_subword_prefix(prefix.as_str());
        }
        if let Some(suffix) = &self.end_of_word_suffix {
            builder = builder.end_of_word_suffix(suffix.as_str());
        }

        Ok(builder.build()?)
    }
}
