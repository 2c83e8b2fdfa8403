//! BPE subword tokenization.
//!
//! The core is a priority-queue merge engine over a linked list of symbols
//! ([`Word`]), driven by a ranked merge table. Around it sits a HuggingFace
//! compatible pipeline: added tokens, a [`Normalizer`], a [`PreTokenizer`] and
//! the [`Bpe`] model, staged through a [`PreTokenizedString`] and loaded from a
//! `tokenizer.json` via [`TokenizerConfig`].

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(unused_must_use)]

mod types;

mod error;
mod word;

mod converter;
mod pattern;
mod pretokenized;

mod normalizer;
mod pre_tokenizer;

mod config;
mod model;
mod tokenizer;

pub use config::{
    AddedTokenConfig, MergeEntry, ModelConfig, NormalizerConfig, PatternConfig,
    PreTokenizerConfig, TokenizerConfig,
};
pub use converter::BytesToCharOffsetConverter;
pub use error::{BpeError, ConfigError, Result, TokenizerError, WordError};
pub use model::{Bpe, BpeBuilder, DEFAULT_CACHE_CAPACITY};
pub use normalizer::Normalizer;
pub use pattern::Pattern;
pub use pre_tokenizer::{PreTokenizer, SplitBehavior};
pub use pretokenized::{Encoding, NormalizedString, PreTokenizedString, Split};
pub use tokenizer::{AddedToken, Tokenizer};
pub use types::{MergeMap, Offsets, Pair, PairVal, Rank, Token, TokenId, Vocab, WChange};
pub use word::{DEFAULT_DROPOUT_SEED, Dropout, Symbol, Word};
