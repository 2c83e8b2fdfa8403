//! Error types for the merge engine, the BPE model, config loading and the
//! tokenizer pipeline.

use thiserror::Error;

/// Invariant violations inside a [`Word`](crate::Word).
///
/// These indicate a bug in the caller or the engine, never bad user input.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WordError {
    #[error("symbol index {index} is out of bounds for a word of {len} symbols")]
    IndexOutOfBounds { index: usize, len: usize },
}

/// Errors raised while building or running the BPE model.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BpeError {
    #[error("merge token {0:?} is not in the vocabulary")]
    MergeTokenOutOfVocabulary(String),
    #[error("unk token {0:?} is not in the vocabulary")]
    UnkTokenOutOfVocabulary(String),
    #[error("dropout must be in [0, 1), got {0}")]
    InvalidDropout(f32),
    #[error("symbol {0:?} is not in the vocabulary and no unk token is configured")]
    UnknownSymbol(String),
    #[error(transparent)]
    Word(#[from] WordError),
}

/// Errors raised while reading a `tokenizer.json` configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Json(#[from] serde_json::Error),
    #[error("malformed merge entry {0:?}: expected \"left right\"")]
    MalformedMerge(String),
    #[error("unsupported model type {0:?}, only BPE is available")]
    UnsupportedModel(String),
}

/// Top-level error for the tokenizer pipeline.
#[derive(Error, Debug)]
pub enum TokenizerError {
    #[error("regex error: {0}")]
    Regex(#[from] Box<fancy_regex::Error>),
    #[error(transparent)]
    Bpe(#[from] BpeError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Word(#[from] WordError),
    #[error("split {0:?} was never tokenized")]
    PendingSplit(String),
}

impl From<fancy_regex::Error> for TokenizerError {
    fn from(e: fancy_regex::Error) -> Self {
        Self::Regex(Box::new(e))
    }
}

pub type Result<T, E = TokenizerError> = std::result::Result<T, E>;
