//! Error types for tokenizer loading, encoding and decoding.
//!
//! Every public operation reports failures through [`Error`], whose variants
//! form the tokenizer's error taxonomy. The detailed causes live in
//! [`LoadError`], [`EncodeError`] and [`DecodeError`] so callers can match on
//! the category and still print a useful message.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::TokenId;

pub type Result<T> = std::result::Result<T, Error>;

/// Error taxonomy of the tokenizer facade.
#[derive(Error, Debug)]
pub enum Error {
    /// An operation other than `load` was attempted before a successful load.
    #[error("tokenizer is not loaded")]
    Uninitialized,

    /// The descriptor could not be read, parsed or resolved.
    #[error("failed to load tokenizer: {0}")]
    LoadFailure(#[from] LoadError),

    /// A produced symbol has no vocabulary entry and no unk fallback exists.
    #[error("failed to encode text: {0}")]
    EncodeFailure(#[from] EncodeError),

    /// The requested id is not part of the vocabulary.
    #[error("failed to decode token: {0}")]
    DecodeFailure(#[from] DecodeError),
}

/// Errors that can occur while loading a tokenizer descriptor.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("cannot read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed descriptor: {0}")]
    Json(#[from] serde_json::Error),

    #[error("no tokenizer.json found under {}", .0.display())]
    MissingDescriptor(PathBuf),

    #[error("unsupported model type {0:?} (expected \"BPE\")")]
    UnsupportedModel(String),

    #[error("unsupported model option {option}: {value:?}")]
    UnsupportedModelOption { option: &'static str, value: String },

    #[error("merge rule #{index} is malformed: {rule:?}")]
    InvalidMerge { index: usize, rule: String },

    #[error("merge rule #{index} repeats the pair ({left:?}, {right:?})")]
    DuplicateMerge {
        index: usize,
        left: String,
        right: String,
    },

    #[error("token id {id} is assigned to both {first:?} and {second:?}")]
    DuplicateId {
        id: TokenId,
        first: String,
        second: String,
    },

    #[error("added token {content:?} claims id {id} which already belongs to {existing:?}")]
    AddedTokenConflict {
        content: String,
        id: TokenId,
        existing: String,
    },

    #[error("unsupported pre-tokenizer {0:?}")]
    UnsupportedPreTokenizer(String),

    #[error("invalid split pattern: {0}")]
    InvalidPattern(#[from] fancy_regex::Error),

    #[error("invalid special tokens map: {0}")]
    InvalidSpecialTokens(String),
}

/// Errors that can occur during text encoding.
#[derive(Error, Debug)]
pub enum EncodeError {
    /// A merged symbol has no vocabulary id and no unk token is configured.
    #[error("symbol {symbol:?} is not in the vocabulary")]
    UnknownSymbol { symbol: String },

    /// Regex engine failed during text splitting (e.g. backtracking limit exceeded).
    #[error("regex match failed: {0}")]
    RegexMatch(String),
}

/// Errors that can occur during token decoding.
#[derive(Error, Debug)]
pub enum DecodeError {
    /// Token ID not found in vocabulary.
    #[error("unknown token id: {0}")]
    UnknownId(TokenId),
}

impl From<fancy_regex::Error> for EncodeError {
    fn from(e: fancy_regex::Error) -> Self {
        Self::RegexMatch(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_error_converts_to_load_failure() {
        let err: Error = LoadError::UnsupportedModel("Unigram".into()).into();
        assert!(matches!(err, Error::LoadFailure(LoadError::UnsupportedModel(_))));
        assert!(err.to_string().contains("Unigram"));
    }

    #[test]
    fn test_decode_error_message_names_id() {
        let err: Error = DecodeError::UnknownId(42).into();
        assert!(matches!(err, Error::DecodeFailure(DecodeError::UnknownId(42))));
        assert_eq!(err.to_string(), "failed to decode token: unknown token id: 42");
    }

    #[test]
    fn test_uninitialized_message() {
        assert_eq!(Error::Uninitialized.to_string(), "tokenizer is not loaded");
    }
}
