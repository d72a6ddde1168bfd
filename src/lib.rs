//! Byte-level BPE tokenizer engine for `tokenizer.json` descriptors.
//!
//! Loads the vocabulary, ranked merge rules, pre-tokenizer settings and
//! added/special tokens of a byte-level BPE model, then encodes text to ids
//! and decodes ids back to text one token at a time.
//!
//! Encoding pipeline:
//! 1. Cut added tokens out of the raw text (longest literal first).
//! 2. Pre-tokenize each remaining segment (GPT-2 regex, `Split`, `Digits`).
//! 3. Map each word's bytes to the printable byte-level alphabet.
//! 4. Apply merges lowest rank first and look the symbols up in the vocabulary.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(unused_must_use)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

pub mod added_tokens;
pub mod artifacts;
pub mod byte_level;
pub mod converter;
pub mod descriptor;
pub mod error;
pub mod merges;
pub mod pre_tokenizer;
pub mod tokenizer;
pub mod types;
pub mod vocab;

pub use error::{DecodeError, EncodeError, Error, LoadError, Result};
pub use tokenizer::{HFTokenizer, Tokenizer, TokenizerState};
pub use types::{Rank, TokenId, UNBOUND_TOKEN_ID};
