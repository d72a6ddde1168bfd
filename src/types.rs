//! Type aliases and shared types for tokenizer loading and encoding.
//!
//! These type aliases provide semantic clarity throughout the codebase.

/// Represents a token identifier in the vocabulary.
///
/// Ids come straight from the descriptor's `model.vocab` map; ids reserved
/// for special or added tokens missing from the vocabulary are allocated
/// above the current maximum.
pub type TokenId = u64;

/// Priority of a merge rule.
///
/// Equals the rule's position in the declared merge list. Lower values merge
/// earlier.
pub type Rank = u32;

/// Dense index of an interned merge symbol.
pub(crate) type SymbolId = u32;

/// A pair of adjacent interned symbols.
///
/// Used as the key for merge-rank lookups during encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct SymbolPair(pub(crate) SymbolId, pub(crate) SymbolId);

/// Sentinel returned by `bos_tok()`/`eos_tok()` when no binding exists.
pub const UNBOUND_TOKEN_ID: TokenId = 0;
