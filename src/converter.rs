//! BPE merge engine.
//!
//! Applies ranked merge rules to one pre-tokenized word, already expressed
//! in the byte-level alphabet, then resolves the surviving symbols to
//! vocabulary ids.
//!
//! Merges are driven by a priority queue of candidate pairs instead of
//! re-scanning the word after every merge: candidates are popped lowest rank
//! first, leftmost first among equal ranks, validated against the live
//! sequence, and the neighbours of each merged symbol are pushed as new
//! candidates. The output is identical to the naive "merge the best pair,
//! repeat" loop.

use std::{
    cmp::Ordering,
    collections::BinaryHeap,
};

use crate::{
    error::EncodeError,
    merges::MergeRankTable,
    types::{Rank, SymbolId, SymbolPair, TokenId},
    vocab::Vocabulary,
};

/// One symbol of the working sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Piece {
    /// A symbol that takes part in at least one merge rule.
    Known(SymbolId),
    /// A character no rule mentions; it can never merge.
    Bare(char),
}

impl Piece {
    fn symbol_id(self) -> Option<SymbolId> {
        match self {
            Self::Known(id) => Some(id),
            Self::Bare(_) => None,
        }
    }
}

/// Item in the priority queue for merge ordering.
#[derive(Debug, PartialEq, Eq)]
struct MergeCandidate {
    rank: Rank,
    pair: SymbolPair,
    /// Index of the left symbol in the working sequence.
    position: usize,
}

impl PartialOrd for MergeCandidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MergeCandidate {
    fn cmp(&self, other: &Self) -> Ordering {
        // reversed so the max-heap pops the lowest rank, then the leftmost
        other
            .rank
            .cmp(&self.rank)
            .then_with(|| other.position.cmp(&self.position))
    }
}

/// Merge engine bound to one vocabulary and rank table.
#[derive(Debug, Clone)]
pub struct BPEConverter {
    vocab: Vocabulary,
    merges: MergeRankTable,
    unk: Option<TokenId>,
    fuse_unk: bool,
    ignore_merges: bool,
}

impl BPEConverter {
    /// Creates a converter over a loaded vocabulary and rank table.
    ///
    /// # Arguments
    ///
    /// * `vocab` - Byte-level symbol strings and their ids.
    /// * `merges` - Merge rules ranked by their position in the descriptor.
    ///   Lower rank means higher priority.
    pub fn new(vocab: Vocabulary, merges: MergeRankTable) -> Self {
        Self {
            vocab,
            merges,
            unk: None,
            fuse_unk: false,
            ignore_merges: false,
        }
    }

    /// Substitutes `unk` for symbols missing from the vocabulary. With
    /// `fuse`, a run of such symbols inside one word yields a single `unk`.
    pub fn with_unk(mut self, unk: Option<TokenId>, fuse: bool) -> Self {
        self.unk = unk;
        self.fuse_unk = fuse;
        self
    }

    /// Emits a word that is already a vocabulary entry without merging it.
    pub fn with_ignore_merges(mut self, ignore_merges: bool) -> Self {
        self.ignore_merges = ignore_merges;
        self
    }

    pub fn vocab(&self) -> &Vocabulary {
        &self.vocab
    }

    pub fn merges(&self) -> &MergeRankTable {
        &self.merges
    }

    pub fn unk(&self) -> Option<TokenId> {
        self.unk
    }

    /// Final symbols of a byte-level `word` after all merges.
    ///
    /// # Arguments
    ///
    /// * `word` - One pre-tokenized word, already in the byte-level alphabet.
    ///
    /// # Returns
    ///
    /// The surviving symbols, left to right. Concatenated they equal `word`.
    pub fn merge_word(&self, word: &str) -> Vec<String> {
        self.merge(word)
            .into_iter()
            .map(|piece| {
                let mut buf = [0u8; 4];
                self.piece_str(piece, &mut buf).to_owned()
            })
            .collect()
    }

    /// Ids of a byte-level `word`.
    ///
    /// # Returns
    ///
    /// One id per surviving symbol, or fewer when `fuse_unk` collapses a
    /// run of unknown symbols.
    ///
    /// # Errors
    ///
    /// Returns [`EncodeError::UnknownSymbol`] when a final symbol has no
    /// vocabulary entry and no unk token is configured.
    pub fn tokenize_word(&self, word: &str) -> Result<Vec<TokenId>, EncodeError> {
        let mut ids = Vec::new();
        self.tokenize_word_into(word, &mut ids)?;
        Ok(ids)
    }

    /// Appends the ids of a byte-level `word` to `out`.
    ///
    /// With `ignore_merges`, a word that is itself a vocabulary entry is
    /// emitted as that entry without merging.
    ///
    /// # Arguments
    ///
    /// * `word` - One pre-tokenized word, already in the byte-level alphabet.
    /// * `out` - Buffer the ids are appended to. On error it may hold the ids
    ///   of symbols resolved before the failing one.
    pub fn tokenize_word_into(&self, word: &str, out: &mut Vec<TokenId>) -> Result<(), EncodeError> {
        if self.ignore_merges {
            if let Some(id) = self.vocab.get(word) {
                out.push(id);
                return Ok(());
            }
        }

        let mut previous_unk = false;
        for piece in self.merge(word) {
            let mut buf = [0u8; 4];
            let symbol = self.piece_str(piece, &mut buf);
            if let Some(id) = self.vocab.get(symbol) {
                out.push(id);
                previous_unk = false;
                continue;
            }
            let Some(unk) = self.unk else {
                return Err(EncodeError::UnknownSymbol {
                    symbol: symbol.to_owned(),
                });
            };
            if !(self.fuse_unk && previous_unk) {
                out.push(unk);
            }
            previous_unk = true;
        }
        Ok(())
    }

    fn piece_str<'a>(&'a self, piece: Piece, buf: &'a mut [u8; 4]) -> &'a str {
        match piece {
            Piece::Known(id) => self.merges.symbol(id),
            Piece::Bare(ch) => ch.encode_utf8(buf),
        }
    }

    fn merge(&self, word: &str) -> Vec<Piece> {
        let pieces: Vec<Piece> = word
            .chars()
            .map(|ch| {
                let mut buf = [0u8; 4];
                match self.merges.symbol_id(ch.encode_utf8(&mut buf)) {
                    Some(id) => Piece::Known(id),
                    None => Piece::Bare(ch),
                }
            })
            .collect();

        if pieces.len() <= 1 {
            return pieces;
        }

        let mut heap = BinaryHeap::new();
        self.initialize_minheap(&pieces, &mut heap);

        // None marks a slot consumed by a merge to its left
        let mut results: Vec<Option<Piece>> = pieces.into_iter().map(Some).collect();

        while let Some(candidate) = heap.pop() {
            let pos = candidate.position;

            let Some(left) = results.get(pos).copied().flatten().and_then(Piece::symbol_id) else {
                continue;
            };

            let mut right_idx = pos + 1;
            while right_idx < results.len() && matches!(results.get(right_idx), Some(None)) {
                right_idx += 1;
            }
            let Some(right) = results.get(right_idx).copied().flatten().and_then(Piece::symbol_id)
            else {
                continue;
            };

            // stale entry: one side has merged since it was queued
            if candidate.pair != SymbolPair(left, right) {
                continue;
            }
            let Some((_, merged)) = self.merges.merge(candidate.pair) else {
                continue;
            };

            results[pos] = Some(Piece::Known(merged));
            results[right_idx] = None;

            self.track_new_merge_candidate(&mut heap, &results, pos, merged, true);
            self.track_new_merge_candidate(&mut heap, &results, pos, merged, false);
        }

        results.into_iter().flatten().collect()
    }

    /// Queues the pair formed by the symbol merged at `pos` and its nearest
    /// live neighbour on one side, if a rule exists for it.
    fn track_new_merge_candidate(
        &self,
        heap: &mut BinaryHeap<MergeCandidate>,
        results: &[Option<Piece>],
        pos: usize,
        merged: SymbolId,
        check_left: bool,
    ) {
        let n = results.len();
        let idx = if check_left {
            if pos == 0 {
                return;
            }
            let mut idx = pos - 1;
            while idx > 0 && matches!(results.get(idx), Some(None)) {
                idx -= 1;
            }
            idx
        } else {
            let mut idx = pos + 1;
            while idx < n && matches!(results.get(idx), Some(None)) {
                idx += 1;
            }
            idx
        };

        let Some(neighbour) = results.get(idx).copied().flatten().and_then(Piece::symbol_id) else {
            return;
        };

        let pair = if check_left {
            SymbolPair(neighbour, merged)
        } else {
            SymbolPair(merged, neighbour)
        };

        if let Some((rank, _)) = self.merges.merge(pair) {
            heap.push(MergeCandidate {
                rank,
                pair,
                position: if check_left { idx } else { pos },
            });
        }
    }

    fn initialize_minheap(&self, pieces: &[Piece], heap: &mut BinaryHeap<MergeCandidate>) {
        for (position, window) in pieces.windows(2).enumerate() {
            let (Some(left), Some(right)) = (window[0].symbol_id(), window[1].symbol_id()) else {
                continue;
            };
            let pair = SymbolPair(left, right);
            if let Some((rank, _)) = self.merges.merge(pair) {
                heap.push(MergeCandidate {
                    rank,
                    pair,
                    position,
                });
            }
        }
    }
}
