//! Merge rank table.
//!
//! Every symbol that appears in a merge rule (as an operand or as a merge
//! result) is interned into a dense [`SymbolId`], so the merge engine can
//! key its lookups on a pair of integers, just like the id-pair tables of
//! a trained byte-level BPE.

use std::collections::HashMap;

use crate::{
    error::LoadError,
    types::{Rank, SymbolId, SymbolPair},
};

/// One ordered pair of symbols that may combine.
///
/// The rank is not stored here: it is the rule's position in the declared
/// list and is assigned when the table is built.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MergeRule {
    pub left: String,
    pub right: String,
}

impl MergeRule {
    pub fn new(left: impl Into<String>, right: impl Into<String>) -> Self {
        Self {
            left: left.into(),
            right: right.into(),
        }
    }

    /// The symbol produced by applying this rule.
    pub fn merged(&self) -> String {
        let mut merged = String::with_capacity(self.left.len() + self.right.len());
        merged.push_str(&self.left);
        merged.push_str(&self.right);
        merged
    }
}

/// Answers "what is the priority of merging `a` with `b`" in O(1).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeRankTable {
    /// Interned symbol strings, indexed by `SymbolId`.
    symbols: Vec<String>,
    index: HashMap<String, SymbolId>,
    /// Maps pairs to (rank, merged symbol).
    merges: HashMap<SymbolPair, (Rank, SymbolId)>,
}

impl MergeRankTable {
    /// Builds the table, assigning each rule its position as rank.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError::DuplicateMerge`] when a pair is declared twice.
    pub fn from_rules(rules: impl IntoIterator<Item = MergeRule>) -> Result<Self, LoadError> {
        let mut table = Self::default();

        for (position, rule) in rules.into_iter().enumerate() {
            let rank = Rank::try_from(position).map_err(|_| LoadError::InvalidMerge {
                index: position,
                rule: format!("{} {}", rule.left, rule.right),
            })?;

            let pair = SymbolPair(table.intern(&rule.left), table.intern(&rule.right));
            if table.merges.contains_key(&pair) {
                return Err(LoadError::DuplicateMerge {
                    index: position,
                    left: rule.left,
                    right: rule.right,
                });
            }

            let merged = table.intern(&rule.merged());
            table.merges.insert(pair, (rank, merged));
        }

        Ok(table)
    }

    /// Rank of merging `left` with `right`, if such a rule exists.
    pub fn rank(&self, left: &str, right: &str) -> Option<Rank> {
        let pair = SymbolPair(self.symbol_id(left)?, self.symbol_id(right)?);
        self.merges.get(&pair).map(|&(rank, _)| rank)
    }

    /// Number of merge rules.
    pub fn len(&self) -> usize {
        self.merges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.merges.is_empty()
    }

    pub(crate) fn symbol_id(&self, symbol: &str) -> Option<SymbolId> {
        self.index.get(symbol).copied()
    }

    pub(crate) fn symbol(&self, id: SymbolId) -> &str {
        self.symbols.get(id as usize).map_or("", String::as_str)
    }

    /// Rank and result of merging an interned pair.
    #[inline]
    pub(crate) fn merge(&self, pair: SymbolPair) -> Option<(Rank, SymbolId)> {
        self.merges.get(&pair).copied()
    }

    fn intern(&mut self, symbol: &str) -> SymbolId {
        if let Some(&id) = self.index.get(symbol) {
            return id;
        }
        let id = self.symbols.len() as SymbolId;
        self.symbols.push(symbol.to_owned());
        self.index.insert(symbol.to_owned(), id);
        id
    }
}
