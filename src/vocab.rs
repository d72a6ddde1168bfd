//! Token string ↔ id mapping.

use std::collections::HashMap;

use crate::{error::LoadError, types::TokenId};

/// Forward and inverse vocabulary maps.
///
/// Ids need not be contiguous: special tokens of large models routinely sit
/// far above the BPE range, so the inverse map is hashed rather than a `Vec`.
#[derive(Debug, Clone, Default)]
pub struct Vocabulary {
    token_to_id: HashMap<String, TokenId>,
    id_to_token: HashMap<TokenId, String>,
    /// One past the highest id seen so far.
    next_id: TokenId,
}

impl Vocabulary {
    /// Builds the vocabulary from a `model.vocab` object.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError::DuplicateId`] if two strings share an id.
    pub fn from_map(map: HashMap<String, TokenId>) -> Result<Self, LoadError> {
        let mut id_to_token: HashMap<TokenId, String> = HashMap::with_capacity(map.len());
        let mut next_id = 0;

        for (token, &id) in &map {
            if let Some(previous) = id_to_token.insert(id, token.clone()) {
                let (first, second) = if previous <= *token {
                    (previous, token.clone())
                } else {
                    (token.clone(), previous)
                };
                return Err(LoadError::DuplicateId { id, first, second });
            }
            next_id = next_id.max(id.saturating_add(1));
        }

        Ok(Self {
            token_to_id: map,
            id_to_token,
            next_id,
        })
    }

    /// Id of `token`, if present.
    #[inline]
    pub fn get(&self, token: &str) -> Option<TokenId> {
        self.token_to_id.get(token).copied()
    }

    /// String of `id`, if present.
    #[inline]
    pub fn token(&self, id: TokenId) -> Option<&str> {
        self.id_to_token.get(&id).map(String::as_str)
    }

    /// Number of distinct ids.
    pub fn len(&self) -> usize {
        self.id_to_token.len()
    }

    pub fn is_empty(&self) -> bool {
        self.id_to_token.is_empty()
    }

    /// Returns the id of `token`, reserving a fresh id above the current
    /// maximum when it is absent.
    pub fn get_or_insert(&mut self, token: &str) -> TokenId {
        if let Some(id) = self.get(token) {
            return id;
        }
        let id = self.next_id;
        self.token_to_id.insert(token.to_owned(), id);
        self.id_to_token.insert(id, token.to_owned());
        self.next_id = id.saturating_add(1);
        id
    }

    /// Binds `token` to an explicit `id`.
    ///
    /// A token already present under another id is re-pointed at `id`; the old
    /// id keeps decoding to the same string.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError::AddedTokenConflict`] if `id` belongs to a different
    /// string.
    pub fn bind(&mut self, token: &str, id: TokenId) -> Result<(), LoadError> {
        match self.id_to_token.get(&id) {
            Some(existing) if existing != token => {
                return Err(LoadError::AddedTokenConflict {
                    content: token.to_owned(),
                    id,
                    existing: existing.clone(),
                });
            }
            Some(_) => {}
            None => {
                self.id_to_token.insert(id, token.to_owned());
            }
        }
        self.token_to_id.insert(token.to_owned(), id);
        self.next_id = self.next_id.max(id.saturating_add(1));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vocab(entries: &[(&str, TokenId)]) -> Vocabulary {
        Vocabulary::from_map(entries.iter().map(|&(t, id)| (t.to_owned(), id)).collect())
            .expect("vocab should build")
    }

    #[test]
    fn test_forward_and_inverse_lookup() {
        let v = vocab(&[("a", 0), ("b", 1), ("ab", 2)]);
        assert_eq!(v.get("ab"), Some(2));
        assert_eq!(v.token(1), Some("b"));
        assert_eq!(v.get("c"), None);
        assert_eq!(v.token(9), None);
        assert_eq!(v.len(), 3);
    }

    #[test]
    fn test_duplicate_id_is_rejected() {
        let err = Vocabulary::from_map(
            [("a".to_owned(), 0), ("b".to_owned(), 0)].into_iter().collect(),
        );
        match err {
            Err(LoadError::DuplicateId { id, first, second }) => {
                assert_eq!(id, 0);
                assert_eq!((first.as_str(), second.as_str()), ("a", "b"));
            }
            other => panic!("expected DuplicateId, got {other:?}"),
        }
    }

    #[test]
    fn test_insert_reserves_above_max() {
        let mut v = vocab(&[("a", 0), ("b", 7)]);
        assert_eq!(v.get_or_insert("<s>"), 8);
        assert_eq!(v.get_or_insert("<s>"), 8);
        assert_eq!(v.get_or_insert("a"), 0);
        assert_eq!(v.get_or_insert("</s>"), 9);
    }

    #[test]
    fn test_bind_explicit_id() {
        let mut v = vocab(&[("a", 0)]);
        v.bind("<|begin_of_text|>", 128000).expect("free id");
        assert_eq!(v.get("<|begin_of_text|>"), Some(128000));
        assert_eq!(v.token(128000), Some("<|begin_of_text|>"));
        assert_eq!(v.get_or_insert("<new>"), 128001);
    }

    #[test]
    fn test_bind_same_pair_is_noop() {
        let mut v = vocab(&[("<|endoftext|>", 3)]);
        v.bind("<|endoftext|>", 3).expect("same binding");
        assert_eq!(v.len(), 1);
    }

    #[test]
    fn test_bind_conflicting_id_fails() {
        let mut v = vocab(&[("a", 0)]);
        let err = v.bind("<s>", 0);
        assert!(matches!(err, Err(LoadError::AddedTokenConflict { id: 0, .. })));
    }
}
