//! Added and special tokens.
//!
//! Added tokens are literal strings that bypass BPE: they are cut out of the
//! raw text before pre-tokenization and emitted as a single id. Special
//! tokens are added tokens that additionally fill a role (bos, eos, unk,
//! pad) resolved from the companion files.

use std::collections::HashMap;

use fancy_regex::Regex;
use log::{debug, warn};

use crate::{
    descriptor::{AddedTokenSpec, SpecialTokenValue, SpecialTokensMap},
    error::{EncodeError, LoadError},
    types::TokenId,
    vocab::Vocabulary,
};

/// A literal token with its resolved id and matching flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddedToken {
    pub content: String,
    pub id: TokenId,
    /// Only match when not surrounded by word characters.
    pub single_word: bool,
    /// Swallow whitespace on the left of a match.
    pub lstrip: bool,
    /// Swallow whitespace on the right of a match.
    pub rstrip: bool,
    pub normalized: bool,
    pub special: bool,
}

impl AddedToken {
    /// A special token with no matching flags.
    pub fn special(content: impl Into<String>, id: TokenId) -> Self {
        Self {
            content: content.into(),
            id,
            single_word: false,
            lstrip: false,
            rstrip: false,
            normalized: false,
            special: true,
        }
    }
}

/// A piece of input text after added tokens have been cut out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Segment<'a> {
    /// Ordinary text, still to be pre-tokenized and merged.
    Text(&'a str),
    /// A matched added token.
    Added(TokenId),
}

/// Registry of added tokens plus the matcher that finds them in text.
#[derive(Debug, Clone, Default)]
pub struct AddedVocabulary {
    tokens: Vec<AddedToken>,
    by_content: HashMap<String, usize>,
    by_id: HashMap<TokenId, usize>,
    /// Escaped alternation of all contents, longest first.
    pattern: Option<Regex>,
}

impl AddedVocabulary {
    /// Registers the descriptor's `added_tokens`, binding each one in `vocab`.
    ///
    /// Entries with an explicit id take it (a clash with another string is a
    /// load error); entries without one reuse the vocabulary id of their
    /// content or get a fresh id above the current maximum.
    pub fn from_specs(specs: &[AddedTokenSpec], vocab: &mut Vocabulary) -> Result<Self, LoadError> {
        let mut added = Self::default();
        for spec in specs {
            if spec.content.is_empty() {
                warn!("skipping added token with empty content");
                continue;
            }
            let id = match spec.id {
                Some(id) => {
                    vocab.bind(&spec.content, id)?;
                    id
                }
                None => vocab.get_or_insert(&spec.content),
            };
            added.insert(AddedToken {
                content: spec.content.clone(),
                id,
                single_word: spec.single_word,
                lstrip: spec.lstrip,
                rstrip: spec.rstrip,
                normalized: spec.normalized,
                special: spec.special,
            })?;
        }
        added.rebuild_pattern()?;
        Ok(added)
    }

    /// Registers one more token and recompiles the matcher.
    pub fn add(&mut self, token: AddedToken) -> Result<(), LoadError> {
        self.insert(token)?;
        self.rebuild_pattern()
    }

    fn insert(&mut self, token: AddedToken) -> Result<(), LoadError> {
        if let Some(&index) = self.by_content.get(&token.content) {
            let existing = &self.tokens[index];
            if existing.id != token.id {
                return Err(LoadError::AddedTokenConflict {
                    content: token.content,
                    id: existing.id,
                    existing: existing.content.clone(),
                });
            }
            return Ok(());
        }
        let index = self.tokens.len();
        self.by_content.insert(token.content.clone(), index);
        self.by_id.insert(token.id, index);
        self.tokens.push(token);
        Ok(())
    }

    fn rebuild_pattern(&mut self) -> Result<(), LoadError> {
        if self.tokens.is_empty() {
            self.pattern = None;
            return Ok(());
        }
        let mut contents: Vec<&str> = self.tokens.iter().map(|t| t.content.as_str()).collect();
        // alternation is leftmost-first, so longer literals must come first
        contents.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        let pattern = contents
            .into_iter()
            .map(fancy_regex::escape)
            .collect::<Vec<_>>()
            .join("|");
        self.pattern = Some(Regex::new(&pattern)?);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Id of an added token whose content is exactly `content`.
    pub fn get(&self, content: &str) -> Option<TokenId> {
        self.by_content.get(content).map(|&i| self.tokens[i].id)
    }

    pub fn token(&self, id: TokenId) -> Option<&AddedToken> {
        self.by_id.get(&id).map(|&i| &self.tokens[i])
    }

    pub fn contains_id(&self, id: TokenId) -> bool {
        self.by_id.contains_key(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &AddedToken> {
        self.tokens.iter()
    }

    /// Cuts added tokens out of `text`, returning segments in input order.
    ///
    /// Matching is leftmost, and longest-first at a given position. A match
    /// rejected by `single_word` stays part of the surrounding text.
    ///
    /// # Errors
    ///
    /// Returns [`EncodeError::RegexMatch`] if the matcher fails while
    /// scanning.
    pub fn split<'a>(&self, text: &'a str) -> Result<Vec<Segment<'a>>, EncodeError> {
        let Some(pattern) = &self.pattern else {
            return Ok(if text.is_empty() {
                Vec::new()
            } else {
                vec![Segment::Text(text)]
            });
        };

        let mut segments = Vec::new();
        // end of the last emitted segment
        let mut cursor = 0;
        let mut search = 0;

        while search < text.len() {
            let Some(mat) = pattern.find_from_pos(text, search)? else {
                break;
            };
            let Some(token) = self.by_content.get(mat.as_str()).map(|&i| &self.tokens[i]) else {
                search = mat.end().max(search + 1);
                continue;
            };

            if token.single_word && !is_word_bounded(text, mat.start(), mat.end()) {
                search = next_char_boundary(text, mat.start());
                continue;
            }

            let mut start = mat.start();
            if token.lstrip {
                start = cursor + text[cursor..start].trim_end().len();
            }
            let mut end = mat.end();
            if token.rstrip {
                end = text.len() - text[end..].trim_start().len();
            }

            if start > cursor {
                segments.push(Segment::Text(&text[cursor..start]));
            }
            segments.push(Segment::Added(token.id));
            cursor = end;
            search = end;
        }

        if cursor < text.len() {
            segments.push(Segment::Text(&text[cursor..]));
        }
        Ok(segments)
    }
}

fn is_word_char(ch: char) -> bool {
    ch.is_alphanumeric() || ch == '_'
}

fn is_word_bounded(text: &str, start: usize, end: usize) -> bool {
    let before = text[..start].chars().next_back();
    let after = text[end..].chars().next();
    !before.is_some_and(is_word_char) && !after.is_some_and(is_word_char)
}

fn next_char_boundary(text: &str, index: usize) -> usize {
    text[index..]
        .chars()
        .next()
        .map_or(text.len(), |ch| index + ch.len_utf8())
}

/// Ids bound to the special-token roles.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SpecialTokens {
    pub bos: Option<TokenId>,
    pub eos: Option<TokenId>,
    pub unk: Option<TokenId>,
    pub pad: Option<TokenId>,
}

impl SpecialTokens {
    /// Binds each role of `map` to an id.
    ///
    /// A literal already registered as an added token keeps that id. A
    /// literal found only in the vocabulary keeps its vocabulary id, and a
    /// literal found nowhere gets a fresh id. Either way the literal is
    /// registered as a special added token so it is matched in text and
    /// decoded verbatim.
    ///
    /// bos and eos fall back to [`guess_role`] over the special added
    /// tokens when the map leaves them unbound.
    pub fn resolve(
        map: &SpecialTokensMap,
        added: &mut AddedVocabulary,
        vocab: &mut Vocabulary,
    ) -> Result<Self, LoadError> {
        let mut bind = |value: Option<&SpecialTokenValue>| -> Result<Option<TokenId>, LoadError> {
            value.map(|v| bind_literal(v.content(), added, vocab)).transpose()
        };

        let mut resolved = Self {
            bos: bind(map.bos_token.as_ref())?,
            eos: bind(map.eos_token.as_ref())?,
            unk: bind(map.unk_token.as_ref())?,
            pad: bind(map.pad_token.as_ref())?,
        };

        if resolved.bos.is_none() {
            resolved.bos = guess_role(added, "bos", &["bos", "begin"]);
        }
        if resolved.eos.is_none() {
            resolved.eos = guess_role(added, "eos", &["eos", "end"]);
        }
        Ok(resolved)
    }
}

fn bind_literal(
    literal: &str,
    added: &mut AddedVocabulary,
    vocab: &mut Vocabulary,
) -> Result<TokenId, LoadError> {
    if let Some(id) = added.get(literal) {
        return Ok(id);
    }
    if literal.is_empty() {
        return Err(LoadError::InvalidSpecialTokens(
            "special token literal is empty".to_owned(),
        ));
    }
    let id = vocab.get_or_insert(literal);
    debug!("registering special token {literal:?} as id {id}");
    added.add(AddedToken::special(literal, id))?;
    Ok(id)
}

/// Picks the unique special added token whose lowercased content contains
/// one of `needles`.
pub fn guess_role(added: &AddedVocabulary, role: &str, needles: &[&str]) -> Option<TokenId> {
    let mut candidates = added.iter().filter(|t| {
        let content = t.content.to_lowercase();
        t.special && needles.iter().any(|n| content.contains(n))
    });

    let first = candidates.next()?;
    if candidates.next().is_some() {
        warn!("several special tokens could serve as {role}; leaving it unbound");
        return None;
    }
    debug!("guessed {role} token {:?} (id {})", first.content, first.id);
    Some(first.id)
}
