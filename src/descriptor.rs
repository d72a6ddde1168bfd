//! In-memory shape of a `tokenizer.json` descriptor.
//!
//! Only the sections this engine consumes are modelled; everything else in
//! the file is ignored by serde. Parsing is purely structural: the merge
//! list is canonicalised into [`MergeRule`]s here, but ranks, ids and
//! special-token bindings are resolved by the components that own them.

use std::{collections::HashMap, fs, path::Path};

use log::warn;
use serde::Deserialize;
use serde_json::Value;

use crate::{error::LoadError, merges::MergeRule, types::TokenId};

/// Prefix of the header line some merge files carry (`#version: 0.2`).
const VERSION_HEADER: &str = "#version";

/// A parsed tokenizer descriptor.
#[derive(Debug, Clone, Deserialize)]
pub struct Descriptor {
    /// Informational only.
    #[serde(default)]
    pub version: Option<String>,
    pub model: ModelSection,
    /// Only presence is consulted.
    #[serde(default)]
    pub normalizer: Option<Value>,
    #[serde(default)]
    pub pre_tokenizer: Option<Value>,
    #[serde(default)]
    pub added_tokens: Option<Vec<AddedTokenSpec>>,
    #[serde(default)]
    pub post_processor: Option<Value>,
    #[serde(default)]
    pub decoder: Option<Value>,
}

/// The `model` section. Only byte-level BPE models are accepted.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelSection {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    pub vocab: HashMap<String, TokenId>,
    pub merges: Vec<MergeEntry>,
    #[serde(default)]
    pub unk_token: Option<String>,
    #[serde(default)]
    pub fuse_unk: bool,
    #[serde(default)]
    pub ignore_merges: bool,
    #[serde(default)]
    pub continuing_subword_prefix: Option<String>,
    #[serde(default)]
    pub end_of_word_suffix: Option<String>,
    #[serde(default)]
    pub dropout: Option<f64>,
    #[serde(default)]
    pub byte_fallback: bool,
}

/// One element of `model.merges`, in either of the two encodings found in
/// the wild.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum MergeEntry {
    /// Legacy `"left right"` line, split on the first space.
    Line(String),
    /// `["left", "right"]`, required when a symbol itself contains a space.
    Pair(String, String),
}

impl MergeEntry {
    /// Canonicalises this entry into a rule.
    ///
    /// Returns `Ok(None)` for `#version` header lines.
    pub fn to_rule(&self, index: usize) -> Result<Option<MergeRule>, LoadError> {
        let (left, right) = match self {
            Self::Line(line) if line.starts_with(VERSION_HEADER) => return Ok(None),
            Self::Line(line) => line.split_once(' ').ok_or_else(|| LoadError::InvalidMerge {
                index,
                rule: line.clone(),
            })?,
            Self::Pair(left, right) => (left.as_str(), right.as_str()),
        };

        if left.is_empty() || right.is_empty() {
            return Err(LoadError::InvalidMerge {
                index,
                rule: format!("{left} {right}"),
            });
        }

        Ok(Some(MergeRule::new(left, right)))
    }
}

/// An entry of the top-level `added_tokens` list.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AddedTokenSpec {
    #[serde(default)]
    pub id: Option<TokenId>,
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

/// `pre_tokenizer` section, restricted to the stages the engine implements.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type")]
pub enum PreTokenizerSpec {
    ByteLevel {
        #[serde(default = "default_true")]
        add_prefix_space: bool,
        #[serde(default = "default_true")]
        trim_offsets: bool,
        #[serde(default = "default_true")]
        use_regex: bool,
    },
    Split {
        pattern: SplitPatternSpec,
        behavior: SplitBehavior,
        #[serde(default)]
        invert: bool,
    },
    Digits {
        #[serde(default)]
        individual_digits: bool,
    },
    Sequence {
        pretokenizers: Vec<PreTokenizerSpec>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub enum SplitPatternSpec {
    String(String),
    Regex(String),
}

/// What a `Split` stage does with the matched delimiters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum SplitBehavior {
    Removed,
    Isolated,
    MergedWithPrevious,
    MergedWithNext,
    Contiguous,
}

fn default_true() -> bool {
    true
}

const SUPPORTED_PRE_TOKENIZERS: [&str; 4] = ["ByteLevel", "Split", "Digits", "Sequence"];

impl PreTokenizerSpec {
    /// Parses a `pre_tokenizer` object, naming the first unsupported stage
    /// instead of surfacing a generic serde error.
    pub fn from_value(value: &Value) -> Result<Self, LoadError> {
        check_supported(value)?;
        Ok(Self::deserialize(value)?)
    }
}

fn check_supported(value: &Value) -> Result<(), LoadError> {
    let kind = value.get("type").and_then(Value::as_str).unwrap_or_default();
    if !SUPPORTED_PRE_TOKENIZERS.contains(&kind) {
        return Err(LoadError::UnsupportedPreTokenizer(kind.to_owned()));
    }
    if let Some(stages) = value.get("pretokenizers").and_then(Value::as_array) {
        for stage in stages {
            check_supported(stage)?;
        }
    }
    Ok(())
}

/// Value bound to a role in `special_tokens_map.json` or
/// `tokenizer_config.json`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum SpecialTokenValue {
    Literal(String),
    Object { content: String },
}

impl SpecialTokenValue {
    pub fn content(&self) -> &str {
        match self {
            Self::Literal(s) => s,
            Self::Object { content } => content,
        }
    }
}

/// Role bindings read from a companion file. Unknown keys are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SpecialTokensMap {
    #[serde(default)]
    pub bos_token: Option<SpecialTokenValue>,
    #[serde(default)]
    pub eos_token: Option<SpecialTokenValue>,
    #[serde(default)]
    pub unk_token: Option<SpecialTokenValue>,
    #[serde(default)]
    pub pad_token: Option<SpecialTokenValue>,
}

impl SpecialTokensMap {
    pub fn from_path(path: &Path) -> Result<Self, LoadError> {
        let bytes = read_file(path)?;
        serde_json::from_slice(&bytes)
            .map_err(|e| LoadError::InvalidSpecialTokens(format!("{}: {e}", path.display())))
    }

    pub fn is_empty(&self) -> bool {
        self.bos_token.is_none()
            && self.eos_token.is_none()
            && self.unk_token.is_none()
            && self.pad_token.is_none()
    }

    /// Fills roles unbound in `self` from `fallback`.
    pub fn or(self, fallback: SpecialTokensMap) -> SpecialTokensMap {
        SpecialTokensMap {
            bos_token: self.bos_token.or(fallback.bos_token),
            eos_token: self.eos_token.or(fallback.eos_token),
            unk_token: self.unk_token.or(fallback.unk_token),
            pad_token: self.pad_token.or(fallback.pad_token),
        }
    }
}

impl Descriptor {
    pub fn from_path(path: &Path) -> Result<Self, LoadError> {
        let bytes = read_file(path)?;
        Self::from_slice(&bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, LoadError> {
        let value: Value = serde_json::from_slice(bytes)?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self, LoadError> {
        let descriptor: Descriptor = serde_json::from_value(value)?;
        descriptor.validate()?;
        Ok(descriptor)
    }

    /// Canonical merge rules in declaration order, header lines removed.
    pub fn merge_rules(&self) -> Result<Vec<MergeRule>, LoadError> {
        let mut rules = Vec::with_capacity(self.model.merges.len());
        for (index, entry) in self.model.merges.iter().enumerate() {
            if let Some(rule) = entry.to_rule(index)? {
                rules.push(rule);
            }
        }
        Ok(rules)
    }

    /// The parsed pre-tokenizer, or `None` when the section is null/absent.
    pub fn pre_tokenizer_spec(&self) -> Result<Option<PreTokenizerSpec>, LoadError> {
        match &self.pre_tokenizer {
            None | Some(Value::Null) => Ok(None),
            Some(value) => PreTokenizerSpec::from_value(value).map(Some),
        }
    }

    pub fn added_tokens(&self) -> &[AddedTokenSpec] {
        self.added_tokens.as_deref().unwrap_or_default()
    }

    fn validate(&self) -> Result<(), LoadError> {
        let model = &self.model;
        if let Some(kind) = model.kind.as_deref() {
            if kind != "BPE" {
                return Err(LoadError::UnsupportedModel(kind.to_owned()));
            }
        }
        for (option, value) in [
            ("continuing_subword_prefix", &model.continuing_subword_prefix),
            ("end_of_word_suffix", &model.end_of_word_suffix),
        ] {
            if let Some(value) = value.as_deref().filter(|v| !v.is_empty()) {
                return Err(LoadError::UnsupportedModelOption {
                    option,
                    value: value.to_owned(),
                });
            }
        }

        if model.dropout.is_some_and(|p| p > 0.0) {
            warn!("BPE dropout is not applied; encoding stays deterministic");
        }
        if model.byte_fallback {
            warn!("byte_fallback is ignored by the byte-level engine");
        }
        if self.normalizer.as_ref().is_some_and(|n| !n.is_null()) {
            warn!("normalizer section present; input text is not normalized");
        }
        if self.post_processor.as_ref().is_some_and(|p| !p.is_null()) {
            warn!("post_processor section ignored; bos/eos are added via encode counts");
        }

        self.pre_tokenizer_spec()?;
        Ok(())
    }
}

fn read_file(path: &Path) -> Result<Vec<u8>, LoadError> {
    fs::read(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })
}
