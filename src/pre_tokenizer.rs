//! Pre-tokenization: splitting raw text into words before BPE.
//!
//! Stages operate on raw text; the byte-level symbol mapping is applied to
//! each resulting word afterwards by the tokenizer. The stages and their
//! split behaviors follow the `tokenizers` library's JSON vocabulary, so a
//! `pre_tokenizer` section such as Llama 3's
//! `Sequence[Split(Isolated), ByteLevel(use_regex = false)]` loads as-is.

use fancy_regex::Regex;

use crate::{
    descriptor::{PreTokenizerSpec, SplitBehavior, SplitPatternSpec},
    error::{EncodeError, LoadError},
};

/// GPT-2 word boundary pattern used by the byte-level stage.
///
/// Contractions, runs of letters, runs of digits, runs of punctuation (each
/// optionally led by one space), then whitespace runs.
pub const GPT2_PATTERN: &str =
    r"'s|'t|'re|'ve|'m|'ll|'d| ?\p{L}+| ?\p{N}+| ?[^\s\p{L}\p{N}]+|\s+(?!\S)|\s+";

/// Flags of the byte-level stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteLevelConfig {
    /// Prepend a space to a word that does not start with one.
    pub add_prefix_space: bool,
    /// Only affects offset reporting, which this engine does not produce.
    pub trim_offsets: bool,
    /// Split with [`GPT2_PATTERN`]; otherwise the text stays one word.
    pub use_regex: bool,
}

impl Default for ByteLevelConfig {
    fn default() -> Self {
        Self {
            add_prefix_space: true,
            trim_offsets: true,
            use_regex: true,
        }
    }
}

#[derive(Debug, Clone)]
pub enum PreTokenizer {
    ByteLevel {
        config: ByteLevelConfig,
        pattern: Regex,
    },
    Split {
        pattern: Regex,
        behavior: SplitBehavior,
        invert: bool,
    },
    Digits {
        individual_digits: bool,
    },
    Sequence(Vec<PreTokenizer>),
}

/// Byte span of a piece plus whether it was matched as a delimiter.
type Segment = ((usize, usize), bool);

impl PreTokenizer {
    /// Byte-level stage with the given flags.
    pub fn byte_level(config: ByteLevelConfig) -> Result<Self, LoadError> {
        Ok(Self::ByteLevel {
            config,
            pattern: Regex::new(GPT2_PATTERN)?,
        })
    }

    /// Builds the pipeline from a parsed descriptor section. An absent
    /// section yields the default byte-level stage.
    pub fn from_spec(spec: Option<&PreTokenizerSpec>) -> Result<Self, LoadError> {
        let Some(spec) = spec else {
            return Self::byte_level(ByteLevelConfig::default());
        };

        match spec {
            PreTokenizerSpec::ByteLevel {
                add_prefix_space,
                trim_offsets,
                use_regex,
            } => Self::byte_level(ByteLevelConfig {
                add_prefix_space: *add_prefix_space,
                trim_offsets: *trim_offsets,
                use_regex: *use_regex,
            }),
            PreTokenizerSpec::Split {
                pattern,
                behavior,
                invert,
            } => {
                let pattern = match pattern {
                    SplitPatternSpec::Regex(re) => Regex::new(re)?,
                    SplitPatternSpec::String(literal) => Regex::new(&fancy_regex::escape(literal))?,
                };
                Ok(Self::Split {
                    pattern,
                    behavior: *behavior,
                    invert: *invert,
                })
            }
            PreTokenizerSpec::Digits { individual_digits } => Ok(Self::Digits {
                individual_digits: *individual_digits,
            }),
            PreTokenizerSpec::Sequence { pretokenizers } => pretokenizers
                .iter()
                .map(|stage| Self::from_spec(Some(stage)))
                .collect::<Result<Vec<_>, _>>()
                .map(Self::Sequence),
        }
    }

    /// Whether any byte-level stage inserts a prefix space.
    pub fn adds_prefix_space(&self) -> bool {
        match self {
            Self::ByteLevel { config, .. } => config.add_prefix_space,
            Self::Sequence(stages) => stages.iter().any(Self::adds_prefix_space),
            _ => false,
        }
    }

    /// Flags of the first byte-level stage, if any.
    pub fn byte_level_config(&self) -> Option<ByteLevelConfig> {
        match self {
            Self::ByteLevel { config, .. } => Some(*config),
            Self::Sequence(stages) => stages.iter().find_map(Self::byte_level_config),
            _ => None,
        }
    }

    /// Splits `text` into words, in input order. Empty words are dropped.
    ///
    /// # Errors
    ///
    /// Returns [`EncodeError::RegexMatch`] if a pattern fails while matching
    /// (e.g. backtracking limit exceeded).
    pub fn pre_tokenize(&self, text: &str) -> Result<Vec<String>, EncodeError> {
        if text.is_empty() {
            return Ok(Vec::new());
        }
        self.apply(vec![text.to_owned()])
    }

    fn apply(&self, pieces: Vec<String>) -> Result<Vec<String>, EncodeError> {
        if let Self::Sequence(stages) = self {
            return stages.iter().try_fold(pieces, |pieces, stage| stage.apply(pieces));
        }

        let mut words = Vec::with_capacity(pieces.len());
        for piece in pieces {
            words.extend(self.split_piece(piece)?);
        }
        Ok(words)
    }

    fn split_piece(&self, piece: String) -> Result<Vec<String>, EncodeError> {
        match self {
            Self::ByteLevel { config, pattern } => {
                let piece = if config.add_prefix_space && !piece.starts_with(' ') {
                    format!(" {piece}")
                } else {
                    piece
                };
                if !config.use_regex {
                    return Ok(vec![piece]);
                }
                let matches = find_matches(pattern, &piece)?;
                Ok(apply_behavior(&piece, &matches, SplitBehavior::Isolated, false))
            }
            Self::Split {
                pattern,
                behavior,
                invert,
            } => {
                let matches = find_matches(pattern, &piece)?;
                Ok(apply_behavior(&piece, &matches, *behavior, *invert))
            }
            Self::Digits { individual_digits } => {
                let matches = digit_spans(&piece, *individual_digits);
                Ok(apply_behavior(&piece, &matches, SplitBehavior::Isolated, false))
            }
            Self::Sequence(_) => self.apply(vec![piece]),
        }
    }
}

fn find_matches(pattern: &Regex, text: &str) -> Result<Vec<(usize, usize)>, EncodeError> {
    let mut spans = Vec::new();
    for mat in pattern.find_iter(text) {
        let m = mat?;
        if m.start() < m.end() {
            spans.push((m.start(), m.end()));
        }
    }
    Ok(spans)
}

fn digit_spans(text: &str, individual: bool) -> Vec<(usize, usize)> {
    let mut spans: Vec<(usize, usize)> = Vec::new();
    for (start, ch) in text.char_indices() {
        if !ch.is_numeric() {
            continue;
        }
        let end = start + ch.len_utf8();
        match spans.last_mut() {
            Some((_, last_end)) if !individual && *last_end == start => *last_end = end,
            _ => spans.push((start, end)),
        }
    }
    spans
}

/// Covers `text` with alternating delimiter / non-delimiter segments, then
/// regroups them according to `behavior`.
fn apply_behavior(
    text: &str,
    matches: &[(usize, usize)],
    behavior: SplitBehavior,
    invert: bool,
) -> Vec<String> {
    let mut segments: Vec<Segment> = Vec::with_capacity(matches.len() * 2 + 1);
    let mut cursor = 0;
    for &(start, end) in matches {
        if start > cursor {
            segments.push(((cursor, start), invert));
        }
        segments.push(((start, end), !invert));
        cursor = end;
    }
    if cursor < text.len() {
        segments.push(((cursor, text.len()), invert));
    }

    let grouped: Vec<Segment> = match behavior {
        SplitBehavior::Isolated => segments,
        SplitBehavior::Removed => segments.into_iter().filter(|(_, is_match)| !is_match).collect(),
        SplitBehavior::MergedWithPrevious => {
            let mut previous_match = false;
            let mut acc: Vec<Segment> = Vec::with_capacity(segments.len());
            for (span, is_match) in segments {
                if is_match && !previous_match {
                    match acc.last_mut() {
                        Some(((_, end), _)) => *end = span.1,
                        None => acc.push((span, true)),
                    }
                } else {
                    acc.push((span, false));
                }
                previous_match = is_match;
            }
            acc
        }
        SplitBehavior::MergedWithNext => {
            let mut previous_match = false;
            let mut acc: Vec<Segment> = Vec::with_capacity(segments.len());
            for (span, is_match) in segments.into_iter().rev() {
                if is_match && !previous_match {
                    match acc.last_mut() {
                        Some(((start, _), _)) => *start = span.0,
                        None => acc.push((span, true)),
                    }
                } else {
                    acc.push((span, false));
                }
                previous_match = is_match;
            }
            acc.reverse();
            acc
        }
        SplitBehavior::Contiguous => {
            let mut previous_match = false;
            let mut acc: Vec<Segment> = Vec::with_capacity(segments.len());
            for (span, is_match) in segments {
                match acc.last_mut() {
                    Some(((_, end), _)) if is_match == previous_match => *end = span.1,
                    _ => acc.push((span, is_match)),
                }
                previous_match = is_match;
            }
            acc
        }
    };

    grouped
        .into_iter()
        .filter(|((start, end), _)| start < end)
        .map(|((start, end), _)| text[start..end].to_owned())
        .collect()
}
