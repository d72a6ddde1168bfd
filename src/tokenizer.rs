//! Tokenizer facade.
//!
//! [`HFTokenizer`] owns everything built from one descriptor and exposes the
//! encoding pipeline:
//! 1. Added tokens are cut out of the raw text.
//! 2. Each remaining segment is pre-tokenized into words.
//! 3. Each word is byte-mapped and merged by the BPE engine.
//! 4. bos/eos ids are added around the result.
//!
//! Decoding inverts the byte-level mapping one token at a time, using the
//! previous id to drop the prefix space inserted during encoding.

use std::{iter, path::Path};

use log::{info, warn};
use serde_json::Value;

use crate::{
    added_tokens::{AddedVocabulary, Segment, SpecialTokens},
    artifacts::resolve_paths,
    byte_level,
    converter::BPEConverter,
    descriptor::{Descriptor, SpecialTokensMap},
    error::{DecodeError, EncodeError, Error, LoadError, Result},
    merges::MergeRankTable,
    pre_tokenizer::PreTokenizer,
    types::{TokenId, UNBOUND_TOKEN_ID},
    vocab::Vocabulary,
};

/// Lifecycle of a tokenizer instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TokenizerState {
    #[default]
    Uninitialized,
    Loaded,
    /// The last load failed and no earlier load succeeded.
    LoadFailed,
}

/// Operations shared by tokenizer implementations.
///
/// Loading needs exclusive access; once loaded, `encode` and `decode` only
/// read immutable state and may run concurrently.
pub trait Tokenizer: Send + Sync {
    fn load(&mut self, path: &Path) -> Result<()>;

    fn encode(&self, text: &str, bos: usize, eos: usize) -> Result<Vec<TokenId>>;

    fn decode(&self, prev: TokenId, id: TokenId) -> Result<String>;

    fn bos_tok(&self) -> TokenId;

    fn eos_tok(&self) -> TokenId;

    fn vocab_size(&self) -> usize;
}

/// State built by a successful load. Immutable afterwards.
#[derive(Debug, Clone)]
struct Engine {
    converter: BPEConverter,
    pre_tokenizer: PreTokenizer,
    added: AddedVocabulary,
    special: SpecialTokens,
}

impl Engine {
    fn build(descriptor: Descriptor, special_map: &SpecialTokensMap) -> std::result::Result<Self, LoadError> {
        let rules = descriptor.merge_rules()?;
        let pre_tokenizer = PreTokenizer::from_spec(descriptor.pre_tokenizer_spec()?.as_ref())?;
        let Descriptor {
            model,
            added_tokens,
            ..
        } = descriptor;

        let mut vocab = Vocabulary::from_map(model.vocab)?;
        let merges = MergeRankTable::from_rules(rules)?;
        let mut added = AddedVocabulary::from_specs(added_tokens.as_deref().unwrap_or_default(), &mut vocab)?;
        let special = SpecialTokens::resolve(special_map, &mut added, &mut vocab)?;

        let unk = match model.unk_token.as_deref() {
            Some(literal) => {
                let id = added.get(literal).or_else(|| vocab.get(literal));
                if id.is_none() {
                    warn!("unk_token {literal:?} is not in the vocabulary; ignoring it");
                }
                id.or(special.unk)
            }
            None => special.unk,
        };

        let converter = BPEConverter::new(vocab, merges)
            .with_unk(unk, model.fuse_unk)
            .with_ignore_merges(model.ignore_merges);

        info!(
            "loaded BPE tokenizer: {} tokens, {} merges, {} added tokens, bos={:?}, eos={:?}",
            converter.vocab().len(),
            converter.merges().len(),
            added.len(),
            special.bos,
            special.eos,
        );

        Ok(Self {
            converter,
            pre_tokenizer,
            added,
            special,
        })
    }

    fn encode_into(&self, text: &str, out: &mut Vec<TokenId>) -> std::result::Result<(), EncodeError> {
        for segment in self.added.split(text)? {
            let chunk = match segment {
                Segment::Added(id) => {
                    out.push(id);
                    continue;
                }
                Segment::Text(chunk) => chunk,
            };
            // added tokens were already cut out by `split`; a literal left in
            // a text segment failed its single_word/lstrip/rstrip constraints
            for word in self.pre_tokenizer.pre_tokenize(chunk)? {
                let symbols = byte_level::encode_bytes(word.as_bytes());
                self.converter.tokenize_word_into(&symbols, out)?;
            }
        }
        Ok(())
    }

    /// Raw bytes of `id`. `prev` is `None` at the start of a sequence.
    fn decode_bytes(&self, prev: Option<TokenId>, id: TokenId) -> std::result::Result<Vec<u8>, DecodeError> {
        if let Some(token) = self.added.token(id) {
            return Ok(token.content.as_bytes().to_vec());
        }

        let symbols = self
            .converter
            .vocab()
            .token(id)
            .ok_or(DecodeError::UnknownId(id))?;
        let mut bytes = byte_level::decode_symbols(symbols);

        if self.strips_prefix_after(prev) && bytes.first() == Some(&b' ') {
            bytes.remove(0);
        }
        Ok(bytes)
    }

    /// Whether a token following `prev` starts with an inserted prefix space.
    fn strips_prefix_after(&self, prev: Option<TokenId>) -> bool {
        if !self.pre_tokenizer.adds_prefix_space() {
            return false;
        }
        match prev {
            None => true,
            Some(prev) => self.added.contains_id(prev) || self.special.bos == Some(prev),
        }
    }
}

/// Byte-level BPE tokenizer loaded from a `tokenizer.json` descriptor.
///
/// ```no_run
/// use bytebpe::HFTokenizer;
///
/// let mut tokenizer = HFTokenizer::new();
/// tokenizer.load("path/to/model_dir")?;
/// let ids = tokenizer.encode("Hello world!", 1, 0)?;
/// let text = tokenizer.decode_all(&ids)?;
/// # Ok::<(), bytebpe::Error>(())
/// ```
#[derive(Debug, Clone, Default)]
pub struct HFTokenizer {
    state: TokenizerState,
    engine: Option<Engine>,
}

impl HFTokenizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> TokenizerState {
        self.state
    }

    pub fn is_loaded(&self) -> bool {
        self.state == TokenizerState::Loaded
    }

    /// Loads a descriptor file, or a directory holding `tokenizer.json` and
    /// optional `special_tokens_map.json` / `tokenizer_config.json`.
    ///
    /// On failure, a previously loaded tokenizer stays usable.
    ///
    /// # Arguments
    ///
    /// * `path` - A `tokenizer.json` file or the directory containing it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LoadFailure`] on any I/O, parse or validation problem.
    pub fn load(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let outcome = resolve_paths(path).and_then(|paths| {
            let special_map = paths.special_tokens()?;
            let descriptor = Descriptor::from_path(&paths.descriptor)?;
            Engine::build(descriptor, &special_map)
        });
        self.install(outcome)
    }

    /// Loads a descriptor held in memory. No companion files are consulted.
    pub fn load_from_str(&mut self, json: &str) -> Result<()> {
        let outcome = Descriptor::from_slice(json.as_bytes())
            .and_then(|descriptor| Engine::build(descriptor, &SpecialTokensMap::default()));
        self.install(outcome)
    }

    /// Like [`HFTokenizer::load_from_str`] for an already parsed value.
    pub fn load_from_value(&mut self, value: Value) -> Result<()> {
        let outcome = Descriptor::from_value(value)
            .and_then(|descriptor| Engine::build(descriptor, &SpecialTokensMap::default()));
        self.install(outcome)
    }

    fn install(&mut self, outcome: std::result::Result<Engine, LoadError>) -> Result<()> {
        match outcome {
            Ok(engine) => {
                self.engine = Some(engine);
                self.state = TokenizerState::Loaded;
                Ok(())
            }
            Err(err) => {
                warn!("tokenizer load failed: {err}");
                if self.state != TokenizerState::Loaded {
                    self.state = TokenizerState::LoadFailed;
                }
                Err(err.into())
            }
        }
    }

    fn engine(&self) -> Result<&Engine> {
        match (&self.state, &self.engine) {
            (TokenizerState::Loaded, Some(engine)) => Ok(engine),
            _ => Err(Error::Uninitialized),
        }
    }

    /// Encodes `text` into token ids.
    ///
    /// # Arguments
    ///
    /// * `text` - Raw input text.
    /// * `bos` - Number of bos ids to prepend.
    /// * `eos` - Number of eos ids to append.
    ///
    /// # Returns
    ///
    /// The bos ids, the ids of `text`, then the eos ids. An unbound bos or
    /// eos is emitted as `0`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Uninitialized`] before a successful load and
    /// [`Error::EncodeFailure`] when a merged symbol has no id.
    pub fn encode(&self, text: &str, bos: usize, eos: usize) -> Result<Vec<TokenId>> {
        let engine = self.engine()?;

        let mut ids = Vec::with_capacity(bos.saturating_add(eos).saturating_add(text.len() / 3));
        ids.extend(iter::repeat(self.bos_tok()).take(bos));
        engine.encode_into(text, &mut ids)?;
        ids.extend(iter::repeat(self.eos_tok()).take(eos));
        Ok(ids)
    }

    /// Text of `id` as it continues a sequence ending in `prev`.
    ///
    /// # Arguments
    ///
    /// * `prev` - The id emitted just before `id`.
    /// * `id` - The id to decode.
    ///
    /// Invalid UTF-8 (a token holding part of a multi-byte character) is
    /// replaced lossily; use [`HFTokenizer::decode_bytes`] to stream raw bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Uninitialized`] before a successful load and
    /// [`Error::DecodeFailure`] for an unknown id.
    pub fn decode(&self, prev: TokenId, id: TokenId) -> Result<String> {
        let bytes = self.decode_bytes(prev, id)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Raw bytes of `id` as it continues a sequence ending in `prev`.
    pub fn decode_bytes(&self, prev: TokenId, id: TokenId) -> Result<Vec<u8>> {
        Ok(self.engine()?.decode_bytes(Some(prev), id)?)
    }

    /// Decodes a whole sequence. The first id is treated as the start of the
    /// text; bytes are joined before UTF-8 conversion.
    ///
    /// # Returns
    ///
    /// The text of `ids`, with invalid UTF-8 replaced lossily.
    pub fn decode_all(&self, ids: &[TokenId]) -> Result<String> {
        let engine = self.engine()?;
        let mut bytes = Vec::new();
        let mut prev = None;
        for &id in ids {
            bytes.extend(engine.decode_bytes(prev, id)?);
            prev = Some(id);
        }
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// The bos id, or `0` when no bos token is bound.
    pub fn bos_tok(&self) -> TokenId {
        self.engine
            .as_ref()
            .and_then(|e| e.special.bos)
            .unwrap_or(UNBOUND_TOKEN_ID)
    }

    /// The eos id, or `0` when no eos token is bound.
    pub fn eos_tok(&self) -> TokenId {
        self.engine
            .as_ref()
            .and_then(|e| e.special.eos)
            .unwrap_or(UNBOUND_TOKEN_ID)
    }

    /// The pad id, or `0` when no pad token is bound.
    pub fn pad_tok(&self) -> TokenId {
        self.engine
            .as_ref()
            .and_then(|e| e.special.pad)
            .unwrap_or(UNBOUND_TOKEN_ID)
    }

    /// Number of ids, added tokens included. `0` before a load.
    pub fn vocab_size(&self) -> usize {
        self.engine.as_ref().map_or(0, |e| e.converter.vocab().len())
    }

    /// Id of a vocabulary string (in its byte-level form) or added token.
    pub fn token_to_id(&self, token: &str) -> Option<TokenId> {
        let engine = self.engine.as_ref()?;
        engine.added.get(token).or_else(|| engine.converter.vocab().get(token))
    }

    /// Vocabulary string of `id`, in its byte-level form.
    pub fn id_to_token(&self, id: TokenId) -> Option<&str> {
        self.engine.as_ref()?.converter.vocab().token(id)
    }
}

impl Tokenizer for HFTokenizer {
    fn load(&mut self, path: &Path) -> Result<()> {
        HFTokenizer::load(self, path)
    }

    fn encode(&self, text: &str, bos: usize, eos: usize) -> Result<Vec<TokenId>> {
        HFTokenizer::encode(self, text, bos, eos)
    }

    fn decode(&self, prev: TokenId, id: TokenId) -> Result<String> {
        HFTokenizer::decode(self, prev, id)
    }

    fn bos_tok(&self) -> TokenId {
        HFTokenizer::bos_tok(self)
    }

    fn eos_tok(&self) -> TokenId {
        HFTokenizer::eos_tok(self)
    }

    fn vocab_size(&self) -> usize {
        HFTokenizer::vocab_size(self)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    const HELLO: TokenId = 15;
    const WORLD: TokenId = 19;
    const BANG: TokenId = 11;
    const SPACE: TokenId = 7;

    fn descriptor(add_prefix_space: bool) -> Value {
        json!({
            "version": "1.0",
            "model": {
                "type": "BPE",
                "unk_token": "<unk>",
                "vocab": {
                    "<unk>": 0, "<s>": 1, "</s>": 2,
                    "H": 3, "e": 4, "l": 5, "o": 6, "Ġ": 7, "w": 8, "r": 9, "d": 10, "!": 11,
                    "He": 12, "ll": 13, "llo": 14, "Hello": 15,
                    "Ġw": 16, "or": 17, "Ġwor": 18, "Ġworld": 19, "Ġworl": 20
                },
                "merges": [
                    "H e", "l l", "ll o", "He llo",
                    "Ġ w", "o r", "Ġw or", "Ġwor l", "Ġworl d"
                ]
            },
            "normalizer": null,
            "pre_tokenizer": {
                "type": "ByteLevel",
                "add_prefix_space": add_prefix_space,
                "trim_offsets": true,
                "use_regex": true
            },
            "added_tokens": [
                {"id": 0, "content": "<unk>", "special": true},
                {"id": 1, "content": "<s>", "special": true},
                {"id": 2, "content": "</s>", "special": true}
            ]
        })
    }

    fn loaded(add_prefix_space: bool) -> HFTokenizer {
        let mut tokenizer = HFTokenizer::new();
        tokenizer
            .load_from_value(descriptor(add_prefix_space))
            .expect("descriptor should load");
        tokenizer
    }

    #[test]
    fn test_operations_before_load_are_uninitialized() {
        let tokenizer = HFTokenizer::new();
        assert_eq!(tokenizer.state(), TokenizerState::Uninitialized);
        assert!(matches!(tokenizer.encode("Hello", 0, 1), Err(Error::Uninitialized)));
        assert!(matches!(tokenizer.decode(0, 0), Err(Error::Uninitialized)));
        assert!(matches!(tokenizer.decode_all(&[1, 2]), Err(Error::Uninitialized)));
        assert_eq!(tokenizer.bos_tok(), UNBOUND_TOKEN_ID);
        assert_eq!(tokenizer.vocab_size(), 0);
    }

    #[test]
    fn test_encode_text() {
        let tokenizer = loaded(false);
        assert!(tokenizer.is_loaded());
        let ids = tokenizer.encode("Hello world!", 0, 0).expect("encode");
        assert_eq!(ids, vec![HELLO, WORLD, BANG]);
    }

    #[test]
    fn test_prefix_space_is_inserted() {
        let tokenizer = loaded(true);
        let ids = tokenizer.encode("Hello world!", 0, 0).expect("encode");
        assert_eq!(ids, vec![SPACE, HELLO, WORLD, BANG]);
    }

    #[test]
    fn test_bos_and_eos_are_repeat_counts() {
        let tokenizer = loaded(false);
        // no bos/eos binding: both fall back to the sentinel
        let ids = tokenizer.encode("Hello", 2, 1).expect("encode");
        assert_eq!(ids, vec![0, 0, HELLO, 0]);
        assert_eq!(tokenizer.pad_tok(), UNBOUND_TOKEN_ID);
    }

    #[test]
    fn test_zero_counts_add_nothing() {
        let tokenizer = loaded(false);
        assert_eq!(tokenizer.encode("", 0, 0).expect("encode"), Vec::<TokenId>::new());
        assert_eq!(tokenizer.encode("Hello", 0, 0).expect("encode"), vec![HELLO]);
    }

    #[test]
    fn test_encode_is_deterministic() {
        let tokenizer = loaded(true);
        let first = tokenizer.encode("Hello world! Hello", 1, 1).expect("encode");
        let second = tokenizer.encode("Hello world! Hello", 1, 1).expect("encode");
        assert_eq!(first, second);
    }

    #[test]
    fn test_added_tokens_are_cut_out() {
        let tokenizer = loaded(false);
        let ids = tokenizer.encode("<s>Hello</s>", 0, 0).expect("encode");
        assert_eq!(ids, vec![1, HELLO, 2]);
    }

    #[test]
    fn test_prefix_space_after_added_token() {
        let tokenizer = loaded(true);
        let ids = tokenizer.encode("<s>Hello", 0, 0).expect("encode");
        assert_eq!(ids, vec![1, SPACE, HELLO]);
        assert_eq!(tokenizer.decode_all(&ids).expect("decode"), "<s>Hello");
    }

    #[test]
    fn test_single_word_token_inside_word_is_not_matched() {
        let mut tokenizer = HFTokenizer::new();
        tokenizer
            .load_from_value(json!({
                "model": {
                    "type": "BPE",
                    "vocab": {"1": 0, "_": 1, "c": 2, "a": 3, "t": 4, "x": 5},
                    "merges": []
                },
                "pre_tokenizer": {"type": "ByteLevel", "add_prefix_space": false, "use_regex": true},
                "added_tokens": [{"id": 20, "content": "cat", "single_word": true}]
            }))
            .expect("descriptor should load");

        // digits and '_' are word characters, so none of these bound "cat"
        assert_eq!(tokenizer.encode("xcat", 0, 0).expect("encode"), vec![5, 2, 3, 4]);
        assert_eq!(tokenizer.encode("1cat", 0, 0).expect("encode"), vec![0, 2, 3, 4]);
        assert_eq!(tokenizer.encode("_cat", 0, 0).expect("encode"), vec![1, 2, 3, 4]);
        assert_eq!(tokenizer.encode("cat", 0, 0).expect("encode"), vec![20]);
    }

    #[test]
    fn test_unknown_bytes_fall_back_to_unk() {
        let tokenizer = loaded(false);
        // "é" maps to two byte symbols, neither in the vocabulary
        let ids = tokenizer.encode("Hello é", 0, 0).expect("encode");
        assert_eq!(ids, vec![HELLO, SPACE, 0, 0]);
    }

    #[test]
    fn test_unknown_bytes_without_unk_fail() {
        let mut value = descriptor(false);
        value["model"]["unk_token"] = Value::Null;
        value["added_tokens"] = json!([]);
        let mut tokenizer = HFTokenizer::new();
        tokenizer.load_from_value(value).expect("load");

        match tokenizer.encode("Hé", 0, 0) {
            Err(Error::EncodeFailure(EncodeError::UnknownSymbol { symbol })) => {
                assert_eq!(symbol, "Ã");
            }
            other => panic!("expected EncodeFailure, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_strips_prefix_after_special() {
        let tokenizer = loaded(true);
        assert_eq!(tokenizer.decode(1, WORLD).expect("decode"), "world");
        assert_eq!(tokenizer.decode(HELLO, WORLD).expect("decode"), " world");
        assert_eq!(tokenizer.decode(HELLO, 2).expect("decode"), "</s>");
    }

    #[test]
    fn test_decode_keeps_prefix_without_flag() {
        let tokenizer = loaded(false);
        assert_eq!(tokenizer.decode(1, WORLD).expect("decode"), " world");
    }

    #[test]
    fn test_decode_unknown_id_fails() {
        let tokenizer = loaded(false);
        assert!(matches!(
            tokenizer.decode(0, 999),
            Err(Error::DecodeFailure(DecodeError::UnknownId(999)))
        ));
    }

    #[test]
    fn test_decode_all_reconstructs_text() {
        for add_prefix_space in [false, true] {
            let tokenizer = loaded(add_prefix_space);
            let ids = tokenizer.encode("Hello world!", 0, 0).expect("encode");
            assert_eq!(tokenizer.decode_all(&ids).expect("decode"), "Hello world!");
        }
    }

    #[test]
    fn test_failed_reload_keeps_loaded_state() {
        let mut tokenizer = loaded(false);
        let err = tokenizer.load_from_str("{ not json");
        assert!(matches!(err, Err(Error::LoadFailure(LoadError::Json(_)))));
        assert_eq!(tokenizer.state(), TokenizerState::Loaded);
        assert_eq!(tokenizer.encode("Hello", 0, 0).expect("encode"), vec![HELLO]);
    }

    #[test]
    fn test_failed_first_load_is_load_failed() {
        let mut tokenizer = HFTokenizer::new();
        assert!(tokenizer.load("invalid_path").is_err());
        assert_eq!(tokenizer.state(), TokenizerState::LoadFailed);
        assert!(matches!(tokenizer.encode("Hello", 0, 0), Err(Error::Uninitialized)));
    }

    #[test]
    fn test_lookups() {
        let tokenizer = loaded(false);
        assert_eq!(tokenizer.vocab_size(), 21);
        assert_eq!(tokenizer.token_to_id("Ġworld"), Some(WORLD));
        assert_eq!(tokenizer.token_to_id("</s>"), Some(2));
        assert_eq!(tokenizer.id_to_token(HELLO), Some("Hello"));
        assert_eq!(tokenizer.id_to_token(500), None);
    }

    #[test]
    fn test_tokenizer_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<HFTokenizer>();

        let boxed: Box<dyn Tokenizer> = Box::new(loaded(false));
        assert_eq!(boxed.vocab_size(), 21);
    }
}
