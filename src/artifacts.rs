//! Resolution of a load path into the descriptor and its companion files.

use std::path::{Path, PathBuf};

use log::debug;

use crate::{descriptor::SpecialTokensMap, error::LoadError};

pub const TOKENIZER_JSON: &str = "tokenizer.json";
pub const SPECIAL_TOKENS_MAP_JSON: &str = "special_tokens_map.json";
pub const TOKENIZER_CONFIG_JSON: &str = "tokenizer_config.json";

/// Files taking part in one load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    pub descriptor: PathBuf,
    pub special_tokens_map: Option<PathBuf>,
    pub tokenizer_config: Option<PathBuf>,
}

/// Resolves `path` as either a descriptor file or a directory holding
/// `tokenizer.json`. Companion files are only looked up in the directory
/// form.
///
/// # Errors
///
/// Returns [`LoadError::MissingDescriptor`] if `path` is neither a file nor a
/// directory containing `tokenizer.json`.
pub fn resolve_paths(path: &Path) -> Result<ArtifactPaths, LoadError> {
    if path.is_file() {
        debug!("loading descriptor file {}", path.display());
        return Ok(ArtifactPaths {
            descriptor: path.to_path_buf(),
            special_tokens_map: None,
            tokenizer_config: None,
        });
    }

    if !path.is_dir() {
        return Err(LoadError::MissingDescriptor(path.to_path_buf()));
    }

    let descriptor = path.join(TOKENIZER_JSON);
    if !descriptor.is_file() {
        return Err(LoadError::MissingDescriptor(descriptor));
    }

    let companion = |name: &str| -> Option<PathBuf> {
        let candidate = path.join(name);
        if candidate.is_file() {
            debug!("found companion file {}", candidate.display());
            Some(candidate)
        } else {
            None
        }
    };

    Ok(ArtifactPaths {
        descriptor,
        special_tokens_map: companion(SPECIAL_TOKENS_MAP_JSON),
        tokenizer_config: companion(TOKENIZER_CONFIG_JSON),
    })
}

impl ArtifactPaths {
    /// Role bindings from `special_tokens_map.json`, with unbound roles filled
    /// from `tokenizer_config.json`.
    pub fn special_tokens(&self) -> Result<SpecialTokensMap, LoadError> {
        let primary = match &self.special_tokens_map {
            Some(path) => SpecialTokensMap::from_path(path)?,
            None => SpecialTokensMap::default(),
        };
        let fallback = match &self.tokenizer_config {
            Some(path) => SpecialTokensMap::from_path(path)?,
            None => SpecialTokensMap::default(),
        };
        Ok(primary.or(fallback))
    }
}
