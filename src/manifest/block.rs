//! Manifest wire format: an ordered JSON array of single-key blocks.

use std::fmt;

use super::error::ManifestError;

/// Reference key of the request data block.
pub const DATA_KEY: &str = "__DATA__";
/// Reference key of the parameter block.
pub const PARAMS_KEY: &str = "__PARAMS__";
/// Reference key of the response block.
pub const RESPONSE_KEY: &str = "response";

/// Classified block key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockKey {
    /// `__DATA__`
    Data,
    /// `__PARAMS__`
    Params,
    /// `var#<name>`
    Var(String),
    /// `do#<name>`
    Do(String),
    /// `response`
    Response,
}

impl BlockKey {
    /// Classify a raw block key.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::Compile`] for unknown keys and malformed names.
    pub fn parse(raw: &str) -> Result<Self, ManifestError> {
        match raw {
            DATA_KEY => return Ok(Self::Data),
            PARAMS_KEY => return Ok(Self::Params),
            RESPONSE_KEY => return Ok(Self::Response),
            _ => {}
        }
        let (kind, name) = raw
            .split_once('#')
            .ok_or_else(|| ManifestError::compile(format!("invalid manifest key: {raw}")))?;
        if !is_block_name(name) {
            return Err(ManifestError::compile(format!(
                "invalid reference name '{name}' in manifest key: {raw}"
            )));
        }
        if matches!(name, DATA_KEY | PARAMS_KEY | RESPONSE_KEY) {
            return Err(ManifestError::compile(format!(
                "reserved reference name '{name}' in manifest key: {raw}"
            )));
        }
        match kind {
            "var" => Ok(Self::Var(name.to_owned())),
            "do" => Ok(Self::Do(name.to_owned())),
            _ => Err(ManifestError::compile(format!("invalid manifest key: {raw}"))),
        }
    }

    /// The reference key this block is addressed by (`#<key>`).
    pub fn reference(&self) -> &str {
        match self {
            Self::Data => DATA_KEY,
            Self::Params => PARAMS_KEY,
            Self::Response => RESPONSE_KEY,
            Self::Var(name) | Self::Do(name) => name,
        }
    }
}

impl fmt::Display for BlockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Var(name) => write!(f, "var#{name}"),
            Self::Do(name) => write!(f, "do#{name}"),
            other => f.write_str(other.reference()),
        }
    }
}

/// One `{key: value}` block of a manifest.
#[derive(Debug, Clone, PartialEq)]
pub struct ManifestBlock {
    /// Classified key.
    pub key: BlockKey,
    /// Raw block value.
    pub value: serde_json::Value,
}

/// Split a manifest document into ordered blocks.
///
/// # Errors
///
/// Returns [`ManifestError::Compile`] when the root is not an array, a
/// block is not a single-key object, or a key is not recognised.
pub fn parse_blocks(manifest: &serde_json::Value) -> Result<Vec<ManifestBlock>, ManifestError> {
    let items = manifest
        .as_array()
        .ok_or_else(|| ManifestError::compile("manifest root must be a JSON array"))?;

    items
        .iter()
        .enumerate()
        .map(|(index, item)| {
            let map = item.as_object().ok_or_else(|| {
                ManifestError::compile(format!("manifest block {index} must be an object"))
            })?;
            let mut entries = map.iter();
            match (entries.next(), entries.next()) {
                (Some((key, value)), None) => Ok(ManifestBlock {
                    key: BlockKey::parse(key)?,
                    value: value.clone(),
                }),
                _ => Err(ManifestError::compile(format!(
                    "manifest block {index} must contain exactly one key"
                ))),
            }
        })
        .collect()
}

fn is_block_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}
