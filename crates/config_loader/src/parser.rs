//! Configuration parsing
//!
//! TOML (primary) and JSON documents are both read into a `serde_json::Value`
//! tree first, so `key.path=value` overrides can be applied uniformly before
//! the tree is deserialized into a [`PipelineBlueprint`].

use contracts::{PipelineBlueprint, PipelineError};
use serde_json::{Map, Value};

/// Configuration file format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    /// TOML (recommended)
    Toml,
    /// JSON
    Json,
}

impl ConfigFormat {
    /// Infer format from file extension
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "toml" => Some(Self::Toml),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

/// One `key.path=value` override
#[derive(Debug, Clone, PartialEq)]
pub struct Override {
    pub key: String,
    pub value: Value,
}

impl Override {
    /// Parse `key.path=value`
    ///
    /// The value is read as a TOML literal (`4`, `0.05`, `true`, `"x"`) and
    /// falls back to a bare string.
    pub fn parse(raw: &str) -> Result<Self, PipelineError> {
        let (key, value) = raw.split_once('=').ok_or_else(|| {
            PipelineError::config_parse(format!("override '{raw}' is not of the form key=value"))
        })?;
        let key = key.trim();
        if key.is_empty() || key.split('.').any(str::is_empty) {
            return Err(PipelineError::config_parse(format!(
                "override '{raw}' has an empty key segment"
            )));
        }
        Ok(Self {
            key: key.to_string(),
            value: parse_literal(value.trim()),
        })
    }
}

fn parse_literal(raw: &str) -> Value {
    #[derive(serde::Deserialize)]
    struct Holder {
        v: Value,
    }

    match toml::from_str::<Holder>(&format!("v = {raw}")) {
        Ok(holder) => holder.v,
        Err(_) => Value::String(raw.to_string()),
    }
}

/// Parse a document into a generic tree
pub fn parse_tree(content: &str, format: ConfigFormat) -> Result<Value, PipelineError> {
    match format {
        ConfigFormat::Toml => toml::from_str(content).map_err(|e| PipelineError::ConfigParse {
            message: format!("TOML parse error: {e}"),
            source: Some(Box::new(e)),
        }),
        ConfigFormat::Json => serde_json::from_str(content).map_err(|e| PipelineError::ConfigParse {
            message: format!("JSON parse error: {e}"),
            source: Some(Box::new(e)),
        }),
    }
}

/// Apply overrides in order, creating intermediate tables as needed
pub fn apply_overrides(tree: &mut Value, overrides: &[Override]) -> Result<(), PipelineError> {
    for ov in overrides {
        let mut node = &mut *tree;
        let segments: Vec<&str> = ov.key.split('.').collect();
        let (last, parents) = segments
            .split_last()
            .ok_or_else(|| PipelineError::config_parse("empty override key"))?;

        for segment in parents {
            let table = node.as_object_mut().ok_or_else(|| {
                PipelineError::config_validation(&ov.key, format!("'{segment}' is not a table"))
            })?;
            node = table
                .entry(segment.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
        }

        let table = node.as_object_mut().ok_or_else(|| {
            PipelineError::config_validation(&ov.key, "parent of overridden key is not a table")
        })?;
        table.insert(last.to_string(), ov.value.clone());
    }
    Ok(())
}

/// Deserialize a tree into a blueprint
pub fn from_tree(tree: Value) -> Result<PipelineBlueprint, PipelineError> {
    serde_json::from_value(tree).map_err(|e| PipelineError::ConfigParse {
        message: format!("invalid configuration: {e}"),
        source: Some(Box::new(e)),
    })
}

/// Parse configuration by format
pub fn parse(content: &str, format: ConfigFormat) -> Result<PipelineBlueprint, PipelineError> {
    from_tree(parse_tree(content, format)?)
}
