//! Engine JSON config file, rewritten before each engine start.
//!
//! Only the keys present in a [`CustomConfigPatch`] are written, under the
//! `custom_config` object. Every other key, top-level or nested, is kept.

use std::io::Write;
use std::path::Path;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{Error, Result};

const CUSTOM_CONFIG_KEY: &str = "custom_config";

/// Partial update of the `custom_config` object. `None` fields are left alone.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CustomConfigPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_path: Option<String>,
}

impl CustomConfigPatch {
    pub fn model_path(path: &Path) -> Self {
        Self {
            model_path: Some(path.display().to_string()),
        }
    }
}

/// Read the config at `path` (missing or empty = `{}`), merge `patch`, write it back.
///
/// An existing file that is not a JSON object is an error and is left untouched.
pub fn apply_patch(path: &Path, patch: &CustomConfigPatch) -> Result<()> {
    let mut root = read_config(path)?;

    let patch_value = serde_json::to_value(patch)
        .map_err(|e| Error::ConfigFile(format!("failed to encode patch: {}", e)))?;
    let Value::Object(patch_fields) = patch_value else {
        return Err(Error::ConfigFile("patch is not an object".to_string()));
    };

    let custom = root
        .entry(CUSTOM_CONFIG_KEY)
        .or_insert_with(|| Value::Object(Map::new()));
    if !custom.is_object() {
        tracing::warn!(
            "{} in {} is not an object, replacing it",
            CUSTOM_CONFIG_KEY,
            path.display()
        );
        *custom = Value::Object(Map::new());
    }
    if let Value::Object(custom) = custom {
        for (key, value) in patch_fields {
            custom.insert(key, value);
        }
    }

    write_config(path, &Value::Object(root))
}

fn read_config(path: &Path) -> Result<Map<String, Value>> {
    if !path.exists() {
        return Ok(Map::new());
    }
    let raw = std::fs::read_to_string(path)?;
    if raw.trim().is_empty() {
        return Ok(Map::new());
    }
    match serde_json::from_str::<Value>(&raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(Error::ConfigFile(format!(
            "{} does not contain a JSON object",
            path.display()
        ))),
        Err(e) => Err(Error::ConfigFile(format!(
            "failed to parse {}: {}",
            path.display(),
            e
        ))),
    }
}

/// Atomic replace through a temp file in the same directory.
fn write_config(path: &Path, value: &Value) -> Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;

    let body = serde_json::to_string_pretty(value)
        .map_err(|e| Error::ConfigFile(format!("failed to encode config: {}", e)))?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(body.as_bytes())?;
    tmp.write_all(b"\n")?;
    tmp.persist(path)
        .map_err(|e| Error::ConfigFile(format!("failed to replace {}: {}", path.display(), e)))?;
    Ok(())
}
