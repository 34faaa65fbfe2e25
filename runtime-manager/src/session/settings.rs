//! Generic to engine-specific setting key translation.

use std::collections::HashMap;

use crate::engine::ModelSettings;

/// Keys every engine understands under a different name.
const DEFAULT_KEY_MAP: &[(&str, &str)] = &[
    ("context_length", "context_size"),
    ("gpu_layer_count", "n_gpu_layers"),
];

/// Maps generic setting keys to the names engines expect.
///
/// The generic table is applied first, then the engine's own overrides.
/// Unmapped keys pass through unchanged.
#[derive(Debug, Clone)]
pub struct SettingsKeyMap {
    map: HashMap<String, String>,
}

impl SettingsKeyMap {
    /// Default table extended with `extra` (which wins on conflicts).
    pub fn new(extra: &HashMap<String, String>) -> Self {
        let mut map: HashMap<String, String> = DEFAULT_KEY_MAP
            .iter()
            .map(|(from, to)| (from.to_string(), to.to_string()))
            .collect();
        map.extend(extra.iter().map(|(k, v)| (k.clone(), v.clone())));
        Self { map }
    }

    /// Name of `key` for an engine with the given overrides.
    pub fn engine_key<'a>(&'a self, key: &'a str, overrides: &[(&'static str, &'static str)]) -> &'a str {
        let generic = self.map.get(key).map(String::as_str).unwrap_or(key);
        overrides
            .iter()
            .find(|(from, _)| *from == generic)
            .map(|(_, to)| *to)
            .unwrap_or(generic)
    }

    /// Translate every key. When a renamed key collides with one the caller
    /// set explicitly, the explicit one is kept.
    pub fn translate(
        &self,
        settings: &ModelSettings,
        overrides: &[(&'static str, &'static str)],
    ) -> ModelSettings {
        let mut translated = ModelSettings::new();
        for (key, value) in settings {
            let target = self.engine_key(key, overrides);
            if target != key && settings.contains_key(target) {
                tracing::debug!("Setting {} ignored, {} was set explicitly", key, target);
                continue;
            }
            translated.insert(target.to_string(), value.clone());
        }
        translated
    }
}

impl Default for SettingsKeyMap {
    fn default() -> Self {
        Self::new(&HashMap::new())
    }
}
