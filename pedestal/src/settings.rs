//! Named setting sources
//!
//! A [`SettingsProvider`] answers string lookups by dotted key, e.g.
//! `udp.receive_interval_ms`. Providers are combined with
//! [`LayeredSettings`]; the first provider holding a key wins. The typed
//! configuration is built once from a provider by
//! [`PedestalConfig::from_settings`](crate::config::PedestalConfig::from_settings).

use std::collections::HashMap;
use std::fmt::Display;
use std::path::Path;
use std::str::FromStr;

use crate::error::ConfigError;

/// Source of named setting values.
pub trait SettingsProvider: Send + Sync {
    /// Raw value for `key`, or `None` when this source does not set it.
    fn get(&self, key: &str) -> Option<String>;
}

/// Parse the value of `key`, or return `default` when it is unset.
pub fn setting_or<T>(
    provider: &dyn SettingsProvider,
    key: &str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    match provider.get(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidValue {
                key: key.to_string(),
                value: raw.clone(),
                reason: e.to_string(),
            }),
    }
}

/// Settings read from environment variables.
///
/// `udp.receive_interval_ms` with prefix `PEDESTAL_` reads
/// `PEDESTAL_UDP_RECEIVE_INTERVAL_MS`.
#[derive(Debug, Clone)]
pub struct EnvSettings {
    prefix: String,
}

impl EnvSettings {
    pub const DEFAULT_PREFIX: &'static str = "PEDESTAL_";

    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Environment variable name for a dotted key.
    pub fn var_name(&self, key: &str) -> String {
        let mut name = self.prefix.clone();
        name.extend(key.chars().map(|c| match c {
            '.' | '-' => '_',
            c => c.to_ascii_uppercase(),
        }));
        name
    }
}

impl Default for EnvSettings {
    fn default() -> Self {
        Self::new(Self::DEFAULT_PREFIX)
    }
}

impl SettingsProvider for EnvSettings {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(self.var_name(key)).ok()
    }
}

/// Fixed in-memory settings.
#[derive(Debug, Clone, Default)]
pub struct MapSettings {
    values: HashMap<String, String>,
}

impl MapSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.values.insert(key.into(), value.to_string());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl ToString) {
        self.values.insert(key.into(), value.to_string());
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<K: Into<String>, V: ToString> FromIterator<(K, V)> for MapSettings {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            values: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.to_string()))
                .collect(),
        }
    }
}

impl SettingsProvider for MapSettings {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }
}

/// Settings loaded from a JSON file.
///
/// Nested objects are flattened into dotted keys, so
/// `{"udp": {"send_interval_ms": 30}}` sets `udp.send_interval_ms`.
#[derive(Debug, Clone, Default)]
pub struct JsonFileSettings {
    values: MapSettings,
}

impl JsonFileSettings {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        let root: serde_json::Value = serde_json::from_str(text)?;
        let mut values = MapSettings::new();
        flatten("", &root, &mut values);
        Ok(Self { values })
    }
}

fn flatten(prefix: &str, value: &serde_json::Value, out: &mut MapSettings) {
    match value {
        serde_json::Value::Object(map) => {
            for (key, child) in map {
                let key = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}.{key}")
                };
                flatten(&key, child, out);
            }
        }
        serde_json::Value::Null => {}
        serde_json::Value::String(s) => out.insert(prefix, s),
        other => out.insert(prefix, other),
    }
}

impl SettingsProvider for JsonFileSettings {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key)
    }
}

/// Ordered stack of providers; earlier layers override later ones.
#[derive(Default)]
pub struct LayeredSettings {
    layers: Vec<Box<dyn SettingsProvider>>,
}

impl LayeredSettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a lower-priority layer.
    pub fn push(mut self, layer: impl SettingsProvider + 'static) -> Self {
        self.layers.push(Box::new(layer));
        self
    }
}

impl SettingsProvider for LayeredSettings {
    fn get(&self, key: &str) -> Option<String> {
        self.layers.iter().find_map(|layer| layer.get(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_var_name() {
        let env = EnvSettings::default();
        assert_eq!(
            env.var_name("udp.receive_interval_ms"),
            "PEDESTAL_UDP_RECEIVE_INTERVAL_MS"
        );
    }

    #[test]
    fn test_setting_or_default_and_parse() {
        let settings = MapSettings::new().with("udp.send_interval_ms", " 45 ");
        assert_eq!(setting_or(&settings, "udp.send_interval_ms", 30u64).unwrap(), 45);
        assert_eq!(setting_or(&settings, "udp.missing", 7u64).unwrap(), 7);
    }

    #[test]
    fn test_setting_or_invalid() {
        let settings = MapSettings::new().with("udp.send_interval_ms", "fast");
        let err = setting_or(&settings, "udp.send_interval_ms", 30u64).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue { ref key, .. } if key == "udp.send_interval_ms"
        ));
    }

    #[test]
    fn test_json_flattening() {
        let settings = JsonFileSettings::parse(
            r#"{"udp": {"firmware_address": "10.0.0.5:5000", "send_interval_ms": 25}, "stow": {"speed": 2.5}}"#,
        )
        .unwrap();
        assert_eq!(settings.get("udp.firmware_address").as_deref(), Some("10.0.0.5:5000"));
        assert_eq!(settings.get("udp.send_interval_ms").as_deref(), Some("25"));
        assert_eq!(settings.get("stow.speed").as_deref(), Some("2.5"));
    }

    #[test]
    fn test_layered_priority() {
        let layered = LayeredSettings::new()
            .push(MapSettings::new().with("a", "top"))
            .push(MapSettings::new().with("a", "bottom").with("b", "only"));
        assert_eq!(layered.get("a").as_deref(), Some("top"));
        assert_eq!(layered.get("b").as_deref(), Some("only"));
        assert_eq!(layered.get("c"), None);
    }
}
