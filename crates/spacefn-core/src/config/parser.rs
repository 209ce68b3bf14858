// spacefn Config Parser - TOML with Serde
// Optional overrides for the compiled-in engine configuration

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::engine::{DecidePolicy, EngineConfig};
use crate::key::key_from_name;
use crate::{Key, KeyMapTable, MappedKey};

/// Accepted disambiguation window, in milliseconds
pub const TIMEOUT_RANGE_MS: std::ops::RangeInclusive<u64> = 1..=2000;

/// Default pause before grabbing the keyboard
pub const DEFAULT_STARTUP_DELAY: Duration = Duration::from_millis(1000);

/// Configuration parser errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(String),

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Invalid policy: {0}")]
    InvalidPolicy(String),

    #[error("Timeout value out of range: {0}")]
    TimeoutOutOfRange(String),
}

/// Main configuration structure (root TOML table)
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigToml {
    /// General settings
    #[serde(default)]
    pub general: Option<GeneralConfig>,

    /// Layer mappings; replaces the default layer when present
    #[serde(default)]
    pub layer: Option<HashMap<String, String>>,
}

/// General settings
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GeneralConfig {
    /// Layer modifier key name
    pub modifier: Option<String>,
    /// Disambiguation window (milliseconds)
    pub timeout_ms: Option<u64>,
    /// "timeout" or "immediate"
    pub policy: Option<String>,
    /// Synthetic shift key name
    pub shift_key: Option<String>,
    /// Emergency eject key name
    pub eject_key: Option<String>,
    /// Pause before grabbing the device (milliseconds)
    pub startup_delay_ms: Option<u64>,
}

/// Resolved configuration
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub engine: EngineConfig,
    pub startup_delay: Duration,
    /// Where the configuration was read from, if anywhere
    pub source_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            startup_delay: DEFAULT_STARTUP_DELAY,
            source_path: None,
        }
    }
}

fn parse_key(field: &str, name: &str) -> Result<Key, ConfigError> {
    key_from_name(name).ok_or_else(|| ConfigError::InvalidKey(format!("{} = \"{}\"", field, name)))
}

/// Parse a layer target: a key name, optionally prefixed with `+` for a
/// synthetic shift (`"+KEY_9"` types an opening parenthesis on US layouts).
fn parse_layer_target(source: &str, target: &str) -> Result<MappedKey, ConfigError> {
    let trimmed = target.trim();
    let field = format!("layer.{}", source);
    match trimmed.strip_prefix('+') {
        Some(rest) => Ok(MappedKey::shifted(parse_key(&field, rest)?)),
        None => Ok(MappedKey::plain(parse_key(&field, trimmed)?)),
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_toml_path(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        let mut config = Self::from_toml_str(&content)?;
        config.source_path = Some(path.to_path_buf());
        Ok(config)
    }

    /// Load configuration from a TOML string
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let toml_config: ConfigToml =
            toml::from_str(content).map_err(|e| ConfigError::TomlParse(e.to_string()))?;
        Self::from_config_toml(toml_config)
    }

    /// Resolve a parsed TOML document against the built-in defaults
    pub fn from_config_toml(toml_config: ConfigToml) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let general = toml_config.general.unwrap_or_default();

        if let Some(name) = &general.modifier {
            config.engine.modifier = parse_key("general.modifier", name)?;
        }

        if let Some(ms) = general.timeout_ms {
            if !TIMEOUT_RANGE_MS.contains(&ms) {
                return Err(ConfigError::TimeoutOutOfRange(format!(
                    "general.timeout_ms = {} (expected {}..={})",
                    ms,
                    TIMEOUT_RANGE_MS.start(),
                    TIMEOUT_RANGE_MS.end()
                )));
            }
            config.engine.timeout = Duration::from_millis(ms);
        }

        if let Some(policy) = &general.policy {
            config.engine.policy = policy
                .parse::<DecidePolicy>()
                .map_err(ConfigError::InvalidPolicy)?;
        }

        if let Some(name) = &general.shift_key {
            config.engine.shift_key = parse_key("general.shift_key", name)?;
        }

        if let Some(name) = &general.eject_key {
            config.engine.eject_key = Some(parse_key("general.eject_key", name)?);
        }

        if let Some(ms) = general.startup_delay_ms {
            config.startup_delay = Duration::from_millis(ms);
        }

        if let Some(layer) = toml_config.layer {
            let mut mappings = HashMap::with_capacity(layer.len());
            for (source, target) in &layer {
                let key = parse_key(&format!("layer.{}", source), source)?;
                if key == config.engine.modifier {
                    return Err(ConfigError::InvalidKey(format!(
                        "layer.{}: the modifier key cannot be remapped in its own layer",
                        source
                    )));
                }
                let mapped = parse_layer_target(source, target)?;
                log::trace!("layer {} -> {}", key, mapped);
                mappings.insert(key, mapped);
            }
            config.engine.keymap = KeyMapTable::new(mappings);
        }

        log::debug!(
            "Config: modifier={} timeout={}ms policy={} layer={} keys",
            config.engine.modifier,
            config.engine.timeout.as_millis(),
            config.engine.policy,
            config.engine.keymap.len()
        );

        Ok(config)
    }

    /// Get the default config path
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("spacefn").join("config.toml"))
    }

    /// Load an explicit path, else the default location if it exists, else
    /// the built-in configuration.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = path {
            return Self::from_toml_path(path);
        }
        if let Some(path) = Self::default_path() {
            if path.exists() {
                return Self::from_toml_path(&path);
            }
        }
        Ok(Self::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.engine.modifier, Key::SPACE);
        assert_eq!(config.engine.timeout, Duration::from_millis(200));
        assert_eq!(config.engine.keymap, KeyMapTable::default_layer());
    }

    #[test]
    fn test_general_overrides() {
        let config = Config::from_toml_str(
            r#"
            [general]
            modifier = "CAPSLOCK"
            timeout_ms = 150
            policy = "immediate"
            shift_key = "LEFT_SHIFT"
            eject_key = "KEY_1"
            startup_delay_ms = 0
            "#,
        )
        .unwrap();

        assert_eq!(config.engine.modifier, Key::CAPSLOCK);
        assert_eq!(config.engine.timeout, Duration::from_millis(150));
        assert_eq!(config.engine.policy, DecidePolicy::Immediate);
        assert_eq!(config.engine.shift_key, Key::LEFT_SHIFT);
        assert_eq!(config.engine.eject_key, Some(Key::KEY_1));
        assert_eq!(config.startup_delay, Duration::ZERO);
    }

    #[test]
    fn test_layer_replaces_default() {
        let config = Config::from_toml_str(
            r#"
            [layer]
            J = "DOWN"
            K = "UP"
            P = "+KEY_0"
            "#,
        )
        .unwrap();

        let keymap = &config.engine.keymap;
        assert_eq!(keymap.len(), 3);
        assert_eq!(keymap.lookup(Key::J), Some(MappedKey::plain(Key::DOWN)));
        assert_eq!(keymap.lookup(Key::P), Some(MappedKey::shifted(Key::KEY_0)));
        assert_eq!(keymap.lookup(Key::H), None);
    }

    #[test]
    fn test_invalid_key_name() {
        let err = Config::from_toml_str(
            r#"
            [layer]
            H = "LEFTISH"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidKey(_)));
    }

    #[test]
    fn test_modifier_in_layer_rejected() {
        let err = Config::from_toml_str(
            r#"
            [layer]
            SPACE = "ENTER"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidKey(_)));
    }

    #[test]
    fn test_timeout_out_of_range() {
        for value in ["0", "5000"] {
            let err = Config::from_toml_str(&format!("[general]\ntimeout_ms = {}\n", value))
                .unwrap_err();
            assert!(matches!(err, ConfigError::TimeoutOutOfRange(_)));
        }
    }

    #[test]
    fn test_invalid_policy() {
        let err = Config::from_toml_str("[general]\npolicy = \"eventually\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPolicy(_)));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let err = Config::from_toml_str("[general]\nmodifer = \"SPACE\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::TomlParse(_)));
    }

    #[test]
    fn test_from_toml_path_records_source() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[general]\ntimeout_ms = 300").unwrap();

        let config = Config::from_toml_path(file.path()).unwrap();
        assert_eq!(config.engine.timeout, Duration::from_millis(300));
        assert_eq!(config.source_path.as_deref(), Some(file.path()));
    }

    #[test]
    fn test_load_explicit_missing_path_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load(Some(&dir.path().join("absent.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }

    #[test]
    fn test_default_path_shape() {
        if let Some(path) = Config::default_path() {
            assert!(path.ends_with("spacefn/config.toml"));
        }
    }
}
