//! Configuration loading: settings files and source snapshots.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::schema::RuntimeConfig;
use crate::config::validation::{validate_settings, ValidationError};
use crate::source::descriptor::Descriptor;
use crate::source::types::Revision;

/// Error type for configuration loading and decoding.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Json(serde_json::Error),
    NotATable(String),
    Options { name: String, source: serde_json::Error },
    Validation(Vec<ValidationError>),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Json(e) => write!(f, "JSON error: {}", e),
            ConfigError::NotATable(path) => write!(f, "'{}' is not a table", path),
            ConfigError::Options { name, source } => {
                write!(f, "Invalid options for '{}': {}", name, source)
            }
            ConfigError::Validation(errors) => {
                write!(f, "Validation failed: ")?;
                for (i, err) in errors.iter().enumerate() {
                    if i > 0 { write!(f, ", ")?; }
                    write!(f, "{}", err)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Load and validate runtime settings from a TOML file.
pub fn load_settings(path: &Path) -> Result<RuntimeConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(ConfigError::Io)?;
    let config: RuntimeConfig = toml::from_str(&content).map_err(ConfigError::Parse)?;

    validate_settings(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Encoding of a configuration document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    #[default]
    Toml,
    Json,
}

impl Format {
    /// Pick the format for a descriptor: `format` parameter, then the
    /// extension of the path or `key` parameter, then TOML.
    pub fn from_descriptor(descriptor: &Descriptor) -> Self {
        if let Some(format) = descriptor.param("format").and_then(|f| f.parse().ok()) {
            return format;
        }
        Self::from_extension(descriptor.path())
            .or_else(|| descriptor.param("key").and_then(|k| Self::from_extension(&k)))
            .unwrap_or_default()
    }

    pub fn from_extension(path: &str) -> Option<Self> {
        let (_, ext) = path.rsplit_once('.')?;
        ext.parse().ok()
    }

    /// Parse a raw document into a generic tree. Blank input is an empty table.
    pub fn parse(self, bytes: &[u8]) -> Result<Value, ConfigError> {
        let text = std::str::from_utf8(bytes)
            .map_err(|e| ConfigError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;
        if text.trim().is_empty() {
            return Ok(Value::Object(Default::default()));
        }
        match self {
            Format::Toml => toml::from_str(text).map_err(ConfigError::Parse),
            Format::Json => serde_json::from_str(text).map_err(ConfigError::Json),
        }
    }
}

impl FromStr for Format {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "toml" => Ok(Format::Toml),
            "json" => Ok(Format::Json),
            other => Err(format!("unknown configuration format '{}'", other)),
        }
    }
}

/// Decoded configuration at one point in time: name → raw options.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    /// Revision the snapshot was taken at, when known.
    pub revision: Option<Revision>,
    entries: BTreeMap<String, Value>,
}

impl Snapshot {
    /// Decode a document and take the table at the dotted `prefix`.
    ///
    /// A missing prefix gives an empty snapshot.
    pub fn decode(bytes: &[u8], format: Format, prefix: &str) -> Result<Self, ConfigError> {
        let root = format.parse(bytes)?;
        let mut node = &root;
        for segment in prefix.split('.').filter(|s| !s.is_empty()) {
            match node.get(segment) {
                Some(child) => node = child,
                None => return Ok(Self::default()),
            }
        }

        let table = node
            .as_object()
            .ok_or_else(|| ConfigError::NotATable(prefix.to_string()))?;

        Ok(Self {
            revision: None,
            entries: table.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        })
    }

    /// Build a snapshot directly from entries.
    pub fn from_entries<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        Self {
            revision: None,
            entries: entries.into_iter().collect(),
        }
    }

    pub fn with_revision(mut self, revision: Revision) -> Self {
        self.revision = Some(revision);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Decode one name's options.
    pub fn options<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>, ConfigError> {
        self.entries
            .get(name)
            .map(|raw| {
                serde_json::from_value(raw.clone()).map_err(|source| ConfigError::Options {
                    name: name.to_string(),
                    source,
                })
            })
            .transpose()
    }
}
