//! Connection configurations and the registry that stores them.
//!
//! Configurations are keyed by an [`Identifier`] derived from the connection
//! url, so a caller may register with a url and later connect with either the
//! same url or a structured [`ConnectTarget::Endpoint`].

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{AnyDbError, Result};

/// Normalized lookup key for a registered configuration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identifier(String);

impl Identifier {
    /// Strips every colon and slash from `url`.
    pub fn normalize(url: &str) -> Self {
        Self(url.chars().filter(|c| *c != ':' && *c != '/').collect())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What a caller names when asking for a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectTarget {
    Url(String),
    Endpoint {
        adapter: String,
        host: String,
        database: String,
    },
}

impl ConnectTarget {
    pub fn endpoint(
        adapter: impl Into<String>,
        host: impl Into<String>,
        database: impl Into<String>,
    ) -> Self {
        ConnectTarget::Endpoint {
            adapter: adapter.into(),
            host: host.into(),
            database: database.into(),
        }
    }

    pub fn identifier(&self) -> Identifier {
        match self {
            ConnectTarget::Url(url) => Identifier::normalize(url),
            ConnectTarget::Endpoint {
                adapter,
                host,
                database,
            } => Identifier::normalize(&format!("{adapter}{host}{database}")),
        }
    }
}

impl From<&str> for ConnectTarget {
    fn from(url: &str) -> Self {
        ConnectTarget::Url(url.to_string())
    }
}

impl From<String> for ConnectTarget {
    fn from(url: String) -> Self {
        ConnectTarget::Url(url)
    }
}

impl From<&String> for ConnectTarget {
    fn from(url: &String) -> Self {
        ConnectTarget::Url(url.clone())
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(PathBuf),
    Many(Vec<PathBuf>),
}

fn one_or_many<'de, D>(deserializer: D) -> std::result::Result<Vec<PathBuf>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(path) => vec![path],
        OneOrMany::Many(paths) => paths,
    })
}

/// A `[[connection]]` table as written. `uri`, when present, wins over `url`.
#[derive(Deserialize)]
struct ConfigEntry {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    uri: Option<String>,
    #[serde(alias = "drivername")]
    driver: String,
    #[serde(default, deserialize_with = "one_or_many")]
    libpath: Vec<PathBuf>,
    #[serde(default)]
    user: Option<String>,
    #[serde(default)]
    password: Option<String>,
    #[serde(default)]
    properties: BTreeMap<String, String>,
}

impl TryFrom<ConfigEntry> for ConnectionConfig {
    type Error = String;

    fn try_from(entry: ConfigEntry) -> std::result::Result<Self, Self::Error> {
        let url = entry
            .uri
            .or(entry.url)
            .ok_or_else(|| "connection needs a `url` or `uri`".to_string())?;
        Ok(Self {
            url,
            driver: entry.driver,
            libpath: entry.libpath,
            user: entry.user,
            password: entry.password,
            properties: entry.properties,
        })
    }
}

/// Everything needed to open a session through a driver.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "ConfigEntry")]
pub struct ConnectionConfig {
    /// Connection url. Read from `uri` when a config carries both spellings.
    pub url: String,
    /// Name of the installed driver that serves this url. Also accepted as `drivername`.
    pub driver: String,
    /// Native libraries the driver runtime needs, one path or a list.
    pub libpath: Vec<PathBuf>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub properties: BTreeMap<String, String>,
}

impl ConnectionConfig {
    pub fn new(url: impl Into<String>, driver: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            driver: driver.into(),
            libpath: Vec::new(),
            user: None,
            password: None,
            properties: BTreeMap::new(),
        }
    }

    /// Sets the url from its `uri` spelling.
    pub fn with_uri(mut self, uri: impl Into<String>) -> Self {
        self.url = uri.into();
        self
    }

    pub fn libpath(mut self, path: impl Into<PathBuf>) -> Self {
        self.libpath.push(path.into());
        self
    }

    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn identifier(&self) -> Identifier {
        Identifier::normalize(&self.url)
    }

    /// Properties with `user` and `password` folded in when set.
    pub fn effective_properties(&self) -> BTreeMap<String, String> {
        let mut properties = self.properties.clone();
        if let Some(user) = &self.user {
            properties.insert("user".to_string(), user.clone());
        }
        if let Some(password) = &self.password {
            properties.insert("password".to_string(), password.clone());
        }
        properties
    }
}

#[derive(Deserialize)]
struct RegistryFile {
    #[serde(default)]
    connection: Vec<ConnectionConfig>,
}

/// Named connection configurations. Last registration for an identifier wins.
#[derive(Debug, Clone, Default)]
pub struct ConfigRegistry {
    configs: HashMap<Identifier, ConnectionConfig>,
}

impl ConfigRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a TOML document made of `[[connection]]` tables.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let file: RegistryFile =
            toml::from_str(content).map_err(|e| AnyDbError::Config(e.to_string()))?;
        let mut registry = Self::new();
        for config in file.connection {
            registry.register(config);
        }
        Ok(registry)
    }

    /// Loads a registry from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| AnyDbError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&content)
    }

    /// Stores `config`, replacing any previous entry with the same identifier.
    pub fn register(&mut self, config: ConnectionConfig) -> Identifier {
        let id = config.identifier();
        if self.configs.insert(id.clone(), config).is_some() {
            tracing::debug!(identifier = %id, "replaced connection config");
        } else {
            tracing::debug!(identifier = %id, "registered connection config");
        }
        id
    }

    /// Looks up the config a target resolves to.
    pub fn get(&self, target: &ConnectTarget) -> Result<&ConnectionConfig> {
        let id = target.identifier();
        self.configs
            .get(&id)
            .ok_or_else(|| AnyDbError::ConfigNotFound(id.to_string()))
    }

    pub fn contains(&self, target: &ConnectTarget) -> bool {
        self.configs.contains_key(&target.identifier())
    }

    pub fn identifiers(&self) -> Vec<&Identifier> {
        let mut ids: Vec<_> = self.configs.keys().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.configs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.configs.is_empty()
    }
}
