use crate::error::ConfigError;
use crate::lister::DEFAULT_PAGE_SIZE;
use crate::store::Collection;
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

pub const ENV_ENDPOINT: &str = "APPWRITE_ENDPOINT";
pub const ENV_PROJECT: &str = "APPWRITE_PROJECT";
pub const ENV_DATABASE: &str = "APPWRITE_DATABASE_ID";
pub const ENV_CHATS_COLLECTION: &str = "APPWRITE_CHATS_COLLECTION_ID";
pub const ENV_MESSAGES_COLLECTION: &str = "APPWRITE_MESSAGES_COLLECTION_ID";
pub const ENV_API_KEY: &str = "APPWRITE_API_KEY";
pub const ENV_PAGE_SIZE: &str = "CHATMERGE_PAGE_SIZE";
pub const ENV_TIMEOUT_SECS: &str = "CHATMERGE_TIMEOUT_SECS";
pub const ENV_SUPERSEDED_POLICY: &str = "CHATMERGE_SUPERSEDED_POLICY";
pub const ENV_CONFIG_FILE: &str = "CHATMERGE_CONFIG";

pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const MAX_PAGE_SIZE: usize = 5000;

/// What happens to a non-canonical chat once all its messages have moved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SupersededPolicy {
    /// Leave it as it is.
    #[default]
    Retain,
    /// Patch `supersededBy: <key>` onto it; later runs skip it.
    ///
    /// The chats collection schema must define a `supersededBy` string
    /// attribute. A strict schema without it rejects the patch with a 400,
    /// reported as a failure at the `supersede` stage, and the chat is
    /// retried on every later run.
    Mark,
    /// Delete it.
    Delete,
}

impl SupersededPolicy {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Retain => "retain",
            Self::Mark => "mark",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for SupersededPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SupersededPolicy {
    type Err = ConfigError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "retain" | "keep" => Ok(Self::Retain),
            "mark" => Ok(Self::Mark),
            "delete" => Ok(Self::Delete),
            _ => Err(ConfigError::Invalid {
                key: ENV_SUPERSEDED_POLICY,
                value: raw.to_string(),
                reason: "expected retain, mark or delete",
            }),
        }
    }
}

/// Optional TOML file named by `CHATMERGE_CONFIG`. Environment wins over it.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    endpoint: Option<String>,
    project: Option<String>,
    database: Option<String>,
    chats_collection: Option<String>,
    messages_collection: Option<String>,
    api_key: Option<String>,
    page_size: Option<usize>,
    timeout_secs: Option<u64>,
    superseded_policy: Option<SupersededPolicy>,
}

fn load_file(path: &Path) -> Result<FileConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Everything the job needs, resolved and validated once at startup.
#[derive(Clone, PartialEq, Eq)]
pub struct MigrationConfig {
    pub endpoint: String,
    pub project: String,
    pub database: String,
    pub chats_collection: String,
    pub messages_collection: String,
    pub api_key: String,
    pub page_size: usize,
    pub timeout: Duration,
    pub superseded: SupersededPolicy,
}

impl fmt::Debug for MigrationConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigrationConfig")
            .field("endpoint", &self.endpoint)
            .field("project", &self.project)
            .field("database", &self.database)
            .field("chats_collection", &self.chats_collection)
            .field("messages_collection", &self.messages_collection)
            .field("api_key", &"<redacted>")
            .field("page_size", &self.page_size)
            .field("timeout", &self.timeout)
            .field("superseded", &self.superseded)
            .finish()
    }
}

impl MigrationConfig {
    /// Resolve from the process environment.
    ///
    /// # Errors
    ///
    /// See [`MigrationConfig::resolve`].
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::resolve(|name| env::var(name).ok())
    }

    /// Resolve from a variable lookup, layering env over the optional file.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Missing`] naming every absent required variable,
    /// [`ConfigError::Invalid`] for unparsable or out-of-range values, and
    /// read/parse errors for the config file.
    pub fn resolve(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let file = match var(ENV_CONFIG_FILE) {
            Some(path) => load_file(Path::new(&path))?,
            None => FileConfig::default(),
        };

        let mut missing = Vec::new();
        let mut required = |name: &'static str, file_value: Option<String>| {
            let value = var(name).or_else(|| file_value.filter(|v| !v.trim().is_empty()));
            if value.is_none() {
                missing.push(name);
            }
            value.unwrap_or_default()
        };

        let endpoint = required(ENV_ENDPOINT, file.endpoint);
        let project = required(ENV_PROJECT, file.project);
        let database = required(ENV_DATABASE, file.database);
        let chats_collection = required(ENV_CHATS_COLLECTION, file.chats_collection);
        let messages_collection = required(ENV_MESSAGES_COLLECTION, file.messages_collection);
        let api_key = required(ENV_API_KEY, file.api_key);

        if !missing.is_empty() {
            return Err(ConfigError::Missing { keys: missing });
        }

        let page_size: usize = match var(ENV_PAGE_SIZE) {
            Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid {
                key: ENV_PAGE_SIZE,
                value: raw.clone(),
                reason: "expected a positive integer",
            })?,
            None => file.page_size.unwrap_or(DEFAULT_PAGE_SIZE),
        };
        if page_size == 0 || page_size > MAX_PAGE_SIZE {
            return Err(ConfigError::Invalid {
                key: ENV_PAGE_SIZE,
                value: page_size.to_string(),
                reason: "must be between 1 and 5000",
            });
        }

        let timeout_secs: u64 = match var(ENV_TIMEOUT_SECS) {
            Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid {
                key: ENV_TIMEOUT_SECS,
                value: raw.clone(),
                reason: "expected a whole number of seconds",
            })?,
            None => file.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS),
        };
        if timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                key: ENV_TIMEOUT_SECS,
                value: timeout_secs.to_string(),
                reason: "must be greater than zero",
            });
        }

        let superseded = match var(ENV_SUPERSEDED_POLICY) {
            Some(raw) => raw.parse()?,
            None => file.superseded_policy.unwrap_or_default(),
        };

        if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
            return Err(ConfigError::Invalid {
                key: ENV_ENDPOINT,
                value: endpoint,
                reason: "expected an http(s) URL",
            });
        }

        Ok(Self {
            endpoint,
            project,
            database,
            chats_collection,
            messages_collection,
            api_key,
            page_size,
            timeout: Duration::from_secs(timeout_secs),
            superseded,
        })
    }

    /// API root: the endpoint with any trailing `/` or `/v1` removed, plus `/v1`.
    #[must_use]
    pub fn api_base(&self) -> String {
        let trimmed = self.endpoint.trim().trim_end_matches('/');
        let root = trimmed.strip_suffix("/v1").unwrap_or(trimmed);
        format!("{}/v1", root.trim_end_matches('/'))
    }

    /// Store-side collection id.
    #[must_use]
    pub fn collection_id(&self, collection: Collection) -> &str {
        match collection {
            Collection::Chats => &self.chats_collection,
            Collection::Messages => &self.messages_collection,
        }
    }
}
