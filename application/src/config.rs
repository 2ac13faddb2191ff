use crate::ConfigError;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use serde::{Deserialize, Serialize};
use std::fmt;

// Everything but the unreserved characters is escaped in userinfo.
const USERINFO: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Authentication mechanism negotiated with the document store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthMechanism {
    #[serde(rename = "SCRAM-SHA-1")]
    ScramSha1,
    #[serde(rename = "SCRAM-SHA-256")]
    ScramSha256,
    #[serde(rename = "PLAIN")]
    Plain,
    #[serde(rename = "MONGODB-X509")]
    X509,
}

impl AuthMechanism {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthMechanism::ScramSha1 => "SCRAM-SHA-1",
            AuthMechanism::ScramSha256 => "SCRAM-SHA-256",
            AuthMechanism::Plain => "PLAIN",
            AuthMechanism::X509 => "MONGODB-X509",
        }
    }
}

impl std::str::FromStr for AuthMechanism {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "SCRAM-SHA-1" => Ok(AuthMechanism::ScramSha1),
            "SCRAM-SHA-256" => Ok(AuthMechanism::ScramSha256),
            "PLAIN" => Ok(AuthMechanism::Plain),
            "MONGODB-X509" => Ok(AuthMechanism::X509),
            other => Err(ConfigError::Invalid {
                field: "auth_mechanism",
                reason: format!("unsupported mechanism '{}'", other),
            }),
        }
    }
}

/// Explicit connection settings for the document store.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentStoreConfig {
    /// `host` or `host:port`
    pub host: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    pub database: String,
    #[serde(default)]
    pub auth_mechanism: Option<AuthMechanism>,
}

impl DocumentStoreConfig {
    pub fn new(host: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            username: None,
            password: None,
            database: database.into(),
            auth_mechanism: None,
        }
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    pub fn with_auth_mechanism(mut self, mechanism: AuthMechanism) -> Self {
        self.auth_mechanism = Some(mechanism);
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::Missing("host"));
        }
        if self.database.trim().is_empty() {
            return Err(ConfigError::Missing("database"));
        }
        if self.host.contains('/') || self.host.contains('@') {
            return Err(ConfigError::Invalid {
                field: "host",
                reason: "must be a bare host or host:port".to_string(),
            });
        }
        if self.username.is_some() && self.password.is_none() {
            return Err(ConfigError::Missing("password"));
        }
        Ok(())
    }

    /// `mongodb://[user:pass@]host/database[?authMechanism=..&authSource=database]`
    pub fn connection_string(&self) -> String {
        self.render(self.password.as_deref().map(percent_encode))
    }

    /// Same as `connection_string` with the password masked, for logging.
    pub fn redacted_connection_string(&self) -> String {
        self.render(self.password.as_ref().map(|_| "****".to_string()))
    }

    fn render(&self, password: Option<String>) -> String {
        let mut uri = String::from("mongodb://");
        if let Some(username) = &self.username {
            uri.push_str(&percent_encode(username));
            if let Some(password) = password {
                uri.push(':');
                uri.push_str(&password);
            }
            uri.push('@');
        }
        uri.push_str(&self.host);
        uri.push('/');
        uri.push_str(&self.database);
        if let Some(mechanism) = self.auth_mechanism {
            uri.push_str("?authMechanism=");
            uri.push_str(mechanism.as_str());
            uri.push_str("&authSource=");
            uri.push_str(&self.database);
        }
        uri
    }
}

impl fmt::Debug for DocumentStoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentStoreConfig")
            .field("host", &self.host)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "****"))
            .field("database", &self.database)
            .field("auth_mechanism", &self.auth_mechanism)
            .finish()
    }
}

fn percent_encode(raw: &str) -> String {
    utf8_percent_encode(raw, USERINFO).to_string()
}

const DEFAULT_LIST_PAGE_SIZE: usize = 500;
const DEFAULT_DELETE_PAGE_SIZE: usize = 100;

/// Tuning knobs for the key-value repository's internal pagination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryConfig {
    /// Keys fetched per store round-trip while streaming a collection.
    #[serde(default = "default_list_page_size")]
    pub list_page_size: usize,
    /// Keys examined per atomic transaction in `delete_all`.
    #[serde(default = "default_delete_page_size")]
    pub delete_page_size: usize,
}

fn default_list_page_size() -> usize {
    DEFAULT_LIST_PAGE_SIZE
}

fn default_delete_page_size() -> usize {
    DEFAULT_DELETE_PAGE_SIZE
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            list_page_size: DEFAULT_LIST_PAGE_SIZE,
            delete_page_size: DEFAULT_DELETE_PAGE_SIZE,
        }
    }
}

impl RepositoryConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.list_page_size == 0 {
            return Err(ConfigError::Invalid {
                field: "list_page_size",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.delete_page_size == 0 {
            return Err(ConfigError::Invalid {
                field: "delete_page_size",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}
