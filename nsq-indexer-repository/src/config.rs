//! Configuration types for the indexing backend client.

/// Default indexing backend address.
pub const DEFAULT_SEARCH_ADDRESS: &str = "http://127.0.0.1:9200";

/// Connection settings for the indexing backend.
///
/// Static for the lifetime of the process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchIndexConfig {
    /// Node addresses, tried in order until one answers.
    pub addresses: Vec<String>,
    pub username: String,
    pub password: String,
}

impl Default for SearchIndexConfig {
    fn default() -> Self {
        Self {
            addresses: vec![DEFAULT_SEARCH_ADDRESS.to_string()],
            username: String::new(),
            password: String::new(),
        }
    }
}

impl SearchIndexConfig {
    /// Create a config for the given addresses without credentials.
    pub fn new<I, S>(addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            addresses: addresses.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    /// Set basic auth credentials.
    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = username.into();
        self.password = password.into();
        self
    }

    /// Basic auth credentials, only when a username is configured.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        if self.username.is_empty() {
            None
        } else {
            Some((self.username.as_str(), self.password.as_str()))
        }
    }
}
