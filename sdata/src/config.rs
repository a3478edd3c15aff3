use crate::error::{SDataError, SDataResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Opaque user/password pair sent as HTTP basic auth.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

impl Credentials {
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"***")
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SDataConfig {
    /// Endpoint root, e.g. `https://host/sdata/slx/dynamic`.
    pub base_url: String,
    pub timeout: Duration,
    /// Sent as `count=` on the first page request when set.
    pub page_size: Option<u32>,
    pub credentials: Option<Credentials>,
    /// Bound on cached version tokens; `None` keeps every token until evicted.
    pub token_cache_capacity: Option<usize>,
}

impl Default for SDataConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3333/sdata/slx/dynamic".to_string(),
            timeout: Duration::from_secs(30),
            page_size: None,
            credentials: None,
            token_cache_capacity: None,
        }
    }
}

impl SDataConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a TOML document; missing keys take their defaults.
    ///
    /// ```
    /// let config = sdata::SDataConfig::from_toml_str(r#"
    ///     base_url = "https://crm.example.com/sdata/slx/dynamic"
    ///     page_size = 50
    /// "#).unwrap();
    /// assert_eq!(config.page_size, Some(50));
    /// ```
    pub fn from_toml_str(text: &str) -> SDataResult<Self> {
        let config: SDataConfig = toml::from_str(text).map_err(|e| SDataError::InvalidConfig {
            message: e.to_string(),
        })?;
        config
            .validate()
            .map_err(|message| SDataError::InvalidConfig { message })?;
        Ok(config)
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = Some(page_size);
        self
    }

    pub fn with_credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some(Credentials::new(user, password));
        self
    }

    pub fn with_token_cache_capacity(mut self, capacity: usize) -> Self {
        self.token_cache_capacity = Some(capacity);
        self
    }

    /// Base URL without a trailing slash.
    pub fn normalized_base_url(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.base_url.is_empty() {
            return Err("Base URL cannot be empty".to_string());
        }

        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err("Base URL must start with http:// or https://".to_string());
        }

        if self.base_url.contains('?') {
            return Err("Base URL must not carry a query string".to_string());
        }

        if self.timeout.is_zero() {
            return Err("Timeout must be greater than 0".to_string());
        }

        if self.page_size == Some(0) {
            return Err("Page size must be greater than 0".to_string());
        }

        if self.token_cache_capacity == Some(0) {
            return Err("Token cache capacity must be greater than 0".to_string());
        }

        Ok(())
    }
}
