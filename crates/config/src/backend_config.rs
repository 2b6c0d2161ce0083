//! Remote backend sections

use crate::validation::{ConfigSection, ValidationError, Validator};
use serde::{Deserialize, Serialize};

/// Primary library server settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PrimaryBackendConfig {
    /// Whether progress is pushed to the library server
    pub enabled: bool,

    /// Base URL of the library server
    pub server_url: String,

    /// Bearer token for the server API
    pub api_token: Option<String>,
}

impl Default for PrimaryBackendConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            server_url: "http://localhost:8080".to_string(),
            api_token: None,
        }
    }
}

impl ConfigSection for PrimaryBackendConfig {
    fn validate(&self) -> Result<(), Vec<ValidationError>> {
        if !self.enabled {
            return Ok(());
        }

        let mut results = vec![Validator::http_url(&self.server_url, "primary.server_url")];
        if let Some(token) = &self.api_token {
            results.push(Validator::not_empty(token, "primary.api_token"));
        }

        Validator::collect_errors(results)
    }

    fn merge(&mut self, other: Self) {
        self.enabled = other.enabled;
        self.server_url = other.server_url;
        if other.api_token.is_some() {
            self.api_token = other.api_token;
        }
    }

    fn section_name(&self) -> &'static str {
        "primary"
    }
}

/// Secondary cloud key-value store settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SecondaryBackendConfig {
    /// Whether the cloud store integration is turned on
    pub enabled: bool,

    /// Base URL of the key-value store
    pub store_url: String,

    /// Key namespace, usually one per user
    pub namespace: String,
}

impl Default for SecondaryBackendConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            store_url: "http://localhost:8081".to_string(),
            namespace: "storystream".to_string(),
        }
    }
}

impl ConfigSection for SecondaryBackendConfig {
    fn validate(&self) -> Result<(), Vec<ValidationError>> {
        if !self.enabled {
            return Ok(());
        }

        Validator::collect_errors(vec![
            Validator::http_url(&self.store_url, "secondary.store_url"),
            Validator::not_empty(&self.namespace, "secondary.namespace"),
        ])
    }

    fn merge(&mut self, other: Self) {
        self.enabled = other.enabled;
        self.store_url = other.store_url;
        self.namespace = other.namespace;
    }

    fn section_name(&self) -> &'static str {
        "secondary"
    }
}
