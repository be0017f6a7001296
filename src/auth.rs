//! Hub credentials and the header they produce.

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION};

use crate::error::{HubError, Result};

const API_KEY_HEADER: &str = "x-api-key";

/// Credentials presented on every hub request
#[derive(Clone)]
pub enum HubAuth {
    /// Account API key, sent as `x-api-key`
    ApiKey(String),
    /// Session token, sent as `authorization: Bearer <token>`
    Bearer(String),
}

impl std::fmt::Debug for HubAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HubAuth::ApiKey(_) => write!(f, "HubAuth::ApiKey(***)"),
            HubAuth::Bearer(_) => write!(f, "HubAuth::Bearer(***)"),
        }
    }
}

impl HubAuth {
    /// Read `HUBSYNC_API_KEY`, falling back to `HUBSYNC_TOKEN`.
    pub fn from_env() -> Result<Self> {
        if let Ok(key) = std::env::var("HUBSYNC_API_KEY") {
            return Self::api_key(key);
        }
        if let Ok(token) = std::env::var("HUBSYNC_TOKEN") {
            return Self::bearer(token);
        }
        Err(HubError::Auth(
            "HUBSYNC_API_KEY (or HUBSYNC_TOKEN) is required".to_string(),
        ))
    }

    pub fn api_key(key: impl Into<String>) -> Result<Self> {
        let key = key.into().trim().to_string();
        if key.is_empty() {
            return Err(HubError::Auth("API key is empty".to_string()));
        }
        Ok(HubAuth::ApiKey(key))
    }

    pub fn bearer(token: impl Into<String>) -> Result<Self> {
        let token = token.into().trim().to_string();
        if token.is_empty() {
            return Err(HubError::Auth("token is empty".to_string()));
        }
        Ok(HubAuth::Bearer(token))
    }

    /// Headers to attach to hub requests
    pub fn headers(&self) -> Result<HeaderMap> {
        let (name, raw) = match self {
            HubAuth::ApiKey(key) => (HeaderName::from_static(API_KEY_HEADER), key.clone()),
            HubAuth::Bearer(token) => (AUTHORIZATION, format!("Bearer {}", token)),
        };

        let mut value = HeaderValue::from_str(&raw)
            .map_err(|e| HubError::Auth(format!("invalid credential header: {}", e)))?;
        value.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(name, value);
        Ok(headers)
    }
}
