//! Bearer API-key authentication. The presented key is the caller's owner
//! identity for the job queue.

use std::collections::HashMap;
use std::sync::Arc;

use axum::http::{header, HeaderMap};

use crate::config::SecurityConfig;
use crate::error::NexusError;

/// Owner identity used for every caller when no keys are configured.
pub const ANONYMOUS_OWNER: &str = "anonymous";

#[derive(Debug, Clone, Default)]
pub struct ApiKeys {
    /// key → description
    keys: Arc<HashMap<String, String>>,
}

impl ApiKeys {
    pub fn from_config(security: &SecurityConfig) -> Self {
        let keys = security
            .api_keys
            .iter()
            .map(|k| (k.key.clone(), k.description.clone()))
            .collect();
        Self {
            keys: Arc::new(keys),
        }
    }

    pub fn is_enabled(&self) -> bool {
        !self.keys.is_empty()
    }

    /// Resolve the caller's owner identity from request headers.
    pub fn authenticate(&self, headers: &HeaderMap) -> Result<String, NexusError> {
        if !self.is_enabled() {
            return Ok(ANONYMOUS_OWNER.to_string());
        }
        let token = bearer_token(headers)
            .ok_or_else(|| NexusError::Unauthorized("missing bearer token".to_string()))?;
        if !self.keys.contains_key(token) {
            log::warn!("Rejected request with unknown API key");
            return Err(NexusError::Unauthorized("invalid API key".to_string()));
        }
        Ok(token.to_string())
    }
}

/// Token from an `Authorization: Bearer <token>` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}
