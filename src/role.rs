// Caller role resolution
// Bearer-token extraction and the resolver seam through which the
// authentication layer supplies a caller's role claim
//
// Numan Thabit 2025 Nov

use crate::event::ANONYMOUS_ROLE;
use axum::http::{header::AUTHORIZATION, HeaderMap};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleClaim {
    pub role: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerificationError {
    #[error("token verification is not configured")]
    Unconfigured,
    #[error("unknown or revoked token")]
    UnknownToken,
    #[error("malformed token: {0}")]
    Malformed(String),
}

/// Turns an opaque bearer token into a role claim.
pub trait RoleResolver: Send + Sync {
    fn resolve_role(&self, token: &str) -> Result<RoleClaim, VerificationError>;
}

/// Resolver used when no verification is wired in: every caller is anonymous.
#[derive(Debug, Default, Clone)]
pub struct NoVerification;

impl RoleResolver for NoVerification {
    fn resolve_role(&self, _token: &str) -> Result<RoleClaim, VerificationError> {
        Err(VerificationError::Unconfigured)
    }
}

/// Fixed token-to-role table, parsed from `token=role;token=role`.
#[derive(Debug, Default, Clone)]
pub struct StaticTokenResolver {
    tokens: HashMap<String, String>,
}

impl StaticTokenResolver {
    pub fn new(tokens: HashMap<String, String>) -> Self {
        Self { tokens }
    }

    pub fn parse(spec: &str) -> Result<Self, VerificationError> {
        let mut tokens = HashMap::new();
        for pair in spec.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            let (token, role) = pair
                .split_once('=')
                .ok_or_else(|| VerificationError::Malformed(pair.to_string()))?;
            let (token, role) = (token.trim(), role.trim());
            if token.is_empty() || role.is_empty() {
                return Err(VerificationError::Malformed(pair.to_string()));
            }
            tokens.insert(token.to_string(), role.to_string());
        }
        Ok(Self { tokens })
    }
}

impl RoleResolver for StaticTokenResolver {
    fn resolve_role(&self, token: &str) -> Result<RoleClaim, VerificationError> {
        self.tokens
            .get(token)
            .map(|role| RoleClaim { role: role.clone() })
            .ok_or(VerificationError::UnknownToken)
    }
}

/// Extract the token from an `Authorization: Bearer <token>` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

/// Resolve the caller's role, collapsing a missing or invalid credential to `anonymous`.
pub fn resolve_or_anonymous(resolver: &dyn RoleResolver, headers: &HeaderMap) -> String {
    bearer_token(headers)
        .map(|token| resolver.resolve_role(token))
        .and_then(Result::ok)
        .map(|claim| claim.role)
        .unwrap_or_else(|| ANONYMOUS_ROLE.to_string())
}
