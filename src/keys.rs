// Telemetry key namespace
// Builds every counter, hash and list key the aggregator reads or writes
//
// Numan Thabit 2025 Nov

use crate::event::{HttpMethod, StatusCategory};

pub const DEFAULT_PREFIX: &str = "stats";

/// Logical key layout under a single namespace prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Keyspace {
    prefix: String,
}

impl Default for Keyspace {
    fn default() -> Self {
        Self::new(DEFAULT_PREFIX)
    }
}

impl Keyspace {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn total_requests(&self) -> String {
        format!("{}:total_requests", self.prefix)
    }

    pub fn method(&self, method: HttpMethod) -> String {
        format!("{}:method:{}", self.prefix, method)
    }

    pub fn role(&self, role: &str) -> String {
        format!("{}:role:{}", self.prefix, role)
    }

    pub fn role_method(&self, role: &str, method: HttpMethod) -> String {
        format!("{}:role:{}:method:{}", self.prefix, role, method)
    }

    pub fn status(&self, code: u16) -> String {
        format!("{}:status:{}", self.prefix, code)
    }

    /// Glob matching every per-status-code counter (not the category counters).
    pub fn status_pattern(&self) -> String {
        format!("{}:status:*", self.prefix)
    }

    /// Inverse of [`Keyspace::status`].
    pub fn parse_status(&self, key: &str) -> Option<u16> {
        key.strip_prefix(&self.prefix)?
            .strip_prefix(":status:")?
            .parse()
            .ok()
    }

    pub fn status_category(&self, category: StatusCategory) -> String {
        format!("{}:status_category:{}", self.prefix, category)
    }

    pub fn hourly_status(&self) -> String {
        format!("{}:hourly_status", self.prefix)
    }

    pub fn daily_status(&self) -> String {
        format!("{}:daily_status", self.prefix)
    }

    pub fn recent_requests(&self) -> String {
        format!("{}:recent_requests", self.prefix)
    }

    /// Glob matching every key in the namespace.
    pub fn all_pattern(&self) -> String {
        format!("{}:*", self.prefix)
    }
}
