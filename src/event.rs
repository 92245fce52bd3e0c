// Request event model
// Describes one HTTP request/response pair as captured by the recorder,
// together with the method and status-category dimensions derived from it
//
// Numan Thabit 2025 Nov

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Role recorded when the caller presents no valid credential.
pub const ANONYMOUS_ROLE: &str = "anonymous";

/// HTTP methods tracked by the per-method counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
    Options,
    Other,
}

impl HttpMethod {
    pub const ALL: [HttpMethod; 8] = [
        HttpMethod::Get,
        HttpMethod::Post,
        HttpMethod::Put,
        HttpMethod::Patch,
        HttpMethod::Delete,
        HttpMethod::Head,
        HttpMethod::Options,
        HttpMethod::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Head => "HEAD",
            HttpMethod::Options => "OPTIONS",
            HttpMethod::Other => "OTHER",
        }
    }

    /// Map an arbitrary method token; anything outside the tracked set is `Other`.
    pub fn parse(method: &str) -> Self {
        match method.to_ascii_uppercase().as_str() {
            "GET" => HttpMethod::Get,
            "POST" => HttpMethod::Post,
            "PUT" => HttpMethod::Put,
            "PATCH" => HttpMethod::Patch,
            "DELETE" => HttpMethod::Delete,
            "HEAD" => HttpMethod::Head,
            "OPTIONS" => HttpMethod::Options,
            _ => HttpMethod::Other,
        }
    }
}

impl From<&axum::http::Method> for HttpMethod {
    fn from(method: &axum::http::Method) -> Self {
        HttpMethod::parse(method.as_str())
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome class of a response, derived from its status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum StatusCategory {
    #[serde(rename = "2xx")]
    Success,
    #[serde(rename = "3xx")]
    Redirect,
    #[serde(rename = "4xx")]
    ClientError,
    #[serde(rename = "5xx")]
    ServerError,
    #[serde(rename = "unknown")]
    Unknown,
}

impl StatusCategory {
    pub const ALL: [StatusCategory; 5] = [
        StatusCategory::Success,
        StatusCategory::Redirect,
        StatusCategory::ClientError,
        StatusCategory::ServerError,
        StatusCategory::Unknown,
    ];

    pub fn from_status(code: u16) -> Self {
        match code {
            200..=299 => StatusCategory::Success,
            300..=399 => StatusCategory::Redirect,
            400..=499 => StatusCategory::ClientError,
            500..=599 => StatusCategory::ServerError,
            _ => StatusCategory::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StatusCategory::Success => "2xx",
            StatusCategory::Redirect => "3xx",
            StatusCategory::ClientError => "4xx",
            StatusCategory::ServerError => "5xx",
            StatusCategory::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        StatusCategory::ALL.into_iter().find(|c| c.as_str() == s)
    }
}

impl fmt::Display for StatusCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A completed HTTP transaction as stored in the recent-events list.
///
/// The status category is never stored on its own; it is always recomputed
/// from `status_code` through [`RequestEvent::status_category`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestEvent {
    pub timestamp: DateTime<Utc>,
    pub method: HttpMethod,
    pub path: String,
    pub role: String,
    pub client_address: String,
    pub user_agent: String,
    pub status_code: u16,
}

impl RequestEvent {
    pub fn status_category(&self) -> StatusCategory {
        StatusCategory::from_status(self.status_code)
    }
}

/// Serialized form written to the store: the event plus its derived category.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct StoredEvent<'a> {
    #[serde(flatten)]
    pub event: &'a RequestEvent,
    pub status_category: StatusCategory,
}

impl<'a> StoredEvent<'a> {
    pub fn new(event: &'a RequestEvent) -> Self {
        Self {
            event,
            status_category: event.status_category(),
        }
    }
}

/// Current instant truncated to millisecond precision.
pub fn now_millis() -> DateTime<Utc> {
    let now = Utc::now();
    DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now)
}
