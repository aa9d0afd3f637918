//! Business endpoints behind the integrity middleware.

pub mod health;
pub mod rewards;
pub mod stamps;

use axum::http::HeaderMap;
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;

use crate::api::error::ApiError;
use crate::api::middleware::header_str;

pub const CARD_HEADER: &str = "x-card-id";
const ANONYMOUS_CARD: &str = "card-anon";

/// Token expiry as epoch seconds or an RFC 3339 timestamp.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum TokenExpiry {
    EpochSeconds(i64),
    Rfc3339(String),
}

impl TokenExpiry {
    pub fn to_datetime(&self) -> Result<DateTime<Utc>, ApiError> {
        match self {
            TokenExpiry::EpochSeconds(secs) => Utc
                .timestamp_opt(*secs, 0)
                .single()
                .ok_or_else(|| ApiError::BadRequest("expires_at out of range".into())),
            TokenExpiry::Rfc3339(raw) => DateTime::parse_from_rfc3339(raw)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|_| ApiError::BadRequest("expires_at must be RFC 3339 or epoch seconds".into())),
        }
    }
}

pub(crate) fn parse_body<'a, T: Deserialize<'a>>(body: &'a [u8]) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|e| ApiError::BadRequest(format!("Invalid JSON body: {e}")))
}

pub(crate) fn card_id(headers: &HeaderMap) -> String {
    header_str(headers, &[CARD_HEADER])
        .unwrap_or(ANONYMOUS_CARD)
        .to_string()
}
