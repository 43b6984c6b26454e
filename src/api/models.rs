// API request/response models (DTOs)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::migration::model::{FieldMap, FieldOutcome};

/// Standard API response wrapper
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<Meta>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            code: None,
            meta: Some(Meta::now()),
        }
    }

    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
            code: Some(code.to_string()),
            meta: Some(Meta::now()),
        }
    }
}

/// Metadata included in all API responses
#[derive(Debug, Serialize, Deserialize)]
pub struct Meta {
    pub timestamp: DateTime<Utc>,
    pub request_id: String,
    pub version: String,
}

impl Meta {
    pub fn now() -> Self {
        Self {
            timestamp: Utc::now(),
            request_id: uuid::Uuid::new_v4().to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub database: String,
    pub uptime_seconds: u64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct StartRequest {
    #[serde(default)]
    pub batch_size: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BatchRequest {
    pub offset: i64,
    pub batch_size: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ImportNotice {
    pub count: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BatchSizePreference {
    pub batch_size: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RewriteRequest {
    pub fields: FieldMap,
}

#[derive(Debug, Serialize)]
pub struct RewriteResponse {
    pub fields: FieldMap,
    pub changed: bool,
    pub outcomes: Vec<FieldOutcome>,
}
