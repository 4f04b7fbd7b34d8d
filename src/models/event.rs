use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A locally recorded application error awaiting delivery.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEvent {
    pub id: String,
    pub code: String,
    pub message: String,
    pub context: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
    pub client_signature: String,
    pub synced: bool,
}

impl ErrorEvent {
    pub fn new(
        code: impl Into<String>,
        message: impl Into<String>,
        context: Option<serde_json::Value>,
        client_signature: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            code: code.into(),
            message: message.into(),
            context,
            timestamp: Utc::now(),
            client_signature: client_signature.into(),
            synced: false,
        }
    }
}
