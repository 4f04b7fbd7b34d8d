use serde_json::{json, Value};
use std::time::Duration;

/// Failures a generation request can end in, before or after the provider call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GenerationError {
    #[error("prompt is empty")]
    PromptEmpty,

    #[error("prompt is {length} characters; the limit is {max}")]
    PromptTooLong { length: usize, max: usize },

    #[error("invalid dimensions {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },

    #[error("unsupported provider: {0}")]
    UnsupportedProvider(String),

    #[error("provider rejected our credentials (HTTP {status})")]
    AuthFailed { status: u16 },

    #[error("provider rate limit reached")]
    RateLimited { retry_after: Option<Duration> },

    #[error("provider rejected the content")]
    ContentRejected { reason: Option<String> },

    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("provider timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("unexpected provider response (HTTP {status})")]
    Unknown { status: u16 },
}

impl GenerationError {
    /// Stable identifier used as the error-event code.
    pub fn code(&self) -> &'static str {
        match self {
            GenerationError::PromptEmpty => "GEN_PROMPT_EMPTY",
            GenerationError::PromptTooLong { .. } => "GEN_PROMPT_TOO_LONG",
            GenerationError::InvalidDimensions { .. } => "GEN_INVALID_DIMENSIONS",
            GenerationError::UnsupportedProvider(_) => "GEN_UNSUPPORTED_PROVIDER",
            GenerationError::AuthFailed { .. } => "GEN_AUTH_FAILED",
            GenerationError::RateLimited { .. } => "GEN_RATE_LIMITED",
            GenerationError::ContentRejected { .. } => "GEN_CONTENT_REJECTED",
            GenerationError::ProviderUnavailable(_) => "GEN_PROVIDER_UNAVAILABLE",
            GenerationError::Timeout(_) => "GEN_TIMEOUT",
            GenerationError::Unknown { .. } => "GEN_UNKNOWN",
        }
    }

    /// Status the app's API layer answers with.
    pub fn http_status(&self) -> u16 {
        match self {
            GenerationError::PromptEmpty
            | GenerationError::PromptTooLong { .. }
            | GenerationError::InvalidDimensions { .. }
            | GenerationError::UnsupportedProvider(_) => 400,
            // Bad upstream credentials are our problem, not the caller's.
            GenerationError::AuthFailed { .. } => 502,
            GenerationError::RateLimited { .. } => 429,
            GenerationError::ContentRejected { .. } => 422,
            GenerationError::ProviderUnavailable(_) => 503,
            GenerationError::Timeout(_) => 504,
            GenerationError::Unknown { .. } => 500,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GenerationError::RateLimited { .. }
                | GenerationError::ProviderUnavailable(_)
                | GenerationError::Timeout(_)
        )
    }

    /// Structured context for an error event.
    pub fn to_event_context(&self) -> Value {
        let mut context = json!({
            "httpStatus": self.http_status(),
            "retryable": self.is_retryable(),
        });

        let detail = match self {
            GenerationError::PromptTooLong { length, max } => json!({ "length": length, "max": max }),
            GenerationError::InvalidDimensions { width, height } => {
                json!({ "width": width, "height": height })
            }
            GenerationError::UnsupportedProvider(provider) => json!({ "provider": provider }),
            GenerationError::AuthFailed { status } | GenerationError::Unknown { status } => {
                json!({ "providerStatus": status })
            }
            GenerationError::RateLimited {
                retry_after: Some(after),
            } => json!({ "retryAfterMs": after.as_millis() as u64 }),
            GenerationError::ContentRejected {
                reason: Some(reason),
            } => json!({ "reason": reason }),
            GenerationError::Timeout(after) => json!({ "timeoutMs": after.as_millis() as u64 }),
            _ => Value::Null,
        };

        if let (Value::Object(target), Value::Object(extra)) = (&mut context, detail) {
            target.extend(extra);
        }
        context
    }
}

/// What came back from the provider call when it did not succeed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderFailure {
    Status {
        status: u16,
        retry_after: Option<Duration>,
        message: Option<String>,
    },
    Timeout(Duration),
    Network(String),
}

pub fn map_provider_failure(failure: ProviderFailure) -> GenerationError {
    match failure {
        ProviderFailure::Status {
            status,
            retry_after,
            message,
        } => match status {
            401 | 403 => GenerationError::AuthFailed { status },
            408 | 504 => GenerationError::Timeout(Duration::ZERO),
            429 => GenerationError::RateLimited { retry_after },
            400 | 422 => GenerationError::ContentRejected { reason: message },
            500..=599 => GenerationError::ProviderUnavailable(
                message.unwrap_or_else(|| format!("HTTP {status}")),
            ),
            _ => GenerationError::Unknown { status },
        },
        ProviderFailure::Timeout(after) => GenerationError::Timeout(after),
        ProviderFailure::Network(reason) => GenerationError::ProviderUnavailable(reason),
    }
}
