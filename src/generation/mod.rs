//! Request validation and provider error mapping for image generation.
//! The provider call itself lives outside this crate.

mod error;
mod request;

pub use error::{map_provider_failure, GenerationError, ProviderFailure};
pub use request::{
    GenerationRequest, ValidatedRequest, DEFAULT_PROVIDER, MAX_DIMENSION, MAX_PROMPT_CHARS,
    MIN_DIMENSION, SUPPORTED_PROVIDERS,
};
