use serde::{Deserialize, Serialize};

use super::error::GenerationError;

pub const MAX_PROMPT_CHARS: usize = 4000;
pub const MIN_DIMENSION: u32 = 64;
pub const MAX_DIMENSION: u32 = 2048;
const DIMENSION_STEP: u32 = 8;

pub const SUPPORTED_PROVIDERS: [&str; 3] = ["flux", "sdxl", "openai"];
pub const DEFAULT_PROVIDER: &str = "flux";

/// A generation request as the UI submits it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRequest {
    pub prompt: String,
    #[serde(default)]
    pub negative_prompt: Option<String>,
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub seed: Option<u64>,
}

/// A request that passed validation, normalized for the provider call.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ValidatedRequest {
    pub prompt: String,
    pub negative_prompt: Option<String>,
    pub width: u32,
    pub height: u32,
    pub provider: String,
    pub seed: Option<u64>,
}

impl GenerationRequest {
    pub fn validate(&self) -> Result<ValidatedRequest, GenerationError> {
        let prompt = self.prompt.trim();
        if prompt.is_empty() {
            return Err(GenerationError::PromptEmpty);
        }

        let length = prompt.chars().count();
        if length > MAX_PROMPT_CHARS {
            return Err(GenerationError::PromptTooLong {
                length,
                max: MAX_PROMPT_CHARS,
            });
        }

        if !valid_dimension(self.width) || !valid_dimension(self.height) {
            return Err(GenerationError::InvalidDimensions {
                width: self.width,
                height: self.height,
            });
        }

        let provider = match self.provider.as_deref().map(str::trim) {
            None | Some("") => DEFAULT_PROVIDER.to_string(),
            Some(name) => {
                let name = name.to_ascii_lowercase();
                if !SUPPORTED_PROVIDERS.contains(&name.as_str()) {
                    return Err(GenerationError::UnsupportedProvider(name));
                }
                name
            }
        };

        Ok(ValidatedRequest {
            prompt: prompt.to_string(),
            negative_prompt: self
                .negative_prompt
                .as_deref()
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_string),
            width: self.width,
            height: self.height,
            provider,
            seed: self.seed,
        })
    }
}

fn valid_dimension(value: u32) -> bool {
    (MIN_DIMENSION..=MAX_DIMENSION).contains(&value) && value % DIMENSION_STEP == 0
}
