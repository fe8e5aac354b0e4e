//! Prompt request schema.
//!
//! The body must be a JSON object with a string `prompt` of 1 to 6144 UTF-8
//! bytes and an integer `idle` (minutes) from 1 to 30. Unknown fields are
//! ignored.

use crate::errors::ValidationError;
use serde_json::Value;

/// Maximum prompt size in UTF-8 bytes (6 KiB).
pub const MAX_PROMPT_BYTES: usize = 6 * 1024;

/// Minimum prompt size in UTF-8 bytes.
pub const MIN_PROMPT_BYTES: usize = 1;

/// Minimum idle timeout in minutes.
pub const IDLE_MIN: i64 = 1;

/// Maximum idle timeout in minutes.
pub const IDLE_MAX: i64 = 30;

/// A prompt request that passed every schema check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptRequest {
    prompt: String,
    idle_minutes: u8,
}

impl PromptRequest {
    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn idle_minutes(&self) -> u8 {
        self.idle_minutes
    }

    pub fn into_parts(self) -> (String, u8) {
        (self.prompt, self.idle_minutes)
    }
}

/// Stateless validator for raw request bodies.
#[derive(Debug, Default, Clone, Copy)]
pub struct SchemaValidator;

impl SchemaValidator {
    pub fn new() -> Self {
        Self
    }

    /// Validate a raw body. `None` and the empty string count as absent JSON.
    ///
    /// # Errors
    ///
    /// - `InvalidJson` - absent, unparsable, or not a JSON object
    /// - `MissingField` / `WrongType` - `prompt` or `idle` absent, null, or of
    ///   the wrong JSON type
    /// - `PromptOutOfBounds` / `IdleOutOfBounds` - value outside its range
    pub fn validate(&self, raw_body: Option<&str>) -> Result<PromptRequest, ValidationError> {
        let raw_body = raw_body
            .map(str::trim)
            .filter(|body| !body.is_empty())
            .ok_or_else(|| ValidationError::InvalidJson("body is empty".to_string()))?;

        let value: Value = serde_json::from_str(raw_body)
            .map_err(|e| ValidationError::InvalidJson(e.to_string()))?;
        let Value::Object(fields) = value else {
            return Err(ValidationError::InvalidJson(
                "expected a JSON object".to_string(),
            ));
        };

        let prompt = match fields.get("prompt") {
            None | Some(Value::Null) => {
                return Err(ValidationError::MissingField { field: "prompt" })
            }
            Some(Value::String(prompt)) => prompt,
            Some(_) => {
                return Err(ValidationError::WrongType {
                    field: "prompt",
                    expected: "a string",
                })
            }
        };

        let idle = match fields.get("idle") {
            None | Some(Value::Null) => return Err(ValidationError::MissingField { field: "idle" }),
            Some(Value::Number(number)) => {
                if let Some(idle) = number.as_i64() {
                    idle
                } else if number.is_u64() {
                    // Larger than i64::MAX: an integer, just far out of range.
                    i64::MAX
                } else {
                    return Err(ValidationError::WrongType {
                        field: "idle",
                        expected: "an integer",
                    });
                }
            }
            Some(_) => {
                return Err(ValidationError::WrongType {
                    field: "idle",
                    expected: "an integer",
                })
            }
        };

        let size = prompt.len();
        if !(MIN_PROMPT_BYTES..=MAX_PROMPT_BYTES).contains(&size) {
            return Err(ValidationError::PromptOutOfBounds { actual: size });
        }

        if !(IDLE_MIN..=IDLE_MAX).contains(&idle) {
            return Err(ValidationError::IdleOutOfBounds { actual: idle });
        }
        let idle_minutes =
            u8::try_from(idle).map_err(|_| ValidationError::IdleOutOfBounds { actual: idle })?;

        Ok(PromptRequest {
            prompt: prompt.clone(),
            idle_minutes,
        })
    }
}
