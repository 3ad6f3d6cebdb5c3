//! Typed attribute schema attached to uploaded artifacts

use serde::Serialize;
use std::collections::BTreeMap;

use super::space::{Combination, CombinationSpace};
use crate::error::{OrchestratorError, OrchestratorResult};

/// Upper bound on the prompt text stored with an entity
pub const MAX_PROMPT_CHARS: usize = 500;

pub const IMAGE_ENTITY_TYPE: &str = "image";

/// Attributes sent to the storage backend alongside an artifact
///
/// Serializes flat: `type`, `app`, `prompt`, `id` and one entry per category.
/// `id` is always written as an integer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssetAttributes {
    #[serde(rename = "type")]
    pub entity_type: String,
    pub app: String,
    pub prompt: String,
    pub id: u64,
    #[serde(flatten)]
    pub categories: BTreeMap<String, String>,
}

impl AssetAttributes {
    /// Derive attributes for a rendered combination
    pub fn for_combination(app_tag: &str, space: &CombinationSpace, combination: &Combination) -> Self {
        let prompt = space.render(combination);
        let categories = space
            .values(combination)
            .into_iter()
            .filter(|(_, value)| !value.is_empty())
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect();

        Self {
            entity_type: IMAGE_ENTITY_TYPE.to_string(),
            app: app_tag.to_string(),
            prompt: truncate_chars(&prompt, MAX_PROMPT_CHARS),
            id: combination.index,
            categories,
        }
    }

    /// Check the schema before anything leaves the process
    pub fn validate(&self) -> OrchestratorResult<()> {
        if self.app.trim().is_empty() {
            return Err(attribute_error("app tag is empty"));
        }
        if self.entity_type.trim().is_empty() {
            return Err(attribute_error("entity type is empty"));
        }
        if self.prompt.trim().is_empty() {
            return Err(attribute_error("prompt is empty"));
        }
        if self.prompt.chars().count() > MAX_PROMPT_CHARS {
            return Err(attribute_error(format!("prompt exceeds {MAX_PROMPT_CHARS} characters")));
        }
        for reserved in ["type", "app", "prompt", "id"] {
            if self.categories.contains_key(reserved) {
                return Err(attribute_error(format!("category name '{reserved}' is reserved")));
            }
        }
        Ok(())
    }

    /// JSON object form used on the wire
    pub fn to_json(&self) -> OrchestratorResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

fn attribute_error(message: impl Into<String>) -> OrchestratorError {
    OrchestratorError::AttributeError { message: message.into() }
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

/// MIME type inferred from an artifact file extension
pub fn content_type_for(file_name: &str) -> &'static str {
    let extension = std::path::Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match extension.as_deref() {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        _ => "application/octet-stream",
    }
}
