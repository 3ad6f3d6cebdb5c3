//! Themes: the category lists, application tag and artifact naming of a sweep

use serde::{Deserialize, Serialize};
use std::path::Path;

use super::space::{CategorySpec, CombinationSpace, DEFAULT_SEPARATOR};
use crate::error::{OrchestratorError, OrchestratorResult};

/// A named set of categories plus the tags used when storing artifacts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Theme {
    pub name: String,
    /// Application tag attached to every uploaded entity
    pub app_tag: String,
    /// File name prefix for local artifacts
    pub output_prefix: String,
    #[serde(default = "default_separator")]
    pub separator: String,
    pub categories: Vec<CategorySpec>,
}

fn default_separator() -> String {
    DEFAULT_SEPARATOR.to_string()
}

impl Theme {
    /// Load a theme from a JSON file
    pub fn load(path: &Path) -> OrchestratorResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| OrchestratorError::FileSystemError {
            operation: "read theme".to_string(),
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        let theme: Theme = serde_json::from_str(&content)?;
        theme.validate()?;
        Ok(theme)
    }

    pub fn validate(&self) -> OrchestratorResult<()> {
        if self.app_tag.trim().is_empty() {
            return Err(OrchestratorError::config("theme app_tag must not be empty"));
        }
        if self.output_prefix.trim().is_empty() {
            return Err(OrchestratorError::config("theme output_prefix must not be empty"));
        }
        if self.categories.is_empty() {
            return Err(OrchestratorError::config("theme must define at least one category"));
        }
        Ok(())
    }

    /// Build the combination space for this theme
    pub fn space(&self) -> OrchestratorResult<CombinationSpace> {
        CombinationSpace::with_separator(self.categories.clone(), &self.separator)
    }

    /// Ledger layout signature: theme name plus the space's category layout
    pub fn layout_signature(&self) -> OrchestratorResult<String> {
        Ok(format!("{}:{}", self.name, self.space()?.layout_signature()))
    }

    /// The crypto-cats theme the sweep ships with
    pub fn crypto_cats() -> Self {
        Self {
            name: "crypto cats".to_string(),
            app_tag: "CCats".to_string(),
            output_prefix: "cat".to_string(),
            separator: default_separator(),
            categories: vec![
                CategorySpec::new(
                    "subject",
                    &[
                        "cat",
                        "kitten",
                        "fluffy cat",
                        "sleek cat",
                        "fat cat",
                        "elegant cat",
                        "mysterious cat",
                        "majestic cat",
                        "playful kitten",
                        "wise old cat",
                    ],
                )
                .with_prefix("a "),
                CategorySpec::new(
                    "accessory",
                    &[
                        "wearing golden blockchain necklace",
                        "with bitcoin earrings",
                        "wearing ethereum pendant",
                        "with VR headset",
                        "wearing hacker hoodie",
                        "with laser eyes",
                        "wearing crown made of circuit boards",
                        "with glowing crypto wallet",
                        "wearing NFT collar",
                        "with holographic glasses",
                        "wearing LED collar",
                        "with mechanical wings",
                        "wearing space helmet",
                        "with diamond claws",
                        "wearing ninja mask",
                        "",
                    ],
                ),
                CategorySpec::new(
                    "style",
                    &[
                        "cyberpunk style",
                        "anime style",
                        "realistic photography",
                        "neon art style",
                        "vaporwave aesthetic",
                        "pixel art style",
                        "oil painting style",
                        "watercolor style",
                        "3D render",
                        "comic book style",
                        "synthwave style",
                        "steampunk style",
                        "minimalist style",
                        "psychedelic art",
                        "low poly art",
                        "ukiyo-e japanese art",
                    ],
                ),
                CategorySpec::new(
                    "color",
                    &[
                        "golden and purple colors",
                        "neon pink and blue",
                        "green matrix colors",
                        "orange and black",
                        "silver and cyan",
                        "red and gold",
                        "black and neon green",
                        "white and holographic",
                        "rainbow iridescent",
                        "dark purple and gold",
                        "electric blue",
                        "sunset orange and pink",
                    ],
                ),
                CategorySpec::new(
                    "background",
                    &[
                        "blockchain network background",
                        "crypto trading charts background",
                        "neon city skyline",
                        "digital matrix rain",
                        "space with galaxies",
                        "abstract geometric shapes",
                        "futuristic server room",
                        "glowing circuit board",
                        "tokyo street at night",
                        "floating in cyberspace",
                        "ancient temple with tech",
                        "underwater tech city",
                        "",
                    ],
                ),
                CategorySpec::new(
                    "quality",
                    &[
                        "4k, highly detailed",
                        "8k, ultra detailed",
                        "masterpiece, best quality",
                        "photorealistic, sharp focus",
                        "cinematic lighting, detailed",
                        "studio lighting, professional",
                    ],
                ),
            ],
        }
    }
}

impl Default for Theme {
    fn default() -> Self {
        Self::crypto_cats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_crypto_cats_space_size() {
        let space = Theme::crypto_cats().space().unwrap();
        assert_eq!(space.size(), 10 * 16 * 16 * 12 * 13 * 6);
    }

    #[test]
    fn test_crypto_cats_first_prompt() {
        let space = Theme::crypto_cats().space().unwrap();
        assert_eq!(
            space.render_index(0).unwrap(),
            "a cat, wearing golden blockchain necklace, cyberpunk style, golden and purple colors, \
             blockchain network background, 4k, highly detailed"
        );
    }

    #[test]
    fn test_empty_accessory_and_background_are_omitted() {
        let theme = Theme::crypto_cats();
        let space = theme.space().unwrap();
        // accessory = "" (15), background = "" (12), everything else first
        let index = 15 * (16 * 12 * 13 * 6) + 12 * 6;
        assert_eq!(
            space.render_index(index).unwrap(),
            "a cat, cyberpunk style, golden and purple colors, 4k, highly detailed"
        );
    }

    #[test]
    fn test_load_theme_from_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "name": "dogs",
                "app_tag": "DDogs",
                "output_prefix": "dog",
                "categories": [
                    {{"name": "subject", "prefix": "a ", "values": ["dog", "puppy", "dog"]}},
                    {{"name": "style", "values": ["anime style", "3D render"]}}
                ]
            }}"#
        )
        .unwrap();

        let theme = Theme::load(file.path()).unwrap();
        assert_eq!(theme.separator, ", ");
        let space = theme.space().unwrap();
        assert_eq!(space.size(), 4);
        assert_eq!(space.render_index(3).unwrap(), "a puppy, 3D render");
        let signature = theme.layout_signature().unwrap();
        assert!(signature.starts_with("dogs:subject=2@"));
        assert!(signature.contains(",style=2@"));
    }

    #[test]
    fn test_theme_without_app_tag_is_rejected() {
        let mut theme = Theme::crypto_cats();
        theme.app_tag = " ".to_string();
        assert!(matches!(theme.validate(), Err(OrchestratorError::ConfigurationError { .. })));
    }
}
