use crate::core::submission::{ReviewEvent, DEFAULT_SUGGESTIONS_PER_REVIEW};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_review_body")]
    pub review_body: String,

    #[serde(default = "default_inline_message")]
    pub inline_message: String,

    #[serde(default)]
    pub event: ReviewEvent,

    #[serde(default = "default_suggestions_per_review")]
    pub suggestions_per_review: usize,

    /// Glob patterns, relative to the repository root, of files to review.
    #[serde(default)]
    pub files: Vec<String>,

    #[serde(default)]
    pub exclude: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            review_body: default_review_body(),
            inline_message: default_inline_message(),
            event: ReviewEvent::default(),
            suggestions_per_review: default_suggestions_per_review(),
            files: Vec::new(),
            exclude: Vec::new(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        // Try to load from .diff-review.yml in current directory
        for name in [".diff-review.yml", ".diff-review.yaml"] {
            let path = PathBuf::from(name);
            if path.exists() {
                return Self::load_from(&path);
            }
        }

        // Try in home directory
        if let Some(home_dir) = dirs::home_dir() {
            let home_config = home_dir.join(".diff-review.yml");
            if home_config.exists() {
                return Self::load_from(&home_config);
            }
        }

        Ok(Config::default())
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(config)
    }

    pub fn merge_with_cli(
        &mut self,
        review_body: Option<String>,
        inline_message: Option<String>,
        event: Option<ReviewEvent>,
    ) {
        if let Some(body) = review_body {
            self.review_body = body;
        }
        if let Some(message) = inline_message {
            self.inline_message = message;
        }
        if let Some(event) = event {
            self.event = event;
        }
    }
}

fn default_review_body() -> String {
    ":warning: The formatter found issues in the code submitted. :warning:\n\
     Make sure to run it and update this pull request."
        .to_string()
}

fn default_inline_message() -> String {
    "Formatter suggestion below:".to_string()
}

fn default_suggestions_per_review() -> usize {
    DEFAULT_SUGGESTIONS_PER_REVIEW
}
