//! System-instruction presets
//!
//! Two presets are built in. More can be loaded from TOML files.
//!
//! # Example Preset File
//!
//! ```toml
//! [preset]
//! name = "Terse Reasoning"
//! description = "Reasoning format with short steps"
//! tagged = true
//!
//! [system_prompt]
//! content = """
//! Think inside <|begin_of_thought|> ... <|end_of_thought|> ...
//! """
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tokio::fs;

use crate::format::tags::BEGIN_THOUGHT;

/// Key of the preset new sessions start with
pub const DEFAULT_PRESET: &str = "reasoning";

/// A named system instruction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptPreset {
    /// Preset metadata
    pub preset: PresetInfo,

    /// The system instruction
    pub system_prompt: SystemPrompt,
}

/// Preset metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresetInfo {
    /// Display name
    pub name: String,

    /// Brief description
    #[serde(default)]
    pub description: String,

    /// Replies are expected in the thought/solution tag format
    #[serde(default)]
    pub tagged: bool,
}

/// System instruction content
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemPrompt {
    pub content: String,
}

impl PromptPreset {
    fn builtin(name: &str, description: &str, tagged: bool, content: &str) -> Self {
        Self {
            preset: PresetInfo {
                name: name.to_string(),
                description: description.to_string(),
                tagged,
            },
            system_prompt: SystemPrompt {
                content: content.to_string(),
            },
        }
    }
}

/// Presets keyed by name (file stem for loaded presets)
#[derive(Debug, Clone)]
pub struct PromptLibrary {
    presets: BTreeMap<String, PromptPreset>,
}

impl Default for PromptLibrary {
    fn default() -> Self {
        Self::builtin()
    }
}

impl PromptLibrary {
    /// Library holding only the built-in presets
    pub fn builtin() -> Self {
        let mut presets = BTreeMap::new();
        presets.insert(
            "reasoning".to_string(),
            PromptPreset::builtin(
                "Reasoning Prompt",
                "Thought and solution sections",
                true,
                builtin::REASONING,
            ),
        );
        presets.insert(
            "default".to_string(),
            PromptPreset::builtin("Default Prompt", "Plain assistant", false, builtin::DEFAULT),
        );
        Self { presets }
    }

    /// Load every `*.toml` preset in a directory, returning how many were added.
    ///
    /// A file named after a built-in preset replaces it.
    pub async fn load_dir(&mut self, dir: &Path) -> Result<usize, PromptError> {
        let mut entries = fs::read_dir(dir)
            .await
            .map_err(|e| PromptError::IoError(e.to_string()))?;

        let mut loaded = 0;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| PromptError::IoError(e.to_string()))?
        {
            let path = entry.path();
            if path.extension().map_or(false, |ext| ext == "toml") {
                if let Some(stem) = path.file_stem() {
                    let preset = Self::load_from_file(&path).await?;
                    tracing::debug!("Loaded prompt preset {}", path.display());
                    self.presets.insert(stem.to_string_lossy().to_string(), preset);
                    loaded += 1;
                }
            }
        }

        Ok(loaded)
    }

    /// Load a preset directly from a file path
    pub async fn load_from_file(path: &Path) -> Result<PromptPreset, PromptError> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| PromptError::IoError(e.to_string()))?;

        toml::from_str(&content).map_err(|e| PromptError::ParseError(e.to_string()))
    }

    pub fn get(&self, key: &str) -> Result<&PromptPreset, PromptError> {
        self.presets
            .get(key)
            .ok_or_else(|| PromptError::NotFound(key.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &PromptPreset)> {
        self.presets.iter()
    }
}

/// Whether a free-text instruction asks for the tagged reply format
pub fn is_tagged_instruction(instruction: &str) -> bool {
    instruction.contains(BEGIN_THOUGHT)
}

/// Errors from preset loading
#[derive(Debug, thiserror::Error)]
pub enum PromptError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Prompt not found: {0}")]
    NotFound(String),
}

/// Built-in instructions that don't require files
pub mod builtin {
    /// Asks for thought and solution sections
    pub const REASONING: &str = "Your role as an assistant involves thoroughly exploring questions through a systematic long thinking process before providing the final precise and accurate solutions. \
This requires engaging in a comprehensive cycle of analysis, summarizing, exploration, reassessment, reflection, backtracing, and iteration to develop well-considered thinking process. \
Please structure your response into two main sections: Thought and Solution. In the Thought section, detail your reasoning process using the specified format: <|begin_of_thought|> {thought with steps separated with '\\n\\n'} <|end_of_thought|> \
Each step should include detailed considerations such as analisying questions, summarizing relevant findings, brainstorming new ideas, verifying the accuracy of the current steps, refining any errors, and revisiting previous steps. \
In the Solution section, based on various attempts, explorations, and reflections from the Thought section, systematically present the final solution that you deem correct. \
The solution should remain a logical, accurate, concise expression style and detail necessary step needed to reach the conclusion, formatted as follows: <|begin_of_solution|> {final formatted, precise, and clear solution} <|end_of_solution|> \
Now, try to solve the following question through the above guidelines:";

    /// Plain assistant
    pub const DEFAULT: &str = "You are a helpful agent.";
}
