//! Per-session chat state
//!
//! A session is an explicit value: configuration changes produce a new
//! `SessionState`, and submissions thread it through by `&mut`. The
//! `SessionStore` only keeps those values in memory between HTTP requests.

use std::collections::HashMap;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::config::prompts::is_tagged_instruction;
use crate::config::{CatalogConfig, ConfigError, InferenceParams, ModelOption, PromptLibrary};
use crate::conversation::Conversation;
use crate::providers::InferenceRequest;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Session not found: {0}")]
    NotFound(Uuid),

    #[error("Session {0} is already generating a reply")]
    Busy(Uuid),

    #[error(transparent)]
    Invalid(#[from] ConfigError),
}

/// Everything one chat session depends on
#[derive(Debug, Clone, Serialize)]
pub struct SessionState {
    pub model: ModelOption,

    /// Preset the instruction came from, `None` for free text
    pub preset: Option<String>,

    pub system_instruction: String,

    /// Replies are parsed for thought/solution sections
    pub tagged_format: bool,

    pub params: InferenceParams,

    pub conversation: Conversation,
}

impl SessionState {
    /// Fresh session with the catalog's default model and preset
    pub fn from_catalog(
        catalog: &CatalogConfig,
        prompts: &PromptLibrary,
        preset: &str,
    ) -> Result<Self, ConfigError> {
        let model = catalog.default_model().ok_or_else(|| {
            ConfigError::Validation(format!("unknown default model '{}'", catalog.default_model))
        })?;
        let template = prompts
            .get(preset)
            .map_err(|e| ConfigError::Validation(e.to_string()))?;

        Ok(Self {
            model,
            preset: Some(preset.to_string()),
            system_instruction: template.system_prompt.content.clone(),
            tagged_format: template.preset.tagged,
            params: catalog.inference,
            conversation: Conversation::new(),
        })
    }

    /// Switch model. A different model starts an empty conversation.
    pub fn with_model(mut self, model: ModelOption) -> Self {
        if model.id != self.model.id {
            tracing::debug!("Model changed to {}, clearing history", model.id);
            self.conversation = Conversation::new();
        }
        self.model = model;
        self
    }

    /// Switch to a preset instruction
    pub fn with_preset(self, key: &str, prompts: &PromptLibrary) -> Result<Self, ConfigError> {
        let template = prompts
            .get(key)
            .map_err(|e| ConfigError::Validation(e.to_string()))?;

        let mut next = self.replace_instruction(template.system_prompt.content.clone());
        next.preset = Some(key.to_string());
        next.tagged_format = template.preset.tagged;
        Ok(next)
    }

    /// Switch to a free-text instruction.
    ///
    /// Tagged parsing is on when the text asks for the thought markers.
    pub fn with_system_instruction(self, instruction: String) -> Self {
        let tagged = is_tagged_instruction(&instruction);
        let mut next = self.replace_instruction(instruction);
        next.preset = None;
        next.tagged_format = tagged;
        next
    }

    fn replace_instruction(mut self, instruction: String) -> Self {
        if instruction != self.system_instruction {
            tracing::debug!("System instruction changed, clearing history");
            self.conversation = Conversation::new();
        }
        self.system_instruction = instruction;
        self
    }

    /// Replace inference parameters. History is kept.
    pub fn with_params(mut self, params: InferenceParams) -> Result<Self, ConfigError> {
        params.validate()?;
        self.params = params;
        Ok(self)
    }

    /// Record the user turn and build the request for the reply
    pub fn begin_turn(&mut self, message: &str) -> InferenceRequest {
        self.conversation.push_user(message);
        InferenceRequest {
            model_id: self.model.id.clone(),
            system_instruction: self.system_instruction.clone(),
            turns: self.conversation.turns().to_vec(),
            params: self.params,
        }
    }

    /// Record a finished reply. Empty replies are not kept.
    pub fn commit_reply(&mut self, raw: &str) {
        if raw.is_empty() {
            tracing::warn!("Empty reply from {}, not added to history", self.model.id);
            return;
        }
        self.conversation.push_assistant(raw);
    }
}

struct SessionEntry {
    state: SessionState,
    generating: bool,
}

/// Memory-resident sessions keyed by id
#[derive(Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<Uuid, SessionEntry>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn create(&self, state: SessionState) -> Uuid {
        let id = Uuid::new_v4();
        self.sessions.write().await.insert(
            id,
            SessionEntry {
                state,
                generating: false,
            },
        );
        tracing::info!("Created session {}", id);
        id
    }

    pub async fn get(&self, id: Uuid) -> Result<SessionState, SessionError> {
        self.sessions
            .read()
            .await
            .get(&id)
            .map(|entry| entry.state.clone())
            .ok_or(SessionError::NotFound(id))
    }

    pub async fn remove(&self, id: Uuid) -> Result<(), SessionError> {
        self.sessions
            .write()
            .await
            .remove(&id)
            .map(|_| ())
            .ok_or(SessionError::NotFound(id))
    }

    /// Apply a configuration change. Refused while a reply is generating.
    pub async fn update<F>(&self, id: Uuid, change: F) -> Result<SessionState, SessionError>
    where
        F: FnOnce(SessionState) -> Result<SessionState, ConfigError>,
    {
        let mut sessions = self.sessions.write().await;
        let entry = sessions.get_mut(&id).ok_or(SessionError::NotFound(id))?;
        if entry.generating {
            return Err(SessionError::Busy(id));
        }

        entry.state = change(entry.state.clone())?;
        Ok(entry.state.clone())
    }

    /// Record the user turn and mark the session as generating.
    ///
    /// Returns the request and whether replies are tagged.
    pub async fn begin_turn(
        &self,
        id: Uuid,
        message: &str,
    ) -> Result<(InferenceRequest, bool), SessionError> {
        let mut sessions = self.sessions.write().await;
        let entry = sessions.get_mut(&id).ok_or(SessionError::NotFound(id))?;
        if entry.generating {
            return Err(SessionError::Busy(id));
        }

        entry.generating = true;
        let request = entry.state.begin_turn(message);
        Ok((request, entry.state.tagged_format))
    }

    /// Clear the generating flag, committing the reply if there is one
    pub async fn finish_turn(&self, id: Uuid, reply: Option<&str>) {
        let mut sessions = self.sessions.write().await;
        match sessions.get_mut(&id) {
            Some(entry) => {
                entry.generating = false;
                if let Some(raw) = reply {
                    entry.state.commit_reply(raw);
                }
            }
            None => tracing::warn!("Session {} vanished while generating", id),
        }
    }
}
