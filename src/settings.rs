use crate::context::DEFAULT_CONTEXT_BUDGET;
use crate::db::{Database, StoreError};
use crate::llm::openai::OpenAiConfig;
use crate::llm::{ModelInfo, ProviderConfig, ProviderKind};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const SETTING_KEYS: &[&str] = &[
    "active_provider",
    "openai_base_url",
    "openai_model",
    "openai_api_key",
    "deepseek_base_url",
    "deepseek_model",
    "deepseek_api_key",
    "gemini_base_url",
    "gemini_model",
    "gemini_api_key",
    "system_prompt",
    "use_search",
    "context_budget",
    "user_id",
];

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Unknown setting key: {0}")]
    UnknownKey(String),
    #[error("Invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl Serialize for SettingsError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

/// Snapshot of the user's configuration. Loaded once per operation and
/// passed down by reference; nothing mutates it in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppSettings {
    pub active_provider: ProviderKind,
    pub openai: ProviderConfig,
    pub deepseek: ProviderConfig,
    pub gemini: ProviderConfig,
    pub system_prompt: Option<String>,
    pub use_search: bool,
    pub context_budget: usize,
    pub user_id: String,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            active_provider: ProviderKind::DeepSeek,
            openai: ProviderKind::OpenAi.default_config(),
            deepseek: ProviderKind::DeepSeek.default_config(),
            gemini: ProviderKind::Gemini.default_config(),
            system_prompt: None,
            use_search: false,
            context_budget: DEFAULT_CONTEXT_BUDGET,
            user_id: "local".to_string(),
        }
    }
}

impl AppSettings {
    /// Stored settings layered over the defaults.
    pub fn load(db: &Database) -> Result<Self, SettingsError> {
        let mut settings = Self::default();
        for key in SETTING_KEYS {
            if let Some(value) = db.get_setting(key)? {
                settings.apply(key, &value)?;
            }
        }
        Ok(settings)
    }

    /// Validate and persist one setting.
    pub fn set(db: &Database, key: &str, value: &str) -> Result<(), SettingsError> {
        if !SETTING_KEYS.contains(&key) {
            return Err(SettingsError::UnknownKey(key.to_string()));
        }
        Self::default().apply(key, value)?;
        db.set_setting(key, value)?;
        Ok(())
    }

    /// Remove a stored setting so its default applies again.
    pub fn reset(db: &Database, key: &str) -> Result<(), SettingsError> {
        if !SETTING_KEYS.contains(&key) {
            return Err(SettingsError::UnknownKey(key.to_string()));
        }
        db.delete_setting(key)?;
        Ok(())
    }

    /// Stored settings for display, with API keys masked.
    pub fn masked(db: &Database) -> Result<HashMap<String, String>, SettingsError> {
        let mut map = HashMap::new();
        for key in SETTING_KEYS {
            if let Some(value) = db.get_setting(key)? {
                let shown = if key.ends_with("_api_key") {
                    mask_secret(&value)
                } else {
                    value
                };
                map.insert(key.to_string(), shown);
            }
        }
        Ok(map)
    }

    fn apply(&mut self, key: &str, value: &str) -> Result<(), SettingsError> {
        let invalid = |reason: String| SettingsError::InvalidValue {
            key: key.to_string(),
            reason,
        };

        match key {
            "active_provider" => {
                self.active_provider = value.parse().map_err(|e: crate::llm::LlmError| invalid(e.to_string()))?;
            }
            "system_prompt" => {
                self.system_prompt = Some(value.to_string()).filter(|p| !p.trim().is_empty());
            }
            "use_search" => {
                self.use_search = value
                    .trim()
                    .parse()
                    .map_err(|_| invalid("expected true or false".into()))?;
            }
            "context_budget" => {
                self.context_budget = value
                    .trim()
                    .parse()
                    .map_err(|_| invalid("expected a non-negative character count".into()))?;
            }
            "user_id" => {
                let id = value.trim();
                if id.is_empty() || id.contains(|c: char| c == '/' || c == '\\') || id == ".." {
                    return Err(invalid("must be a non-empty name without path separators".into()));
                }
                self.user_id = id.to_string();
            }
            _ => {
                let (provider, field) = key
                    .split_once('_')
                    .ok_or_else(|| SettingsError::UnknownKey(key.to_string()))?;
                let kind: ProviderKind = provider
                    .parse()
                    .map_err(|_| SettingsError::UnknownKey(key.to_string()))?;
                let config = self.provider_mut(kind);
                match field {
                    "base_url" => config.base_url = value.trim().to_string(),
                    "model" => config.model = value.trim().to_string(),
                    "api_key" => config.api_key = value.trim().to_string(),
                    _ => return Err(SettingsError::UnknownKey(key.to_string())),
                }
            }
        }
        Ok(())
    }

    pub fn provider(&self, kind: ProviderKind) -> &ProviderConfig {
        match kind {
            ProviderKind::OpenAi => &self.openai,
            ProviderKind::DeepSeek => &self.deepseek,
            ProviderKind::Gemini => &self.gemini,
        }
    }

    fn provider_mut(&mut self, kind: ProviderKind) -> &mut ProviderConfig {
        match kind {
            ProviderKind::OpenAi => &mut self.openai,
            ProviderKind::DeepSeek => &mut self.deepseek,
            ProviderKind::Gemini => &mut self.gemini,
        }
    }

    pub fn active_config(&self) -> &ProviderConfig {
        self.provider(self.active_provider)
    }

    /// Embeddings go through the OpenAI provider; `None` when it has no key.
    pub fn embedding_config(&self) -> Option<OpenAiConfig> {
        let api_key = self.openai.api_key.trim();
        if api_key.is_empty() || self.openai.base_url.trim().is_empty() {
            return None;
        }
        Some(OpenAiConfig {
            api_key: api_key.to_string(),
            base_url: self.openai.base_url.trim().to_string(),
        })
    }

    /// Models the user can pick, one per provider. Providers without a key
    /// are listed as demo mode.
    pub fn available_models(&self) -> Vec<ModelInfo> {
        ProviderKind::ALL
            .iter()
            .map(|kind| {
                let config = self.provider(*kind);
                let name = if config.api_key.trim().is_empty() {
                    format!("{} (demo mode)", kind.label())
                } else {
                    config.model.clone()
                };
                ModelInfo {
                    id: format!("{}/{}", kind, config.model),
                    name,
                    provider: kind.label().to_string(),
                }
            })
            .collect()
    }
}

fn mask_secret(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= 8 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}...{}", head, tail)
}
