//! Session parameters and their persistence
//!
//! The caller owns `SessionParams`: it reads them at startup, writes them on
//! every change, and hands a copy to each submission. The coordinator never
//! mutates them.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tandem_protocol::{GenerationParams, Variant};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Session file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Comparison mode toggle and the model variant B should use.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompareSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compare_model: Option<String>,
}

/// Last-used sampling parameters plus the compare toggle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionParams {
    #[serde(default)]
    pub chat: GenerationParams,
    #[serde(default)]
    pub compare: CompareSettings,
}

impl SessionParams {
    /// Variants one submission fans out to: always A, B in compare mode.
    pub fn active_variants(&self) -> Vec<Variant> {
        if self.compare.enabled {
            vec![Variant::A, Variant::B]
        } else {
            vec![Variant::A]
        }
    }

    /// Clamped parameters for one variant. B swaps in `compare_model` when
    /// set and shares everything else.
    pub fn params_for(&self, variant: Variant) -> GenerationParams {
        let mut params = self.chat.clone();
        if variant == Variant::B {
            if let Some(model) = self
                .compare
                .compare_model
                .as_ref()
                .filter(|m| !m.trim().is_empty())
            {
                params.model = Some(model.clone());
            }
        }
        params.clamped()
    }
}

/// On-disk document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoredSession {
    #[serde(default)]
    pub chat_params: GenerationParams,
    #[serde(default)]
    pub compare: CompareSettings,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_conversation_id: Option<String>,
}

impl StoredSession {
    pub fn params(&self) -> SessionParams {
        SessionParams {
            chat: self.chat_params.clone(),
            compare: self.compare.clone(),
        }
    }

    pub fn set_params(&mut self, params: &SessionParams) {
        self.chat_params = params.chat.clone();
        self.compare = params.compare.clone();
    }
}

/// JSON file store for `StoredSession`.
pub struct SessionStore {
    file_path: PathBuf,
}

impl SessionStore {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            file_path: crate::paths::session_file(data_dir),
        }
    }

    /// Create store with custom path (for testing)
    pub fn with_path(file_path: PathBuf) -> Self {
        Self { file_path }
    }

    pub fn path(&self) -> &Path {
        &self.file_path
    }

    /// Load the stored session; a missing file yields defaults.
    pub async fn load(&self) -> Result<StoredSession, SettingsError> {
        let contents = match tokio::fs::read_to_string(&self.file_path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(StoredSession::default());
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_str(&contents)?)
    }

    /// Write atomically using temp file + rename
    pub async fn save(&self, session: &StoredSession) -> Result<(), SettingsError> {
        if let Some(parent) = self.file_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_string_pretty(session)?;
        let temp_path = self.file_path.with_extension("json.tmp");
        tokio::fs::write(&temp_path, json).await?;
        tokio::fs::rename(&temp_path, &self.file_path).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variant_b_uses_compare_model_and_shares_the_rest() {
        let params = SessionParams {
            chat: GenerationParams {
                model: Some("gpt-4o-mini".to_string()),
                temperature: 0.2,
                top_p: 0.8,
                max_tokens: 300,
            },
            compare: CompareSettings {
                enabled: true,
                compare_model: Some("gpt-4o".to_string()),
            },
        };

        assert_eq!(params.active_variants(), vec![Variant::A, Variant::B]);
        let a = params.params_for(Variant::A);
        let b = params.params_for(Variant::B);
        assert_eq!(a.model.as_deref(), Some("gpt-4o-mini"));
        assert_eq!(b.model.as_deref(), Some("gpt-4o"));
        assert_eq!(b.temperature, 0.2);
        assert_eq!(b.top_p, 0.8);
        assert_eq!(b.max_tokens, 300);
    }

    #[test]
    fn compare_off_yields_only_a() {
        let params = SessionParams::default();
        assert_eq!(params.active_variants(), vec![Variant::A]);
        assert_eq!(params.params_for(Variant::B).model, None);
    }

    #[tokio::test]
    async fn missing_file_loads_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());
        assert_eq!(store.load().await.unwrap(), StoredSession::default());
    }

    #[tokio::test]
    async fn save_then_load_preserves_document() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::with_path(dir.path().join("nested").join("session.json"));

        let mut stored = StoredSession {
            last_conversation_id: Some("12".to_string()),
            ..Default::default()
        };
        stored.set_params(&SessionParams {
            chat: GenerationParams {
                temperature: 0.4,
                ..Default::default()
            },
            compare: CompareSettings {
                enabled: true,
                compare_model: Some("gpt-4o".to_string()),
            },
        });
        store.save(&stored).await.unwrap();

        let raw = std::fs::read_to_string(store.path()).unwrap();
        let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(json["chat_params"]["temperature"], 0.4);
        assert_eq!(json["compare"]["compare_model"], "gpt-4o");

        let loaded = store.load().await.unwrap();
        assert_eq!(loaded, stored);
        assert!(loaded.params().compare.enabled);
    }

    #[tokio::test]
    async fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());
        std::fs::write(store.path(), "{not json").unwrap();
        assert!(matches!(store.load().await, Err(SettingsError::Json(_))));
    }
}
