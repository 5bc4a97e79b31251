// src/chat_store.rs
// Chat Metadata Store (C7): one JSON sidecar file per chat, keyed by chat
// token. Grounded on the on-disk JSON/YAML sidecar idiom used throughout the
// teacher's persona/project metadata layers (read-whole-file, mutate, write-
// whole-file, no in-process cache) generalized to chat records (spec §4.7).

use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

use crate::error::{EngineError, Result};
use crate::model::{ChatConfig, ChatMetadata};

pub struct ChatMetadataStore {
    root: PathBuf,
}

impl ChatMetadataStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, chat_id: &str) -> PathBuf {
        self.root.join(format!("{chat_id}.json"))
    }

    async fn ensure_root(&self) -> Result<()> {
        fs::create_dir_all(&self.root).await?;
        Ok(())
    }

    /// `save` - writes a brand-new or fully-replaced chat record.
    pub async fn save(&self, metadata: &ChatMetadata) -> Result<()> {
        self.ensure_root().await?;
        write_json(&self.path_for(&metadata.chat_id), metadata).await
    }

    /// `get`.
    pub async fn get(&self, chat_id: &str) -> Result<ChatMetadata> {
        read_json(&self.path_for(chat_id)).await
    }

    /// `listByUser` - sorted by `createdAt` descending (spec §4.7).
    pub async fn list_by_user(&self, user_id: &str) -> Result<Vec<ChatMetadata>> {
        self.ensure_root().await?;
        let mut out = Vec::new();
        let mut entries = fs::read_dir(&self.root).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match read_json::<ChatMetadata>(&path).await {
                Ok(metadata) if metadata.user_id == user_id => out.push(metadata),
                Ok(_) => {}
                Err(e) => warn!("chat_store: skipping unreadable sidecar {}: {}", path.display(), e),
            }
        }

        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(out)
    }

    /// `updateChatConfig` - merge semantics: only the `Some` fields in `patch`
    /// overwrite the stored config, the rest are preserved.
    pub async fn update_config(&self, chat_id: &str, patch: ChatConfig) -> Result<ChatMetadata> {
        let mut metadata = self.get(chat_id).await?;

        if patch.system_prompt.is_some() {
            metadata.config.system_prompt = patch.system_prompt;
        }
        if patch.generation_model.is_some() {
            metadata.config.generation_model = patch.generation_model;
        }
        if patch.provider_kind.is_some() {
            metadata.config.provider_kind = patch.provider_kind;
        }
        if patch.persona_name.is_some() {
            metadata.config.persona_name = patch.persona_name;
        }

        metadata.updated_at = chrono::Utc::now();
        self.save(&metadata).await?;
        Ok(metadata)
    }

    /// `updateTitle`. Auto-titling (spec §4.6) calls this with the first
    /// non-trivial user message; explicit renames call it directly.
    pub async fn update_title(&self, chat_id: &str, title: impl Into<String>) -> Result<ChatMetadata> {
        let mut metadata = self.get(chat_id).await?;
        metadata.title = title.into();
        metadata.updated_at = chrono::Utc::now();
        self.save(&metadata).await?;
        Ok(metadata)
    }

    /// Bumps `updatedAt` without touching anything else (spec §4.6's "chat
    /// updatedAt is refreshed" on every turn).
    pub async fn touch(&self, chat_id: &str) -> Result<()> {
        let mut metadata = self.get(chat_id).await?;
        metadata.updated_at = chrono::Utc::now();
        self.save(&metadata).await
    }

    /// `delete`.
    pub async fn delete(&self, chat_id: &str) -> Result<()> {
        let path = self.path_for(chat_id);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

async fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    let body = serde_json::to_string_pretty(value)?;
    fs::write(path, body).await?;
    debug!("chat_store: wrote {}", path.display());
    Ok(())
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let body = fs::read_to_string(path)
        .await
        .map_err(|_| EngineError::not_found(format!("chat metadata not found: {}", path.display())))?;
    Ok(serde_json::from_str(&body)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_and_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = ChatMetadataStore::new(dir.path());
        let metadata = ChatMetadata::new("c1", "u1", "My Chat");

        store.save(&metadata).await.unwrap();
        let loaded = store.get("c1").await.unwrap();
        assert_eq!(loaded.chat_id, "c1");
        assert_eq!(loaded.title, "My Chat");
    }

    #[tokio::test]
    async fn get_missing_chat_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = ChatMetadataStore::new(dir.path());
        let err = store.get("nope").await.unwrap_err();
        assert_eq!(err.error_type().as_str(), "not_found");
    }

    #[tokio::test]
    async fn list_by_user_filters_and_sorts_descending() {
        let dir = tempfile::tempdir().unwrap();
        let store = ChatMetadataStore::new(dir.path());

        let mut older = ChatMetadata::new("c1", "u1", "First");
        older.created_at = chrono::Utc::now() - chrono::Duration::seconds(60);
        let newer = ChatMetadata::new("c2", "u1", "Second");
        let other_user = ChatMetadata::new("c3", "u2", "Not mine");

        store.save(&older).await.unwrap();
        store.save(&newer).await.unwrap();
        store.save(&other_user).await.unwrap();

        let listed = store.list_by_user("u1").await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].chat_id, "c2");
        assert_eq!(listed[1].chat_id, "c1");
    }

    #[tokio::test]
    async fn update_config_merges_only_present_fields() {
        let dir = tempfile::tempdir().unwrap();
        let store = ChatMetadataStore::new(dir.path());
        let mut metadata = ChatMetadata::new("c1", "u1", "Chat");
        metadata.config.persona_name = Some("Old".to_string());
        store.save(&metadata).await.unwrap();

        let patch = ChatConfig { system_prompt: Some("new prompt".to_string()), generation_model: None, provider_kind: None, persona_name: None };
        let updated = store.update_config("c1", patch).await.unwrap();

        assert_eq!(updated.config.system_prompt.as_deref(), Some("new prompt"));
        assert_eq!(updated.config.persona_name.as_deref(), Some("Old"));
    }
}
