use std::path::{Path, PathBuf};

use tracing::warn;

use crate::models::ChatSession;

use super::error::StorageResult;
use super::session_repository::{
    BoxFuture, MemoryNoteStore, SessionRepository, note_record_key, session_record_key,
};

const SESSIONS_SUBDIR: &str = "sessions";
const MEMORY_SUBDIR: &str = "memory";

/// Directory-tier backend: one `{id}.json` file per session under
/// `<root>/sessions/`, memory notes under `<root>/memory/`. The root is
/// the directory the user granted.
#[derive(Clone)]
pub struct JsonFileSessionRepository {
    root: PathBuf,
}

impl JsonFileSessionRepository {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn sessions_dir(&self) -> PathBuf {
        self.root.join(SESSIONS_SUBDIR)
    }

    fn memory_dir(&self) -> PathBuf {
        self.root.join(MEMORY_SUBDIR)
    }

    fn session_path(&self, id: &str) -> PathBuf {
        self.sessions_dir().join(session_record_key(id))
    }
}

/// Write `content` to `path` atomically (temp file, then rename).
async fn write_atomic(path: &Path, content: &str) -> StorageResult<()> {
    let temp_path = path.with_extension("tmp");
    tokio::fs::write(&temp_path, content).await?;
    tokio::fs::rename(&temp_path, path).await?;
    Ok(())
}

impl SessionRepository for JsonFileSessionRepository {
    fn load_all(&self) -> BoxFuture<'static, StorageResult<Vec<ChatSession>>> {
        let dir = self.sessions_dir();

        Box::pin(async move {
            tokio::fs::create_dir_all(&dir).await?;

            let mut sessions = Vec::new();
            let mut entries = tokio::fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if path.extension().and_then(|s| s.to_str()) != Some("json") {
                    continue;
                }
                let content = match tokio::fs::read_to_string(&path).await {
                    Ok(content) => content,
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "Skipping unreadable session file");
                        continue;
                    }
                };
                match serde_json::from_str::<ChatSession>(&content) {
                    Ok(session) => sessions.push(session),
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "Skipping malformed session file");
                    }
                }
            }

            sessions.sort_by_key(|s| std::cmp::Reverse(s.last_updated));
            Ok(sessions)
        })
    }

    fn save(&self, session: &ChatSession) -> BoxFuture<'static, StorageResult<()>> {
        let dir = self.sessions_dir();
        let path = self.session_path(&session.id);
        let session = session.clone();

        Box::pin(async move {
            tokio::fs::create_dir_all(&dir).await?;
            let json = serde_json::to_string_pretty(&session)?;
            write_atomic(&path, &json).await
        })
    }

    fn delete(&self, id: &str) -> BoxFuture<'static, StorageResult<()>> {
        let path = self.session_path(id);

        Box::pin(async move {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e.into()),
            }
        })
    }
}

impl MemoryNoteStore for JsonFileSessionRepository {
    fn save_note(&self, name: &str, content: &str) -> BoxFuture<'static, StorageResult<()>> {
        let dir = self.memory_dir();
        let path = dir.join(note_record_key(name));
        let content = content.to_string();

        Box::pin(async move {
            tokio::fs::create_dir_all(&dir).await?;
            write_atomic(&path, &content).await
        })
    }

    fn list_notes(&self) -> BoxFuture<'static, StorageResult<Vec<String>>> {
        let dir = self.memory_dir();

        Box::pin(async move {
            tokio::fs::create_dir_all(&dir).await?;

            let mut notes = Vec::new();
            let mut entries = tokio::fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if path.extension().and_then(|s| s.to_str()) == Some("md")
                    && let Some(stem) = path.file_stem().and_then(|s| s.to_str())
                {
                    notes.push(stem.to_string());
                }
            }
            Ok(notes)
        })
    }
}
