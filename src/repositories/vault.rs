use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::models::ChatSession;

use super::error::{StorageError, StorageResult};
use super::in_memory_repository::InMemorySessionRepository;
use super::json_file_repository::JsonFileSessionRepository;
use super::session_repository::{MemoryNoteStore, SessionRepository, VaultBackend};
use super::sqlite_repository::SqliteSessionRepository;

/// Outcome of the durable-storage permission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionState {
    Unverified,
    Granted,
    Denied,
}

/// The directory grant persisted between runs, so a later launch can
/// re-verify without prompting again.
#[derive(Debug, Serialize, Deserialize)]
struct VaultGrant {
    root: PathBuf,
}

/// Durable storage coordinator ("the vault").
///
/// Two tiers: a directory tier that only exists after an explicit user
/// grant, and an embedded-database fallback that is always there. At most
/// one tier receives writes at a time: the directory tier once granted,
/// the fallback otherwise. Loads union both tiers (deduplicated by id,
/// the directory tier winning) and migrate fallback-only records up into
/// the directory tier so the grant becomes the single place of record.
pub struct MemoryVault {
    primary: RwLock<Option<Arc<JsonFileSessionRepository>>>,
    fallback: Arc<dyn VaultBackend>,
    permission: RwLock<PermissionState>,
    grant_file: PathBuf,
}

impl MemoryVault {
    /// Open the vault with the platform-default database fallback. A
    /// database that cannot be opened degrades to session-only in-memory
    /// storage rather than failing the app.
    pub async fn open() -> Self {
        let grant_file = default_grant_path();
        let fallback: Arc<dyn VaultBackend> = match SqliteSessionRepository::new().await {
            Ok(repo) => Arc::new(repo),
            Err(e) => {
                warn!(error = %e, "Session database unavailable, storage is in-memory only");
                Arc::new(InMemorySessionRepository::new())
            }
        };
        Self::with_backend(fallback, grant_file)
    }

    /// Build a vault over an explicit fallback tier and grant-file path.
    pub fn with_backend(fallback: Arc<dyn VaultBackend>, grant_file: PathBuf) -> Self {
        Self {
            primary: RwLock::new(None),
            fallback,
            permission: RwLock::new(PermissionState::Unverified),
            grant_file,
        }
    }

    pub fn permission(&self) -> PermissionState {
        *self.permission.read()
    }

    /// Whether the user-granted directory tier is active.
    pub fn has_memory_access(&self) -> bool {
        self.permission() == PermissionState::Granted
    }

    /// Record an interactive directory grant and activate the directory
    /// tier. The grant is persisted so later runs can re-verify silently.
    pub async fn grant_directory(&self, root: PathBuf) -> StorageResult<()> {
        tokio::fs::create_dir_all(&root).await?;

        if let Err(e) = self.persist_grant(&root).await {
            warn!(error = %e, "Could not persist directory grant; it will not survive this run");
        }

        *self.primary.write() = Some(Arc::new(JsonFileSessionRepository::new(&root)));
        *self.permission.write() = PermissionState::Granted;
        info!(root = %root.display(), "Memory vault directory granted");
        Ok(())
    }

    /// Re-check a previously persisted grant. Returns true when the
    /// directory tier is usable; any failure (no grant, directory gone,
    /// not writable) quietly degrades to the fallback tier.
    pub async fn verify_permission(&self) -> bool {
        let grant = match tokio::fs::read_to_string(&self.grant_file).await {
            Ok(contents) => match serde_json::from_str::<VaultGrant>(&contents) {
                Ok(grant) => grant,
                Err(e) => {
                    warn!(error = %e, "Ignoring malformed directory grant");
                    *self.permission.write() = PermissionState::Denied;
                    return false;
                }
            },
            Err(_) => {
                *self.permission.write() = PermissionState::Denied;
                return false;
            }
        };

        if let Err(e) = probe_writable(&grant.root).await {
            warn!(root = %grant.root.display(), error = %e, "Directory access restricted, falling back to embedded storage");
            *self.permission.write() = PermissionState::Denied;
            return false;
        }

        *self.primary.write() = Some(Arc::new(JsonFileSessionRepository::new(&grant.root)));
        *self.permission.write() = PermissionState::Granted;
        true
    }

    /// Every persisted session across both tiers, deduplicated by id
    /// (directory tier wins) and sorted by recency. Fallback-only records
    /// are copied up into the directory tier when one is active, so the
    /// union shrinks to a single tier over time. Per-tier failures are
    /// logged and treated as an empty tier.
    pub async fn load_all_sessions(&self) -> Vec<ChatSession> {
        let primary = self.primary.read().clone();

        let mut sessions = match &primary {
            Some(tier) => match tier.load_all().await {
                Ok(sessions) => sessions,
                Err(e) => {
                    warn!(error = %e, "Directory tier load failed");
                    Vec::new()
                }
            },
            None => Vec::new(),
        };

        let fallback_sessions = match self.fallback.load_all().await {
            Ok(sessions) => sessions,
            Err(e) => {
                warn!(error = %e, "Fallback tier load failed");
                Vec::new()
            }
        };

        let seen: HashSet<String> = sessions.iter().map(|s| s.id.clone()).collect();
        for session in fallback_sessions {
            if seen.contains(&session.id) {
                continue;
            }
            if let Some(tier) = &primary {
                match tier.save(&session).await {
                    Ok(()) => info!(session_id = %session.id, "Migrated session into the granted directory"),
                    Err(e) => {
                        warn!(session_id = %session.id, error = %e, "Could not migrate session into the granted directory")
                    }
                }
            }
            sessions.push(session);
        }

        sessions.sort_by_key(|s| std::cmp::Reverse(s.last_updated));
        sessions
    }

    /// Idempotent upsert of a settled session snapshot into the active
    /// tier.
    pub async fn sync_session(&self, session: &ChatSession) -> StorageResult<()> {
        self.active_tier().save(session).await
    }

    /// Remove a session from whichever tiers hold it. Absence in a tier
    /// is not an error; tier failures are logged and do not propagate.
    pub async fn delete_session(&self, id: &str) {
        let primary = self.primary.read().clone();
        if let Some(tier) = primary
            && let Err(e) = tier.delete(id).await
        {
            warn!(session_id = %id, error = %e, "Directory tier delete failed");
        }
        if let Err(e) = self.fallback.delete(id).await {
            warn!(session_id = %id, error = %e, "Fallback tier delete failed");
        }
    }

    /// Save a markdown memory note into the active tier.
    pub async fn save_memory_note(&self, name: &str, content: &str) -> StorageResult<()> {
        self.active_tier().save_note(name, content).await
    }

    /// Note names across both tiers, deduplicated, directory tier first.
    pub async fn list_memory_notes(&self) -> Vec<String> {
        let primary = self.primary.read().clone();

        let mut notes = match &primary {
            Some(tier) => tier.list_notes().await.unwrap_or_else(|e| {
                warn!(error = %e, "Directory tier note listing failed");
                Vec::new()
            }),
            None => Vec::new(),
        };

        let fallback_notes = self.fallback.list_notes().await.unwrap_or_else(|e| {
            warn!(error = %e, "Fallback tier note listing failed");
            Vec::new()
        });

        let seen: HashSet<String> = notes.iter().cloned().collect();
        notes.extend(fallback_notes.into_iter().filter(|n| !seen.contains(n)));
        notes
    }

    fn active_tier(&self) -> Arc<dyn VaultBackend> {
        if self.has_memory_access()
            && let Some(tier) = self.primary.read().clone()
        {
            return tier;
        }
        self.fallback.clone()
    }

    async fn persist_grant(&self, root: &Path) -> StorageResult<()> {
        if let Some(parent) = self.grant_file.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_string_pretty(&VaultGrant {
            root: root.to_path_buf(),
        })?;
        tokio::fs::write(&self.grant_file, json).await?;
        Ok(())
    }
}

fn default_grant_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("ultrawan")
        .join("vault_grant.json")
}

/// Check the granted root still exists and accepts writes.
async fn probe_writable(root: &Path) -> StorageResult<()> {
    let metadata = tokio::fs::metadata(root).await?;
    if !metadata.is_dir() {
        return Err(StorageError::Initialization {
            message: format!("granted path {} is not a directory", root.display()),
        });
    }
    let probe = root.join(".ultrawan-probe");
    tokio::fs::write(&probe, b"").await?;
    tokio::fs::remove_file(&probe).await?;
    Ok(())
}
