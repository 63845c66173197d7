//! Device identity: the `User` created once and reused on every visit.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::info;
use uuid::Uuid;

use flurry_types::models::{Chat, User};

use crate::backend::Backend;
use crate::error::{ChatError, StoreError};

/// Key the user record is stored under.
pub const IDENTITY_KEY: &str = "chat-app-user";

pub trait IdentityStore: Send + Sync {
    fn load(&self) -> Result<Option<User>, StoreError>;
    fn save(&self, user: &User) -> Result<(), StoreError>;
}

/// JSON file holding a small key/value map, one entry per [`IDENTITY_KEY`].
#[derive(Debug, Clone)]
pub struct FileIdentityStore {
    path: PathBuf,
}

impl FileIdentityStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_map(&self) -> Result<HashMap<String, serde_json::Value>, StoreError> {
        match fs::read_to_string(&self.path) {
            Ok(raw) if raw.trim().is_empty() => Ok(HashMap::new()),
            Ok(raw) => Ok(serde_json::from_str(&raw)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(e.into()),
        }
    }
}

impl IdentityStore for FileIdentityStore {
    fn load(&self) -> Result<Option<User>, StoreError> {
        let mut map = self.read_map()?;
        match map.remove(IDENTITY_KEY) {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    fn save(&self, user: &User) -> Result<(), StoreError> {
        let mut map = self.read_map()?;
        map.insert(IDENTITY_KEY.to_string(), serde_json::to_value(user)?);

        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(&map)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryIdentityStore {
    user: Mutex<Option<User>>,
}

impl MemoryIdentityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(user: User) -> Self {
        Self {
            user: Mutex::new(Some(user)),
        }
    }
}

impl IdentityStore for MemoryIdentityStore {
    fn load(&self) -> Result<Option<User>, StoreError> {
        Ok(self.user.lock().map_err(|_| StoreError::Poisoned)?.clone())
    }

    fn save(&self, user: &User) -> Result<(), StoreError> {
        *self.user.lock().map_err(|_| StoreError::Poisoned)? = Some(user.clone());
        Ok(())
    }
}

/// Reuse the stored user, or create one named `name` and remember it.
pub async fn establish_identity<B, S>(store: &S, backend: &B, name: &str) -> Result<User, ChatError>
where
    B: Backend + ?Sized,
    S: IdentityStore + ?Sized,
{
    if let Some(user) = store.load().map_err(|e| ChatError::Identity(e.to_string()))? {
        return Ok(user);
    }

    let user = backend
        .create_user(name)
        .await
        .map_err(|e| ChatError::Identity(e.to_string()))?;
    store
        .save(&user)
        .map_err(|e| ChatError::Identity(e.to_string()))?;
    info!("created identity {} ({})", user.name, user.id);
    Ok(user)
}

/// Membership upsert for an existing chat; safe to repeat.
pub async fn join_chat<B>(backend: &B, chat_id: Uuid, user: &User) -> Result<(), ChatError>
where
    B: Backend + ?Sized,
{
    backend
        .upsert_membership(chat_id, user.id)
        .await
        .map(|_| ())
        .map_err(|e| ChatError::Identity(e.to_string()))
}

/// Create a fresh chat and enter it: new chat and identity in parallel,
/// then the membership.
pub async fn start_chat<B, S>(
    store: &S,
    backend: &B,
    name: &str,
) -> Result<(Chat, User), ChatError>
where
    B: Backend + ?Sized,
    S: IdentityStore + ?Sized,
{
    let create_chat = async {
        backend
            .create_chat(None)
            .await
            .map_err(|e| ChatError::Identity(e.to_string()))
    };
    let (chat, user) = tokio::try_join!(create_chat, establish_identity(store, backend, name))?;

    join_chat(backend, chat.id, &user).await?;
    info!("started chat {} ({})", chat.display_name(), chat.id);
    Ok((chat, user))
}
