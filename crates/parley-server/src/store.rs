//! User credential store.
//!
//! In-memory map of users to salted password verifiers, optionally persisted
//! to a JSON file so registrations survive restarts.

use crate::auth::permissions::GUEST_LOGIN;
use parley_core::{ParleyError, PasswordHash};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("user already exists: {0}")]
    AlreadyExists(String),

    #[error(transparent)]
    Internal(#[from] ParleyError),
}

/// A stored user.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct UserRecord {
    username: String,
    password: PasswordHash,
    created_at: u64,
}

/// Public view of a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserInfo {
    pub username: String,
    pub created_at: u64,
}

impl From<&UserRecord> for UserInfo {
    fn from(r: &UserRecord) -> Self {
        Self {
            username: r.username.clone(),
            created_at: r.created_at,
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct UsersFile {
    #[serde(default)]
    users: Vec<UserRecord>,
}

/// Credential store.
#[derive(Debug)]
pub struct UserStore {
    users: RwLock<HashMap<String, UserRecord>>,
    path: Option<PathBuf>,
    iterations: u32,
}

impl UserStore {
    /// A store that lives only as long as the process.
    pub fn in_memory(iterations: u32) -> Self {
        Self {
            users: RwLock::new(HashMap::new()),
            path: None,
            iterations,
        }
    }

    /// Open a file-backed store, loading existing users if the file exists.
    pub async fn open(path: PathBuf, iterations: u32) -> Result<Self, StoreError> {
        let mut users = HashMap::new();
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => {
                let file: UsersFile = serde_json::from_str(&content).map_err(|e| {
                    ParleyError::Config(format!("users file {}: {e}", path.display()))
                })?;
                for record in file.users {
                    users.insert(record.username.clone(), record);
                }
                info!(path = %path.display(), count = users.len(), "loaded users");
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "users file not found, starting empty");
            }
            Err(e) => return Err(ParleyError::from(e).into()),
        }

        Ok(Self {
            users: RwLock::new(users),
            path: Some(path),
            iterations,
        })
    }

    /// Create a user. Names and passwords are trimmed; names starting with
    /// `guest` (any case) are reserved for generated guest identities.
    pub async fn create_user(&self, username: &str, password: &str) -> Result<(), StoreError> {
        let username = username.trim();
        let password = password.trim();
        if username.is_empty() || password.is_empty() {
            return Err(StoreError::InvalidInput(
                "username and password must not be empty or whitespace".into(),
            ));
        }
        if username.contains(':') {
            return Err(StoreError::InvalidInput("username must not contain ':'".into()));
        }
        if is_reserved(username) {
            return Err(StoreError::InvalidInput(format!(
                "names starting with `{GUEST_LOGIN}` are reserved"
            )));
        }

        let record = UserRecord {
            username: username.to_string(),
            password: PasswordHash::generate(password, self.iterations)?,
            created_at: unix_now(),
        };

        let mut users = self.users.write().await;
        if users.contains_key(username) {
            return Err(StoreError::AlreadyExists(username.to_string()));
        }
        users.insert(username.to_string(), record);

        if let Err(e) = self.persist(&users).await {
            users.remove(username);
            return Err(e.into());
        }

        info!(user = %username, "user created");
        Ok(())
    }

    /// Check a username/password pair.
    pub async fn auth_user(&self, username: &str, password: &str) -> bool {
        let users = self.users.read().await;
        match users.get(username) {
            Some(record) => {
                let ok = record.password.verify(password);
                debug!(user = %username, ok, "password check");
                ok
            }
            None => {
                debug!(user = %username, "unknown user");
                false
            }
        }
    }

    /// All users, sorted by name.
    pub async fn users(&self) -> Vec<UserInfo> {
        let users = self.users.read().await;
        let mut list: Vec<UserInfo> = users.values().map(UserInfo::from).collect();
        list.sort_by(|a, b| a.username.cmp(&b.username));
        list
    }

    pub async fn user_info(&self, username: &str) -> Option<UserInfo> {
        self.users.read().await.get(username).map(UserInfo::from)
    }

    /// Write the whole map to disk via a temp file + rename.
    async fn persist(&self, users: &HashMap<String, UserRecord>) -> Result<(), ParleyError> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let mut records: Vec<UserRecord> = users.values().cloned().collect();
        records.sort_by(|a, b| a.username.cmp(&b.username));
        let content = serde_json::to_string_pretty(&UsersFile { users: records })
            .map_err(|e| ParleyError::Internal(format!("serialize users: {e}")))?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, content).await?;
        if let Err(e) = tokio::fs::rename(&tmp, path).await {
            warn!(path = %path.display(), error = %e, "failed to replace users file");
            return Err(e.into());
        }
        Ok(())
    }
}

fn is_reserved(username: &str) -> bool {
    username
        .get(..GUEST_LOGIN.len())
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case(GUEST_LOGIN))
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
