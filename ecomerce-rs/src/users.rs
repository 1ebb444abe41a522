//! Registered users and the optional TOML file used to seed them.
//!
//! ## Users file format
//!
//! **Single user (flat):**
//! ```toml
//! username = "admin"
//! password = "secret"
//! ```
//!
//! **Multiple users (array):**
//! ```toml
//! [[users]]
//! username = "alice"
//! password = "pw1"
//!
//! [[users]]
//! username = "bob"
//! password = "pw2"
//! ```
//!
//! Both can be combined. Entries with an empty username or password are skipped.

use std::fmt::Debug;
use std::path::Path;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Deserialize;
use subtle::ConstantTimeEq;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegisterError {
    #[error("username and password are required")]
    MissingCredentials,
    #[error("username {0} is already registered")]
    UsernameTaken(String),
}

/// Credential lookup and registration. Shared by every request.
pub trait UserRepository: Debug + Send + Sync {
    fn find_by_credentials(&self, username: &str, password: &str) -> Option<User>;

    fn insert(&self, user: User) -> Result<(), RegisterError>;

    fn count(&self) -> usize;
}

#[derive(Debug, Default)]
pub struct InMemoryUsers {
    users: DashMap<String, String>,
}

impl InMemoryUsers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a repository from seed users. Later duplicates replace earlier ones.
    pub fn from_users(users: Vec<User>) -> Self {
        let repo = Self::new();
        for user in users {
            let username = user.username.trim().to_string();
            if username.is_empty() || user.password.is_empty() {
                continue;
            }
            repo.users.insert(username, user.password);
        }
        repo
    }
}

impl UserRepository for InMemoryUsers {
    fn find_by_credentials(&self, username: &str, password: &str) -> Option<User> {
        let entry = self.users.get(username.trim())?;
        let matches: bool = password.as_bytes().ct_eq(entry.value().as_bytes()).into();
        matches.then(|| User {
            username: entry.key().clone(),
            password: entry.value().clone(),
        })
    }

    fn insert(&self, user: User) -> Result<(), RegisterError> {
        let username = user.username.trim().to_string();
        if username.is_empty() || user.password.is_empty() {
            return Err(RegisterError::MissingCredentials);
        }

        match self.users.entry(username) {
            Entry::Occupied(entry) => Err(RegisterError::UsernameTaken(entry.key().clone())),
            Entry::Vacant(entry) => {
                debug!(username = %entry.key(), "user registered");
                entry.insert(user.password);
                Ok(())
            }
        }
    }

    fn count(&self) -> usize {
        self.users.len()
    }
}

#[derive(Debug, Error)]
pub enum UserFileError {
    #[error("failed to read users file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid users file {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
    #[error("users file {path} does not define valid credentials")]
    EmptyCredentials { path: String },
}

#[derive(Debug, Default, Deserialize)]
struct UsersFile {
    username: Option<String>,
    password: Option<String>,
    users: Option<Vec<UserEntry>>,
}

#[derive(Debug, Clone, Deserialize)]
struct UserEntry {
    username: String,
    password: String,
}

/// Load seed users. Returns an empty list when no path is configured.
/// Warns if the file is world-readable (Unix only).
pub fn load_users_file(path: Option<&Path>) -> Result<Vec<User>, UserFileError> {
    let Some(path) = path else {
        return Ok(Vec::new());
    };
    check_file_permissions(path);

    let raw = std::fs::read_to_string(path).map_err(|source| UserFileError::Read {
        path: path.display().to_string(),
        source,
    })?;

    let parsed: UsersFile = toml::from_str(&raw).map_err(|source| UserFileError::Parse {
        path: path.display().to_string(),
        source,
    })?;

    let mut users = Vec::new();
    if let (Some(username), Some(password)) = (parsed.username, parsed.password) {
        users.push(User { username, password });
    }
    if let Some(more) = parsed.users {
        users.extend(more.into_iter().map(|entry| User {
            username: entry.username,
            password: entry.password,
        }));
    }
    users.retain(|user| !user.username.trim().is_empty() && !user.password.is_empty());

    if users.is_empty() {
        return Err(UserFileError::EmptyCredentials {
            path: path.display().to_string(),
        });
    }
    Ok(users)
}

#[cfg(unix)]
fn check_file_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Ok(meta) = std::fs::metadata(path) {
        if meta.permissions().mode() & 0o004 != 0 {
            warn!(
                path = %path.display(),
                "users file is world-readable; consider chmod 600"
            );
        }
    }
}

#[cfg(not(unix))]
fn check_file_permissions(_path: &Path) {}
