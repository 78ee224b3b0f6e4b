//! User accounts behind the auth-adjacent protocol messages.
//!
//! The dispatcher only talks to the [`UserService`] trait. The bundled
//! [`FileUserService`] keeps accounts in memory and rewrites a JSON file
//! after every mutation. Passwords are stored as salted SHA-256 digests.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use greenhouse_types::{Role, UserId, UserSummary};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::error::UserError;

/// Account operations consumed by the dispatcher.
pub trait UserService: Send + Sync {
    /// Whether the credentials match a registered user.
    fn validate_user(&self, user: &str, password: &str) -> bool;

    /// Register a new user and return its id.
    fn register_user(&self, user: &str, password: &str, role: Role) -> Result<UserId, UserError>;

    /// Every registered user, without credentials, ordered by name.
    fn get_all_users(&self) -> Vec<UserSummary>;

    /// Change a user's password and/or role. Returns `false` when the id
    /// is unknown.
    fn update_user(
        &self,
        id: UserId,
        password: Option<&str>,
        role: Option<Role>,
    ) -> Result<bool, UserError>;

    /// Remove a user. Returns `false` when the id is unknown.
    fn delete_user(&self, id: UserId) -> Result<bool, UserError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredUser {
    id: UserId,
    user: String,
    role: Role,
    salt: String,
    password_hash: String,
}

impl StoredUser {
    fn summary(&self) -> UserSummary {
        UserSummary {
            id: self.id,
            user: self.user.clone(),
            role: self.role,
        }
    }

    fn set_password(&mut self, password: &str) {
        self.salt = to_hex(&rand::random::<[u8; 16]>());
        self.password_hash = digest(&self.salt, password);
    }

    fn matches(&self, password: &str) -> bool {
        digest(&self.salt, password) == self.password_hash
    }
}

/// File-backed [`UserService`].
#[derive(Debug)]
pub struct FileUserService {
    path: Option<PathBuf>,
    users: Mutex<Vec<StoredUser>>,
}

impl FileUserService {
    /// Load users from `path`. A missing or empty file starts an empty
    /// store that is created on the first mutation.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, UserError> {
        let path = path.into();
        let users = load(&path)?;
        info!(path = %path.display(), users = users.len(), "User store loaded");
        Ok(Self {
            path: Some(path),
            users: Mutex::new(users),
        })
    }

    /// A store that is never written to disk.
    pub const fn in_memory() -> Self {
        Self {
            path: None,
            users: Mutex::new(Vec::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<StoredUser>> {
        self.users.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply `edit` to a copy of the user list and keep the copy only once
    /// it is on disk. Returns `None` when `edit` declines to change
    /// anything.
    fn commit<T>(
        &self,
        edit: impl FnOnce(&mut Vec<StoredUser>) -> Option<T>,
    ) -> Result<Option<T>, UserError> {
        let mut users = self.lock();
        let mut next = users.clone();
        let Some(outcome) = edit(&mut next) else {
            return Ok(None);
        };
        self.persist(&next)?;
        *users = next;
        Ok(Some(outcome))
    }

    fn persist(&self, users: &[StoredUser]) -> Result<(), UserError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let json = serde_json::to_vec_pretty(users)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, path)?;
        debug!(path = %path.display(), users = users.len(), "User store written");
        Ok(())
    }
}

impl UserService for FileUserService {
    fn validate_user(&self, user: &str, password: &str) -> bool {
        self.lock()
            .iter()
            .find(|stored| stored.user == user)
            .is_some_and(|stored| stored.matches(password))
    }

    fn register_user(&self, user: &str, password: &str, role: Role) -> Result<UserId, UserError> {
        let registered = self.commit(|users| {
            if users.iter().any(|stored| stored.user == user) {
                return None;
            }
            let mut stored = StoredUser {
                id: UserId::new(),
                user: String::from(user),
                role,
                salt: String::new(),
                password_hash: String::new(),
            };
            stored.set_password(password);
            let id = stored.id;
            users.push(stored);
            Some(id)
        })?;
        let Some(id) = registered else {
            return Err(UserError::Duplicate(String::from(user)));
        };
        info!(user_id = %id, user, ?role, "User registered");
        Ok(id)
    }

    fn get_all_users(&self) -> Vec<UserSummary> {
        let mut all: Vec<UserSummary> = self.lock().iter().map(StoredUser::summary).collect();
        all.sort_by(|a, b| a.user.cmp(&b.user));
        all
    }

    fn update_user(
        &self,
        id: UserId,
        password: Option<&str>,
        role: Option<Role>,
    ) -> Result<bool, UserError> {
        let updated = self.commit(|users| {
            let stored = users.iter_mut().find(|stored| stored.id == id)?;
            if let Some(password) = password {
                stored.set_password(password);
            }
            if let Some(role) = role {
                stored.role = role;
            }
            Some(())
        })?;
        if updated.is_some() {
            info!(user_id = %id, "User updated");
        }
        Ok(updated.is_some())
    }

    fn delete_user(&self, id: UserId) -> Result<bool, UserError> {
        let deleted = self.commit(|users| {
            let index = users.iter().position(|stored| stored.id == id)?;
            users.remove(index);
            Some(())
        })?;
        if deleted.is_some() {
            info!(user_id = %id, "User deleted");
        }
        Ok(deleted.is_some())
    }
}

fn load(path: &Path) -> Result<Vec<StoredUser>, UserError> {
    match std::fs::read_to_string(path) {
        Ok(contents) if contents.trim().is_empty() => Ok(Vec::new()),
        Ok(contents) => Ok(serde_json::from_str(&contents)?),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(err) => Err(err.into()),
    }
}

fn digest(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(b"|");
    hasher.update(password.as_bytes());
    to_hex(&hasher.finalize())
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().fold(String::with_capacity(64), |mut out, byte| {
        let _ = write!(out, "{byte:02x}");
        out
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    #[test]
    fn register_and_validate() {
        let service = FileUserService::in_memory();
        service.register_user("ana", "secret", Role::Operator).unwrap();
        assert!(service.validate_user("ana", "secret"));
        assert!(!service.validate_user("ana", "wrong"));
        assert!(!service.validate_user("bob", "secret"));
    }

    #[test]
    fn duplicate_name_is_rejected() {
        let service = FileUserService::in_memory();
        service.register_user("ana", "a", Role::Viewer).unwrap();
        assert!(matches!(
            service.register_user("ana", "b", Role::Admin),
            Err(UserError::Duplicate(_))
        ));
        assert_eq!(service.get_all_users().len(), 1);
    }

    #[test]
    fn update_and_delete_report_unknown_ids() {
        let service = FileUserService::in_memory();
        let id = service.register_user("ana", "old", Role::Viewer).unwrap();
        assert!(service.update_user(id, Some("new"), Some(Role::Admin)).unwrap());
        assert!(service.validate_user("ana", "new"));
        assert_eq!(service.get_all_users()[0].role, Role::Admin);

        let ghost = UserId::new();
        assert!(!service.update_user(ghost, None, None).unwrap());
        assert!(!service.delete_user(ghost).unwrap());
        assert!(service.delete_user(id).unwrap());
        assert!(service.get_all_users().is_empty());
    }

    #[test]
    fn persists_across_reopen_without_plaintext() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("users.json");
        {
            let service = FileUserService::open(&path).unwrap();
            service.register_user("ana", "hunter2", Role::Admin).unwrap();
        }
        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(!raw.contains("hunter2"));

        let reopened = FileUserService::open(&path).unwrap();
        assert!(reopened.validate_user("ana", "hunter2"));
        assert_eq!(reopened.get_all_users()[0].user, "ana");
    }

    #[test]
    fn failed_write_leaves_users_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let store_dir = dir.path().join("store");
        std::fs::create_dir(&store_dir).unwrap();
        let service = FileUserService::open(store_dir.join("users.json")).unwrap();
        let id = service.register_user("ana", "pw", Role::Viewer).unwrap();
        std::fs::remove_dir_all(&store_dir).unwrap();

        assert!(matches!(service.delete_user(id), Err(UserError::Io(_))));
        assert!(matches!(
            service.update_user(id, Some("new"), Some(Role::Admin)),
            Err(UserError::Io(_))
        ));
        assert!(matches!(
            service.register_user("bob", "pw", Role::Viewer),
            Err(UserError::Io(_))
        ));

        let users = service.get_all_users();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].role, Role::Viewer);
        assert!(service.validate_user("ana", "pw"));
    }

    #[test]
    fn same_password_gets_distinct_salts() {
        let service = FileUserService::in_memory();
        service.register_user("a", "pw", Role::Viewer).unwrap();
        service.register_user("b", "pw", Role::Viewer).unwrap();
        let users = service.lock();
        assert_ne!(users[0].password_hash, users[1].password_hash);
    }
}
