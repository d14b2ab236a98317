// File-backed user directory
//
// Users are operator-managed in a YAML file; only argon2 hashes are
// stored. There is deliberately no users table: sessions carry the
// resolved identity.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use argon2::password_hash::{rand_core::OsRng, PasswordHasher, SaltString};
use argon2::{Argon2, PasswordHash, PasswordVerifier};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub username: String,
    pub password_hash: String,
    pub team: String,
    #[serde(default = "default_role")]
    pub role: String,
}

fn default_role() -> String {
    "user".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct UsersFile {
    #[serde(default)]
    users: Vec<User>,
}

/// In-memory view of the users file.
#[derive(Debug, Clone, Default)]
pub struct UserDirectory {
    users: BTreeMap<String, User>,
}

impl UserDirectory {
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read users file {}", path.display()))?;
        let parsed: UsersFile = serde_yaml::from_str(&raw)
            .with_context(|| format!("failed to parse users file {}", path.display()))?;

        let mut users = BTreeMap::new();
        for user in parsed.users {
            users.insert(user.username.clone(), user);
        }
        Ok(Self { users })
    }

    pub fn from_users(list: impl IntoIterator<Item = User>) -> Self {
        Self {
            users: list
                .into_iter()
                .map(|u| (u.username.clone(), u))
                .collect(),
        }
    }

    pub fn get(&self, username: &str) -> Option<&User> {
        self.users.get(username)
    }

    /// Validate credentials; returns the user on success.
    pub fn authenticate(&self, username: &str, password: &str) -> Option<&User> {
        let user = self.users.get(username)?;
        verify_password(&user.password_hash, password).then_some(user)
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

/// Verify a password against a stored argon2 hash.
pub fn verify_password(hash: &str, password: &str) -> bool {
    PasswordHash::new(hash)
        .map(|parsed| {
            Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok()
        })
        .unwrap_or(false)
}

/// Hash a password for storage in the users file.
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("failed to hash password: {e}"))?;
    Ok(hash.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authenticate_round_trip() {
        let directory = UserDirectory::from_users([User {
            username: "alice".into(),
            password_hash: hash_password("s3cret").unwrap(),
            team: "storefront".into(),
            role: "admin".into(),
        }]);

        assert!(directory.authenticate("alice", "s3cret").is_some());
        assert!(directory.authenticate("alice", "wrong").is_none());
        assert!(directory.authenticate("bob", "s3cret").is_none());
    }

    #[test]
    fn loads_users_file_with_default_role() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("users.yaml");
        std::fs::write(
            &path,
            format!(
                "users:\n  - username: carol\n    password_hash: \"{}\"\n    team: data\n",
                hash_password("pw").unwrap()
            ),
        )
        .unwrap();

        let directory = UserDirectory::from_file(&path).unwrap();
        let carol = directory.get("carol").unwrap();
        assert_eq!(carol.role, "user");
        assert_eq!(directory.len(), 1);
    }

    #[test]
    fn malformed_hash_never_verifies() {
        assert!(!verify_password("not-a-hash", "anything"));
    }
}
