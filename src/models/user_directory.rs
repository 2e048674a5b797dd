use std::collections::HashMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Externally asserted identity. The core neither validates nor manages
/// authentication; this record arrives from the login collaborator as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub picture: Option<String>,
}

/// Registry of known users keyed by email, injected into whatever needs
/// identity resolution.
#[derive(Default)]
pub struct UserDirectory {
    users: RwLock<HashMap<String, User>>,
}

impl UserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, email: &str) -> Option<User> {
        self.users.read().get(email).cloned()
    }

    /// Insert or replace the record for the user's email.
    pub fn upsert(&self, user: User) {
        self.users.write().insert(user.email.clone(), user);
    }

    pub fn len(&self) -> usize {
        self.users.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.read().is_empty()
    }
}
