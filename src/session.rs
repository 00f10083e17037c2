//! Operator session: bearer token, identity claim and admin flag.
//!
//! The session is established by exchanging an identity-provider ID token
//! with the registry and persisted to a small JSON file so it survives
//! restarts. The admin flag is whatever the registry said; it is never
//! derived locally.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::registry::{AuthResponse, Identity};

// ---

pub type SharedSession = Arc<RwLock<Session>>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Session {
    #[serde(rename = "access_token")]
    pub token: Option<String>,
    #[serde(default)]
    pub identity: Option<Identity>,
    #[serde(default)]
    pub is_admin: bool,
}

impl Session {
    // ---
    pub fn from_auth(auth: AuthResponse) -> Self {
        Self {
            token: Some(auth.access_token),
            identity: auth.user,
            is_admin: auth.is_admin,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.token.as_deref().is_some_and(|t| !t.is_empty())
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref().filter(|t| !t.is_empty())
    }
}

/// File-backed session persistence.
#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    // ---
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the persisted session. A missing or unreadable file yields an
    /// anonymous session.
    pub fn load(&self) -> Session {
        // ---
        match fs::read_to_string(&self.path) {
            Ok(text) => match serde_json::from_str(&text) {
                Ok(session) => session,
                Err(e) => {
                    tracing::warn!("Ignoring corrupt session file {}: {}", self.path.display(), e);
                    Session::default()
                }
            },
            Err(e) if e.kind() == ErrorKind::NotFound => Session::default(),
            Err(e) => {
                tracing::warn!("Cannot read session file {}: {}", self.path.display(), e);
                Session::default()
            }
        }
    }

    pub fn save(&self, session: &Session) -> Result<()> {
        // ---
        let text = serde_json::to_string_pretty(session)?;
        fs::write(&self.path, text)
            .with_context(|| format!("Failed to write session file {}", self.path.display()))
    }

    pub fn clear(&self) -> Result<()> {
        // ---
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e)
                .with_context(|| format!("Failed to remove session file {}", self.path.display())),
        }
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    fn create_test_session() -> Session {
        // ---
        Session {
            token: Some("jwt-token".into()),
            identity: Some(Identity {
                email: "ops@example.com".into(),
                name: Some("Field Ops".into()),
                picture: None,
            }),
            is_admin: true,
        }
    }

    #[test]
    fn test_round_trip_through_file() {
        // ---
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path().join("session.json"));

        assert_eq!(store.load(), Session::default());

        let session = create_test_session();
        store.save(&session).unwrap();
        assert_eq!(store.load(), session);

        store.clear().unwrap();
        assert_eq!(store.load(), Session::default());
        store.clear().unwrap();
    }

    #[test]
    fn test_persisted_keys() {
        // ---
        let json = serde_json::to_value(create_test_session()).unwrap();
        assert_eq!(json["access_token"], "jwt-token");
        assert_eq!(json["is_admin"], true);
    }

    #[test]
    fn test_corrupt_file_is_anonymous() {
        // ---
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        fs::write(&path, "{not json").unwrap();

        let session = SessionStore::new(path).load();
        assert!(!session.is_authenticated());
        assert!(!session.is_admin);
    }

    #[test]
    fn test_empty_token_is_not_authenticated() {
        // ---
        let session = Session {
            token: Some(String::new()),
            ..Session::default()
        };
        assert!(!session.is_authenticated());
        assert_eq!(session.token(), None);
    }
}
