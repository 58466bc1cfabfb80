use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

use crate::config::get_config_directory;
use crate::errors::{AppError, AppResult};
use crate::security::InputValidator;

/// Source of the signed-in user's identity.
pub trait SessionProvider: Send + Sync {
    fn current_user(&self) -> Option<String>;
}

/// Resolve the acting user, treating a blank id as signed out.
pub fn resolve_user(session: &dyn SessionProvider) -> AppResult<String> {
    let user_id = session
        .current_user()
        .ok_or_else(|| AppError::auth("no user in session"))?;
    InputValidator::validate_user_id(&user_id)?;
    Ok(user_id.trim().to_string())
}

#[derive(Debug, Clone, Default)]
pub struct StaticSession {
    user_id: Option<String>,
}

impl StaticSession {
    pub fn signed_in(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
        }
    }

    pub fn signed_out() -> Self {
        Self { user_id: None }
    }
}

impl SessionProvider for StaticSession {
    fn current_user(&self) -> Option<String> {
        self.user_id.clone()
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct SessionFile {
    #[serde(rename = "userId")]
    user_id: String,
    #[serde(rename = "signedInAt")]
    signed_in_at: chrono::DateTime<chrono::Utc>,
}

/// Session persisted as `session.json` beside the config file.
#[derive(Debug, Clone)]
pub struct FileSession {
    path: PathBuf,
}

impl FileSession {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn default_location() -> AppResult<Self> {
        Ok(Self::new(get_config_directory()?.join("session.json")))
    }

    pub fn login(&self, user_id: &str) -> AppResult<()> {
        InputValidator::validate_user_id(user_id)?;

        let session = SessionFile {
            user_id: user_id.trim().to_string(),
            signed_in_at: chrono::Utc::now(),
        };
        fs::write(&self.path, serde_json::to_string_pretty(&session)?)?;

        log::info!("Signed in as {}", session.user_id);
        Ok(())
    }

    pub fn logout(&self) -> AppResult<()> {
        if self.path.exists() {
            fs::remove_file(&self.path)?;
            log::info!("Signed out");
        }
        Ok(())
    }
}

impl SessionProvider for FileSession {
    fn current_user(&self) -> Option<String> {
        let contents = fs::read_to_string(&self.path).ok()?;
        match serde_json::from_str::<SessionFile>(&contents) {
            Ok(session) => Some(session.user_id),
            Err(e) => {
                log::warn!("Ignoring unreadable session file {}: {}", self.path.display(), e);
                None
            }
        }
    }
}
