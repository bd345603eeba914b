use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;

use crate::error::{internal_error, DlResult};

use super::store::CredentialStore;

pub const AUTH_TOKEN_KEY: &str = "dl-api-auth-token";
pub const AUTH_DATA_KEY: &str = "dl-api-auth-data";
pub const AUTH_TOKEN_EXPIRATION: &str = "dl-api-auth-token-expiration";

/// A [`CredentialStore`] bound to one application id.
///
/// Keys are stored as `<app_id>-<name>`. The expiration is kept in epoch seconds; once it
/// has passed, reading the token invalidates both the token and the stored user.
#[derive(Clone)]
pub struct Credentials {
    store: Arc<dyn CredentialStore>,
    app_id: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("app_id", &self.app_id)
            .finish()
    }
}

impl Credentials {
    pub fn new(store: Arc<dyn CredentialStore>, app_id: impl Into<String>) -> Self {
        Self {
            store,
            app_id: app_id.into(),
        }
    }

    pub fn key(&self, name: &str) -> String {
        format!("{}-{}", self.app_id, name)
    }

    /// Loads the persisted user when its token is still valid.
    ///
    /// An expired session is invalidated on the spot.
    pub fn load_current_user(&self) -> DlResult<Option<Value>> {
        match self.expiration()? {
            Some(expiration) if expiration > now_seconds() => self.current_user(),
            Some(_) => {
                self.invalidate()?;
                Ok(None)
            }
            None => Ok(None),
        }
    }

    /// Returns the auth token, or `None` when missing or expired.
    pub fn token(&self) -> DlResult<Option<String>> {
        if let Some(expiration) = self.expiration()? {
            if expiration <= now_seconds() {
                self.invalidate()?;
                return Ok(None);
            }
        }
        Ok(self
            .store
            .get(&self.key(AUTH_TOKEN_KEY))?
            .filter(|token| !token.is_empty()))
    }

    pub fn expiration(&self) -> DlResult<Option<i64>> {
        let raw = self.store.get(&self.key(AUTH_TOKEN_EXPIRATION))?;
        Ok(raw.as_deref().and_then(parse_epoch_seconds))
    }

    pub fn store_token(&self, token: &str, expire_at: &Value) -> DlResult<()> {
        self.store.set(&self.key(AUTH_TOKEN_KEY), token)?;
        let expiration = match expire_at {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        };
        self.store.set(&self.key(AUTH_TOKEN_EXPIRATION), &expiration)
    }

    pub fn current_user(&self) -> DlResult<Option<Value>> {
        let Some(raw) = self.store.get(&self.key(AUTH_DATA_KEY))? else {
            return Ok(None);
        };
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|err| internal_error(format!("Failed to parse stored user: {err}")))
    }

    pub fn store_current_user(&self, user: &Value) -> DlResult<()> {
        let serialized = serde_json::to_string(user)
            .map_err(|err| internal_error(format!("Failed to serialize user: {err}")))?;
        self.store.set(&self.key(AUTH_DATA_KEY), &serialized)
    }

    /// Forgets the token, its expiration and the stored user.
    pub fn invalidate(&self) -> DlResult<()> {
        self.store.remove(&self.key(AUTH_TOKEN_KEY))?;
        self.store.remove(&self.key(AUTH_TOKEN_EXPIRATION))?;
        self.store.remove(&self.key(AUTH_DATA_KEY))
    }
}

fn now_seconds() -> i64 {
    Utc::now().timestamp()
}

fn parse_epoch_seconds(raw: &str) -> Option<i64> {
    let trimmed = raw.trim();
    trimmed
        .parse::<i64>()
        .ok()
        .or_else(|| trimmed.parse::<f64>().ok().map(|value| value as i64))
}
