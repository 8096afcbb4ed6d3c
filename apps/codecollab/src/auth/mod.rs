//! Login lifecycle and token persistence.

mod error;
mod store;

pub use error::AuthError;
pub use store::{FileTokenStore, MemoryTokenStore, StoredToken, TokenStore};

use crate::api::{CollabApi, LoginRequest, PasswordChange, ProfileUpdate, RegisterRequest};
use collab_proto::UserRecord;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct Registration {
    pub username: String,
    pub email: String,
    pub password: String,
    pub confirm_password: String,
}

impl Registration {
    fn validate(&self) -> Result<(), AuthError> {
        if self.username.trim().is_empty()
            || self.email.trim().is_empty()
            || self.password.is_empty()
        {
            return Err(AuthError::Validation("username, email and password are required"));
        }
        if self.password != self.confirm_password {
            return Err(AuthError::Validation("passwords do not match"));
        }
        Ok(())
    }
}

/// Owns the signed-in user and keeps the token store and the API
/// credentials in step.
pub struct Auth {
    api: Arc<dyn CollabApi>,
    store: Arc<dyn TokenStore>,
    user: Option<UserRecord>,
}

impl Auth {
    pub fn new(api: Arc<dyn CollabApi>, store: Arc<dyn TokenStore>) -> Self {
        Self {
            api,
            store,
            user: None,
        }
    }

    pub fn user(&self) -> Option<&UserRecord> {
        self.user.as_ref()
    }

    pub fn token(&self) -> Option<String> {
        self.api.credentials().token()
    }

    pub fn is_signed_in(&self) -> bool {
        self.user.is_some() && self.token().is_some()
    }

    /// Resumes a persisted login. Any failure to confirm the token discards it.
    pub async fn restore(&mut self) -> Result<Option<&UserRecord>, AuthError> {
        let Some(stored) = self.store.load()? else {
            debug!(target: "codecollab::auth", "no stored token");
            return Ok(None);
        };
        self.api.credentials().set(Some(stored.token));
        match self.api.profile().await {
            Ok(user) => {
                info!(target: "codecollab::auth", user = %user.username, "restored session");
                self.user = Some(user);
                Ok(self.user.as_ref())
            }
            Err(err) => {
                warn!(target: "codecollab::auth", error = %err, "stored token rejected; clearing");
                self.discard()?;
                Ok(None)
            }
        }
    }

    pub async fn login(&mut self, email: &str, password: &str) -> Result<&UserRecord, AuthError> {
        if email.trim().is_empty() || password.is_empty() {
            return Err(AuthError::Validation("email and password are required"));
        }
        let record = self
            .api
            .login(&LoginRequest {
                email: email.trim().to_string(),
                password: password.to_string(),
            })
            .await?;
        self.accept(record.token, record.user)
    }

    pub async fn register(&mut self, form: &Registration) -> Result<&UserRecord, AuthError> {
        form.validate()?;
        let record = self
            .api
            .register(&RegisterRequest {
                username: form.username.trim().to_string(),
                email: form.email.trim().to_string(),
                password: form.password.clone(),
            })
            .await?;
        self.accept(record.token, record.user)
    }

    pub fn logout(&mut self) -> Result<(), AuthError> {
        if let Some(user) = &self.user {
            info!(target: "codecollab::auth", user = %user.username, "logging out");
        }
        self.discard()
    }

    /// The server rejected the token on some request; forget it locally.
    pub fn expire(&mut self) -> Result<(), AuthError> {
        warn!(target: "codecollab::auth", "session expired");
        self.discard()
    }

    pub async fn update_profile(
        &mut self,
        username: &str,
        email: &str,
    ) -> Result<&UserRecord, AuthError> {
        if self.user.is_none() {
            return Err(AuthError::NotLoggedIn);
        }
        if username.trim().is_empty() || email.trim().is_empty() {
            return Err(AuthError::Validation("username and email are required"));
        }
        let user = self
            .api
            .update_profile(&ProfileUpdate {
                username: username.trim().to_string(),
                email: email.trim().to_string(),
            })
            .await?;
        self.user = Some(user);
        self.user.as_ref().ok_or(AuthError::NotLoggedIn)
    }

    pub async fn change_password(
        &self,
        current: &str,
        new: &str,
        confirm: &str,
    ) -> Result<(), AuthError> {
        if self.user.is_none() {
            return Err(AuthError::NotLoggedIn);
        }
        if new.is_empty() {
            return Err(AuthError::Validation("new password is required"));
        }
        if new != confirm {
            return Err(AuthError::Validation("new passwords do not match"));
        }
        self.api
            .change_password(&PasswordChange {
                current_password: current.to_string(),
                new_password: new.to_string(),
            })
            .await?;
        Ok(())
    }

    fn accept(&mut self, token: String, user: UserRecord) -> Result<&UserRecord, AuthError> {
        self.store
            .save(&StoredToken::new(token.clone(), Some(user.username.clone())))?;
        self.api.credentials().set(Some(token));
        info!(target: "codecollab::auth", user = %user.username, "signed in");
        self.user = Some(user);
        self.user.as_ref().ok_or(AuthError::NotLoggedIn)
    }

    fn discard(&mut self) -> Result<(), AuthError> {
        self.user = None;
        self.api.credentials().set(None);
        self.store.clear()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::mock::{MockApi, MockFailure};

    fn auth_with(api: Arc<MockApi>, store: Arc<MemoryTokenStore>) -> Auth {
        Auth::new(api, store)
    }

    #[test_timeout::tokio_timeout_test]
    async fn restore_without_token_is_signed_out() {
        let api = Arc::new(MockApi::new());
        let mut auth = auth_with(api.clone(), Arc::new(MemoryTokenStore::default()));
        assert!(auth.restore().await.unwrap().is_none());
        assert!(api.calls().is_empty());
    }

    #[test_timeout::tokio_timeout_test]
    async fn restore_failure_clears_token() {
        let api = Arc::new(MockApi::new());
        api.fail_next("profile", MockFailure::Unauthorized);
        let store = Arc::new(MemoryTokenStore::with_token("stale"));
        let mut auth = auth_with(api.clone(), store.clone());

        assert!(auth.restore().await.unwrap().is_none());
        assert!(store.load().unwrap().is_none());
        assert!(api.credentials().token().is_none());
    }

    #[test_timeout::tokio_timeout_test]
    async fn login_persists_token() {
        let api = Arc::new(MockApi::new());
        let store = Arc::new(MemoryTokenStore::default());
        let mut auth = auth_with(api.clone(), store.clone());

        let user = auth.login("ada@example.com", "secret").await.unwrap();
        assert_eq!(user.username, "ada");
        assert!(auth.is_signed_in());
        assert_eq!(store.load().unwrap().unwrap().token, api.credentials().token().unwrap());

        auth.logout().unwrap();
        assert!(!auth.is_signed_in());
        assert!(store.load().unwrap().is_none());
    }

    #[test_timeout::tokio_timeout_test]
    async fn register_rejects_mismatched_passwords_before_calling_out() {
        let api = Arc::new(MockApi::new());
        let mut auth = auth_with(api.clone(), Arc::new(MemoryTokenStore::default()));
        let form = Registration {
            username: "bob".into(),
            email: "bob@example.com".into(),
            password: "one".into(),
            confirm_password: "two".into(),
        };
        assert!(matches!(
            auth.register(&form).await,
            Err(AuthError::Validation(_))
        ));
        assert!(api.calls().is_empty());
    }

    #[test_timeout::tokio_timeout_test]
    async fn change_password_requires_matching_confirmation() {
        let api = Arc::new(MockApi::new());
        let mut auth = auth_with(api.clone(), Arc::new(MemoryTokenStore::default()));
        auth.login("ada@example.com", "secret").await.unwrap();

        assert!(matches!(
            auth.change_password("secret", "new", "other").await,
            Err(AuthError::Validation(_))
        ));
        auth.change_password("secret", "new", "new").await.unwrap();
        assert!(api.calls().contains(&"change_password".to_string()));
    }
}
