use crate::api::ApiError;
use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("config error: {0}")]
    Config(String),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("credentials file is malformed: {0}")]
    Toml(String),
    #[error("{0}")]
    Validation(&'static str),
    #[error("not logged in")]
    NotLoggedIn,
    #[error(transparent)]
    Api(#[from] ApiError),
}

impl AuthError {
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, AuthError::Api(err) if err.is_unauthorized())
    }
}

impl From<toml::de::Error> for AuthError {
    fn from(value: toml::de::Error) -> Self {
        AuthError::Toml(value.to_string())
    }
}

impl From<toml::ser::Error> for AuthError {
    fn from(value: toml::ser::Error) -> Self {
        AuthError::Toml(value.to_string())
    }
}
