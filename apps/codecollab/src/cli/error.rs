use crate::api::ApiError;
use crate::app::AppError;
use crate::auth::AuthError;
use crate::chat::ChatError;
use crate::config::ConfigError;
use crate::execution::ExecutionError;
use crate::workspace::WorkspaceError;
use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("not signed in; run `codecollab login` first")]
    NotSignedIn,
    #[error("no connection to the server within {0:?}")]
    ConnectTimeout(std::time::Duration),
    #[error("session closed")]
    SessionClosed,
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("{0}")]
    App(#[from] AppError),
    #[error("{0}")]
    Auth(#[from] AuthError),
    #[error("{0}")]
    Api(#[from] ApiError),
    #[error("{0}")]
    Chat(#[from] ChatError),
    #[error("{0}")]
    Workspace(#[from] WorkspaceError),
    #[error("{0}")]
    Execution(#[from] ExecutionError),
}
