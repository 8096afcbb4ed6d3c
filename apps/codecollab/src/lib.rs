pub mod api;
pub mod app;
pub mod auth;
pub mod chat;
pub mod cli;
pub mod config;
pub mod cursors;
pub mod document;
pub mod execution;
pub mod origin;
pub mod presence;
pub mod project;
pub mod session;
pub mod telemetry;
pub mod transport;
pub mod workspace;
