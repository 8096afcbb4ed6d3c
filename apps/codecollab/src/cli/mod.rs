//! Headless command line front end.

mod commands;
mod error;

pub use commands::run;
pub use error::CliError;

use crate::telemetry::logging::{LogConfig, LogLevel};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "codecollab",
    about = "Collaborative editing, chat and code execution from the terminal",
    author,
    version
)]
pub struct Cli {
    #[arg(
        long,
        global = true,
        env = "CODECOLLAB_API_URL",
        help = "Server origin; REST lives under /api and the socket under /ws"
    )]
    pub api_url: Option<String>,

    #[command(flatten)]
    pub logging: LoggingArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Args, Debug, Clone)]
pub struct LoggingArgs {
    #[arg(
        long = "log-level",
        value_enum,
        global = true,
        env = "CODECOLLAB_LOG_LEVEL",
        default_value_t = LogLevel::Warn,
        help = "Minimum log level (error, warn, info, debug, trace)"
    )]
    pub level: LogLevel,

    #[arg(
        long = "log-file",
        value_name = "PATH",
        global = true,
        env = "CODECOLLAB_LOG_FILE",
        help = "Write structured logs to the specified file"
    )]
    pub file: Option<PathBuf>,
}

impl LoggingArgs {
    pub fn to_config(&self) -> LogConfig {
        LogConfig {
            level: self.level,
            file: self.file.clone(),
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Sign in and store the token
    Login(LoginArgs),
    /// Create an account and sign in
    Register(RegisterArgs),
    /// Forget the stored token
    Logout,
    /// Show the signed-in user
    Whoami,
    /// Browse and manage projects
    #[command(subcommand)]
    Projects(ProjectsCommand),
    /// Global chat
    #[command(subcommand)]
    Chat(ChatCommand),
    /// Work inside a project room
    #[command(subcommand)]
    Project(ProjectCommand),
    /// Execute a project file in the sandbox
    Run(RunArgs),
}

#[derive(Args, Debug)]
pub struct LoginArgs {
    #[arg(long)]
    pub email: String,

    #[arg(long, env = "CODECOLLAB_PASSWORD", hide_env_values = true)]
    pub password: String,
}

#[derive(Args, Debug)]
pub struct RegisterArgs {
    #[arg(long)]
    pub username: String,

    #[arg(long)]
    pub email: String,

    #[arg(long, env = "CODECOLLAB_PASSWORD", hide_env_values = true)]
    pub password: String,

    #[arg(long, help = "Repeat the password; defaults to --password")]
    pub confirm_password: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum ProjectsCommand {
    /// List visible projects
    List,
    /// Create a project
    Create(CreateProjectArgs),
    /// Delete a project
    Delete { id: String },
    /// Copy a project into a new private one
    Clone {
        id: String,
        #[arg(long, help = "Name for the copy; defaults to '<source> (Clone)'")]
        name: Option<String>,
    },
}

#[derive(Args, Debug)]
pub struct CreateProjectArgs {
    #[arg(long)]
    pub name: String,

    #[arg(long, default_value = "javascript")]
    pub language: String,

    #[arg(long)]
    pub description: Option<String>,

    #[arg(long, default_value = "private")]
    pub visibility: String,
}

#[derive(Subcommand, Debug)]
pub enum ChatCommand {
    /// Print the history and follow new messages
    Tail,
    /// Post a text message
    Send { text: String },
    /// Upload a WAV recording as a voice message
    Voice {
        path: PathBuf,
        #[arg(long, help = "Recording length in seconds")]
        seconds: u32,
    },
}

#[derive(Subcommand, Debug)]
pub enum ProjectCommand {
    /// Join a project room and print what happens in it
    Watch(WatchArgs),
    /// Replace a file's content with a local file and save it
    Push(PushArgs),
}

#[derive(Args, Debug)]
pub struct WatchArgs {
    pub project: String,

    #[arg(long, help = "Open this file id on entry")]
    pub file: Option<String>,
}

#[derive(Args, Debug)]
pub struct PushArgs {
    pub project: String,
    pub file: String,
    pub path: PathBuf,
}

#[derive(Args, Debug)]
pub struct RunArgs {
    pub project: String,
    pub file: String,

    #[arg(long, default_value = "", help = "Text passed on standard input")]
    pub stdin: String,
}
