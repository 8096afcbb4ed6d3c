fn env_flag(var: &str) -> bool {
    std::env::var(var)
        .map(|value| !value.is_empty() && value != "0")
        .unwrap_or(false)
}

pub mod logging {
    use clap::ValueEnum;
    use std::fs::OpenOptions;
    use std::path::{Path, PathBuf};
    use std::sync::OnceLock;
    use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
    use tracing_subscriber::EnvFilter;

    const FILTER_VAR: &str = "CODECOLLAB_LOG_FILTER";
    const TRACE_DEPS_VAR: &str = "CODECOLLAB_TRACE_DEPS";

    /// Crates whose trace output drowns the client's own events.
    const NOISY_DEPENDENCIES: &[&str] = &[
        "h2",
        "hyper",
        "hyper_util",
        "mio",
        "reqwest",
        "rustls",
        "tokio_tungstenite",
        "tungstenite",
    ];

    #[derive(Clone, Copy, Debug, Default, ValueEnum, PartialEq, Eq, PartialOrd, Ord)]
    pub enum LogLevel {
        Error,
        #[default]
        Warn,
        Info,
        Debug,
        Trace,
    }

    impl LogLevel {
        pub fn as_str(self) -> &'static str {
            match self {
                LogLevel::Error => "error",
                LogLevel::Warn => "warn",
                LogLevel::Info => "info",
                LogLevel::Debug => "debug",
                LogLevel::Trace => "trace",
            }
        }

        /// Debug and trace raise only the client's own targets; everything
        /// else stays at info.
        fn directives(self) -> String {
            match self {
                LogLevel::Debug | LogLevel::Trace => {
                    let level = self.as_str();
                    format!("info,codecollab={level},codecollab_client_core={level}")
                }
                other => other.as_str().to_string(),
            }
        }
    }

    #[derive(Clone, Debug, Default)]
    pub struct LogConfig {
        pub level: LogLevel,
        pub file: Option<PathBuf>,
    }

    #[derive(thiserror::Error, Debug)]
    pub enum InitError {
        #[error("failed to open log file {path:?}: {source}")]
        Io {
            path: PathBuf,
            source: std::io::Error,
        },
        #[error("failed to install log subscriber: {0}")]
        Install(String),
    }

    #[derive(Debug, PartialEq, Eq)]
    struct FilterPlan {
        directives: String,
        quieted_dependencies: bool,
    }

    impl FilterPlan {
        fn for_level(level: LogLevel, trace_dependencies: bool) -> Self {
            let mut directives = level.directives();
            let quiet = level == LogLevel::Trace && !trace_dependencies;
            if quiet {
                for krate in NOISY_DEPENDENCIES {
                    directives.push_str(&format!(",{krate}=info"));
                }
            }
            Self {
                directives,
                quieted_dependencies: quiet,
            }
        }

        fn resolve(level: LogLevel) -> Self {
            match std::env::var(FILTER_VAR) {
                Ok(directives) => Self {
                    directives,
                    quieted_dependencies: false,
                },
                Err(_) => Self::for_level(level, super::env_flag(TRACE_DEPS_VAR)),
            }
        }
    }

    static GUARD: OnceLock<WorkerGuard> = OnceLock::new();

    /// Installs the global subscriber. Once one is installed, later calls
    /// return `Ok` without touching it.
    pub fn init(config: &LogConfig) -> Result<(), InitError> {
        if GUARD.get().is_some() {
            return Ok(());
        }

        let plan = FilterPlan::resolve(config.level);
        let (writer, guard) = open_writer(config.file.as_deref())?;
        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::new(&plan.directives))
            .with_target(config.level >= LogLevel::Debug)
            .with_thread_ids(config.level == LogLevel::Trace)
            .with_ansi(config.file.is_none())
            .with_writer(writer)
            .finish();
        tracing::subscriber::set_global_default(subscriber)
            .map_err(|err| InitError::Install(err.to_string()))?;
        let _ = GUARD.set(guard);

        if plan.quieted_dependencies {
            eprintln!(
                "[codecollab] dependency traces capped at info; set {TRACE_DEPS_VAR}=1 or {FILTER_VAR} to see them"
            );
        }
        Ok(())
    }

    fn open_writer(path: Option<&Path>) -> Result<(NonBlocking, WorkerGuard), InitError> {
        let Some(path) = path else {
            return Ok(tracing_appender::non_blocking(std::io::stderr()));
        };
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|source| InitError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(tracing_appender::non_blocking(file))
    }

}
