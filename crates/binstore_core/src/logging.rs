//! Rolling file log for store processes.
//!
//! # Responsibility
//! - Start one flexi_logger file writer per process from `StoreConfig`.
//! - Record which store the process is bound to (namespace, storage mode)
//!   as the first event of every log file.
//! - Capture panics as single-line events, since payloads may carry bin
//!   values.
//!
//! # Invariants
//! - No `log_dir` means no logger; this is not an error.
//! - A second init with the same level and directory is a no-op; any other
//!   second init is a `Conflict`.
//! - Validation happens before any global state is touched.

use crate::config::StoreConfig;
use flexi_logger::{Cleanup, Criterion, FileSpec, Logger, LoggerHandle, Naming, WriteMode};
use log::{error, info};
use once_cell::sync::OnceCell;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

const LOG_FILE_BASENAME: &str = "binstore";
const MAX_LOG_FILE_SIZE_BYTES: u64 = 10 * 1024 * 1024;
const MAX_LOG_FILES: usize = 5;
const MAX_PANIC_PAYLOAD_CHARS: usize = 160;

static ACTIVE: OnceCell<ActiveLog> = OnceCell::new();

struct ActiveLog {
    level: LogLevel,
    log_dir: PathBuf,
    _handle: LoggerHandle,
}

/// Severity threshold accepted in `LoggingConfig::level`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// `debug` for debug builds, `info` otherwise.
    pub fn for_build() -> Self {
        if cfg!(debug_assertions) {
            Self::Debug
        } else {
            Self::Info
        }
    }

    pub fn parse(raw: &str) -> Result<Self, LoggingError> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "trace" => Ok(Self::Trace),
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            _ => Err(LoggingError::UnsupportedLevel(raw.to_string())),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

#[derive(Debug)]
pub enum LoggingError {
    UnsupportedLevel(String),
    RelativeDir(PathBuf),
    CreateDir {
        dir: PathBuf,
        source: std::io::Error,
    },
    Backend(flexi_logger::FlexiLoggerError),
    Conflict {
        active: String,
        requested: String,
    },
}

impl Display for LoggingError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnsupportedLevel(raw) => write!(
                f,
                "unsupported log level `{raw}`; expected trace|debug|info|warn|error"
            ),
            Self::RelativeDir(dir) => {
                write!(f, "log_dir must be absolute, got `{}`", dir.display())
            }
            Self::CreateDir { dir, source } => {
                write!(f, "cannot create log_dir `{}`: {source}", dir.display())
            }
            Self::Backend(err) => write!(f, "cannot start file logger: {err}"),
            Self::Conflict { active, requested } => write!(
                f,
                "file logging already active as {active}; refusing {requested}"
            ),
        }
    }
}

impl Error for LoggingError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::CreateDir { source, .. } => Some(source),
            Self::Backend(err) => Some(err),
            _ => None,
        }
    }
}

/// Starts file logging for the store described by `config`.
///
/// Returns `Ok(false)` when `config.logging.log_dir` is unset and
/// `Ok(true)` once the logger is running.
pub fn init_logging(config: &StoreConfig) -> Result<bool, LoggingError> {
    let Some(raw_dir) = &config.logging.log_dir else {
        return Ok(false);
    };
    let level = LogLevel::parse(&config.logging.level)?;
    if !raw_dir.is_absolute() {
        return Err(LoggingError::RelativeDir(raw_dir.clone()));
    }

    let active = ACTIVE.get_or_try_init(|| start(level, raw_dir, config))?;
    if active.level != level || active.log_dir != *raw_dir {
        return Err(LoggingError::Conflict {
            active: describe(active.level, &active.log_dir),
            requested: describe(level, raw_dir),
        });
    }
    Ok(true)
}

/// Level and directory of the running logger, if any.
pub fn logging_status() -> Option<(LogLevel, PathBuf)> {
    ACTIVE
        .get()
        .map(|active| (active.level, active.log_dir.clone()))
}

fn start(level: LogLevel, log_dir: &Path, config: &StoreConfig) -> Result<ActiveLog, LoggingError> {
    std::fs::create_dir_all(log_dir).map_err(|source| LoggingError::CreateDir {
        dir: log_dir.to_path_buf(),
        source,
    })?;

    let handle = Logger::try_with_str(level.as_str())
        .map_err(LoggingError::Backend)?
        .log_to_file(
            FileSpec::default()
                .directory(log_dir)
                .basename(LOG_FILE_BASENAME),
        )
        .rotate(
            Criterion::Size(MAX_LOG_FILE_SIZE_BYTES),
            Naming::Numbers,
            Cleanup::KeepLogFiles(MAX_LOG_FILES),
        )
        .write_mode(WriteMode::BufferAndFlush)
        .append()
        .format_for_files(flexi_logger::detailed_format)
        .start()
        .map_err(LoggingError::Backend)?;

    install_panic_hook();
    info!("{}", startup_event(config, level));

    Ok(ActiveLog {
        level,
        log_dir: log_dir.to_path_buf(),
        _handle: handle,
    })
}

fn startup_event(config: &StoreConfig, level: LogLevel) -> String {
    let storage = match &config.database_path {
        Some(path) => format!("file db={}", path.display()),
        None => "memory".to_string(),
    };
    format!(
        "event=logging_init module=logging status=ok version={} level={} namespace={} storage={} ttl_secs={}",
        env!("CARGO_PKG_VERSION"),
        level.as_str(),
        config.default_namespace,
        storage,
        config.client_policy.default_ttl_secs
    )
}

fn describe(level: LogLevel, dir: &Path) -> String {
    format!("level={} log_dir={}", level.as_str(), dir.display())
}

fn install_panic_hook() {
    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let location = info
            .location()
            .map(|loc| format!("{}:{}", loc.file(), loc.line()))
            .unwrap_or_else(|| "unknown".to_string());
        let payload = info
            .payload()
            .downcast_ref::<&str>()
            .map(|message| (*message).to_string())
            .or_else(|| info.payload().downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string payload".to_string());
        error!(
            "event=panic module=logging status=error location={} payload={}",
            location,
            single_line(&payload, MAX_PANIC_PAYLOAD_CHARS)
        );
        previous(info);
    }));
}

fn single_line(value: &str, max_chars: usize) -> String {
    let flat = value.replace(['\n', '\r'], " ");
    let mut out: String = flat.chars().take(max_chars).collect();
    if flat.chars().count() > max_chars {
        out.push_str("...");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::{init_logging, logging_status, single_line, startup_event, LogLevel, LoggingError};
    use crate::config::{LoggingConfig, StoreConfig};
    use std::path::PathBuf;

    fn config_with(level: &str, log_dir: Option<PathBuf>) -> StoreConfig {
        StoreConfig {
            logging: LoggingConfig {
                level: level.to_string(),
                log_dir,
            },
            ..StoreConfig::default()
        }
    }

    #[test]
    fn levels_parse_case_insensitively_with_warning_alias() {
        assert_eq!(LogLevel::parse(" INFO ").unwrap(), LogLevel::Info);
        assert_eq!(LogLevel::parse("warning").unwrap(), LogLevel::Warn);
        assert!(matches!(
            LogLevel::parse("verbose"),
            Err(LoggingError::UnsupportedLevel(_))
        ));
    }

    #[test]
    fn missing_log_dir_leaves_logging_off() {
        assert!(!init_logging(&config_with("info", None)).unwrap());
    }

    #[test]
    fn invalid_settings_fail_before_starting() {
        let dir = tempfile::tempdir().unwrap();
        let err = init_logging(&config_with("verbose", Some(dir.path().to_path_buf())))
            .unwrap_err();
        assert!(matches!(err, LoggingError::UnsupportedLevel(_)));

        let err = init_logging(&config_with("info", Some(PathBuf::from("logs/dev")))).unwrap_err();
        assert!(matches!(err, LoggingError::RelativeDir(_)));
    }

    #[test]
    fn startup_event_names_the_bound_store() {
        let mut config = StoreConfig::default();
        config.default_namespace = "bar".to_string();
        let line = startup_event(&config, LogLevel::Info);
        assert!(line.contains("namespace=bar"));
        assert!(line.contains("storage=memory"));

        config.database_path = Some(PathBuf::from("/tmp/store.db"));
        assert!(startup_event(&config, LogLevel::Info).contains("storage=file db=/tmp/store.db"));
    }

    #[test]
    fn panic_payloads_are_flattened_and_capped() {
        let line = single_line("bin=a\nbin=b\rbin=c", 8);
        assert_eq!(line, "bin=a bi...");
    }

    #[test]
    fn second_init_is_idempotent_or_a_conflict() {
        let dir = tempfile::tempdir().unwrap();
        let other = tempfile::tempdir().unwrap();
        let config = config_with("info", Some(dir.path().to_path_buf()));

        assert!(init_logging(&config).unwrap());
        assert!(init_logging(&config).unwrap());

        let err = init_logging(&config_with("debug", Some(dir.path().to_path_buf()))).unwrap_err();
        assert!(matches!(err, LoggingError::Conflict { .. }));
        let err = init_logging(&config_with("info", Some(other.path().to_path_buf()))).unwrap_err();
        assert!(matches!(err, LoggingError::Conflict { .. }));

        let (level, active_dir) = logging_status().unwrap();
        assert_eq!(level, LogLevel::Info);
        assert_eq!(active_dir, dir.path());
    }
}
