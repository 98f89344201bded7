//! Server configuration: a typed settings record loaded from a small
//! bespoke `key value` file format, in the same unpretentious style as
//! the teacher's `args.rs`.
//!
//! Grammar (spec.md section 6): one `key value` pair per line, whitespace
//! separated; `#` starts a line comment; blank lines are ignored; unknown
//! keys are ignored (logged at debug); duration values accept `s|m|h`
//! suffixes, size values accept `KB|MB|GB` suffixes (binary KiB/MiB/GiB).

use std::fmt;
use std::path::Path;
use std::time::Duration;

use log::debug;
use thiserror::Error;

/// Error parsing a configuration file.
#[derive(Error, Debug)]
pub enum Error {
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error("line {line}: {message}")]
    Syntax { line: usize, message: String },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Default TCP listen port.
pub const DEFAULT_PORT: u16 = 6969;
/// Default soft threshold for log rotation, in bytes (5 MiB).
pub const DEFAULT_LOG_FILE_SIZE: u64 = 5 * 1024 * 1024;
/// Default rotation period (30 minutes).
pub const DEFAULT_LOG_ROTATION_INTERVAL: Duration = Duration::from_secs(30 * 60);
/// Default compaction period (30 minutes).
pub const DEFAULT_MERGE_INTERVAL: Duration = Duration::from_secs(30 * 60);

/// Typed settings consumed by the storage engine, shard router, and
/// TCP acceptor. Read-only after startup; a process-wide snapshot
/// installed once at boot (spec.md section 9's "global state" note).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub port: u16,
    pub storage_directory: std::path::PathBuf,
    pub database_shards: usize,
    pub log_file_size: u64,
    pub log_rotation_interval: Duration,
    pub merge_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            port: DEFAULT_PORT,
            storage_directory: default_storage_directory(),
            database_shards: num_cpus::get(),
            log_file_size: DEFAULT_LOG_FILE_SIZE,
            log_rotation_interval: DEFAULT_LOG_ROTATION_INTERVAL,
            merge_interval: DEFAULT_MERGE_INTERVAL,
        }
    }
}

fn default_storage_directory() -> std::path::PathBuf {
    dirs_home().join(".local/share/beetle")
}

fn dirs_home() -> std::path::PathBuf {
    std::env::var_os("HOME")
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|| std::path::PathBuf::from("."))
}

impl Config {
    /// Loads a config file, falling back to defaults for any key it does
    /// not mention. A missing file is not an error: the caller decides
    /// whether to require one.
    pub fn load(path: impl AsRef<Path>) -> Result<Config> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text)
    }

    /// Parses the grammar directly from a string, starting from defaults.
    pub fn parse(text: &str) -> Result<Config> {
        let mut config = Config::default();
        for (idx, raw_line) in text.lines().enumerate() {
            let line = strip_comment(raw_line).trim();
            if line.is_empty() {
                continue;
            }
            let mut parts = line.split_whitespace();
            let key = parts.next().unwrap();
            let value = parts.next().ok_or_else(|| Error::Syntax {
                line: idx + 1,
                message: format!("key `{key}` has no value"),
            })?;
            if parts.next().is_some() {
                return Err(Error::Syntax {
                    line: idx + 1,
                    message: format!("too many fields on line for key `{key}`"),
                });
            }
            apply_key(&mut config, key, value, idx + 1)?;
        }
        Ok(config)
    }
}

fn strip_comment(line: &str) -> &str {
    match line.find('#') {
        Some(idx) => &line[..idx],
        None => line,
    }
}

fn apply_key(config: &mut Config, key: &str, value: &str, line: usize) -> Result<()> {
    match key {
        "port" => {
            config.port = value.parse().map_err(|_| Error::Syntax {
                line,
                message: format!("invalid port `{value}`"),
            })?;
        }
        "storage_directory" => {
            config.storage_directory = std::path::PathBuf::from(value);
        }
        "database_shards" => {
            config.database_shards = value.parse().map_err(|_| Error::Syntax {
                line,
                message: format!("invalid database_shards `{value}`"),
            })?;
        }
        "log_file_size" => {
            config.log_file_size = parse_size(value, line)?;
        }
        "log_rotation_interval" => {
            config.log_rotation_interval = parse_duration(value, line)?;
        }
        "merge_interval" => {
            config.merge_interval = parse_duration(value, line)?;
        }
        other => {
            debug!("ignoring unknown config key `{other}` on line {line}");
        }
    }
    Ok(())
}

fn parse_duration(value: &str, line: usize) -> Result<Duration> {
    let (digits, unit) = split_unit(value);
    let n: u64 = digits.parse().map_err(|_| Error::Syntax {
        line,
        message: format!("invalid duration `{value}`"),
    })?;
    let secs = match unit {
        "s" | "" => n,
        "m" => n * 60,
        "h" => n * 3600,
        other => {
            return Err(Error::Syntax {
                line,
                message: format!("unknown duration unit `{other}`"),
            })
        }
    };
    Ok(Duration::from_secs(secs))
}

fn parse_size(value: &str, line: usize) -> Result<u64> {
    let (digits, unit) = split_unit(value);
    let n: u64 = digits.parse().map_err(|_| Error::Syntax {
        line,
        message: format!("invalid size `{value}`"),
    })?;
    let bytes = match unit {
        "" | "B" => n,
        "KB" => n * 1024,
        "MB" => n * 1024 * 1024,
        "GB" => n * 1024 * 1024 * 1024,
        other => {
            return Err(Error::Syntax {
                line,
                message: format!("unknown size unit `{other}`"),
            })
        }
    };
    Ok(bytes)
}

/// Splits a value like `30m` or `5MB` into its leading digits and
/// trailing unit letters.
fn split_unit(value: &str) -> (&str, &str) {
    let split_at = value
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(value.len());
    value.split_at(split_at)
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Config {{ port: {}, storage_directory: {:?}, database_shards: {}, \
             log_file_size: {}, log_rotation_interval: {:?}, merge_interval: {:?} }}",
            self.port,
            self.storage_directory,
            self.database_shards,
            self.log_file_size,
            self.log_rotation_interval,
            self.merge_interval
        )
    }
}
