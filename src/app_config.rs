//! Module for application configuration settings.
//!
//! User configurations may be specified in a configuration file.

use secrecy::SecretString;
use thiserror::Error;

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default path format when the user does not configure one.
pub const DEFAULT_FORMAT: &str =
    "{semester-lexical-short}/{course}/{course-type}/{short-path}/{file-name}";

/// Folder names treated as a course's generic root and elided by
/// `{short-path}`.
pub const DEFAULT_GENERIC_ROOTS: &[&str] = &["Hauptordner", "Allgemeiner Dateiordner"];

/// A `PathBuf` that automatically expands `~` to the user's home directory
/// during deserialization. This ensures that any path loaded from
/// configuration is already resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ExpandedPathBuf(PathBuf);

impl<'de> Deserialize<'de> for ExpandedPathBuf {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        let expanded = shellexpand::tilde(&raw);
        Ok(Self(PathBuf::from(expanded.into_owned())))
    }
}

impl ExpandedPathBuf {
    /// Creates a new `ExpandedPathBuf` from any path, without expansion.
    /// Use this for programmatically-constructed paths that are already
    /// absolute.
    pub fn new(path: PathBuf) -> Self {
        Self(path)
    }
}

impl std::ops::Deref for ExpandedPathBuf {
    type Target = Path;

    fn deref(&self) -> &Path {
        &self.0
    }
}

impl AsRef<Path> for ExpandedPathBuf {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}

impl std::fmt::Display for ExpandedPathBuf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.display().fmt(f)
    }
}

fn runtime_dir() -> Option<PathBuf> {
    if let Some(path) = dirs::runtime_dir() {
        return Some(path.join("studip-fuse"));
    }
    dirs::home_dir().map(|home| home.join(".local").join("share").join("studip-fuse"))
}

fn data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join("studip-fuse"))
        .unwrap_or_else(|| PathBuf::from("/tmp/studip-fuse/data"))
}

fn default_pid_file() -> ExpandedPathBuf {
    ExpandedPathBuf::new(runtime_dir().map_or_else(
        || PathBuf::from("/var/run/studip-fuse.pid"),
        |rd| rd.join("studip-fuse.pid"),
    ))
}

fn default_mount_point() -> ExpandedPathBuf {
    ExpandedPathBuf::new(
        runtime_dir().map_or_else(|| PathBuf::from("/tmp/studip-fuse/mnt"), |rd| rd.join("mnt")),
    )
}

fn default_data_dir() -> ExpandedPathBuf {
    ExpandedPathBuf::new(data_dir())
}

fn current_uid() -> u32 {
    nix::unistd::Uid::current().as_raw()
}

fn current_gid() -> u32 {
    nix::unistd::Gid::current().as_raw()
}

/// The server connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ServerConfig {
    /// Base URL of the REST API, e.g. `https://studip.example/api.php`.
    pub base_url: String,

    /// Login name.
    pub username: String,

    /// Password for HTTP basic authentication.
    #[serde(skip_serializing)]
    pub password: SecretString,
}

/// The cache configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CacheConfig {
    /// The path to the cache directory.
    pub path: ExpandedPathBuf,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            path: ExpandedPathBuf::new(
                runtime_dir()
                    .map_or_else(|| PathBuf::from("/tmp/studip-fuse/cache"), |rd| rd.join("cache")),
            ),
        }
    }
}

/// HTTP timeout and fan-out knobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct HttpConfig {
    /// Seconds allowed for establishing a connection.
    pub connect_timeout: u64,
    /// Seconds allowed for a full request/response exchange.
    pub read_timeout: u64,
    /// Seconds idle pooled connections are kept alive.
    pub keepalive_timeout: u64,
    /// Upper bound on concurrently in-flight requests.
    pub max_connections: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout: 10,
            read_timeout: 30,
            keepalive_timeout: 60,
            max_connections: studip_api::DEFAULT_MAX_CONNECTIONS,
        }
    }
}

impl HttpConfig {
    /// Backend timeout view of this config.
    #[must_use]
    pub fn timeouts(&self) -> studip_api::backends::Timeouts {
        studip_api::backends::Timeouts {
            connect: Duration::from_secs(self.connect_timeout),
            read: Duration::from_secs(self.read_timeout),
            keepalive: Duration::from_secs(self.keepalive_timeout),
        }
    }
}

/// Where daemon logs should be written.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LogTarget {
    /// Write logs to stdout (default for foreground mode).
    #[default]
    Stdout,
    /// Write logs to stderr.
    Stderr,
    /// Write logs to a file at the given path.
    File(PathBuf),
}

impl LogTarget {
    /// Opens the log file for the daemon, if this target is
    /// [`LogTarget::File`].
    ///
    /// Returns `None` for stdout/stderr targets (the daemonize crate's
    /// default sends these to `/dev/null`; the tracing subscriber handles
    /// them instead).
    pub fn open_log_file(&self) -> Result<Option<std::fs::File>, std::io::Error> {
        match self {
            Self::Stdout | Self::Stderr => Ok(None),
            Self::File(path) => {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                let file = std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)?;
                Ok(Some(file))
            }
        }
    }
}

/// Logging configuration for the daemon.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct LogConfig {
    /// Where to write log output. Defaults to stdout.
    pub target: LogTarget,
}

/// Daemon lifecycle configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct DaemonConfig {
    /// Where the daemon writes its PID file.
    pub pid_file: ExpandedPathBuf,
    /// Logging setup.
    pub log: LogConfig,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            pid_file: default_pid_file(),
            log: LogConfig::default(),
        }
    }
}

/// The application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    /// Remote server and credentials.
    pub server: ServerConfig,

    /// Path format string determining the shape of the mounted tree.
    #[serde(default = "default_format")]
    pub format: String,

    /// Folder names elided by `{short-path}`.
    #[serde(default = "default_generic_roots")]
    pub generic_roots: Vec<String>,

    /// Where the filesystem is mounted.
    #[serde(default = "default_mount_point")]
    pub mount_point: ExpandedPathBuf,

    /// Where downloaded contents are cached across runs.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Where the status file and other user data live.
    #[serde(default = "default_data_dir")]
    pub data_dir: ExpandedPathBuf,

    /// HTTP client knobs.
    #[serde(default)]
    pub http: HttpConfig,

    /// Daemon lifecycle settings.
    #[serde(default)]
    pub daemon: DaemonConfig,

    /// Owner uid presented for every node.
    #[serde(default = "current_uid")]
    pub uid: u32,

    /// Owner gid presented for every node.
    #[serde(default = "current_gid")]
    pub gid: u32,
}

fn default_format() -> String {
    DEFAULT_FORMAT.to_owned()
}

fn default_generic_roots() -> Vec<String> {
    DEFAULT_GENERIC_ROOTS.iter().map(|&s| s.to_owned()).collect()
}

/// Errors loading the configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("could not read '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid TOML for this schema.
    #[error("could not parse '{path}': {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: Box<toml::de::Error>,
    },

    /// No config path was given and no default location exists.
    #[error(
        "no configuration found; create {0} with at least a [server] section \
         (base-url, username, password)"
    )]
    Missing(PathBuf),
}

impl Config {
    /// Default location of the config file.
    #[must_use]
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .map(|d| d.join("studip-fuse").join("config.toml"))
            .unwrap_or_else(|| PathBuf::from("studip-fuse.toml"))
    }

    /// Load the configuration from `path`, or from the default location.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = path.map_or_else(Self::default_path, Path::to_path_buf);
        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ConfigError::Missing(path));
            }
            Err(e) => return Err(ConfigError::Io { path, source: e }),
        };
        toml::from_str(&raw).map_err(|e| ConfigError::Parse {
            path,
            source: Box::new(e),
        })
    }

    /// Validate the configuration, returning all problems at once.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut problems = Vec::new();

        if self.server.base_url.is_empty() {
            problems.push("server.base-url must not be empty".to_owned());
        } else if !self.server.base_url.starts_with("http://")
            && !self.server.base_url.starts_with("https://")
        {
            problems.push(format!(
                "server.base-url '{}' is not an http(s) URL",
                self.server.base_url
            ));
        }
        if self.server.username.is_empty() {
            problems.push("server.username must not be empty".to_owned());
        }
        if let Err(e) = crate::fs::template::PathTemplate::compile(&self.format) {
            problems.push(format!("format '{}' is invalid: {e}", self.format));
        }
        if self.daemon.pid_file.parent().is_none() {
            problems.push(format!(
                "daemon.pid-file '{}' has no parent directory",
                self.daemon.pid_file
            ));
        }
        if self.http.max_connections == 0 {
            problems.push("http.max-connections must be at least 1".to_owned());
        }

        if problems.is_empty() { Ok(()) } else { Err(problems) }
    }

    /// The web interface base URL, derived from the API base URL by
    /// dropping the `api.php` suffix.
    #[must_use]
    pub fn web_base(&self) -> String {
        self.server
            .base_url
            .trim_end_matches('/')
            .trim_end_matches("api.php")
            .trim_end_matches('/')
            .to_owned()
    }
}
