//! Configuration for the lookup server.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use crate::backoff::BackoffConfig;
use crate::codec::Framing;
use crate::endpoint::{Endpoint, EndpointError};
use crate::server::{ServerConfig, DEFAULT_MAX_CONNECTIONS};
use crate::session::SessionConfig;
use clap::{Parser, ValueEnum};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Command-line arguments for the lookup server
#[derive(Parser, Debug, Default)]
#[command(name = "framed-lookup")]
#[command(version)]
#[command(about = "Currency lookup service over TCP, Unix sockets or TLS", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Service endpoint: host:port, :port or a socket path
    #[arg(short = 'e', long)]
    pub listen: Option<String>,

    /// Network protocol (tcp, tcp4, tcp6, unix)
    #[arg(short = 'n', long)]
    pub network: Option<String>,

    /// Number of worker threads (defaults to number of CPU cores)
    #[arg(short = 'w', long)]
    pub workers: Option<usize>,

    /// Maximum number of concurrent connections
    #[arg(long)]
    pub max_connections: Option<usize>,

    /// PEM certificate chain; enables TLS together with --key
    #[arg(long)]
    pub cert: Option<PathBuf>,

    /// PEM private key
    #[arg(long)]
    pub key: Option<PathBuf>,

    /// Message framing strategy
    #[arg(long, value_enum)]
    pub framing: Option<FramingMode>,

    /// Service to run
    #[arg(long, value_enum)]
    pub service: Option<ServiceKind>,

    /// Currency data file (CSV)
    #[arg(short = 'd', long)]
    pub data: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// How message boundaries are found on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum FramingMode {
    /// Decode one self-delimiting JSON value at a time
    Stream,
    /// Split on a terminator byte
    Delimited,
}

/// Application served behind the session layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ServiceKind {
    Currency,
    Echo,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub tls: TlsSection,
    #[serde(default)]
    pub session: SessionSection,
    #[serde(default)]
    pub framing: FramingSection,
    #[serde(default)]
    pub accept: AcceptSection,
    #[serde(default)]
    pub service: ServiceSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

#[derive(Debug, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default = "default_network")]
    pub network: String,
    pub workers: Option<usize>,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            network: default_network(),
            workers: None,
            max_connections: default_max_connections(),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct TlsSection {
    pub cert: Option<PathBuf>,
    pub key: Option<PathBuf>,
}

/// Idle deadlines, in seconds
#[derive(Debug, Deserialize)]
pub struct SessionSection {
    #[serde(default = "default_first_deadline")]
    pub first_deadline_secs: u64,
    #[serde(default = "default_idle_deadline")]
    pub idle_deadline_secs: u64,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            first_deadline_secs: default_first_deadline(),
            idle_deadline_secs: default_idle_deadline(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct FramingSection {
    #[serde(default = "default_framing_mode")]
    pub mode: FramingMode,
    /// Terminator for delimited framing, a single byte
    #[serde(default = "default_delimiter")]
    pub delimiter: String,
    #[serde(default = "default_max_frame")]
    pub max_frame_bytes: usize,
    #[serde(default = "default_read_chunk")]
    pub read_chunk_bytes: usize,
}

impl Default for FramingSection {
    fn default() -> Self {
        Self {
            mode: default_framing_mode(),
            delimiter: default_delimiter(),
            max_frame_bytes: default_max_frame(),
            read_chunk_bytes: default_read_chunk(),
        }
    }
}

/// Backoff for transient accept failures
#[derive(Debug, Deserialize)]
pub struct AcceptSection {
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for AcceptSection {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            max_retries: default_max_retries(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ServiceSection {
    #[serde(default = "default_service_kind")]
    pub kind: ServiceKind,
    #[serde(default = "default_data")]
    pub data: PathBuf,
}

impl Default for ServiceSection {
    fn default() -> Self {
        Self {
            kind: default_service_kind(),
            data: default_data(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingSection {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_listen() -> String {
    ":4040".to_string()
}

fn default_network() -> String {
    "tcp".to_string()
}

fn default_max_connections() -> usize {
    DEFAULT_MAX_CONNECTIONS
}

fn default_first_deadline() -> u64 {
    45
}

fn default_idle_deadline() -> u64 {
    90
}

fn default_framing_mode() -> FramingMode {
    FramingMode::Delimited
}

fn default_delimiter() -> String {
    "\n".to_string()
}

fn default_max_frame() -> usize {
    crate::codec::DEFAULT_MAX_FRAME
}

fn default_read_chunk() -> usize {
    crate::codec::DEFAULT_READ_CHUNK
}

fn default_initial_delay_ms() -> u64 {
    10
}

fn default_max_delay_ms() -> u64 {
    1000
}

fn default_max_retries() -> u32 {
    5
}

fn default_service_kind() -> ServiceKind {
    ServiceKind::Currency
}

fn default_data() -> PathBuf {
    PathBuf::from("data.csv")
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub listen: String,
    pub network: String,
    pub workers: Option<usize>,
    pub max_connections: usize,
    pub tls_cert: Option<PathBuf>,
    pub tls_key: Option<PathBuf>,
    pub first_deadline_secs: u64,
    pub idle_deadline_secs: u64,
    pub framing_mode: FramingMode,
    pub delimiter: String,
    pub max_frame_bytes: usize,
    pub read_chunk_bytes: usize,
    pub accept_initial_delay_ms: u64,
    pub accept_max_delay_ms: u64,
    pub accept_max_retries: u32,
    pub service: ServiceKind,
    pub data: PathBuf,
    pub log_level: String,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = CliArgs::parse();

        // Load TOML config if specified
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        let config = Self::merge(cli, toml_config);
        config.validate()?;
        Ok(config)
    }

    /// Merge CLI args with TOML config (CLI takes precedence)
    pub fn merge(cli: CliArgs, toml_config: TomlConfig) -> Self {
        Config {
            listen: cli.listen.unwrap_or(toml_config.server.listen),
            network: cli.network.unwrap_or(toml_config.server.network),
            workers: cli.workers.or(toml_config.server.workers),
            max_connections: cli
                .max_connections
                .unwrap_or(toml_config.server.max_connections),
            tls_cert: cli.cert.or(toml_config.tls.cert),
            tls_key: cli.key.or(toml_config.tls.key),
            first_deadline_secs: toml_config.session.first_deadline_secs,
            idle_deadline_secs: toml_config.session.idle_deadline_secs,
            framing_mode: cli.framing.unwrap_or(toml_config.framing.mode),
            delimiter: toml_config.framing.delimiter,
            max_frame_bytes: toml_config.framing.max_frame_bytes,
            read_chunk_bytes: toml_config.framing.read_chunk_bytes,
            accept_initial_delay_ms: toml_config.accept.initial_delay_ms,
            accept_max_delay_ms: toml_config.accept.max_delay_ms,
            accept_max_retries: toml_config.accept.max_retries,
            service: cli.service.unwrap_or(toml_config.service.kind),
            data: cli.data.unwrap_or(toml_config.service.data),
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                toml_config.logging.level
            },
        }
    }

    /// Check option values that the types alone do not constrain.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.endpoint()?;
        self.framing()?;

        match (&self.tls_cert, &self.tls_key) {
            (Some(_), None) | (None, Some(_)) => return Err(ConfigError::TlsIncomplete),
            _ => {}
        }

        for (name, value) in [
            ("session.first_deadline_secs", self.first_deadline_secs),
            ("session.idle_deadline_secs", self.idle_deadline_secs),
            ("framing.max_frame_bytes", self.max_frame_bytes as u64),
            ("framing.read_chunk_bytes", self.read_chunk_bytes as u64),
            ("server.max_connections", self.max_connections as u64),
            ("accept.initial_delay_ms", self.accept_initial_delay_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::Zero(name));
            }
        }

        if self.workers == Some(0) {
            return Err(ConfigError::Zero("server.workers"));
        }

        if self.accept_max_delay_ms < self.accept_initial_delay_ms {
            return Err(ConfigError::Invalid(
                "accept.max_delay_ms is below accept.initial_delay_ms".to_string(),
            ));
        }
        Ok(())
    }

    pub fn tls_enabled(&self) -> bool {
        self.tls_cert.is_some() && self.tls_key.is_some()
    }

    pub fn endpoint(&self) -> Result<Endpoint, ConfigError> {
        let endpoint = Endpoint::parse(&self.network, &self.listen)?;
        Ok(if self.tls_enabled() {
            endpoint.with_tls()
        } else {
            endpoint
        })
    }

    pub fn framing(&self) -> Result<Framing, ConfigError> {
        Ok(match self.framing_mode {
            FramingMode::Stream => Framing::Stream {
                max_frame: self.max_frame_bytes,
            },
            FramingMode::Delimited => Framing::Delimited {
                terminator: parse_delimiter(&self.delimiter)?,
                max_frame: self.max_frame_bytes,
            },
        })
    }

    pub fn session_config(&self) -> Result<SessionConfig, ConfigError> {
        Ok(SessionConfig {
            first_deadline: Duration::from_secs(self.first_deadline_secs),
            idle_deadline: Duration::from_secs(self.idle_deadline_secs),
            framing: self.framing()?,
            read_chunk: self.read_chunk_bytes,
        })
    }

    pub fn accept_backoff(&self) -> BackoffConfig {
        BackoffConfig {
            initial_delay: Duration::from_millis(self.accept_initial_delay_ms),
            max_delay: Duration::from_millis(self.accept_max_delay_ms),
            multiplier: 2,
            max_retries: self.accept_max_retries,
        }
    }

    pub fn server_config(&self) -> Result<ServerConfig, ConfigError> {
        Ok(ServerConfig {
            endpoint: self.endpoint()?,
            session: self.session_config()?,
            accept_backoff: self.accept_backoff(),
            max_connections: self.max_connections,
        })
    }
}

/// Accepts a single byte, or the escapes `\n`, `\r`, `\t`.
pub fn parse_delimiter(value: &str) -> Result<u8, ConfigError> {
    match value {
        "\\n" => Ok(b'\n'),
        "\\r" => Ok(b'\r'),
        "\\t" => Ok(b'\t'),
        _ if value.len() == 1 => Ok(value.as_bytes()[0]),
        _ => Err(ConfigError::Delimiter(value.to_string())),
    }
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
    Endpoint(EndpointError),
    Delimiter(String),
    TlsIncomplete,
    Zero(&'static str),
    Invalid(String),
}

impl From<EndpointError> for ConfigError {
    fn from(e: EndpointError) -> Self {
        ConfigError::Endpoint(e)
    }
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::FileRead(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::TomlParse(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::Endpoint(e) => write!(f, "Invalid endpoint: {}", e),
            ConfigError::Delimiter(d) => {
                write!(f, "Delimiter must be a single byte, got {:?}", d)
            }
            ConfigError::TlsIncomplete => {
                write!(f, "TLS needs both a certificate and a private key")
            }
            ConfigError::Zero(name) => write!(f, "{} must be greater than zero", name),
            ConfigError::Invalid(msg) => write!(f, "Invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::Network;

    fn resolve(toml_str: &str) -> Config {
        Config::merge(CliArgs::default_for_test(), toml::from_str(toml_str).unwrap())
    }

    impl CliArgs {
        fn default_for_test() -> Self {
            CliArgs {
                log_level: "info".to_string(),
                ..CliArgs::default()
            }
        }
    }

    #[test]
    fn test_default_config() {
        let config = resolve("");
        assert_eq!(config.listen, ":4040");
        assert_eq!(config.network, "tcp");
        assert_eq!(config.first_deadline_secs, 45);
        assert_eq!(config.idle_deadline_secs, 90);
        assert_eq!(config.framing_mode, FramingMode::Delimited);
        assert_eq!(config.service, ServiceKind::Currency);
        assert!(config.validate().is_ok());

        let server = config.server_config().unwrap();
        assert_eq!(server.accept_backoff, BackoffConfig::default());
        assert_eq!(server.session, SessionConfig::default());
        assert_eq!(server.max_connections, DEFAULT_MAX_CONNECTIONS);
    }

    #[test]
    fn test_toml_parsing() {
        let config = resolve(
            r#"
            [server]
            listen = "/tmp/currency.sock"
            network = "unix"
            workers = 4

            [session]
            first_deadline_secs = 10
            idle_deadline_secs = 20

            [framing]
            mode = "delimited"
            delimiter = "}"

            [accept]
            max_retries = 3

            [service]
            kind = "echo"

            [logging]
            level = "debug"
        "#,
        );

        assert_eq!(config.workers, Some(4));
        assert_eq!(config.endpoint().unwrap().network(), Network::Unix);
        assert_eq!(config.service, ServiceKind::Echo);
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.accept_backoff().max_retries, 3);

        let session = config.session_config().unwrap();
        assert_eq!(session.first_deadline, Duration::from_secs(10));
        assert_eq!(
            session.framing,
            Framing::Delimited {
                terminator: b'}',
                max_frame: crate::codec::DEFAULT_MAX_FRAME
            }
        );
    }

    #[test]
    fn test_cli_overrides_file() {
        let cli = CliArgs {
            listen: Some("127.0.0.1:5050".to_string()),
            framing: Some(FramingMode::Delimited),
            log_level: "trace".to_string(),
            ..CliArgs::default()
        };
        let file: TomlConfig = toml::from_str(
            "[server]\nlisten = \":4040\"\n[logging]\nlevel = \"warn\"\n",
        )
        .unwrap();

        let config = Config::merge(cli, file);
        assert_eq!(config.listen, "127.0.0.1:5050");
        assert_eq!(config.framing_mode, FramingMode::Delimited);
        assert_eq!(config.log_level, "trace");
    }

    #[test]
    fn test_validation() {
        let mut config = resolve("");
        config.network = "udp".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::Endpoint(_))));

        let mut config = resolve("");
        config.tls_cert = Some(PathBuf::from("cert.pem"));
        assert!(matches!(config.validate(), Err(ConfigError::TlsIncomplete)));

        let mut config = resolve("[framing]\nmode = \"delimited\"\ndelimiter = \"ab\"\n");
        assert!(matches!(config.validate(), Err(ConfigError::Delimiter(_))));
        config.delimiter = "\\n".to_string();
        assert!(config.validate().is_ok());

        let config = resolve("[session]\nfirst_deadline_secs = 0\n");
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Zero("session.first_deadline_secs"))
        ));
    }

    #[test]
    fn test_tls_marks_endpoint() {
        let mut config = resolve("");
        config.tls_cert = Some(PathBuf::from("cert.pem"));
        config.tls_key = Some(PathBuf::from("key.pem"));
        assert!(config.endpoint().unwrap().is_tls());
    }
}
