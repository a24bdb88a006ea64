use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::retry::RetryPolicy;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub transport: TransportConfig,
    pub retry: RetryConfig,
    pub directory: DirectoryConfig,
    pub notification: NotificationConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct TransportConfig {
    pub mode: TransportMode,
    pub queue_capacity: usize,
    pub max_redeliveries: u32,
    pub redelivery_backoff_millis: u64,
    /// Where the request side reaches the processing side in call mode.
    pub processing_base_url: Option<String>,
    /// Where the processing side reaches the request side in call mode.
    pub request_base_url: Option<String>,
    pub call_timeout_secs: u64,
    /// When set, `/internal/*` routes require it in `X-Internal-Token`.
    pub shared_secret: Option<SecretString>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub backoff_millis: u64,
}

impl RetrySettings {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, self.backoff_millis)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryConfig {
    pub propagation: RetrySettings,
    pub result_delivery: RetrySettings,
    pub lock: RetrySettings,
    pub notification: RetrySettings,
}

#[derive(Clone, Debug, Default)]
pub struct DirectoryConfig {
    /// Remote employee service. The local `employee` table is used when unset.
    pub base_url: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct NotificationConfig {
    /// Remote notification service. Notices are only logged when unset.
    pub base_url: Option<String>,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportMode {
    /// Durable queue between the two sides.
    Queue,
    /// Synchronous HTTP calls between the two sides.
    Call,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub bind_address: Option<String>,
    pub port: Option<u16>,
    pub transport_mode: Option<TransportMode>,
    pub processing_base_url: Option<String>,
    pub request_base_url: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://signoff.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
            },
            transport: TransportConfig {
                mode: TransportMode::Queue,
                queue_capacity: 1024,
                max_redeliveries: 5,
                redelivery_backoff_millis: 500,
                processing_base_url: None,
                request_base_url: None,
                call_timeout_secs: 10,
                shared_secret: None,
            },
            retry: RetryConfig {
                propagation: RetrySettings { max_attempts: 3, backoff_millis: 200 },
                result_delivery: RetrySettings { max_attempts: 3, backoff_millis: 200 },
                lock: RetrySettings { max_attempts: 5, backoff_millis: 50 },
                notification: RetrySettings { max_attempts: 3, backoff_millis: 200 },
            },
            directory: DirectoryConfig::default(),
            notification: NotificationConfig::default(),
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

impl TransportMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queue => "queue",
            Self::Call => "call",
        }
    }
}

impl std::str::FromStr for TransportMode {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "queue" => Ok(Self::Queue),
            "call" => Ok(Self::Call),
            other => Err(ConfigError::Validation(format!(
                "unsupported transport mode `{other}` (expected queue|call)"
            ))),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl TransportConfig {
    pub fn shared_secret_matches(&self, presented: Option<&str>) -> bool {
        match &self.shared_secret {
            None => true,
            Some(secret) => presented == Some(secret.expose_secret()),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("signoff.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(transport) = patch.transport {
            if let Some(mode) = transport.mode {
                self.transport.mode = mode;
            }
            if let Some(queue_capacity) = transport.queue_capacity {
                self.transport.queue_capacity = queue_capacity;
            }
            if let Some(max_redeliveries) = transport.max_redeliveries {
                self.transport.max_redeliveries = max_redeliveries;
            }
            if let Some(backoff) = transport.redelivery_backoff_millis {
                self.transport.redelivery_backoff_millis = backoff;
            }
            if let Some(url) = transport.processing_base_url {
                self.transport.processing_base_url = Some(url);
            }
            if let Some(url) = transport.request_base_url {
                self.transport.request_base_url = Some(url);
            }
            if let Some(call_timeout_secs) = transport.call_timeout_secs {
                self.transport.call_timeout_secs = call_timeout_secs;
            }
            if let Some(shared_secret) = transport.shared_secret {
                self.transport.shared_secret = Some(shared_secret.into());
            }
        }

        if let Some(retry) = patch.retry {
            retry.propagation.apply(&mut self.retry.propagation);
            retry.result_delivery.apply(&mut self.retry.result_delivery);
            retry.lock.apply(&mut self.retry.lock);
            retry.notification.apply(&mut self.retry.notification);
        }

        if let Some(base_url) = patch.directory.and_then(|directory| directory.base_url) {
            self.directory.base_url = Some(base_url);
        }
        if let Some(base_url) = patch.notification.and_then(|notification| notification.base_url)
        {
            self.notification.base_url = Some(base_url);
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("SIGNOFF_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("SIGNOFF_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = parse_u32("SIGNOFF_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("SIGNOFF_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("SIGNOFF_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("SIGNOFF_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("SIGNOFF_SERVER_PORT") {
            self.server.port = parse_u16("SIGNOFF_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("SIGNOFF_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("SIGNOFF_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        if let Some(value) = read_env("SIGNOFF_TRANSPORT_MODE") {
            self.transport.mode = value.parse()?;
        }
        if let Some(value) = read_env("SIGNOFF_TRANSPORT_QUEUE_CAPACITY") {
            self.transport.queue_capacity =
                parse_u32("SIGNOFF_TRANSPORT_QUEUE_CAPACITY", &value)? as usize;
        }
        if let Some(value) = read_env("SIGNOFF_TRANSPORT_MAX_REDELIVERIES") {
            self.transport.max_redeliveries =
                parse_u32("SIGNOFF_TRANSPORT_MAX_REDELIVERIES", &value)?;
        }
        if let Some(value) = read_env("SIGNOFF_TRANSPORT_PROCESSING_BASE_URL") {
            self.transport.processing_base_url = Some(value);
        }
        if let Some(value) = read_env("SIGNOFF_TRANSPORT_REQUEST_BASE_URL") {
            self.transport.request_base_url = Some(value);
        }
        if let Some(value) = read_env("SIGNOFF_TRANSPORT_CALL_TIMEOUT_SECS") {
            self.transport.call_timeout_secs =
                parse_u64("SIGNOFF_TRANSPORT_CALL_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("SIGNOFF_TRANSPORT_SHARED_SECRET") {
            self.transport.shared_secret = Some(value.into());
        }

        for (prefix, settings) in [
            ("SIGNOFF_RETRY_PROPAGATION", &mut self.retry.propagation),
            ("SIGNOFF_RETRY_RESULT_DELIVERY", &mut self.retry.result_delivery),
            ("SIGNOFF_RETRY_LOCK", &mut self.retry.lock),
            ("SIGNOFF_RETRY_NOTIFICATION", &mut self.retry.notification),
        ] {
            let key = format!("{prefix}_MAX_ATTEMPTS");
            if let Some(value) = read_env(&key) {
                settings.max_attempts = parse_u32(&key, &value)?;
            }
            let key = format!("{prefix}_BACKOFF_MILLIS");
            if let Some(value) = read_env(&key) {
                settings.backoff_millis = parse_u64(&key, &value)?;
            }
        }

        if let Some(value) = read_env("SIGNOFF_DIRECTORY_BASE_URL") {
            self.directory.base_url = Some(value);
        }
        if let Some(value) = read_env("SIGNOFF_NOTIFICATION_BASE_URL") {
            self.notification.base_url = Some(value);
        }

        let log_level =
            read_env("SIGNOFF_LOGGING_LEVEL").or_else(|| read_env("SIGNOFF_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("SIGNOFF_LOGGING_FORMAT").or_else(|| read_env("SIGNOFF_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(bind_address) = overrides.bind_address {
            self.server.bind_address = bind_address;
        }
        if let Some(port) = overrides.port {
            self.server.port = port;
        }
        if let Some(mode) = overrides.transport_mode {
            self.transport.mode = mode;
        }
        if let Some(url) = overrides.processing_base_url {
            self.transport.processing_base_url = Some(url);
        }
        if let Some(url) = overrides.request_base_url {
            self.transport.request_base_url = Some(url);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_server(&self.server)?;
        validate_transport(&self.transport)?;
        validate_retry(&self.retry)?;
        validate_optional_url("directory.base_url", self.directory.base_url.as_deref())?;
        validate_optional_url("notification.base_url", self.notification.base_url.as_deref())?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("signoff.toml"), PathBuf::from("config/signoff.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_transport(transport: &TransportConfig) -> Result<(), ConfigError> {
    if transport.queue_capacity == 0 {
        return Err(ConfigError::Validation(
            "transport.queue_capacity must be greater than zero".to_string(),
        ));
    }

    if transport.call_timeout_secs == 0 || transport.call_timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "transport.call_timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    validate_optional_url(
        "transport.processing_base_url",
        transport.processing_base_url.as_deref(),
    )?;
    validate_optional_url("transport.request_base_url", transport.request_base_url.as_deref())?;

    if transport.mode == TransportMode::Call {
        if transport.processing_base_url.is_none() {
            return Err(ConfigError::Validation(
                "transport.processing_base_url is required when transport.mode is `call`"
                    .to_string(),
            ));
        }
        if transport.request_base_url.is_none() {
            return Err(ConfigError::Validation(
                "transport.request_base_url is required when transport.mode is `call`".to_string(),
            ));
        }
    }

    if let Some(secret) = &transport.shared_secret {
        if secret.expose_secret().trim().is_empty() {
            return Err(ConfigError::Validation(
                "transport.shared_secret must not be blank when set".to_string(),
            ));
        }
    }

    Ok(())
}

fn validate_retry(retry: &RetryConfig) -> Result<(), ConfigError> {
    for (name, settings) in [
        ("retry.propagation", retry.propagation),
        ("retry.result_delivery", retry.result_delivery),
        ("retry.lock", retry.lock),
        ("retry.notification", retry.notification),
    ] {
        if settings.max_attempts == 0 {
            return Err(ConfigError::Validation(format!(
                "{name}.max_attempts must be greater than zero"
            )));
        }
        if settings.backoff_millis > 60_000 {
            return Err(ConfigError::Validation(format!(
                "{name}.backoff_millis must be at most 60000"
            )));
        }
    }
    Ok(())
}

fn validate_optional_url(key: &str, value: Option<&str>) -> Result<(), ConfigError> {
    if let Some(url) = value {
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(ConfigError::Validation(format!(
                "{key} must start with http:// or https://"
            )));
        }
    }
    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    server: Option<ServerPatch>,
    transport: Option<TransportPatch>,
    retry: Option<RetryPatch>,
    directory: Option<BaseUrlPatch>,
    notification: Option<BaseUrlPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct TransportPatch {
    mode: Option<TransportMode>,
    queue_capacity: Option<usize>,
    max_redeliveries: Option<u32>,
    redelivery_backoff_millis: Option<u64>,
    processing_base_url: Option<String>,
    request_base_url: Option<String>,
    call_timeout_secs: Option<u64>,
    shared_secret: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RetryPatch {
    #[serde(default)]
    propagation: RetrySettingsPatch,
    #[serde(default)]
    result_delivery: RetrySettingsPatch,
    #[serde(default)]
    lock: RetrySettingsPatch,
    #[serde(default)]
    notification: RetrySettingsPatch,
}

#[derive(Debug, Default, Deserialize)]
struct RetrySettingsPatch {
    max_attempts: Option<u32>,
    backoff_millis: Option<u64>,
}

impl RetrySettingsPatch {
    fn apply(self, settings: &mut RetrySettings) {
        if let Some(max_attempts) = self.max_attempts {
            settings.max_attempts = max_attempts;
        }
        if let Some(backoff_millis) = self.backoff_millis {
            settings.backoff_millis = backoff_millis;
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct BaseUrlPatch {
    base_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
