//! Error types of the external server.
//!
//! Errors never cross session boundaries: a [`CarError`] terminates the
//! session that produced it and is reported to the supervisor, which decides
//! the process exit code. [`ConfigError`] and [`ModuleError`] surface before
//! any session starts.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Configuration loading and validation failures. Fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("could not read config file '{path}': {source}")]
    Io {
        /// Path given on the command line.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The config file is not a valid JSON document of the expected shape.
    /// Unknown keys are rejected here as well.
    #[error("could not parse config file: {0}")]
    Parse(#[from] serde_json::Error),

    /// An identity segment is not lowercase `[a-z0-9_]+`.
    #[error("invalid {field} '{value}': expected lowercase [a-z0-9_]+")]
    InvalidIdentifier {
        /// Which key carried the value.
        field: &'static str,
        /// The offending value.
        value: String,
    },

    /// A module id key does not parse as an unsigned 16-bit integer.
    #[error("invalid module id '{0}': expected an unsigned integer")]
    InvalidModuleId(String),

    /// A module id appears both in `common_modules` and in a car's
    /// `specific_modules`.
    #[error("module {id} is configured both globally and for car '{car}'")]
    DuplicateModule {
        /// The duplicated id.
        id: u16,
        /// The car whose specific set collides.
        car: String,
    },

    /// A car ends up with an empty module set.
    #[error("car '{0}' has no modules configured")]
    NoModules(String),

    /// The `cars` mapping is empty.
    #[error("at least one car must be configured")]
    NoCars,

    /// A numeric or structural constraint failed.
    #[error("invalid value for '{field}': {reason}")]
    InvalidValue {
        /// The offending key.
        field: &'static str,
        /// Why it was rejected.
        reason: String,
    },
}

/// Transport-level failures of the bus adapter.
#[derive(Debug, Error)]
pub enum BusError {
    /// The broker could not be reached or refused the connection. Retryable
    /// during session startup.
    #[error("could not connect to the MQTT broker: {0}")]
    Connect(String),

    /// The broker did not acknowledge the connection in time. Retryable
    /// during session startup.
    #[error("timed out waiting for the MQTT broker to accept the connection")]
    ConnectTimeout,

    /// Subscribing to the inbound topic failed.
    #[error("could not subscribe to the inbound topic: {0}")]
    Subscribe(String),

    /// Publishing an outbound frame failed.
    #[error("could not publish: {0}")]
    Publish(String),

    /// TLS material could not be loaded.
    #[error("TLS setup failed: {0}")]
    Tls(String),
}

impl BusError {
    /// Failures that happen before the broker accepted the connection; the
    /// session retries these after the configured back-off.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Connect(_) | Self::ConnectTimeout)
    }
}

/// Handler-library loading and initialization failures. Fatal at startup.
#[derive(Debug, Error)]
pub enum ModuleError {
    /// The configured library path does not exist.
    #[error("module library not found: {0}")]
    LibraryNotFound(PathBuf),

    /// The library could not be loaded or a required symbol is missing.
    #[error("could not load module library '{path}': {reason}")]
    Load {
        /// Path of the shared object.
        path: PathBuf,
        /// Loader diagnostic.
        reason: String,
    },

    /// `init` returned a null context.
    #[error("module {0}: init returned a null context")]
    InitFailed(u16),

    /// The library reports a different module number than configured.
    #[error("module library reports number {actual}, configured as {configured}")]
    NumberMismatch {
        /// Id from the configuration file.
        configured: u16,
        /// Id returned by `get_module_number`.
        actual: i32,
    },

    /// A module config value is neither a string nor an integer.
    #[error("module {module}: config value for '{key}' must be a string or an integer")]
    InvalidConfigValue {
        /// Module the config belongs to.
        module: u16,
        /// The offending key.
        key: String,
    },
}

/// Failure to assemble the server before any session runs.
#[derive(Debug, Error)]
pub enum StartupError {
    /// Configuration problem.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A car's handler library failed to load or initialize.
    #[error("car '{car}': {source}")]
    Module {
        /// The car whose module failed.
        car: String,
        /// The underlying failure.
        #[source]
        source: ModuleError,
    },

    /// A car's bus adapter could not be assembled (TLS material, options).
    #[error("car '{car}': {source}")]
    Bus {
        /// The car whose bus failed.
        car: String,
        /// The underlying failure.
        #[source]
        source: BusError,
    },
}

/// Terminal failure of one car session.
#[derive(Debug, Error)]
pub enum CarError {
    /// The connect sequence (handshake + initial status burst) failed.
    #[error("connect sequence failed: {0}")]
    ConnectSequence(String),

    /// No status arrived within the configured timeout while Running.
    #[error("no status received within {0:?}")]
    StatusTimeout(Duration),

    /// The oldest pending command was not acknowledged within the configured
    /// timeout.
    #[error("command response for counter {0} not received in time")]
    CommandResponseTimeout(u32),

    /// The peer violated the protocol (bad session id, duplicate handshake,
    /// out-of-order acknowledgement, unknown frame kind).
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// The bus connection was lost while Running.
    #[error("transport connection lost")]
    TransportDown,

    /// The event queue filled up, which means the consumer is stuck.
    #[error("event queue overflowed")]
    QueueOverflow,

    /// Transport failure outside Running.
    #[error(transparent)]
    Bus(#[from] BusError),

    /// Handler-library failure.
    #[error(transparent)]
    Module(#[from] ModuleError),
}
