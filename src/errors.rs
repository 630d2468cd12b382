//! Error types shared across the application.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// File-system or I/O operation failure.
    Io(String),
    /// The query engine child process could not be started.
    LaunchFailure(String),
    /// A shared handshake segment could not be created or opened.
    IpcSetup(String),
    /// Handshake protocol misuse or a failed segment read/write.
    Handshake(String),
    /// Too few historical records to fit the size regression.
    InsufficientData(String),
    /// Historical records are collinear; the regression has no unique solution.
    SingularFit(String),
    /// Every strategy evaluated to an infinite or undefined cost.
    CostModelUnresolved(String),
    /// The external process checkpoint utility failed.
    CheckpointUtility(String),
    /// The query engine child process exited unsuccessfully.
    ChildProcess(String),
    /// Decision audit log could not be written.
    Audit(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
            Self::LaunchFailure(msg) => write!(f, "launch failure: {msg}"),
            Self::IpcSetup(msg) => write!(f, "ipc setup: {msg}"),
            Self::Handshake(msg) => write!(f, "handshake: {msg}"),
            Self::InsufficientData(msg) => write!(f, "insufficient data: {msg}"),
            Self::SingularFit(msg) => write!(f, "singular fit: {msg}"),
            Self::CostModelUnresolved(msg) => write!(f, "cost model unresolved: {msg}"),
            Self::CheckpointUtility(msg) => write!(f, "checkpoint utility: {msg}"),
            Self::ChildProcess(msg) => write!(f, "child process: {msg}"),
            Self::Audit(msg) => write!(f, "audit: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl AppError {
    /// Whether this error means the size regression could not be fitted.
    #[must_use]
    pub fn is_fit_failure(&self) -> bool {
        matches!(self, Self::InsufficientData(_) | Self::SingularFit(_))
    }
}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Config(format!("invalid json: {err}"))
    }
}
