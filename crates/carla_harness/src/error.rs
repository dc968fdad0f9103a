use std::path::PathBuf;

/// What went wrong.
///
/// Kept private behind [Error] so that the variants can change without breaking callers, who are given predicates
/// instead.
#[derive(Debug, derive_more::Display, derive_more::IsVariant)]
enum ErrorPayload {
    #[display(fmt = "Required executable `{}` was not found", executable)]
    DependencyMissing { executable: String },

    #[display(fmt = "Gave up on {} after {} attempts: {}", what, attempts, last)]
    RetriesExhausted {
        what: String,
        attempts: u32,
        last: String,
    },

    #[display(fmt = "Could not confirm that {} (pid {}) is dead", name, pid)]
    KillExhausted { name: String, pid: u32 },

    #[display(fmt = "The plugin host did not become ready after {} restarts", restarts)]
    RestartBudgetExhausted { restarts: u32 },

    #[display(fmt = "Audio graph error: {}", _0)]
    Backend(String),

    #[display(fmt = "Nothing has been captured yet")]
    NoCapture,

    #[display(fmt = "Cannot export to {}: only .wav is supported", "path.display()")]
    UnsupportedExportFormat { path: PathBuf },

    #[display(fmt = "Export failed: {}", _0)]
    Export(hound::Error),

    #[display(fmt = "I/O error: {}", _0)]
    Io(std::io::Error),

    #[display(fmt = "Invalid configuration: {}", _0)]
    InvalidConfig(String),

    #[display(fmt = "Invalid event schedule: {}", _0)]
    InvalidSchedule(String),

    #[display(fmt = "Refusing to wait forever on an operation with no end condition and no timeout")]
    UnboundedWait,

    #[display(fmt = "Invalid port pattern: {}", _0)]
    Pattern(globset::Error),
}

#[derive(Debug, thiserror::Error)]
#[error("{payload}")]
pub struct Error {
    payload: ErrorPayload,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

macro_rules! conv {
    ($variant: ident, $from_err: path) => {
        impl From<$from_err> for Error {
            fn from(value: $from_err) -> Error {
                Error {
                    payload: ErrorPayload::$variant(value),
                }
            }
        }
    };
}

conv!(Export, hound::Error);
conv!(Io, std::io::Error);
conv!(Pattern, globset::Error);

impl From<ErrorPayload> for Error {
    fn from(payload: ErrorPayload) -> Self {
        Error { payload }
    }
}

impl Error {
    pub(crate) fn dependency_missing(executable: impl Into<String>) -> Self {
        ErrorPayload::DependencyMissing {
            executable: executable.into(),
        }
        .into()
    }

    pub(crate) fn retries_exhausted(what: impl Into<String>, attempts: u32, last: impl Into<String>) -> Self {
        ErrorPayload::RetriesExhausted {
            what: what.into(),
            attempts,
            last: last.into(),
        }
        .into()
    }

    pub(crate) fn kill_exhausted(name: impl Into<String>, pid: u32) -> Self {
        ErrorPayload::KillExhausted {
            name: name.into(),
            pid,
        }
        .into()
    }

    pub(crate) fn restart_budget_exhausted(restarts: u32) -> Self {
        ErrorPayload::RestartBudgetExhausted { restarts }.into()
    }

    pub(crate) fn backend(message: impl std::fmt::Display) -> Self {
        ErrorPayload::Backend(message.to_string()).into()
    }

    pub(crate) fn no_capture() -> Self {
        ErrorPayload::NoCapture.into()
    }

    pub(crate) fn unsupported_export_format(path: impl Into<PathBuf>) -> Self {
        ErrorPayload::UnsupportedExportFormat { path: path.into() }.into()
    }

    pub(crate) fn invalid_config(message: impl Into<String>) -> Self {
        ErrorPayload::InvalidConfig(message.into()).into()
    }

    pub(crate) fn invalid_schedule(message: impl Into<String>) -> Self {
        ErrorPayload::InvalidSchedule(message.into()).into()
    }

    pub(crate) fn unbounded_wait() -> Self {
        ErrorPayload::UnboundedWait.into()
    }

    /// A required executable is not installed.  Never worth retrying.
    pub fn is_dependency_missing(&self) -> bool {
        self.payload.is_dependency_missing()
    }

    /// A bounded retry loop ran out of attempts.
    pub fn is_retries_exhausted(&self) -> bool {
        self.payload.is_retries_exhausted()
    }

    /// A process could not be confirmed dead.  The environment likely needs manual cleanup.
    pub fn is_kill_exhausted(&self) -> bool {
        self.payload.is_kill_exhausted()
    }

    /// The plugin host kept failing to come up.
    pub fn is_restart_budget_exhausted(&self) -> bool {
        self.payload.is_restart_budget_exhausted()
    }

    pub fn is_backend(&self) -> bool {
        self.payload.is_backend()
    }

    pub fn is_no_capture(&self) -> bool {
        self.payload.is_no_capture()
    }

    pub fn is_unsupported_export_format(&self) -> bool {
        self.payload.is_unsupported_export_format()
    }

    pub fn is_invalid_config(&self) -> bool {
        self.payload.is_invalid_config()
    }

    pub fn is_invalid_schedule(&self) -> bool {
        self.payload.is_invalid_schedule()
    }

    pub fn is_unbounded_wait(&self) -> bool {
        self.payload.is_unbounded_wait()
    }

    pub fn is_pattern(&self) -> bool {
        self.payload.is_pattern()
    }
}

#[cfg(feature = "jack-backend")]
impl From<jack::Error> for Error {
    fn from(value: jack::Error) -> Self {
        Error::backend(value)
    }
}
