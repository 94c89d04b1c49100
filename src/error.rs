use std::time::Duration;

/// Which side of the bridge produced an error.
///
/// Lets a front end tell "debugger never started" apart from
/// "debugger crashed mid-session".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorOrigin {
    /// TCP connection to the debug target or its framing.
    Transport,
    /// The execution engine failed to set up the debug target.
    Engine,
    /// Session bookkeeping: endpoints, ports, state machine.
    Session,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    // --------------------------------- transport errors ------------------------------------------
    #[error("connection to debug target {addr}: {reason}")]
    Connection { addr: String, reason: String },
    #[error("no reply for {what} within {timeout:?}")]
    Timeout { what: String, timeout: Duration },
    #[error("debug adapter rejected `{command}`: {message}")]
    RequestFailed { command: String, message: String },
    #[error("malformed DAP frame: {0}")]
    Protocol(String),

    // --------------------------------- session errors --------------------------------------------
    #[error("no free port in {start}..={end} after {attempts} attempts")]
    ResourceExhausted { start: u16, end: u16, attempts: u32 },
    #[error("control endpoint `{0}` is already bound")]
    Bind(String),
    #[error("invalid debugger state: {0}")]
    InvalidState(String),

    // --------------------------------- engine errors ---------------------------------------------
    #[error("debug target setup failed in engine: {ename} - {evalue}")]
    EngineImport { ename: String, evalue: String },

    // --------------------------------- generic errors --------------------------------------------
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("config: {0}")]
    Config(#[from] toml::de::Error),
}

impl Error {
    pub(crate) fn connection(addr: impl ToString, reason: impl ToString) -> Self {
        Error::Connection {
            addr: addr.to_string(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn timeout(what: impl Into<String>, timeout: Duration) -> Self {
        Error::Timeout {
            what: what.into(),
            timeout,
        }
    }

    /// Return a hint to the kernel - keep the session after error or discard it.
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::Timeout { .. } => false,
            Error::RequestFailed { .. } => false,
            Error::Protocol(_) => false,
            Error::InvalidState(_) => false,
            Error::EngineImport { .. } => false,
            Error::Io(_) => false,
            Error::Json(_) => false,
            Error::Config(_) => false,

            Error::Connection { .. } => true,
            Error::ResourceExhausted { .. } => true,
            Error::Bind(_) => true,
        }
    }

    pub fn origin(&self) -> ErrorOrigin {
        match self {
            Error::Connection { .. }
            | Error::Timeout { .. }
            | Error::RequestFailed { .. }
            | Error::Protocol(_)
            | Error::Io(_)
            | Error::Json(_) => ErrorOrigin::Transport,
            Error::EngineImport { .. } => ErrorOrigin::Engine,
            Error::ResourceExhausted { .. }
            | Error::Bind(_)
            | Error::InvalidState(_)
            | Error::Config(_) => ErrorOrigin::Session,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[macro_export]
macro_rules! _error {
    ($log_fn: path, $res: expr) => {
        match $res {
            Ok(value) => Some(value),
            Err(e) => {
                $log_fn!(target: "debugger", "{:#}", e);
                None
            }
        }
    };
    ($log_fn: path, $res: expr, $msg: tt) => {
        match $res {
            Ok(value) => Some(value),
            Err(e) => {
                $log_fn!(target: "debugger", concat!($msg, " {:#}"), e);
                None
            }
        }
    };
}

/// Transforms `Result` into `Option` and logs an error if it occurs.
#[macro_export]
macro_rules! weak_error {
    ($res: expr) => {
        $crate::_error!(log::warn, $res)
    };
    ($res: expr, $msg: tt) => {
        $crate::_error!(log::warn, $res, $msg)
    };
}

/// Transforms `Result` into `Option` and put error into debug logs if it occurs.
#[macro_export]
macro_rules! muted_error {
    ($res: expr) => {
        $crate::_error!(log::debug, $res)
    };
    ($res: expr, $msg: tt) => {
        $crate::_error!(log::debug, $res, $msg)
    };
}
