use std::fmt;

// Mirrors the teacher's err!-macro-and-kind-enum convention: one small enum of
// failure domains, a formatted message, and no dependency on anyhow/eyre.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Io,
    Protocol,
    NoSession,
    AlreadyAttached,
    Registry,
    Evaluation,
    EvaluationTimeout,
    Transport,
    Handler,
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Self::Io => "io",
            Self::Protocol => "protocol",
            Self::NoSession => "no_session",
            Self::AlreadyAttached => "already_attached",
            Self::Registry => "registry",
            Self::Evaluation => "evaluation",
            Self::EvaluationTimeout => "evaluation_timeout",
            Self::Transport => "transport",
            Self::Handler => "handler",
            Self::Internal => "internal",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone)]
pub struct Error {
    pub kind: ErrorKind,
    pub message: String,
}

impl Error {
    pub fn new(kind: ErrorKind, message: String) -> Self {
        Self { kind, message }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::new(ErrorKind::Io, e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::new(ErrorKind::Protocol, e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

// err!(Kind, "message {}", args...) builds Err(Error{..}) for use with `return err!(...)` or `?`.
#[macro_export]
macro_rules! err {
    ($kind:ident, $($arg:tt)*) => {
        Err($crate::error::Error::new($crate::error::ErrorKind::$kind, format!($($arg)*)))
    };
}
