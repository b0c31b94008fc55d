use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Io,
    Parse,
    Corrupted,
    InvalidArgument,
    InvalidState,
    IndexNotFound,
    NoSuchObject,
    EntryExists,
    ContextNotEmpty,
    PartitionClosed,
    CursorClosed,
}

#[derive(Debug)]
pub struct Error {
    pub kind: ErrorKind,
    pub context: String,
}

impl Error {
    pub fn new(kind: ErrorKind, context: String) -> Self {
        Error { kind, context }
    }

    pub fn index_not_found(attr: &str) -> Self {
        Error::new(
            ErrorKind::IndexNotFound,
            format!("no index configured for attribute '{}'", attr),
        )
    }

    pub fn no_such_object(dn: &str) -> Self {
        Error::new(ErrorKind::NoSuchObject, format!("no entry for '{}'", dn))
    }

    pub fn partition_closed() -> Self {
        Error::new(
            ErrorKind::PartitionClosed,
            "partition has been closed".to_string(),
        )
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.context)
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error {
            kind: ErrorKind::Io,
            context: err.to_string(),
        }
    }
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Error {
            kind: ErrorKind::Parse,
            context: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error {
            kind: ErrorKind::Parse,
            context: err.to_string(),
        }
    }
}

impl From<regex::Error> for Error {
    fn from(err: regex::Error) -> Self {
        Error {
            kind: ErrorKind::Parse,
            context: format!("regex error: {}", err),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
