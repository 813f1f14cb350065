use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Trace log not found: {0}")]
    LogNotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Shared memory error on {name}: {source}")]
    SharedMemory {
        name: String,
        #[source]
        source: nix::Error,
    },

    #[error("Malformed names file {path}, line {line}: expected `id,name`")]
    MalformedNames { path: String, line: usize },

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

pub type Result<T> = std::result::Result<T, Error>;

pub mod exit_code {
    pub const SUCCESS: i32 = 0;
    pub const GENERAL_ERROR: i32 = 1;
    pub const INVALID_ARGUMENTS: i32 = 2;
    pub const LOG_NOT_FOUND: i32 = 3;
    pub const PERMISSION_DENIED: i32 = 4;
    pub const DATABASE_ERROR: i32 = 6;
}

impl Error {
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::LogNotFound(_) => exit_code::LOG_NOT_FOUND,
            Error::PermissionDenied(_) => exit_code::PERMISSION_DENIED,
            Error::Database(_) => exit_code::DATABASE_ERROR,
            Error::InvalidArgument(_) | Error::MalformedNames { .. } => {
                exit_code::INVALID_ARGUMENTS
            }
            _ => exit_code::GENERAL_ERROR,
        }
    }

    /// Classify an error from opening `what`.
    pub(crate) fn from_open(what: &str, err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Error::LogNotFound(what.to_string()),
            std::io::ErrorKind::PermissionDenied => Error::PermissionDenied(what.to_string()),
            _ => Error::Io(err),
        }
    }
}
