use std::fmt::Display;

/// BucketDB errors.
#[derive(Clone, Debug, PartialEq)]
pub enum Error {
    /// An IO error.
    IO(String),
    /// Invalid user input, typically an empty write, an empty key, or a
    /// zero-valued configuration field.
    InvalidInput(String),
    /// Invalid on-disk data, typically decoding errors or records whose
    /// lengths do not match what the index claims.
    Corrupt(String),
    /// The segment has admitted its full quota of keys. The caller must
    /// roll to the next bucket and retry.
    KeyLimitReached,
    /// No live index slot for the key.
    NotFound,
    /// The key's index slot is tombstoned.
    Deleted,
}

impl std::error::Error for Error {}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::IO(msg) => write!(f, "io error: {msg}"),
            Error::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
            Error::Corrupt(msg) => write!(f, "corrupt data: {msg}"),
            Error::KeyLimitReached => write!(f, "bucket key limit reached"),
            Error::NotFound => write!(f, "key not found"),
            Error::Deleted => write!(f, "key was deleted"),
        }
    }
}

/// Constructs an Error::Corrupt for the given format string.
#[macro_export]
macro_rules! errcorrupt {
    ($($args:tt)*) => { $crate::error::Error::Corrupt(format!($($args)*)).into() };
}

/// Constructs an Error::InvalidInput for the given format string.
#[macro_export]
macro_rules! errinput {
    ($($args:tt)*) => { $crate::error::Error::InvalidInput(format!($($args)*)).into() };
}

/// A BucketDB Result returning Error.
pub type Result<T> = std::result::Result<T, Error>;

impl<T> From<Error> for Result<T> {
    fn from(error: Error) -> Self {
        Err(error)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::IO(err.to_string())
    }
}

impl<T> From<std::sync::PoisonError<T>> for Error {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Error::IO(err.to_string())
    }
}

impl From<Box<bincode::ErrorKind>> for Error {
    fn from(err: Box<bincode::ErrorKind>) -> Self {
        Error::Corrupt(err.to_string())
    }
}
