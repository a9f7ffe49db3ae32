use std::fmt::{self, Display, Formatter};

/// Convenience alias used throughout the crate, in place of a bare
/// `Result<T, Error>` at every call site.
pub type CResult<T> = std::result::Result<T, Error>;

/// Errors produced by this crate.
///
/// Every file format this crate reads is append-only and is expected to be
/// produced by this crate itself or by a compatible peer; `Corrupt` covers
/// the case where a record fails its own internal checks (bad length, null
/// node where one isn't allowed, unknown version byte). It is distinct from
/// a short/truncated trailing record, which readers recover from silently
/// instead of raising.
#[derive(Debug)]
pub enum Error {
    /// A value read from a store failed validation (bad framing, unknown
    /// version byte, an invariant violated by the record contents).
    Corrupt(String),
    /// A string couldn't be parsed into the expected shape (tag file line,
    /// journal entry, cache validator line).
    Parse(String),
    /// A value outside its accepted domain was supplied by a caller.
    Value(String),
    /// An operation was attempted on a transaction that is no longer active,
    /// or the transaction state machine was used out of order.
    InvalidTransactionState,
    /// A non-blocking lock could not be acquired.
    LockUnavailable,
    /// An internal invariant was violated; reaching this is a bug in this
    /// crate rather than bad input.
    Programming(String),
    /// A caller-requested abort, or an operation refused to continue after
    /// detecting it cannot safely proceed.
    Abort(String),
    /// A node, tag or path lookup failed.
    Lookup(String),
    /// Wraps an I/O failure from the filesystem layer.
    Io(std::io::Error),
    /// Catch-all for failures that don't need their own variant; kept for
    /// the same reason the teacher crate keeps one.
    Internal(String),
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Error::Corrupt(msg) => write!(f, "corrupt data: {}", msg),
            Error::Parse(msg) => write!(f, "parse error: {}", msg),
            Error::Value(msg) => write!(f, "invalid value: {}", msg),
            Error::InvalidTransactionState => {
                write!(f, "transaction is already committed or aborted")
            }
            Error::LockUnavailable => write!(f, "lock is held by another process"),
            Error::Programming(msg) => write!(f, "programming error: {}", msg),
            Error::Abort(msg) => write!(f, "{}", msg),
            Error::Lookup(msg) => write!(f, "unknown revision or tag: {}", msg),
            Error::Io(err) => write!(f, "{}", err),
            Error::Internal(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<std::string::FromUtf8Error> for Error {
    fn from(err: std::string::FromUtf8Error) -> Self {
        Error::Parse(err.to_string())
    }
}

impl From<std::str::Utf8Error> for Error {
    fn from(err: std::str::Utf8Error) -> Self {
        Error::Parse(err.to_string())
    }
}
