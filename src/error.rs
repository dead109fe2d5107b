use std::fmt;
use std::io;

pub(crate) type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while loading a grammar or tokenizing a line.
#[derive(Debug)]
#[non_exhaustive]
pub enum Error {
    /// An I/O error occurred when reading a grammar file.
    Io(io::Error),

    /// JSON parsing failed when loading a grammar.
    Json(serde_json::Error),

    /// A grammar document did not have the expected shape: a missing required
    /// key, a rule with neither `match`, `begin`/`end`, `begin`/`while`, nor
    /// `include`/`patterns`, a non-integer capture index, or a scope name that
    /// could not be resolved where one was required at compile time.
    GrammarShape(String),

    /// A pattern failed to compile, either at grammar load time or after
    /// backreference substitution at tokenization time.
    RegexCompile(String),

    /// An `include_local` (`#key`) could not be resolved through the
    /// repository chain in scope at that point in the grammar. Fatal to the
    /// tokenization call that triggered it.
    UnknownRepositoryKey(String),

    /// A grammar was not found in the registry by scope name.
    /// Only happens when asking to tokenize with a grammar we don't have.
    GrammarNotFound(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(err) => write!(f, "I/O error: {err}"),
            Error::Json(err) => write!(f, "JSON parsing error: {err}"),
            Error::GrammarShape(msg) => write!(f, "malformed grammar: {msg}"),
            Error::RegexCompile(msg) => write!(f, "regex compile error: {msg}"),
            Error::UnknownRepositoryKey(key) => {
                write!(f, "unknown repository key '{key}'")
            }
            Error::GrammarNotFound(scope) => write!(f, "grammar '{scope}' not found"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            Error::Json(err) => Some(err),
            Error::GrammarShape(_)
            | Error::RegexCompile(_)
            | Error::UnknownRepositoryKey(_)
            | Error::GrammarNotFound(_) => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Json(err)
    }
}
