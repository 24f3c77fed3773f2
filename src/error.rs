//! Error type shared by the reader, the map builder and the build pipeline.

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Convenient result type used throughout the crate.
pub type Result<T, E = LmError> = std::result::Result<T, E>;

/// Everything that can abort an ARPA build or a map open.
///
/// Absent keys at query time are not errors; lookups return `None` for them.
#[derive(Debug, Error)]
pub enum LmError {
    /// Malformed header or data line in the ARPA source.
    #[error("parse error on line {line}: {message}")]
    Parse {
        /// 1-based line number in the source file (0 when not tied to a line).
        line: u64,
        /// What was wrong with it.
        message: String,
    },
    /// More grams of an order were seen than its header declared.
    #[error("too many {}-grams", order + 1)]
    TooManyGrams {
        /// 0-based order.
        order: usize,
    },
    /// An order was closed before all of its declared grams were seen.
    #[error("too few {}-grams: expected {expected}, observed {observed}", order + 1)]
    TooFewGrams {
        /// 0-based order.
        order: usize,
        /// Count declared in the header.
        expected: u64,
        /// Count actually read.
        observed: u64,
    },
    /// A higher-order gram used a token missing from the unigram vocabulary.
    #[error("ngram contains unknown unigram {token:?}")]
    UnknownUnigram {
        /// The unresolved token.
        token: String,
    },
    /// Grams arrived for an order lower than the one being built.
    #[error("{}-grams appeared after {}-grams were already started", got + 1, current + 1)]
    OrderRegression {
        /// 0-based order being built.
        current: usize,
        /// 0-based order that arrived.
        got: usize,
    },
    /// Filesystem failure with the offending path.
    #[error("io error while processing {path:?}: {source}")]
    Io {
        /// Underlying IO error returned by the standard library.
        source: std::io::Error,
        /// Path being read, written or removed.
        path: PathBuf,
    },
    /// A builder was used outside of its contract.
    #[error("builder misuse: {0}")]
    BuilderMisuse(String),
    /// The perfect hash function could not be constructed.
    #[error("perfect hash construction failed: {0}")]
    Construction(String),
    /// Files on disk do not describe a valid map or build.
    #[error("invalid map at {path:?}: {message}")]
    Format {
        /// File that failed validation.
        path: PathBuf,
        /// What was wrong with it.
        message: String,
    },
    /// Configuration file is missing required entries or unreadable.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl LmError {
    /// Wraps an IO error together with the path it concerns.
    pub fn io(source: std::io::Error, path: impl AsRef<Path>) -> Self {
        Self::Io {
            source,
            path: path.as_ref().to_path_buf(),
        }
    }

    pub(crate) fn parse(line: u64, message: impl Into<String>) -> Self {
        Self::Parse {
            line,
            message: message.into(),
        }
    }

    pub(crate) fn format(path: impl AsRef<Path>, message: impl Into<String>) -> Self {
        Self::Format {
            path: path.as_ref().to_path_buf(),
            message: message.into(),
        }
    }
}

/// Attaches a path to `std::io::Result`s, in the spirit of `anyhow::Context`.
pub(crate) trait IoContext<T> {
    fn at(self, path: impl AsRef<Path>) -> Result<T>;
}

impl<T> IoContext<T> for std::io::Result<T> {
    fn at(self, path: impl AsRef<Path>) -> Result<T> {
        self.map_err(|e| LmError::io(e, path))
    }
}
