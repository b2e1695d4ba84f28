//! Sorting errors and process exit codes.

use std::io;

use thiserror::Error;

/// Sort completed successfully.
pub const EXIT_OK: i32 = 0;
/// Unclassified failure.
pub const EXIT_FAILURE: i32 = 1;
/// Invalid arguments or configuration.
pub const EXIT_PARSE_ERROR: i32 = 2;
/// Failed to read or write the source, a temporary or the destination file.
pub const EXIT_IO_ERROR: i32 = 3;
/// Sort interrupted by SIGINT.
pub const EXIT_INTERRUPTED: i32 = 130;

/// Sorting error.
#[derive(Debug, Error)]
pub enum SortError {
    /// Invalid sorter configuration, reported before any I/O starts.
    #[error("invalid configuration: {0}")]
    Config(String),
    /// File system operation failure.
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
    /// Workers thread pool initialization error.
    #[error("thread pool initialization failed: {0}")]
    ThreadPoolBuildError(#[from] rayon::ThreadPoolBuildError),
    /// A pipeline stage panicked.
    #[error("{0} stage panicked")]
    StagePanicked(&'static str),
}

impl SortError {
    pub(crate) fn io(context: impl Into<String>, source: io::Error) -> Self {
        SortError::Io {
            context: context.into(),
            source,
        }
    }

    /// Returns the process exit code this error should terminate with.
    pub fn exit_code(&self) -> i32 {
        match self {
            SortError::Config(_) => EXIT_PARSE_ERROR,
            SortError::Io { .. } => EXIT_IO_ERROR,
            SortError::ThreadPoolBuildError(_) | SortError::StagePanicked(_) => EXIT_FAILURE,
        }
    }
}

/// Attaches a context message to an [`io::Result`].
pub(crate) trait IoContext<T> {
    fn context<C: Into<String>>(self, context: impl FnOnce() -> C) -> Result<T, SortError>;
}

impl<T> IoContext<T> for io::Result<T> {
    fn context<C: Into<String>>(self, context: impl FnOnce() -> C) -> Result<T, SortError> {
        self.map_err(|err| SortError::io(context(), err))
    }
}

#[cfg(test)]
mod test {
    use std::io::{self, ErrorKind};

    use super::{IoContext, SortError, EXIT_FAILURE, EXIT_IO_ERROR, EXIT_PARSE_ERROR};

    #[test]
    fn test_exit_codes() {
        assert_eq!(SortError::Config("zero buffer".into()).exit_code(), EXIT_PARSE_ERROR);
        assert_eq!(SortError::StagePanicked("merger").exit_code(), EXIT_FAILURE);

        let result: io::Result<()> = Err(io::Error::new(ErrorKind::NotFound, "gone"));
        let err = result.context(|| "opening input.txt").unwrap_err();
        assert_eq!(err.exit_code(), EXIT_IO_ERROR);
        assert_eq!(err.to_string(), "opening input.txt: gone");
    }
}
