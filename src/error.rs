use thiserror::Error;

/// Result alias for `bagwise`.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by clustering, labelling, training and persistence.
#[derive(Debug, Error)]
pub enum Error {
    /// Input was empty.
    #[error("empty input provided")]
    EmptyInput,

    /// Vector or matrix dimension mismatch.
    #[error("dimension mismatch: expected {expected}, found {found}")]
    DimensionMismatch {
        /// Expected dimension.
        expected: usize,
        /// Found dimension.
        found: usize,
    },

    /// Invalid number of clusters requested.
    #[error("cannot create {requested} clusters: {reason}")]
    InvalidClusterCount {
        /// Requested count.
        requested: usize,
        /// Why the count is unusable.
        reason: String,
    },

    /// Invalid parameter value.
    #[error("invalid parameter '{name}': {message}")]
    InvalidParameter {
        /// Parameter name.
        name: &'static str,
        /// Error message.
        message: &'static str,
    },

    /// Malformed input that does not fit one of the structured variants.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A persisted model or text matrix could not be parsed.
    #[error("parse error on line {line}: {message}")]
    Parse {
        /// 1-based line number.
        line: usize,
        /// What went wrong.
        message: String,
    },

    /// The outer optimizer terminated with a failure status.
    #[error("optimizer failed with status code {code}")]
    OptimizerFailure {
        /// Signed status code reported by the optimizer (always negative).
        code: i32,
    },

    /// Prediction was requested before `ClusterModel::build`.
    #[error("cluster model has not been built")]
    ModelNotBuilt,

    /// Underlying I/O failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// CSV decoding/encoding failure.
    #[error(transparent)]
    Csv(#[from] csv::Error),
}

impl Error {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages_are_readable() {
        let e = Error::DimensionMismatch {
            expected: 3,
            found: 4,
        };
        assert_eq!(e.to_string(), "dimension mismatch: expected 3, found 4");

        let e = Error::OptimizerFailure { code: -2 };
        assert!(e.to_string().contains("-2"));

        let e = Error::Parse {
            line: 2,
            message: "bad header".into(),
        };
        assert_eq!(e.to_string(), "parse error on line 2: bad header");
    }

    #[test]
    fn io_errors_convert() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let e: Error = io.into();
        assert!(matches!(e, Error::Io(_)));
    }
}
