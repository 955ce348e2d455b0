//src/error.rs

use thiserror::Error;

/// Errors raised while binning reads.
///
/// `Data` errors are per-read and never abort a run; the pipeline logs them
/// and moves on. `Cancelled` is not a failure, it tells the caller that the
/// run was stopped on request and nothing was handed to the sink.
#[derive(Error, Debug)]
pub enum BinningError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error at line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("Bad data in read {read_uid}: {message}")]
    Data { read_uid: u64, message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("{algorithm} does not support {operation}")]
    UnsupportedOperation {
        algorithm: &'static str,
        operation: &'static str,
    },

    #[error("Run cancelled by user")]
    Cancelled,
}

impl BinningError {
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn data<S: Into<String>>(read_uid: u64, message: S) -> Self {
        Self::Data {
            read_uid,
            message: message.into(),
        }
    }

    pub fn parse<S: Into<String>>(line: usize, message: S) -> Self {
        Self::Parse {
            line,
            message: message.into(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, BinningError>;
