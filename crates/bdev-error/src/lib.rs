#![forbid(unsafe_code)]
//! Error types for bdev.
//!
//! Defines `BdevError` and a `Result<T>` alias used throughout the
//! workspace, plus the mapping to the historical process exit codes.

use thiserror::Error;

/// Unified error type for all bdev operations.
#[derive(Debug, Error)]
pub enum BdevError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Rejected at the API boundary; no partial state change happened.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// More than one intolerant signature matched during a safeprobe.
    /// Values produced by the offending chain have been discarded.
    #[error("ambivalent probing result")]
    Ambivalent,

    #[error("parse error in {file} at line {line}: {detail}")]
    Parse {
        file: String,
        line: usize,
        detail: String,
    },

    #[error("unsupported tag specification: {0}")]
    BadTagSpec(String),

    #[error("not found: {0}")]
    NotFound(String),
}

impl BdevError {
    /// Map this error to the historical CLI exit code.
    ///
    /// 0 = success, 2 = nothing found, 4 = usage/other error,
    /// 8 = ambivalent low-level probing result.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Ambivalent => 8,
            Self::NotFound(_) => 2,
            _ => 4,
        }
    }
}

/// Result alias using `BdevError`.
pub type Result<T> = std::result::Result<T, BdevError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_follow_the_historical_contract() {
        assert_eq!(BdevError::Ambivalent.exit_code(), 8);
        assert_eq!(BdevError::NotFound("x".into()).exit_code(), 2);
        assert_eq!(BdevError::InvalidArgument("len").exit_code(), 4);
        assert_eq!(
            BdevError::Io(std::io::Error::other("boom")).exit_code(),
            4
        );
    }
}
