//! lockctl CLI - one-shot lock operations from the shell
//!
//! Resolves a named lock from the config file, scans for it, runs a single
//! operation inside a connect/disconnect bracket and reports the result as
//! a table, JSON, or only an exit code.

pub mod cli;
pub mod output;
pub mod run;

pub use cli::{Cli, Operation};
pub use output::{JsonResponse, OutputFormat, OutputFormatter};
pub use run::{perform, Report};

use lockctl_core::config::ConfigError;
use lockctl_core::LockError;

/// Exit codes for CLI operations
///
/// - 0: Success
/// - 1: General error
/// - 2: Authentication with the lock failed
/// - 3: Timeout
/// - 4: Connection failed (lock not found, link lost, not connected)
/// - 5: Invalid input (unknown lock, bad configuration)
/// - 6: Malformed response from the lock
/// - 7: Session busy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Success = 0,
    GeneralError = 1,
    AuthenticationFailed = 2,
    Timeout = 3,
    ConnectionFailed = 4,
    InvalidInput = 5,
    MalformedResponse = 6,
    Busy = 7,
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code as i32
    }
}

impl From<&LockError> for ExitCode {
    fn from(e: &LockError) -> Self {
        match e {
            LockError::AuthenticationFailed => ExitCode::AuthenticationFailed,
            LockError::Timeout => ExitCode::Timeout,
            LockError::NotFound(_) | LockError::Link(_) | LockError::NotConnected => ExitCode::ConnectionFailed,
            LockError::MalformedResponse(_) => ExitCode::MalformedResponse,
            LockError::SessionBusy => ExitCode::Busy,
        }
    }
}

impl From<&ConfigError> for ExitCode {
    fn from(_: &ConfigError) -> Self {
        ExitCode::InvalidInput
    }
}

impl ExitCode {
    /// Convert to process exit code
    pub fn to_exit_code(self) -> std::process::ExitCode {
        std::process::ExitCode::from(self as u8)
    }

    pub fn name(&self) -> &'static str {
        match self {
            ExitCode::Success => "SUCCESS",
            ExitCode::GeneralError => "GENERAL_ERROR",
            ExitCode::AuthenticationFailed => "AUTH_FAILED",
            ExitCode::Timeout => "TIMEOUT",
            ExitCode::ConnectionFailed => "CONNECTION_FAILED",
            ExitCode::InvalidInput => "INVALID_INPUT",
            ExitCode::MalformedResponse => "MALFORMED_RESPONSE",
            ExitCode::Busy => "BUSY",
        }
    }
}

#[cfg(test)]
mod exit_code_tests {
    use super::*;

    #[test]
    fn test_exit_code_values() {
        assert_eq!(ExitCode::Success as i32, 0);
        assert_eq!(ExitCode::GeneralError as i32, 1);
        assert_eq!(ExitCode::AuthenticationFailed as i32, 2);
        assert_eq!(ExitCode::Timeout as i32, 3);
        assert_eq!(ExitCode::ConnectionFailed as i32, 4);
        assert_eq!(ExitCode::InvalidInput as i32, 5);
        assert_eq!(ExitCode::MalformedResponse as i32, 6);
        assert_eq!(ExitCode::Busy as i32, 7);
    }

    #[test]
    fn test_lock_error_mapping() {
        assert_eq!(ExitCode::from(&LockError::AuthenticationFailed), ExitCode::AuthenticationFailed);
        assert_eq!(ExitCode::from(&LockError::Timeout), ExitCode::Timeout);
        assert_eq!(ExitCode::from(&LockError::NotFound("x".into())), ExitCode::ConnectionFailed);
        assert_eq!(ExitCode::from(&LockError::Link("x".into())), ExitCode::ConnectionFailed);
        assert_eq!(ExitCode::from(&LockError::NotConnected), ExitCode::ConnectionFailed);
        assert_eq!(
            ExitCode::from(&LockError::MalformedResponse("x".into())),
            ExitCode::MalformedResponse
        );
        assert_eq!(ExitCode::from(&LockError::SessionBusy), ExitCode::Busy);
    }

    #[test]
    fn test_exit_code_names() {
        assert_eq!(ExitCode::Success.name(), "SUCCESS");
        assert_eq!(ExitCode::Busy.name(), "BUSY");
    }
}
