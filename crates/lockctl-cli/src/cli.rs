//! Argument parsing and top-level execution

use std::fmt;
use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use lockctl_core::config::Config;
use lockctl_core::Lock;
use serde::Serialize;
use tracing::{debug, error};

use crate::output::{OutputFormat, OutputFormatter};
use crate::run::perform;
use crate::ExitCode;

/// lockctl - control a BLE smart lock
#[derive(Parser, Debug)]
#[command(name = "lockctl")]
#[command(version, about = "Query and actuate a BLE smart lock")]
pub struct Cli {
    /// Lock name from the config file
    pub lock_name: String,

    /// Operation to run
    #[arg(value_enum)]
    pub operation: Operation,

    /// Config file path (default: $LOCKCTL_CONFIG, then ./lockctl.toml)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(long, default_value = "table")]
    pub output: OutputFormat,

    /// Verbose output
    #[arg(short, long)]
    pub verbose: bool,

    /// Debug mode (protocol-level tracing)
    #[arg(long)]
    pub debug: bool,
}

/// Operations exposed on the command line.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Operation {
    /// Read the bolt state
    Status,
    /// Lock unless already locked
    Lock,
    /// Unlock unless already unlocked
    Unlock,
    /// Send the lock command unconditionally
    ForceLock,
    /// Send the unlock command unconditionally
    ForceUnlock,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::Status => "status",
            Operation::Lock => "lock",
            Operation::Unlock => "unlock",
            Operation::ForceLock => "force-lock",
            Operation::ForceUnlock => "force-unlock",
        };
        f.write_str(name)
    }
}

impl Cli {
    /// Execute the operation against the configured lock
    pub async fn execute_with_config(self, config: Config) -> anyhow::Result<ExitCode> {
        let formatter = OutputFormatter::new(self.output, self.verbose);

        let entry = match config.lock(&self.lock_name) {
            Ok(entry) => entry,
            Err(e) => {
                formatter.print_error(&e, ExitCode::from(&e));
                return Ok(ExitCode::InvalidInput);
            }
        };
        let material = match entry.key_material() {
            Ok(material) => material,
            Err(e) => {
                formatter.print_error(&e, ExitCode::InvalidInput);
                return Ok(ExitCode::InvalidInput);
            }
        };

        formatter.progress(&format!("scanning for '{}'", self.lock_name));
        let peripheral = match lockctl_ble::scan(entry.address_filter(), config.timeouts.scan()).await {
            Ok(peripheral) => peripheral,
            Err(e) => {
                let e = lockctl_core::LockError::from(e);
                error!(lock = %self.lock_name, error = %e, "scan failed");
                formatter.print_error(&e, ExitCode::from(&e));
                return Ok(ExitCode::from(&e));
            }
        };

        let lock = Lock::with_options(peripheral, material, config.timeouts.lock_options());
        debug!(lock = %self.lock_name, address = %lock.address(), operation = %self.operation, "running");

        match perform(&lock, &self.lock_name, self.operation).await {
            Ok(report) => {
                formatter.print_report(&report);
                Ok(ExitCode::Success)
            }
            Err(e) => {
                error!(lock = %self.lock_name, operation = %self.operation, error = %e, "operation failed");
                formatter.print_error(&e, ExitCode::from(&e));
                Ok(ExitCode::from(&e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_positional_arguments() {
        let cli = Cli::try_parse_from(["lockctl", "front-door", "force-unlock"]).unwrap();
        assert_eq!(cli.lock_name, "front-door");
        assert_eq!(cli.operation, Operation::ForceUnlock);
        assert_eq!(cli.output, OutputFormat::Table);
        assert!(cli.config.is_none());
    }

    #[test]
    fn test_parse_flags() {
        let cli = Cli::try_parse_from([
            "lockctl", "--config", "/tmp/l.toml", "--output", "json", "-v", "garage", "status",
        ])
        .unwrap();
        assert_eq!(cli.output, OutputFormat::Json);
        assert!(cli.verbose);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/l.toml")));
    }

    #[test]
    fn test_rejects_unknown_operation() {
        assert!(Cli::try_parse_from(["lockctl", "garage", "open-sesame"]).is_err());
    }
}
