//! Output formatting for CLI results
//!
//! Three formats:
//! - Table: human-readable (default)
//! - JSON: structured output for scripting
//! - Quiet: nothing printed, exit code only

use std::str::FromStr;

use comfy_table::{presets::UTF8_FULL, Table};
use serde::Serialize;

use crate::run::Report;
use crate::ExitCode;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
    Quiet,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "table" => Ok(Self::Table),
            "json" => Ok(Self::Json),
            "quiet" => Ok(Self::Quiet),
            _ => Err(format!("Unknown output format: {s}")),
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Table => write!(f, "table"),
            Self::Json => write!(f, "json"),
            Self::Quiet => write!(f, "quiet"),
        }
    }
}

/// JSON envelope shared by success and failure output.
#[derive(Serialize)]
pub struct JsonResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code_name: Option<&'static str>,
    /// RFC 3339 timestamp
    pub timestamp: String,
}

impl<T: Serialize> JsonResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            exit_code: None,
            exit_code_name: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

impl JsonResponse<()> {
    pub fn error(message: &str, code: ExitCode) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.to_string()),
            exit_code: Some(code.into()),
            exit_code_name: Some(code.name()),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

pub struct OutputFormatter {
    format: OutputFormat,
    verbose: bool,
}

impl OutputFormatter {
    pub fn new(format: OutputFormat, verbose: bool) -> Self {
        Self { format, verbose }
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    pub fn format_report(&self, report: &Report) -> String {
        match self.format {
            OutputFormat::Table => report_table(report),
            OutputFormat::Json => to_json(&JsonResponse::success(report)),
            OutputFormat::Quiet => String::new(),
        }
    }

    pub fn format_error(&self, error: &dyn std::error::Error, code: ExitCode) -> String {
        match self.format {
            OutputFormat::Table => format!("Error: {error}"),
            OutputFormat::Json => to_json(&JsonResponse::<()>::error(&error.to_string(), code)),
            OutputFormat::Quiet => String::new(),
        }
    }

    pub fn print_report(&self, report: &Report) {
        let rendered = self.format_report(report);
        if !rendered.is_empty() {
            println!("{rendered}");
        }
    }

    pub fn print_error(&self, error: &dyn std::error::Error, code: ExitCode) {
        let rendered = self.format_error(error, code);
        if !rendered.is_empty() {
            eprintln!("{rendered}");
        }
    }

    /// Progress line, verbose table mode only.
    pub fn progress(&self, message: &str) {
        if self.verbose && self.format == OutputFormat::Table {
            eprintln!("... {message}");
        }
    }
}

fn to_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|e| format!("{{\"error\": \"serialization failed: {e}\"}}"))
}

fn report_table(report: &Report) -> String {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["Property", "Value"]);
    table.add_row(vec!["Lock", report.lock.as_str()]);
    table.add_row(vec!["Operation".to_string(), report.operation.to_string()]);
    if let Some(status) = report.status {
        table.add_row(vec!["Status", status.as_str()]);
    }
    if let Some(changed) = report.changed {
        table.add_row(vec!["Changed", if changed { "yes" } else { "no" }]);
    }
    table.add_row(vec!["Message", report.message.as_str()]);
    table.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::Operation;
    use lockctl_core::{LockError, LockStatus};

    fn report() -> Report {
        Report {
            lock: "front-door".to_string(),
            operation: Operation::Lock,
            status: Some(LockStatus::Locked),
            changed: Some(true),
            message: "Locked as requested.".to_string(),
        }
    }

    #[test]
    fn test_output_format_parsing() {
        assert_eq!(OutputFormat::from_str("table").unwrap(), OutputFormat::Table);
        assert_eq!(OutputFormat::from_str("JSON").unwrap(), OutputFormat::Json);
        assert_eq!(OutputFormat::from_str("quiet").unwrap(), OutputFormat::Quiet);
        assert!(OutputFormat::from_str("yaml").is_err());
    }

    #[test]
    fn test_json_report() {
        let rendered = OutputFormatter::new(OutputFormat::Json, false).format_report(&report());
        let value: serde_json::Value = serde_json::from_str(&rendered).unwrap();
        assert_eq!(value["success"], true);
        assert_eq!(value["data"]["status"], "locked");
        assert_eq!(value["data"]["operation"], "lock");
        assert_eq!(value["data"]["changed"], true);
    }

    #[test]
    fn test_json_error_carries_exit_code() {
        let rendered = OutputFormatter::new(OutputFormat::Json, false)
            .format_error(&LockError::Timeout, ExitCode::Timeout);
        let value: serde_json::Value = serde_json::from_str(&rendered).unwrap();
        assert_eq!(value["success"], false);
        assert_eq!(value["exit_code"], 3);
        assert_eq!(value["exit_code_name"], "TIMEOUT");
    }

    #[test]
    fn test_table_and_quiet() {
        let table = OutputFormatter::new(OutputFormat::Table, false).format_report(&report());
        assert!(table.contains("front-door"));
        assert!(table.contains("Locked as requested."));
        assert!(OutputFormatter::new(OutputFormat::Quiet, false)
            .format_report(&report())
            .is_empty());
    }
}
