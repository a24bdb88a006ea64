pub mod config;
pub mod doctor;
pub mod migrate;
pub mod seed;
pub mod smoke;

use serde::Serialize;
use signoff_core::config::{AppConfig, LoadOptions};
use tokio::runtime::Runtime;

/// Outcome class of an operator command. Each class maps to one process exit
/// code so scripts can branch without parsing output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitClass {
    Success,
    ConfigValidation,
    RuntimeInit,
    DbConnectivity,
    Migration,
    SeedExecution,
    SeedVerification,
    SmokeFailed,
    DoctorFailed,
}

impl ExitClass {
    pub fn code(self) -> u8 {
        match self {
            Self::Success => 0,
            Self::ConfigValidation => 2,
            Self::RuntimeInit => 3,
            Self::DbConnectivity => 4,
            Self::Migration | Self::SeedExecution => 5,
            Self::SeedVerification | Self::SmokeFailed => 6,
            Self::DoctorFailed => 7,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "ok",
            Self::ConfigValidation => "config_validation",
            Self::RuntimeInit => "runtime_init",
            Self::DbConnectivity => "db_connectivity",
            Self::Migration => "migration",
            Self::SeedExecution => "seed_execution",
            Self::SeedVerification => "seed_verification",
            Self::SmokeFailed => "smoke",
            Self::DoctorFailed => "doctor",
        }
    }
}

/// A classified command failure carried through `?` inside a command body.
#[derive(Debug)]
pub struct CommandFailure {
    pub class: ExitClass,
    pub message: String,
}

impl CommandFailure {
    pub fn new(class: ExitClass, error: impl ToString) -> Self {
        Self { class, message: error.to_string() }
    }
}

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit: ExitClass,
    pub output: String,
}

#[derive(Debug, Serialize)]
struct CommandOutcome<'a> {
    command: &'a str,
    status: &'static str,
    error_class: Option<&'static str>,
    message: String,
}

impl CommandResult {
    pub fn success(command: &str, message: impl Into<String>) -> Self {
        let payload =
            CommandOutcome { command, status: "ok", error_class: None, message: message.into() };
        Self { exit: ExitClass::Success, output: serialize_payload(&payload) }
    }

    pub fn failure(command: &str, failure: CommandFailure) -> Self {
        let payload = CommandOutcome {
            command,
            status: "error",
            error_class: Some(failure.class.as_str()),
            message: failure.message,
        };
        Self { exit: failure.class, output: serialize_payload(&payload) }
    }

    /// Wraps pre-rendered report output; `failed` picks `class` over success.
    pub fn report(failed: bool, class: ExitClass, output: String) -> Self {
        Self { exit: if failed { class } else { ExitClass::Success }, output }
    }

    pub fn exit_code(&self) -> u8 {
        self.exit.code()
    }
}

/// Loads configuration and a current-thread runtime, the common preamble of
/// the database commands.
pub(crate) fn prepare(command: &str) -> Result<(AppConfig, Runtime), CommandResult> {
    let config = AppConfig::load(LoadOptions::default()).map_err(|error| {
        CommandResult::failure(
            command,
            CommandFailure::new(
                ExitClass::ConfigValidation,
                format!("configuration issue: {error}"),
            ),
        )
    })?;
    let runtime =
        tokio::runtime::Builder::new_current_thread().enable_all().build().map_err(|error| {
            CommandResult::failure(
                command,
                CommandFailure::new(
                    ExitClass::RuntimeInit,
                    format!("failed to initialize async runtime: {error}"),
                ),
            )
        })?;
    Ok((config, runtime))
}

fn serialize_payload(payload: &CommandOutcome<'_>) -> String {
    serde_json::to_string(payload).unwrap_or_else(|error| {
        format!(
            "{{\"command\":\"{}\",\"status\":\"error\",\"error_class\":\"serialization\",\"message\":\"{}\"}}",
            payload.command,
            error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
        )
    })
}

#[cfg(test)]
mod tests {
    use super::{CommandFailure, CommandResult, ExitClass};

    #[test]
    fn failure_payload_carries_the_class_name_and_code() {
        let result = CommandResult::failure(
            "migrate",
            CommandFailure::new(ExitClass::DbConnectivity, "connection refused"),
        );
        assert_eq!(result.exit_code(), 4);

        let payload: serde_json::Value = serde_json::from_str(&result.output).expect("json");
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "db_connectivity");
        assert_eq!(payload["message"], "connection refused");
    }

    #[test]
    fn reports_only_take_the_failure_class_when_failed() {
        let passed = CommandResult::report(false, ExitClass::SmokeFailed, String::new());
        let failed = CommandResult::report(true, ExitClass::DoctorFailed, String::new());
        assert_eq!((passed.exit, passed.exit_code()), (ExitClass::Success, 0));
        assert_eq!((failed.exit, failed.exit_code()), (ExitClass::DoctorFailed, 7));
    }
}
