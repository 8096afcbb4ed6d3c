//! Single-flight code execution with the latest result kept per project.

use crate::api::{ApiError, CollabApi, ExecuteRequest};
use collab_proto::ExecutionRecord;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("an execution is already running")]
    Busy,
    #[error("no file is open")]
    NothingToRun,
    #[error(transparent)]
    Api(#[from] ApiError),
}

impl ExecutionError {
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ExecutionError::Api(err) if err.is_unauthorized())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStatus {
    Completed,
    Error,
}

/// Sandbox output with each failure channel kept apart.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionResult {
    pub status: ExecutionStatus,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    pub compile_output: Option<String>,
    /// Failure outside the program itself (sandbox or transport).
    pub system_error: Option<String>,
    pub execution_time_ms: Option<f64>,
    pub memory_used_bytes: Option<u64>,
    pub local: bool,
    pub mock: bool,
}

impl ExecutionResult {
    pub fn system_error(message: impl Into<String>) -> Self {
        Self {
            status: ExecutionStatus::Error,
            stdout: None,
            stderr: None,
            compile_output: None,
            system_error: Some(message.into()),
            execution_time_ms: None,
            memory_used_bytes: None,
            local: false,
            mock: false,
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|text| !text.is_empty())
}

impl From<ExecutionRecord> for ExecutionResult {
    fn from(record: ExecutionRecord) -> Self {
        let status = match record.status.to_ascii_lowercase().as_str() {
            "completed" | "success" | "accepted" => ExecutionStatus::Completed,
            _ => ExecutionStatus::Error,
        };
        let output = record.output;
        Self {
            status,
            stdout: non_empty(output.stdout),
            stderr: non_empty(output.stderr),
            compile_output: non_empty(output.compile_output),
            system_error: non_empty(output.error),
            execution_time_ms: record.execution_time,
            memory_used_bytes: record.memory_used,
            local: record.local,
            mock: record.mock,
        }
    }
}

/// Identifies one run so a late REST answer cannot settle a newer run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunTicket(u64);

#[derive(Debug, Default)]
pub struct ExecutionCycle {
    pending: Option<RunTicket>,
    issued: u64,
    latest: Option<ExecutionResult>,
}

impl ExecutionCycle {
    pub fn is_busy(&self) -> bool {
        self.pending.is_some()
    }

    pub fn latest(&self) -> Option<&ExecutionResult> {
        self.latest.as_ref()
    }

    /// Claims the single execution slot.
    pub fn begin(&mut self) -> Result<RunTicket, ExecutionError> {
        if self.pending.is_some() {
            return Err(ExecutionError::Busy);
        }
        self.issued += 1;
        let ticket = RunTicket(self.issued);
        self.pending = Some(ticket);
        self.latest = None;
        Ok(ticket)
    }

    /// Settles the run from the REST answer. Ignored when the run was
    /// already settled by the socket.
    pub fn finish(
        &mut self,
        ticket: RunTicket,
        outcome: Result<ExecutionRecord, &ApiError>,
    ) -> bool {
        if self.pending != Some(ticket) {
            debug!(target: "codecollab::exec", "late execution response ignored");
            return false;
        }
        let result = match outcome {
            Ok(record) => record.into(),
            Err(err) => {
                warn!(target: "codecollab::exec", error = %err, "execution request failed");
                ExecutionResult::system_error(err.user_message())
            }
        };
        self.settle(result);
        true
    }

    /// Settles whatever run is pending from an `execution_complete` push.
    pub fn complete_from_socket(&mut self, record: ExecutionRecord) -> bool {
        if self.pending.is_none() {
            debug!(target: "codecollab::exec", "execution_complete with nothing pending");
            return false;
        }
        self.settle(record.into());
        true
    }

    pub fn reset(&mut self) {
        self.pending = None;
        self.latest = None;
    }

    /// Begins a run, waits for the REST answer and settles it.
    pub async fn run(
        &mut self,
        api: &dyn CollabApi,
        request: &ExecuteRequest,
    ) -> Result<&ExecutionResult, ExecutionError> {
        let ticket = self.begin()?;
        info!(target: "codecollab::exec", language = %request.language, "running");
        match api.execute(request).await {
            Ok(record) => {
                self.finish(ticket, Ok(record));
            }
            Err(err) => {
                self.finish(ticket, Err(&err));
                return Err(err.into());
            }
        }
        self.latest
            .as_ref()
            .ok_or_else(|| ExecutionError::Api(ApiError::InvalidResponse("no result".into())))
    }

    fn settle(&mut self, result: ExecutionResult) {
        debug!(target: "codecollab::exec", status = ?result.status, "execution settled");
        self.pending = None;
        self.latest = Some(result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::mock::{MockApi, MockFailure};
    use collab_proto::ExecutionOutputRecord;

    fn record(status: &str, stdout: &str, compile: &str) -> ExecutionRecord {
        ExecutionRecord {
            status: status.into(),
            output: ExecutionOutputRecord {
                stdout: Some(stdout.into()),
                stderr: Some(String::new()),
                compile_output: Some(compile.into()),
                error: None,
            },
            execution_time: Some(12.5),
            memory_used: Some(2048),
            local: true,
            mock: false,
        }
    }

    fn request() -> ExecuteRequest {
        ExecuteRequest {
            code: "print(1)".into(),
            language: "python".into(),
            input: "".into(),
            project_id: None,
            file_id: None,
        }
    }

    #[test_timeout::timeout]
    fn second_run_is_rejected_while_busy() {
        let mut cycle = ExecutionCycle::default();
        let ticket = cycle.begin().unwrap();
        assert!(matches!(cycle.begin(), Err(ExecutionError::Busy)));
        assert!(cycle.finish(ticket, Ok(record("completed", "1\n", ""))));
        assert!(!cycle.is_busy());
        assert!(cycle.begin().is_ok());
    }

    #[test_timeout::timeout]
    fn socket_completion_wins_and_late_rest_is_ignored() {
        let mut cycle = ExecutionCycle::default();
        let ticket = cycle.begin().unwrap();
        assert!(cycle.complete_from_socket(record("error", "", "syntax error")));
        assert!(!cycle.finish(ticket, Ok(record("completed", "x", ""))));

        let latest = cycle.latest().unwrap();
        assert_eq!(latest.status, ExecutionStatus::Error);
        assert_eq!(latest.compile_output.as_deref(), Some("syntax error"));
        assert_eq!(latest.stderr, None);
        assert!(!cycle.complete_from_socket(record("completed", "", "")));
    }

    #[test_timeout::timeout]
    fn flags_and_metrics_carry_over() {
        let result = ExecutionResult::from(record("completed", "ok", ""));
        assert_eq!(result.status, ExecutionStatus::Completed);
        assert_eq!(result.stdout.as_deref(), Some("ok"));
        assert_eq!(result.execution_time_ms, Some(12.5));
        assert_eq!(result.memory_used_bytes, Some(2048));
        assert!(result.local);
        assert!(!result.mock);
    }

    #[test_timeout::tokio_timeout_test]
    async fn rest_failure_becomes_system_error() {
        let api = MockApi::new();
        api.fail_next("execute", MockFailure::Status(503, "sandbox offline"));
        let mut cycle = ExecutionCycle::default();
        assert!(cycle.run(&api, &request()).await.is_err());
        assert!(!cycle.is_busy());
        let latest = cycle.latest().unwrap();
        assert_eq!(latest.status, ExecutionStatus::Error);
        assert_eq!(latest.system_error.as_deref(), Some("sandbox offline"));
    }

    #[test_timeout::tokio_timeout_test]
    async fn run_stores_the_latest_result() {
        let api = MockApi::new();
        api.set_execution(record("completed", "1\n", ""));
        let mut cycle = ExecutionCycle::default();
        let result = cycle.run(&api, &request()).await.unwrap();
        assert_eq!(result.stdout.as_deref(), Some("1\n"));
    }
}
