//! Wire protocol types for parent-worker communication.
//!
//! A worker talks back to the parent over two byte streams: one carries this
//! framed event protocol, the other raw diagnostic text. Which OS pipe
//! carries which is declared by the very first frame on nominal stdout
//! ([`WorkerEvent::Bootstrap`]).

use serde::{Deserialize, Serialize};

/// Which OS pipe carries the framed event stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventChannel {
    UsesStdout,
    UsesStderr,
}

/// The handshake payload: first protocol message a worker must send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootstrapRecord {
    pub event_channel: EventChannel,
    /// Name of the worker's default text encoding, used to decode buffered
    /// diagnostic bytes after the fact.
    pub charset: String,
}

/// Outcome of a single executed test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestStatus {
    Ok,
    Failure,
    Error,
    Ignored,
}

/// Which of the worker's captured streams a chunk of test output came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputSource {
    Stdout,
    Stderr,
}

/// Events decoded from the worker's event pipe.
///
/// Only [`WorkerEvent::Bootstrap`] and [`WorkerEvent::Idle`] are interpreted
/// by the handler; everything else is forwarded to the bus unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerEvent {
    /// Must be the first frame on nominal stdout, always, regardless of the
    /// channel it declares.
    Bootstrap(BootstrapRecord),

    /// Worker finished its current work and is ready for more.
    Idle,

    SuiteStarted {
        suite: String,
    },

    SuiteFinished {
        suite: String,
        elapsed_millis: u64,
    },

    TestStarted {
        suite: String,
        test: String,
    },

    TestFinished {
        suite: String,
        test: String,
        status: TestStatus,
        elapsed_millis: u64,
    },

    /// Output the worker captured from the test under execution.
    Output {
        source: OutputSource,
        data: String,
    },

    /// Worker is about to exit.
    Quit,
}

impl WorkerEvent {
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }
}

/// Messages from parent to worker, written to the worker's stdin pipe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerCommand {
    /// Hand the worker a suite to run.
    Run { suite: String },

    Shutdown,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn bootstrap_serializes() {
        let event = WorkerEvent::Bootstrap(BootstrapRecord {
            event_channel: EventChannel::UsesStderr,
            charset: "UTF-8".to_string(),
        });
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({
                "type": "bootstrap",
                "event_channel": "uses_stderr",
                "charset": "UTF-8",
            })
        );
    }

    #[test]
    fn idle_serializes() {
        assert_eq!(
            serde_json::to_value(WorkerEvent::Idle).unwrap(),
            json!({"type": "idle"})
        );
    }

    #[test]
    fn test_finished_roundtrips() {
        let event = WorkerEvent::TestFinished {
            suite: "core".to_string(),
            test: "parses_empty_input".to_string(),
            status: TestStatus::Failure,
            elapsed_millis: 42,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "test_finished");
        assert_eq!(value["status"], "failure");

        let back: WorkerEvent = serde_json::from_value(value).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn output_event_roundtrips() {
        let event = WorkerEvent::Output {
            source: OutputSource::Stderr,
            data: "warning: deprecated API\n".to_string(),
        };
        let back: WorkerEvent =
            serde_json::from_value(serde_json::to_value(&event).unwrap()).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn run_command_serializes() {
        let command = WorkerCommand::Run {
            suite: "com.example.SmokeTest".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&command).unwrap(),
            json!({"type": "run", "suite": "com.example.SmokeTest"})
        );
    }

    #[test]
    fn unknown_event_type_is_rejected() {
        let result: Result<WorkerEvent, _> =
            serde_json::from_value(json!({"type": "warp_drive_engaged"}));
        assert!(result.is_err());
    }
}
