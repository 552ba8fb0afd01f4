//! Test doubles for the transport boundary
//!
//! [`MockTransport`] plays back scripted responses in order and records every
//! command and upload it receives. When the script runs out, commands succeed
//! with no output.

use crate::context::{CaptureSink, Context, NullSink};
use crate::transport::{ExecStreams, RunningCommand, Transport, TransportError};
use std::collections::VecDeque;
use std::io::Write;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Outcome {
    Success,
    Exit(i32),
    ConnectionLost(String),
    StartFailure(String),
}

/// Scripted result for one command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockResponse {
    output: String,
    outcome: Outcome,
}

impl MockResponse {
    /// Exit 0 after printing `output`
    pub fn output(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            outcome: Outcome::Success,
        }
    }

    /// Exit with `code` after printing `output`
    pub fn exit(code: i32, output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            outcome: Outcome::Exit(code),
        }
    }

    /// The command starts but the connection drops before it finishes
    pub fn connection_lost(reason: impl Into<String>) -> Self {
        Self {
            output: String::new(),
            outcome: Outcome::ConnectionLost(reason.into()),
        }
    }

    /// The command cannot be started at all
    pub fn start_failure(reason: impl Into<String>) -> Self {
        Self {
            output: String::new(),
            outcome: Outcome::StartFailure(reason.into()),
        }
    }
}

/// A recorded upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockUpload {
    pub path: String,
    pub contents: Vec<u8>,
}

#[derive(Debug, Default)]
struct MockState {
    responses: VecDeque<MockResponse>,
    commands: Vec<String>,
    uploads: Vec<MockUpload>,
}

/// Scripted in-memory transport
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the response for the next command
    pub fn push_response(&self, response: MockResponse) {
        self.lock().responses.push_back(response);
    }

    /// Commands received so far, exactly as the engine sent them
    pub fn commands(&self) -> Vec<String> {
        self.lock().commands.clone()
    }

    pub fn uploads(&self) -> Vec<MockUpload> {
        self.lock().uploads.clone()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

struct MockRunning {
    outcome: Outcome,
}

impl RunningCommand for MockRunning {
    fn wait(self: Box<Self>) -> Result<(), TransportError> {
        match self.outcome {
            Outcome::Success => Ok(()),
            Outcome::Exit(code) => Err(TransportError::Exit { code }),
            Outcome::ConnectionLost(reason) | Outcome::StartFailure(reason) => {
                Err(TransportError::Connection(reason))
            }
        }
    }
}

impl Transport for MockTransport {
    fn start(
        &self,
        command: &str,
        streams: ExecStreams,
    ) -> Result<Box<dyn RunningCommand>, TransportError> {
        let response = {
            let mut state = self.lock();
            state.commands.push(command.to_string());
            state
                .responses
                .pop_front()
                .unwrap_or_else(|| MockResponse::output(""))
        };

        if let Outcome::StartFailure(reason) = response.outcome {
            return Err(TransportError::Connection(reason));
        }

        let mut stdout = streams.stdout;
        stdout.write_all(response.output.as_bytes())?;
        Ok(Box::new(MockRunning {
            outcome: response.outcome,
        }))
    }

    fn upload(&self, remote_path: &str, contents: &[u8]) -> Result<(), TransportError> {
        self.lock().uploads.push(MockUpload {
            path: remote_path.to_string(),
            contents: contents.to_vec(),
        });
        Ok(())
    }
}

/// A context over `transport` with silenced user output.
///
/// Returns the sink receiving command output.
pub fn test_context(transport: MockTransport) -> (Context, CaptureSink) {
    let output = CaptureSink::new();
    let ctx = Context::new(Arc::new(transport))
        .with_user_output(Arc::new(NullSink))
        .with_exec_output(Arc::new(output.clone()));
    (ctx, output)
}
