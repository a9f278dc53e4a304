//! Scripted tool runner for testing

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::{ProbeError, ToolOutput, ToolRunner};

#[derive(Debug, Clone)]
enum Scripted {
    Output(ToolOutput),
    Timeout,
}

/// Tool runner answering from a script.
///
/// Responses are keyed by the full command line (`program arg1 arg2`), with a
/// fallback to the bare program name. Unscripted programs behave as missing.
#[derive(Debug, Default)]
pub struct ScriptedTools {
    responses: Mutex<HashMap<String, Scripted>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedTools {
    /// Create a runner where every tool is missing
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&self, command: &str, response: Scripted) {
        self.responses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(command.to_string(), response);
    }

    /// Script a successful run with the given stdout
    pub fn respond(&self, command: &str, stdout: &str) -> &Self {
        self.insert(command, Scripted::Output(ToolOutput::ok(stdout)));
        self
    }

    /// Script a failing run
    pub fn fail(&self, command: &str, code: i32, stderr: &str) -> &Self {
        self.insert(command, Scripted::Output(ToolOutput::failed(code, stderr)));
        self
    }

    /// Script a run that never finishes in time
    pub fn time_out(&self, command: &str) -> &Self {
        self.insert(command, Scripted::Timeout);
        self
    }

    /// Command lines that were run, in order
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl ToolRunner for ScriptedTools {
    async fn run(
        &self,
        program: &str,
        args: &[&str],
        timeout: Duration,
    ) -> Result<ToolOutput, ProbeError> {
        let command = std::iter::once(program)
            .chain(args.iter().copied())
            .collect::<Vec<_>>()
            .join(" ");

        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(command.clone());

        let scripted = {
            let responses = self.responses.lock().unwrap_or_else(|e| e.into_inner());
            responses
                .get(&command)
                .or_else(|| responses.get(program))
                .cloned()
        };

        match scripted {
            Some(Scripted::Output(output)) => Ok(output),
            Some(Scripted::Timeout) => Err(ProbeError::Timeout {
                tool: program.to_string(),
                timeout,
            }),
            None => Err(ProbeError::ToolMissing(program.to_string())),
        }
    }
}
