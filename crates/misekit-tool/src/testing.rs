use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use misekit_core::{ProcessOutput, ProcessRunner, ProcessSpec, RunError};

#[derive(Debug, Clone)]
pub(crate) enum Reply {
    Output(ProcessOutput),
    NotFound,
    TimedOut,
}

struct Rule {
    needle: String,
    reply: Reply,
}

/// Answers process launches from canned replies matched against the command
/// line. Unmatched launches behave like a missing program.
#[derive(Default)]
pub(crate) struct ScriptedRunner {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<ProcessSpec>>,
    delay: Option<Duration>,
    launches: AtomicUsize,
}

impl ScriptedRunner {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub(crate) fn on(&self, needle: &str, reply: Reply) -> &Self {
        self.rules
            .lock()
            .expect("rules lock")
            .push(Rule {
                needle: needle.to_string(),
                reply,
            });
        self
    }

    pub(crate) fn stdout(&self, needle: &str, stdout: &str) -> &Self {
        self.on(needle, Reply::Output(ProcessOutput::success(stdout)))
    }

    pub(crate) fn calls(&self) -> Vec<ProcessSpec> {
        self.calls.lock().expect("calls lock").clone()
    }

    pub(crate) fn count(&self, needle: &str) -> usize {
        self.calls()
            .iter()
            .filter(|spec| spec.command_line().contains(needle))
            .count()
    }

    pub(crate) fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProcessRunner for ScriptedRunner {
    async fn run(&self, spec: &ProcessSpec) -> Result<ProcessOutput, RunError> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        self.calls.lock().expect("calls lock").push(spec.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let command_line = spec.command_line();
        let reply = self
            .rules
            .lock()
            .expect("rules lock")
            .iter()
            .find(|rule| command_line.contains(&rule.needle))
            .map(|rule| rule.reply.clone());

        match reply {
            Some(Reply::Output(output)) => Ok(output),
            Some(Reply::TimedOut) => Err(RunError::TimedOut {
                timeout: spec.timeout,
            }),
            Some(Reply::NotFound) | None => Err(RunError::Launch {
                program: spec.program.clone(),
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            }),
        }
    }
}
