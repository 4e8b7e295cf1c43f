//! Stages that shell out to external tools.
//!
//! Package managers, `git archive`, `tar` and friends are invoked, never
//! reimplemented. Success is decided by the exit status alone.

use super::Stage;
use crate::context::StageContext;
use crate::core::StageOutput;
use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// Maximum number of captured output bytes kept on a stage outcome.
pub const OUTPUT_TAIL_BYTES: usize = 4096;

/// A stage that runs an external command inside the workspace.
///
/// The child process is killed if the stage is cancelled. The command sees
/// `SHIPYARD_WORKSPACE`, `SHIPYARD_SOURCE`, `SHIPYARD_RUN_ID` and
/// `SHIPYARD_STAGE` in its environment.
#[derive(Debug, Clone)]
pub struct CommandStage {
    name: String,
    program: String,
    args: Vec<String>,
    env: Vec<(String, String)>,
}

impl CommandStage {
    /// Creates a stage running `script` through `sh -c`.
    #[must_use]
    pub fn shell(name: impl Into<String>, script: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            program: "sh".to_string(),
            args: vec!["-c".to_string(), script.into()],
            env: Vec::new(),
        }
    }

    /// Creates a stage running `program` with `args`, without a shell.
    #[must_use]
    pub fn exec(
        name: impl Into<String>,
        program: impl Into<String>,
        args: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            env: Vec::new(),
        }
    }

    /// Adds an environment variable for the child process.
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Returns the command line for display.
    #[must_use]
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[async_trait]
impl Stage for CommandStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, ctx: &StageContext) -> StageOutput {
        debug!(stage = ctx.stage_id(), command = %self.command_line(), "Running command");

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .current_dir(ctx.workspace())
            .env("SHIPYARD_WORKSPACE", ctx.workspace())
            .env("SHIPYARD_SOURCE", ctx.source_dir())
            .env("SHIPYARD_RUN_ID", ctx.run().run_id.to_string())
            .env("SHIPYARD_STAGE", ctx.stage_id())
            .envs(self.env.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match cmd.output().await {
            Ok(output) => output,
            Err(e) => return StageOutput::fail(format!("failed to spawn '{}': {e}", self.program)),
        };

        let mut captured = String::from_utf8_lossy(&output.stdout).into_owned();
        captured.push_str(&String::from_utf8_lossy(&output.stderr));
        let captured = tail(captured.trim_end(), OUTPUT_TAIL_BYTES);

        if output.status.success() {
            StageOutput::ok().with_output(captured)
        } else {
            let status = output
                .status
                .code()
                .map_or_else(|| "terminated by signal".to_string(), |c| format!("exit code {c}"));
            StageOutput::fail(format!("'{}' failed with {status}", self.command_line()))
                .with_output(captured)
        }
    }
}

/// Returns at most the last `max` bytes of `text`, cut on a char boundary.
fn tail(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut start = text.len() - max;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    text[start..].to_string()
}
