use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use log::trace;
use tokio::process::Command;

use crate::error::{PipelineError, PipelineResult};

/// A single external program invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub timeout: Option<Duration>,
}

impl CommandSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            timeout: None,
        }
    }

    pub fn arg(&mut self, arg: impl Into<String>) -> &mut Self {
        self.args.push(arg.into());
        self
    }

    pub fn args(&mut self, iter: impl IntoIterator<Item = impl Into<String>>) -> &mut Self {
        self.args.extend(iter.into_iter().map(Into::into));
        self
    }

    pub fn path_arg(&mut self, path: &Path) -> &mut Self {
        self.args.push(path.to_string_lossy().into_owned());
        self
    }

    pub fn timeout(&mut self, timeout: Option<Duration>) -> &mut Self {
        self.timeout = timeout;
        self
    }

    /// Short program name used in logs and errors.
    pub fn tool_name(&self) -> String {
        self.program
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.program.to_string_lossy().into_owned())
    }

    /// Runs this command through `nice -n <priority>` when a priority hint is
    /// given. Returns the spec unchanged on platforms without `nice`.
    pub fn with_priority(self, priority: Option<u8>) -> Self {
        let Some(priority) = priority else {
            return self;
        };
        if cfg!(unix) {
            let mut args = vec![
                "-n".to_string(),
                priority.min(19).to_string(),
                self.program.to_string_lossy().into_owned(),
            ];
            args.extend(self.args);
            CommandSpec {
                program: PathBuf::from("nice"),
                args,
                timeout: self.timeout,
            }
        } else {
            log::warn!(
                "Process priority hint {} ignored: not supported on this platform",
                priority
            );
            self
        }
    }
}

/// Captured result of a finished process.
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    /// Exit code, `None` when the process was terminated by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Narrow seam over process execution so the encoder and prober can be
/// scripted in tests.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Runs the command to completion. A nonzero exit is NOT an error here;
    /// only spawn failures and timeouts are.
    async fn run(&self, spec: &CommandSpec) -> PipelineResult<CommandOutput>;
}

/// Runs commands as real child processes.
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner;

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, spec: &CommandSpec) -> PipelineResult<CommandOutput> {
        let tool = spec.tool_name();
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        trace!("Executing {} command: {:?}", tool, cmd);

        let child = cmd
            .spawn()
            .map_err(|e| PipelineError::tool(&tool, format!("failed to spawn: {}", e)))?;

        let output = match spec.timeout {
            Some(limit) => tokio::time::timeout(limit, child.wait_with_output())
                .await
                .map_err(|_| PipelineError::tool(&tool, format!("timed out after {:?}", limit)))?,
            None => child.wait_with_output().await,
        }
        .map_err(|e| PipelineError::tool(&tool, format!("I/O error waiting for process: {}", e)))?;

        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_wraps_command_in_nice() {
        let mut spec = CommandSpec::new("ffmpeg");
        spec.args(["-y", "-i", "in.mp4"]);
        let wrapped = spec.clone().with_priority(Some(10));
        if cfg!(unix) {
            assert_eq!(wrapped.program, PathBuf::from("nice"));
            assert_eq!(wrapped.args[..3], ["-n", "10", "ffmpeg"]);
            assert_eq!(wrapped.args[3..], spec.args[..]);
        } else {
            assert_eq!(wrapped, spec);
        }
    }

    #[test]
    fn priority_is_clamped_to_nineteen() {
        let wrapped = CommandSpec::new("ffmpeg").with_priority(Some(40));
        if cfg!(unix) {
            assert_eq!(wrapped.args[1], "19");
        }
    }

    #[test]
    fn no_priority_leaves_spec_untouched() {
        let spec = CommandSpec::new("/usr/bin/ffprobe");
        assert_eq!(spec.clone().with_priority(None), spec);
        assert_eq!(spec.tool_name(), "ffprobe");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn nonzero_exit_is_reported_not_raised() {
        let mut spec = CommandSpec::new("sh");
        spec.args(["-c", "echo oops >&2; exit 3"]);
        let output = ProcessRunner.run(&spec).await.unwrap();
        assert_eq!(output.code, Some(3));
        assert!(!output.success());
        assert!(output.stderr.contains("oops"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn timeout_is_an_error() {
        let mut spec = CommandSpec::new("sleep");
        spec.arg("5").timeout(Some(Duration::from_millis(50)));
        let err = ProcessRunner.run(&spec).await.unwrap_err();
        assert!(matches!(err, PipelineError::ExternalTool { .. }));
    }

    #[tokio::test]
    async fn missing_binary_fails_to_spawn() {
        let spec = CommandSpec::new("definitely_not_a_real_tool_4711");
        assert!(ProcessRunner.run(&spec).await.is_err());
    }
}
