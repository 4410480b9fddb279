//! Isolated-environment runtime abstraction.
//!
//! Every work-unit execution happens inside a disposable environment (a
//! container) managed by an external runtime. [`SandboxRuntime`] is the seam
//! the rest of the crate talks through; [`DockerRuntime`] is the production
//! implementation, shelling out to the docker CLI. Tests substitute an
//! in-memory scripted runtime.
//!
//! Runtime calls are treated as blocking-but-fast commands against an
//! external system; a runtime error anywhere in the orchestration core means
//! the substrate is unavailable and the batch cannot make progress.

use std::path::Path;
use std::process::Output;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

/// Errors from the isolated-environment runtime.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// The runtime binary itself could not be invoked.
    #[error("failed to invoke container runtime: {0}")]
    Spawn(#[source] std::io::Error),

    /// A runtime command ran but reported failure.
    #[error("container runtime command failed (exit {exit_code}): {stderr}")]
    CommandFailed { exit_code: i32, stderr: String },

    /// Reading an extracted file back from local staging failed.
    #[error("failed to read extracted artifact: {0}")]
    Staging(#[source] std::io::Error),
}

/// Captured result of a run-to-completion command.
#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    /// Whether the command exited zero.
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Commands the orchestration core issues against the environment runtime.
///
/// One environment runs one work-unit invocation and is torn down after its
/// outcome is captured. Implementations must be safe to share across tasks.
#[async_trait]
pub trait SandboxRuntime: Send + Sync {
    /// Run a throwaway instance of `image` to completion and capture its
    /// output. Used by catalog discovery; the instance is discarded
    /// afterwards.
    async fn run_to_completion(
        &self,
        image: &str,
        args: &[String],
    ) -> Result<ExecOutput, RuntimeError>;

    /// Start a detached instance of `image` and return its execution-context
    /// id.
    async fn launch(&self, image: &str, args: &[String]) -> Result<String, RuntimeError>;

    /// Whether the given execution context is still running.
    async fn is_running(&self, context: &str) -> Result<bool, RuntimeError>;

    /// Forcibly terminate the given execution context.
    async fn kill(&self, context: &str) -> Result<(), RuntimeError>;

    /// Captured standard output of the given execution context.
    async fn stdout(&self, context: &str) -> Result<String, RuntimeError>;

    /// Read one file out of the execution context's filesystem.
    async fn read_file(&self, context: &str, path: &str) -> Result<Vec<u8>, RuntimeError>;

    /// Tear the execution context down, releasing its resources.
    async fn remove(&self, context: &str) -> Result<(), RuntimeError>;
}

/// [`SandboxRuntime`] backed by the docker CLI.
#[derive(Debug, Clone)]
pub struct DockerRuntime {
    binary: String,
}

impl DockerRuntime {
    /// Runtime using `docker` from `PATH`.
    pub fn new() -> Self {
        Self::with_binary("docker")
    }

    /// Runtime using an explicit docker-compatible binary (e.g. `podman`).
    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    async fn run_command(&self, args: &[&str]) -> Result<Output, RuntimeError> {
        debug!(binary = %self.binary, ?args, "running container runtime command");
        Command::new(&self.binary)
            .args(args)
            .output()
            .await
            .map_err(RuntimeError::Spawn)
    }

    /// Run a command and fail unless it exits zero.
    async fn run_checked(&self, args: &[&str]) -> Result<Output, RuntimeError> {
        let output = self.run_command(args).await?;
        if !output.status.success() {
            return Err(RuntimeError::CommandFailed {
                exit_code: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        Ok(output)
    }
}

impl Default for DockerRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SandboxRuntime for DockerRuntime {
    async fn run_to_completion(
        &self,
        image: &str,
        args: &[String],
    ) -> Result<ExecOutput, RuntimeError> {
        let mut argv = vec!["run", "--rm", image];
        argv.extend(args.iter().map(String::as_str));
        let output = self.run_command(&argv).await?;
        Ok(ExecOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    async fn launch(&self, image: &str, args: &[String]) -> Result<String, RuntimeError> {
        let mut argv = vec!["run", "--detach", image];
        argv.extend(args.iter().map(String::as_str));
        let output = self.run_checked(&argv).await?;
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    async fn is_running(&self, context: &str) -> Result<bool, RuntimeError> {
        let output = self
            .run_checked(&["inspect", "--format", "{{.State.Running}}", context])
            .await?;
        Ok(String::from_utf8_lossy(&output.stdout).trim() == "true")
    }

    async fn kill(&self, context: &str) -> Result<(), RuntimeError> {
        self.run_checked(&["kill", context]).await?;
        Ok(())
    }

    async fn stdout(&self, context: &str) -> Result<String, RuntimeError> {
        let output = self.run_checked(&["logs", context]).await?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn read_file(&self, context: &str, path: &str) -> Result<Vec<u8>, RuntimeError> {
        // `docker cp` only writes to a local path, so stage through a
        // temporary directory and inline the bytes for the caller.
        let staging = tempfile::tempdir().map_err(RuntimeError::Staging)?;
        let dest = staging.path().join("artifact");
        let source = format!("{context}:{path}");
        let dest_str = dest.to_string_lossy().into_owned();
        self.run_checked(&["cp", &source, &dest_str]).await?;
        read_staged(&dest).await
    }

    async fn remove(&self, context: &str) -> Result<(), RuntimeError> {
        self.run_checked(&["rm", "--force", context]).await?;
        Ok(())
    }
}

async fn read_staged(path: &Path) -> Result<Vec<u8>, RuntimeError> {
    tokio::fs::read(path).await.map_err(RuntimeError::Staging)
}
