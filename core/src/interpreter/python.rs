use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::task::JoinHandle;

use super::protocol::{HostRequest, WorkerMessage};
use super::{Interpreter, InterpreterFactory, InterpreterSignal};
use crate::config::InterpreterConfig;
use crate::error::InterpreterError;
use crate::job::JobId;
use crate::relay::RawWrite;

/// Python source run inside every interpreter process.
pub const BOOTSTRAP: &str = include_str!("bootstrap.py");

const TERMINATE_GRACE: Duration = Duration::from_secs(2);

/// Spawns `python3` child processes running [`BOOTSTRAP`].
pub struct PythonInterpreterFactory {
    cfg: InterpreterConfig,
}

impl PythonInterpreterFactory {
    pub fn new(cfg: InterpreterConfig) -> Self {
        Self { cfg }
    }

    fn resolve_program(&self) -> Result<PathBuf, InterpreterError> {
        let expanded = shellexpand::tilde(&self.cfg.python_bin).to_string();
        which::which(&expanded).map_err(|e| InterpreterError::Spawn {
            program: expanded.clone(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, e.to_string()),
        })
    }

    fn command(&self, program: &Path) -> Command {
        let mut cmd = Command::new(program);
        if self.cfg.isolated {
            cmd.arg("-I");
            cmd.env_clear();
        }
        cmd.arg("-u").arg("-c").arg(BOOTSTRAP);
        cmd.env("PYTHONIOENCODING", "utf-8")
            .env("PYTHONDONTWRITEBYTECODE", "1");
        for (k, v) in &self.cfg.env {
            cmd.env(k, v);
        }
        let workdir = match &self.cfg.workdir {
            Some(dir) => PathBuf::from(shellexpand::tilde(dir).to_string()),
            None => std::env::temp_dir(),
        };
        cmd.current_dir(workdir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl InterpreterFactory for PythonInterpreterFactory {
    fn name(&self) -> &str {
        "python"
    }

    async fn create(&self) -> Result<Box<dyn Interpreter>, InterpreterError> {
        let program = self.resolve_program()?;
        let mut child = self
            .command(&program)
            .spawn()
            .map_err(|source| InterpreterError::Spawn {
                program: program.display().to_string(),
                source,
            })?;
        let pid = child.id();

        let (Some(stdin), Some(stdout), Some(stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            let _ = child.start_kill();
            return Err(InterpreterError::InitFailed(
                "interpreter stdio was not captured".into(),
            ));
        };

        let stderr_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                tracing::debug!(target: "codebox.interpreter", pid = ?pid, line = %line, "interpreter stderr");
            }
        });

        let mut interpreter = PythonInterpreter {
            child,
            stdin,
            stdout: BufReader::new(stdout).lines(),
            stderr_task,
            pid,
        };

        let init_timeout = Duration::from_millis(self.cfg.init_timeout_ms);
        match tokio::time::timeout(init_timeout, interpreter.wait_ready()).await {
            Ok(Ok(())) => {
                tracing::info!(
                    target: "codebox.interpreter",
                    pid = ?pid,
                    program = %program.display(),
                    "python interpreter ready"
                );
                Ok(Box::new(interpreter))
            }
            Ok(Err(e)) => {
                interpreter.terminate().await;
                Err(e)
            }
            Err(_) => {
                interpreter.terminate().await;
                Err(InterpreterError::InitTimeout(self.cfg.init_timeout_ms))
            }
        }
    }
}

pub struct PythonInterpreter {
    child: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
    stderr_task: JoinHandle<()>,
    pid: Option<u32>,
}

impl PythonInterpreter {
    async fn wait_ready(&mut self) -> Result<(), InterpreterError> {
        loop {
            let line = self
                .stdout
                .next_line()
                .await
                .map_err(|source| InterpreterError::Transport {
                    stage: "waiting for ready",
                    source,
                })?;
            let Some(line) = line else {
                let status = self.child.try_wait().ok().flatten();
                return Err(InterpreterError::InitFailed(format!(
                    "interpreter exited before becoming ready (status: {status:?})"
                )));
            };
            match serde_json::from_str::<WorkerMessage>(&line) {
                Ok(WorkerMessage::Ready) => return Ok(()),
                Ok(other) => {
                    tracing::debug!(target: "codebox.interpreter", message = ?other, "ignoring message before ready");
                }
                Err(e) => {
                    tracing::warn!(target: "codebox.interpreter", error = %e, line = %line, "unparseable line before ready");
                }
            }
        }
    }
}

#[async_trait]
impl Interpreter for PythonInterpreter {
    fn name(&self) -> &str {
        "python"
    }

    async fn execute(&mut self, job_id: &JobId, source: &str) -> Result<(), InterpreterError> {
        let line = HostRequest::Execute {
            id: job_id.as_str(),
            code: source,
        }
        .to_line()?;
        self.stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|source| InterpreterError::Transport {
                stage: "sending job",
                source,
            })?;
        self.stdin
            .flush()
            .await
            .map_err(|source| InterpreterError::Transport {
                stage: "sending job",
                source,
            })
    }

    async fn next_signal(&mut self) -> Result<InterpreterSignal, InterpreterError> {
        loop {
            let line = self
                .stdout
                .next_line()
                .await
                .map_err(|source| InterpreterError::Transport {
                    stage: "reading output",
                    source,
                })?
                .ok_or_else(|| InterpreterError::closed("reading output"))?;

            // Only the bootstrap writes to the protocol channel, so a line that
            // does not parse means the channel can no longer be trusted.
            let message = serde_json::from_str::<WorkerMessage>(&line).map_err(|e| {
                tracing::warn!(target: "codebox.interpreter", error = %e, pid = ?self.pid, "unparseable protocol line");
                InterpreterError::Protocol(e)
            })?;

            match message {
                WorkerMessage::Ready => continue,
                WorkerMessage::Write { id, stream, text } => {
                    return Ok(InterpreterSignal::Write(RawWrite {
                        job_id: id.map(JobId::from),
                        stream,
                        text,
                    }));
                }
                WorkerMessage::Error { id: Some(id), message } => {
                    return Ok(InterpreterSignal::Fault {
                        job_id: JobId::from(id),
                        raw_message: message,
                    });
                }
                WorkerMessage::Error { id: None, message } => {
                    tracing::warn!(target: "codebox.interpreter", message = %message, "error without job id");
                }
                WorkerMessage::Done { id, elapsed_ms } => {
                    return Ok(InterpreterSignal::Completed {
                        job_id: JobId::from(id),
                        reported_millis: elapsed_ms,
                    });
                }
            }
        }
    }

    async fn terminate(&mut self) {
        if let Err(e) = self.child.start_kill() {
            tracing::debug!(target: "codebox.interpreter", pid = ?self.pid, error = %e, "kill failed, process probably gone");
        }
        match tokio::time::timeout(TERMINATE_GRACE, self.child.wait()).await {
            Ok(Ok(status)) => {
                tracing::debug!(target: "codebox.interpreter", pid = ?self.pid, status = %status, "interpreter terminated");
            }
            Ok(Err(e)) => {
                tracing::warn!(target: "codebox.interpreter", pid = ?self.pid, error = %e, "failed to reap interpreter");
            }
            Err(_) => {
                tracing::warn!(target: "codebox.interpreter", pid = ?self.pid, "interpreter did not exit after kill");
            }
        }
        self.stderr_task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bootstrap_uses_user_code_filename() {
        assert!(BOOTSTRAP.contains(crate::fault::USER_CODE_FILENAME));
        assert!(BOOTSTRAP.contains(r#"{"type": "ready"}"#));
    }

    #[tokio::test]
    async fn missing_binary_is_a_spawn_error() {
        let factory = PythonInterpreterFactory::new(InterpreterConfig {
            python_bin: "definitely-not-a-python-binary-xyz".into(),
            ..InterpreterConfig::default()
        });
        let err = factory.create().await.err().expect("create must fail");
        assert!(matches!(err, InterpreterError::Spawn { .. }));
    }
}
