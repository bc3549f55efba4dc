//! Reply worker backed by a command-line generator such as `ollama run <model>`.
//!
//! The prompt goes to stdin, which is then closed; output is read from stdout. Each
//! call runs its own process, bounded by a semaphore, and the process is killed on
//! every exit path.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use common::ReplyConfig;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, Semaphore};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, warn};

use super::postprocess::strip_control_sequences;
use super::{ReplyEvent, ReplyWorker};
use crate::capability::{CapabilityError, CapabilityResult};

pub struct ProcessReplyWorker {
    program: String,
    args: Vec<String>,
    heartbeat: Duration,
    permits: Arc<Semaphore>,
}

impl ProcessReplyWorker {
    pub fn new(program: impl Into<String>, args: Vec<String>, heartbeat: Duration, max_concurrent: usize) -> Self {
        Self {
            program: program.into(),
            args,
            heartbeat,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    pub fn from_config(cfg: &ReplyConfig) -> Self {
        Self::new(
            cfg.command.clone(),
            cfg.args.clone(),
            Duration::from_secs(cfg.heartbeat_seconds.max(1)),
            cfg.max_concurrent,
        )
    }
}

fn spawn(program: &str, args: &[String], stderr: Stdio) -> CapabilityResult<Child> {
    Command::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(stderr)
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| CapabilityError::Failed(format!("failed to start '{}': {}", program, e)))
}

/// Feed the prompt and collect the whole output.
async fn communicate(child: &mut Child, program: &str, prompt: &str) -> CapabilityResult<String> {
    let missing = |stream: &str| CapabilityError::Failed(format!("{} of '{}' not captured", stream, program));
    let mut stdin = child.stdin.take().ok_or_else(|| missing("stdin"))?;
    let mut stdout = child.stdout.take().ok_or_else(|| missing("stdout"))?;
    let mut stderr = child.stderr.take().ok_or_else(|| missing("stderr"))?;

    let write = async move {
        stdin.write_all(prompt.as_bytes()).await?;
        stdin.shutdown().await
    };
    let mut out = Vec::new();
    let mut err = Vec::new();
    let (written, read_out, read_err) = tokio::join!(
        write,
        stdout.read_to_end(&mut out),
        stderr.read_to_end(&mut err)
    );
    if let Err(e) = written {
        // a generator may exit before consuming all input; the exit status decides
        debug!(%e, program, "writing prompt failed");
    }
    read_out.map_err(|e| CapabilityError::Failed(format!("reading output failed: {}", e)))?;
    read_err.map_err(|e| CapabilityError::Failed(format!("reading stderr failed: {}", e)))?;

    let status = child
        .wait()
        .await
        .map_err(|e| CapabilityError::Failed(format!("waiting for '{}' failed: {}", program, e)))?;
    if !status.success() {
        let stderr = String::from_utf8_lossy(&err);
        return Err(CapabilityError::Failed(format!(
            "'{}' exited with {}: {}",
            program,
            status,
            stderr.trim()
        )));
    }
    Ok(String::from_utf8_lossy(&out).into_owned())
}

enum StreamEnd {
    /// Receiver dropped; nothing left to report to
    Cancelled,
    Failed(CapabilityError),
}

impl From<CapabilityError> for StreamEnd {
    fn from(e: CapabilityError) -> Self {
        StreamEnd::Failed(e)
    }
}

struct StreamJob {
    program: String,
    args: Vec<String>,
    prompt: String,
    heartbeat: Duration,
    timeout: Duration,
    deadline: Instant,
}

impl StreamJob {
    async fn run(self, tx: &mpsc::Sender<ReplyEvent>, permits: Arc<Semaphore>) -> Result<(), StreamEnd> {
        let _permit = tokio::select! {
            permit = permits.acquire_owned() => permit.map_err(|_| {
                CapabilityError::Unavailable("reply worker pool closed".to_string())
            })?,
            _ = tx.closed() => return Err(StreamEnd::Cancelled),
            _ = sleep_until(self.deadline) => return Err(CapabilityError::Timeout(self.timeout).into()),
        };

        let mut child = spawn(&self.program, &self.args, Stdio::null())?;
        let result = self.pump(&mut child, tx).await;
        if let Err(e) = child.kill().await {
            debug!(%e, "reply process already gone");
        }
        result
    }

    async fn pump(&self, child: &mut Child, tx: &mpsc::Sender<ReplyEvent>) -> Result<(), StreamEnd> {
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| CapabilityError::Failed("stdin not captured".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| CapabilityError::Failed("stdout not captured".to_string()))?;

        let prompt = self.prompt.clone();
        let writer = tokio::spawn(async move {
            if let Err(e) = stdin.write_all(prompt.as_bytes()).await {
                debug!(%e, "writing prompt failed");
            }
            let _ = stdin.shutdown().await;
        });

        let result = self.relay(stdout, tx).await;
        writer.abort();
        result?;

        let status = tokio::select! {
            status = child.wait() => status.map_err(|e| CapabilityError::Failed(format!("waiting for process failed: {}", e)))?,
            _ = sleep_until(self.deadline) => return Err(CapabilityError::Timeout(self.timeout).into()),
        };
        if !status.success() {
            return Err(CapabilityError::Failed(format!("'{}' exited with {}", self.program, status)).into());
        }
        Ok(())
    }

    async fn relay(&self, stdout: tokio::process::ChildStdout, tx: &mpsc::Sender<ReplyEvent>) -> Result<(), StreamEnd> {
        let mut lines = BufReader::new(stdout).lines();
        loop {
            tokio::select! {
                _ = tx.closed() => return Err(StreamEnd::Cancelled),
                _ = sleep_until(self.deadline) => return Err(CapabilityError::Timeout(self.timeout).into()),
                next = tokio::time::timeout(self.heartbeat, lines.next_line()) => {
                    let event = match next {
                        Err(_) => ReplyEvent::Keepalive,
                        Ok(Ok(Some(line))) => {
                            let clean = strip_control_sequences(&line);
                            let clean = clean.trim();
                            if clean.is_empty() {
                                continue;
                            }
                            ReplyEvent::Chunk(clean.to_string())
                        }
                        Ok(Ok(None)) => return Ok(()),
                        Ok(Err(e)) => {
                            return Err(CapabilityError::Failed(format!("reading output failed: {}", e)).into())
                        }
                    };
                    if tx.send(event).await.is_err() {
                        return Err(StreamEnd::Cancelled);
                    }
                }
            }
        }
    }
}

#[async_trait::async_trait]
impl ReplyWorker for ProcessReplyWorker {
    async fn invoke(&self, prompt: &str, timeout: Duration) -> CapabilityResult<String> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| CapabilityError::Unavailable("reply worker pool closed".to_string()))?;

        let mut child = spawn(&self.program, &self.args, Stdio::piped())?;
        let result = tokio::time::timeout(timeout, communicate(&mut child, &self.program, prompt)).await;
        if let Err(e) = child.kill().await {
            debug!(%e, "reply process already gone");
        }

        match result {
            Ok(output) => output,
            Err(_) => {
                warn!(program = %self.program, ?timeout, "reply process timed out");
                Err(CapabilityError::Timeout(timeout))
            }
        }
    }

    fn stream(&self, prompt: String, timeout: Duration) -> mpsc::Receiver<ReplyEvent> {
        let (tx, rx) = mpsc::channel(32);
        let job = StreamJob {
            program: self.program.clone(),
            args: self.args.clone(),
            prompt,
            heartbeat: self.heartbeat,
            timeout,
            deadline: Instant::now() + timeout,
        };
        let permits = self.permits.clone();

        tokio::spawn(async move {
            match job.run(&tx, permits).await {
                Ok(()) => {
                    let _ = tx.send(ReplyEvent::Done).await;
                }
                Err(StreamEnd::Cancelled) => debug!("reply stream cancelled by receiver"),
                Err(StreamEnd::Failed(e)) => {
                    warn!(%e, "reply stream failed");
                    let _ = tx.send(ReplyEvent::Error(e.to_string())).await;
                }
            }
        });
        rx
    }
}
