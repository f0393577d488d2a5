use std::process::Stdio;
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use winupdate_core::TransportError;

// ─── RemoteProcess ────────────────────────────────────────────────────────

/// A running `ssh`/`scp` child whose output is relayed through `tracing`.
///
/// Stdout lines are logged at info as they arrive. Stderr is drained by a
/// background task, logged at warn and kept so failures can quote it. The
/// child is killed when this value is dropped, so dropping the future that
/// owns it tears down the remote session.
pub(crate) struct RemoteProcess {
    child: Child,
    stdout: Option<ChildStdout>,
    stderr_buf: Arc<Mutex<String>>,
    stderr_task: Option<JoinHandle<()>>,
}

/// How a finished child exited, with whatever it wrote to stderr.
#[derive(Debug)]
pub(crate) struct Exit {
    pub code: Option<i32>,
    pub stderr: String,
}

impl Exit {
    pub fn describe(&self, program: &str) -> String {
        let head = match self.code {
            Some(code) => format!("{program} exited with code {code}"),
            None => format!("{program} terminated by signal"),
        };
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            head
        } else {
            format!("{head}\nstderr: {stderr}")
        }
    }
}

impl RemoteProcess {
    pub(crate) fn spawn(mut cmd: Command) -> Result<Self, TransportError> {
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn()?;
        let stdout = child.stdout.take();

        let stderr_buf = Arc::new(Mutex::new(String::new()));
        let stderr_task = child.stderr.take().map(|stderr| {
            let buf = Arc::clone(&stderr_buf);
            tokio::spawn(async move {
                let mut reader = BufReader::new(stderr);
                let mut raw = Vec::new();
                while let Ok(Some(line)) = next_line(&mut reader, &mut raw).await {
                    warn!("{line}");
                    if let Ok(mut b) = buf.lock() {
                        if !b.is_empty() {
                            b.push('\n');
                        }
                        b.push_str(&line);
                    }
                }
            })
        });

        Ok(Self {
            child,
            stdout,
            stderr_buf,
            stderr_task,
        })
    }

    /// Relay stdout until EOF, then wait for the child to exit.
    pub(crate) async fn finish(mut self) -> Result<Exit, TransportError> {
        if let Some(stdout) = self.stdout.take() {
            let mut reader = BufReader::new(stdout);
            let mut raw = Vec::new();
            while let Some(line) = next_line(&mut reader, &mut raw).await? {
                info!("{line}");
            }
        }

        let status = self.child.wait().await?;
        if let Some(task) = self.stderr_task.take() {
            // the pipe closes with the child; a panicked reader only loses log lines
            let _ = task.await;
        }

        let stderr = self
            .stderr_buf
            .lock()
            .map(|b| b.clone())
            .unwrap_or_default();
        Ok(Exit {
            code: status.code(),
            stderr,
        })
    }
}

/// Read one line, decoding lossily. Windows consoles write in the OEM or
/// ANSI code page, so output is not guaranteed to be UTF-8.
async fn next_line<R>(reader: &mut R, raw: &mut Vec<u8>) -> std::io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    raw.clear();
    if reader.read_until(b'\n', raw).await? == 0 {
        return Ok(None);
    }
    let line = String::from_utf8_lossy(raw);
    Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
}

/// Spawn `cmd`, relay its output and return how it exited.
pub(crate) async fn run(cmd: Command) -> Result<Exit, TransportError> {
    RemoteProcess::spawn(cmd)?.finish().await
}
