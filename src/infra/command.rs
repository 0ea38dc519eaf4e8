//! # Command Execution Module / 命令执行模块
//!
//! Spawns the processes behind command-backed test methods and captures
//! their combined output, racing them against a timeout and the context's
//! cancellation token.
//!
//! 派生命令型测试方法背后的进程并捕获其合并输出，
//! 同时与超时和上下文的取消令牌竞争。

use anyhow::{Context, Result, anyhow};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// How long reader tasks may keep draining pipes after the child was killed.
const DRAIN_GRACE: Duration = Duration::from_millis(250);

/// How a spawned process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Exited(ExitStatus),
    TimedOut(Duration),
    Cancelled,
}

/// Expands and splits a command line into a program and its arguments.
///
/// # Arguments
/// * `command_line` - The raw command, e.g. `sh -c 'exit 0'`
///
/// # Returns
/// The program and its arguments, or an error if the line cannot be parsed
pub fn parse_command_line(command_line: &str) -> Result<(String, Vec<String>)> {
    let expanded = shellexpand::full(command_line)
        .with_context(|| format!("Failed to expand command: {command_line}"))?
        .to_string();

    let mut parts = shlex::split(&expanded)
        .ok_or_else(|| anyhow!("Failed to parse command: {}", expanded))?;

    if parts.is_empty() {
        return Err(anyhow!("Empty command after parsing."));
    }

    let program = parts.remove(0);
    Ok((program, parts))
}

/// Spawns a command, captures its stdout and stderr.
/// The output streams are read concurrently and combined into a single string.
///
/// # Arguments
/// * `cmd` - The `tokio::process::Command` to execute.
/// * `stop_token` - Kills the child when cancelled.
/// * `timeout` - Kills the child when it runs longer than this.
///
/// # Returns
/// A tuple containing:
/// - How the process ended, wrapped in an `io::Result`.
/// - The combined stdout and stderr as a `String`.
///
/// 派生一个命令，捕获其 stdout 和 stderr。
/// 输出流被并发读取并合并到一个字符串中。
pub async fn spawn_and_capture(
    mut cmd: tokio::process::Command,
    stop_token: &CancellationToken,
    timeout: Option<Duration>,
) -> (std::io::Result<Termination>, String) {
    // Configure the command to capture stdout and stderr.
    // 配置命令以捕获 stdout 和 stderr。
    let mut child = match cmd
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
    {
        Ok(child) => child,
        Err(e) => return (Err(e), String::new()),
    };

    let output = Arc::new(tokio::sync::Mutex::new(String::new()));

    let mut readers = Vec::new();
    if let Some(stdout) = child.stdout.take() {
        readers.push(spawn_reader(stdout, Arc::clone(&output)));
    }
    if let Some(stderr) = child.stderr.take() {
        readers.push(spawn_reader(stderr, Arc::clone(&output)));
    }

    let deadline = async {
        match timeout {
            Some(duration) => tokio::time::sleep(duration).await,
            None => std::future::pending().await,
        }
    };

    let termination = tokio::select! {
        status = child.wait() => status.map(Termination::Exited),
        _ = stop_token.cancelled() => {
            let _ = child.kill().await;
            Ok(Termination::Cancelled)
        }
        _ = deadline => {
            let _ = child.kill().await;
            Ok(Termination::TimedOut(timeout.unwrap_or_default()))
        }
    };

    // Wait for the readers so all output is captured. A killed child may
    // leave grandchildren holding the pipes open, so those get a grace period.
    // 等待读取任务完成以确保捕获所有输出。
    let exited = matches!(termination, Ok(Termination::Exited(_)));
    for reader in readers {
        if exited {
            if let Err(e) = reader.await {
                tracing::warn!(error = %e, "failed to join output reader task");
            }
        } else if tokio::time::timeout(DRAIN_GRACE, reader).await.is_err() {
            tracing::debug!("output reader still busy after kill; abandoning it");
        }
    }

    let captured = output.lock().await.clone();
    (termination, captured)
}

fn spawn_reader<R>(stream: R, output: Arc<tokio::sync::Mutex<String>>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let mut output = output.lock().await;
            output.push_str(&line);
            output.push('\n');
        }
    })
}
