//! Runs external programs with a time limit.
//!
//! Children are spawned with `kill_on_drop` so dropping the returned future, on timeout or cancellation, kills them.

use std::collections::VecDeque;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;

/// Lines of output kept for diagnostics.
const TAIL_LINES: usize = 200;

#[derive(Debug, Error)]
pub enum ProcessError {
	#[error("couldn't start {program}: {source}")]
	Spawn { program: String, source: std::io::Error },
	#[error("{program} did not finish within {timeout:?}")]
	TimedOut { program: String, timeout: Duration },
	#[error("IO error while running {program}: {source}")]
	IO { program: String, source: std::io::Error },
}

/// The outcome of a program that ran to completion.
#[derive(Debug)]
pub struct ProcessOutput {
	pub status: ExitStatus,
	/// The last lines written to stdout followed by those written to stderr.
	/// Interactive runs only keep stderr.
	pub tail: String,
}

impl ProcessOutput {
	pub fn success(&self) -> bool {
		self.status.success()
	}
}

fn push_line(tail: &mut VecDeque<String>, line: &[u8], program: &str, echo: bool) {
	let line = String::from_utf8_lossy(line).trim_end().to_string();
	if !echo {
		log::debug!("[{}] {}", program, line);
	}
	if tail.len() == TAIL_LINES {
		tail.pop_front();
	}
	tail.push_back(line);
}

/// Keeps the last lines read from `reader`. With `echo` everything is also passed on to our stderr as it arrives.
async fn collect_tail<R: AsyncRead + Unpin>(reader: Option<R>, program: &str, echo: bool) -> std::io::Result<VecDeque<String>> {
	let mut tail = VecDeque::with_capacity(TAIL_LINES);
	let Some(mut reader) = reader else { return Ok(tail) };

	let mut terminal = tokio::io::stderr();
	let mut chunk = [0u8; 4096];
	let mut line = Vec::new();
	loop {
		let n = reader.read(&mut chunk).await?;
		if n == 0 {
			break;
		}
		if echo {
			/* Unterminated prompts have to show up too */
			terminal.write_all(&chunk[..n]).await?;
			terminal.flush().await?;
		}
		for &byte in &chunk[..n] {
			if byte == b'\n' {
				push_line(&mut tail, &line, program, echo);
				line.clear();
			} else {
				line.push(byte);
			}
		}
	}
	if !line.is_empty() {
		push_line(&mut tail, &line, program, echo);
	}
	Ok(tail)
}

/// Runs `command` to completion.
///
/// When `interactive` is true the child shares stdin and stdout with us. Its stderr is still captured
/// and echoed as it arrives. Otherwise stdin is closed so any prompt fails instead of blocking,
/// and all output is captured.
/// A zero `timeout` means no limit.
pub async fn run(mut command: Command, timeout: Duration, interactive: bool) -> Result<ProcessOutput, ProcessError> {
	let program = command.as_std().get_program().to_string_lossy().into_owned();
	if interactive {
		command.stdin(Stdio::inherit()).stdout(Stdio::inherit()).stderr(Stdio::piped());
	} else {
		command.stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::piped());
	}
	command.kill_on_drop(true);

	log::trace!("Running {:?}", command.as_std());
	let mut child = command.spawn().map_err(|source| ProcessError::Spawn { program: program.clone(), source })?;

	let stdout = child.stdout.take();
	let stderr = child.stderr.take();
	let io_error = |source| ProcessError::IO { program: program.clone(), source };

	let completion = async {
		let (out, err) = tokio::join!(collect_tail(stdout, &program, false), collect_tail(stderr, &program, interactive));
		let status = child.wait().await?;
		let mut lines = out?;
		lines.extend(err?);
		Ok::<_, std::io::Error>(ProcessOutput { status, tail: Vec::from(lines).join("\n") })
	};

	if timeout.is_zero() {
		completion.await.map_err(io_error)
	} else {
		match tokio::time::timeout(timeout, completion).await {
			Ok(result) => result.map_err(io_error),
			Err(_) => Err(ProcessError::TimedOut { program: program.clone(), timeout }),
		}
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[tokio::test]
	async fn output_is_captured() {
		let mut cmd = Command::new("sh");
		cmd.args(["-c", "echo hello; echo oops >&2; exit 3"]);
		let output = run(cmd, Duration::from_secs(10), false).await.unwrap();
		assert_eq!(output.status.code(), Some(3));
		assert_eq!(output.tail, "hello\noops");
	}

	#[tokio::test]
	async fn interactive_run_keeps_stderr() {
		let mut cmd = Command::new("sh");
		cmd.args(["-c", "echo shown; echo broken >&2; printf 'no newline' >&2; exit 1"]);
		let output = run(cmd, Duration::from_secs(10), true).await.unwrap();
		assert!(!output.success());
		assert_eq!(output.tail, "broken\nno newline");
	}

	#[tokio::test]
	async fn slow_program_times_out() {
		let mut cmd = Command::new("sleep");
		cmd.arg("5");
		let result = run(cmd, Duration::from_millis(100), false).await;
		assert!(matches!(result, Err(ProcessError::TimedOut { .. })));
	}

	#[tokio::test]
	async fn missing_program_fails_to_spawn() {
		let result = run(Command::new("/nonexistent/program"), Duration::ZERO, false).await;
		assert!(matches!(result, Err(ProcessError::Spawn { .. })));
	}
}
