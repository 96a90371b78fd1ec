//! Subprocess capability for guard checks.
//!
//! Production binds to OS process execution with an absolute wall-clock
//! timeout and a bounded output tail; tests substitute a scripted runner.

use std::io::Read;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

pub const OUTPUT_TAIL_BYTES: usize = 3000;

#[derive(Debug, Clone)]
pub struct CmdOutcome {
    pub ok: bool,
    pub output: String,
}

pub trait CommandRunner: Send + Sync {
    fn run(&self, cmd: &[String], timeout: Duration) -> CmdOutcome;
}

/// Keep only the tail of combined output, on a char boundary.
pub fn tail_output(text: &str) -> String {
    if text.len() <= OUTPUT_TAIL_BYTES {
        return text.trim().to_string();
    }
    let mut start = text.len() - OUTPUT_TAIL_BYTES;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    text[start..].trim().to_string()
}

/// Spawns the command from the project root, polls for completion, and
/// kills the child once the deadline passes.
pub struct ProcessRunner {
    cwd: std::path::PathBuf,
}

impl ProcessRunner {
    pub fn new(cwd: impl Into<std::path::PathBuf>) -> Self {
        Self { cwd: cwd.into() }
    }
}

impl CommandRunner for ProcessRunner {
    fn run(&self, cmd: &[String], timeout: Duration) -> CmdOutcome {
        let Some((program, args)) = cmd.split_first() else {
            return CmdOutcome {
                ok: false,
                output: "empty command".into(),
            };
        };
        let mut child = match Command::new(program)
            .args(args)
            .current_dir(&self.cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
        {
            Ok(child) => child,
            Err(err) => {
                return CmdOutcome {
                    ok: false,
                    output: format!("spawn failed: {err}"),
                }
            }
        };

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let reader = |stream: Option<std::process::ChildStdout>| {
            std::thread::spawn(move || {
                let mut buf = String::new();
                if let Some(mut stream) = stream {
                    let _ = stream.read_to_string(&mut buf);
                }
                buf
            })
        };
        let err_reader = |stream: Option<std::process::ChildStderr>| {
            std::thread::spawn(move || {
                let mut buf = String::new();
                if let Some(mut stream) = stream {
                    let _ = stream.read_to_string(&mut buf);
                }
                buf
            })
        };
        let out_handle = reader(stdout);
        let err_handle = err_reader(stderr);

        let deadline = Instant::now() + timeout;
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break Some(status),
                Ok(None) => {
                    if Instant::now() >= deadline {
                        let _ = child.kill();
                        let _ = child.wait();
                        break None;
                    }
                    std::thread::sleep(Duration::from_millis(50));
                }
                Err(err) => {
                    tracing::warn!(%err, "wait on guard subprocess failed");
                    let _ = child.kill();
                    break None;
                }
            }
        };

        let mut combined = out_handle.join().unwrap_or_default();
        let err_text = err_handle.join().unwrap_or_default();
        if !err_text.is_empty() {
            if !combined.is_empty() {
                combined.push('\n');
            }
            combined.push_str(&err_text);
        }

        match status {
            Some(status) => CmdOutcome {
                ok: status.success(),
                output: tail_output(&combined),
            },
            None => CmdOutcome {
                ok: false,
                output: tail_output(&format!(
                    "{}\ntimed out after {}s",
                    combined,
                    timeout.as_secs()
                )),
            },
        }
    }
}
