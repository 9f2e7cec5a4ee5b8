use std::{
    io::{self, Read},
    process::{Command, Stdio},
    thread,
    time::{Duration, Instant},
};

use tracing::trace;

use crate::ProbeError;

const POLL_EVERY: Duration = Duration::from_millis(20);

/// Runs a vendor query tool and returns its stdout.
///
/// Blocking; the child is killed once `timeout` elapses. Output pipes are
/// drained on helper threads so a chatty tool cannot stall on a full pipe.
pub(crate) fn run_tool(program: &str, args: &[&str], timeout: Duration) -> Result<String, ProbeError> {
    trace!(target: "dante.probe", program, ?args, "spawn");
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => ProbeError::ToolMissing(program.to_string()),
            _ => ProbeError::Io {
                tool: program.to_string(),
                msg: e.to_string(),
            },
        })?;

    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    let deadline = Instant::now() + timeout;
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) if Instant::now() >= deadline => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(ProbeError::Timeout {
                    tool: program.to_string(),
                    secs: timeout.as_secs(),
                });
            }
            Ok(None) => thread::sleep(POLL_EVERY),
            Err(e) => {
                return Err(ProbeError::Io {
                    tool: program.to_string(),
                    msg: e.to_string(),
                });
            }
        }
    };

    let out = stdout.join().unwrap_or_default();
    let err = stderr.join().unwrap_or_default();
    if !status.success() {
        return Err(ProbeError::Failed {
            tool: program.to_string(),
            code: status.code(),
            stderr: String::from_utf8_lossy(&err).trim().to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&out).into_owned())
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> thread::JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        buf
    })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn missing_tool_is_reported_as_missing() {
        let err = run_tool("dante-no-such-tool", &[], Duration::from_secs(1)).unwrap_err();
        assert!(err.is_tool_missing());
    }

    #[test]
    fn captures_stdout() {
        let out = run_tool("sh", &["-c", "echo 0, ok"], Duration::from_secs(5)).unwrap();
        assert_eq!(out.trim(), "0, ok");
    }

    #[test]
    fn non_zero_exit_is_failure() {
        let err = run_tool("sh", &["-c", "echo bad >&2; exit 3"], Duration::from_secs(5)).unwrap_err();
        match err {
            ProbeError::Failed { code, stderr, .. } => {
                assert_eq!(code, Some(3));
                assert_eq!(stderr, "bad");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn slow_tool_times_out() {
        let started = Instant::now();
        let err = run_tool("sleep", &["5"], Duration::from_millis(200)).unwrap_err();
        assert!(matches!(err, ProbeError::Timeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(4));
    }
}
