//! One driver invocation: spawn, feed the request, collect a bounded reply.
//!
//! Every failure is reported as a [`DeviceError`] so the driver surface can
//! hand it to the Executor unchanged.

use std::io::{Read, Write};
use std::process::{Child, ChildStderr, ChildStdout, Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, instrument, warn};
use wait_timeout::ChildExt;

use crate::io::device::DeviceError;

/// Bytes kept from one child stream and how many were dropped past the cap.
#[derive(Debug, Default)]
struct Captured {
    bytes: Vec<u8>,
    dropped: usize,
}

impl Captured {
    /// First non-empty line, for error messages.
    fn first_line(&self) -> String {
        String::from_utf8_lossy(&self.bytes)
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .unwrap_or("no stderr output")
            .to_string()
    }
}

/// Run one driver call and return its stdout.
///
/// Both pipes are drained on reader threads while the child runs, so a
/// chatty driver cannot block on a full pipe. `reply_limit_bytes` caps what is
/// kept per stream.
///
/// - spawn, pipe or exit-status failures map to [`DeviceError::Transport`];
/// - a child still running after `timeout` is killed and reported as
///   [`DeviceError::Timeout`];
/// - stdout larger than the cap is a [`DeviceError::Protocol`] violation,
///   since a cut JSON document cannot be parsed.
#[instrument(skip_all, fields(timeout_ms = timeout.as_millis() as u64, reply_limit_bytes = reply_limit_bytes))]
pub fn run_driver_call(
    mut cmd: Command,
    request: Option<&[u8]>,
    timeout: Duration,
    reply_limit_bytes: usize,
) -> Result<Vec<u8>, DeviceError> {
    cmd.stdin(if request.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    });
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

    debug!("spawning driver");
    let mut child = cmd.spawn().map_err(|err| transport("spawn driver", &err))?;

    let (stdout, stderr) = match (child.stdout.take(), child.stderr.take()) {
        (Some(stdout), Some(stderr)) => (stdout, stderr),
        _ => {
            kill_quietly(&mut child);
            return Err(DeviceError::Transport(
                "driver output was not piped".to_string(),
            ));
        }
    };
    let readers = spawn_readers(stdout, stderr, reply_limit_bytes);

    if let Some(payload) = request {
        let Some(mut stdin) = child.stdin.take() else {
            kill_quietly(&mut child);
            let _ = collect(readers);
            return Err(DeviceError::Transport("driver stdin was not piped".to_string()));
        };
        if let Err(err) = stdin.write_all(payload) {
            kill_quietly(&mut child);
            let _ = collect(readers);
            return Err(transport("write step request", &err));
        }
        // Dropping the handle closes the pipe so the driver sees EOF.
    }

    let waited = child
        .wait_timeout(timeout)
        .map_err(|err| transport("wait for driver", &err))?;
    let status = match waited {
        Some(status) => status,
        None => {
            warn!(timeout_ms = timeout.as_millis() as u64, "driver timed out, killing");
            kill_quietly(&mut child);
            // Readers finish once the killed child closes its pipes.
            let _ = collect(readers);
            return Err(DeviceError::Timeout { after: timeout });
        }
    };

    let (stdout, stderr) = collect(readers)?;
    debug!(exit_code = ?status.code(), stdout_bytes = stdout.bytes.len(), "driver finished");

    if !status.success() {
        return Err(DeviceError::Transport(format!(
            "driver exited with {:?}: {}",
            status.code(),
            stderr.first_line()
        )));
    }
    if stdout.dropped > 0 {
        warn!(dropped = stdout.dropped, "driver reply over limit");
        return Err(DeviceError::Protocol(format!(
            "driver stdout exceeded limit by {} bytes",
            stdout.dropped
        )));
    }
    Ok(stdout.bytes)
}

type Reader = JoinHandle<std::io::Result<Captured>>;

fn spawn_readers(stdout: ChildStdout, stderr: ChildStderr, limit: usize) -> (Reader, Reader) {
    (
        thread::spawn(move || read_capped(stdout, limit)),
        thread::spawn(move || read_capped(stderr, limit)),
    )
}

fn collect((stdout, stderr): (Reader, Reader)) -> Result<(Captured, Captured), DeviceError> {
    Ok((join(stdout, "stdout")?, join(stderr, "stderr")?))
}

fn join(handle: Reader, stream: &str) -> Result<Captured, DeviceError> {
    match handle.join() {
        Ok(Ok(captured)) => Ok(captured),
        Ok(Err(err)) => Err(transport(&format!("read driver {stream}"), &err)),
        Err(_) => Err(DeviceError::Transport(format!(
            "driver {stream} reader panicked"
        ))),
    }
}

fn read_capped<R: Read>(mut reader: R, limit: usize) -> std::io::Result<Captured> {
    let mut captured = Captured::default();
    let mut chunk = [0u8; 8192];
    loop {
        let n = reader.read(&mut chunk)?;
        if n == 0 {
            return Ok(captured);
        }
        let keep = n.min(limit.saturating_sub(captured.bytes.len()));
        captured.bytes.extend_from_slice(&chunk[..keep]);
        captured.dropped += n - keep;
    }
}

fn kill_quietly(child: &mut Child) {
    if let Err(err) = child.kill() {
        debug!(err = %err, "driver already exited");
    }
    let _ = child.wait();
}

fn transport(what: &str, err: &std::io::Error) -> DeviceError {
    DeviceError::Transport(format!("{what}: {err}"))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[test]
    fn echoes_request_through_stdin() {
        let reply = run_driver_call(
            sh("cat"),
            Some(b"{\"kind\":\"tap\"}"),
            Duration::from_secs(5),
            1024,
        )
        .expect("run");
        assert_eq!(reply, b"{\"kind\":\"tap\"}");
    }

    #[test]
    fn slow_driver_is_killed_and_reported_as_timeout() {
        let timeout = Duration::from_millis(100);
        let err = run_driver_call(sh("exec sleep 5"), None, timeout, 1024).expect_err("timeout");
        assert_eq!(err, DeviceError::Timeout { after: timeout });
    }

    #[test]
    fn oversized_reply_is_a_protocol_violation() {
        let err = run_driver_call(sh("printf 'abcdefghij'"), None, Duration::from_secs(5), 4)
            .expect_err("over limit");
        assert_eq!(
            err,
            DeviceError::Protocol("driver stdout exceeded limit by 6 bytes".to_string())
        );
    }

    #[test]
    fn failing_driver_reports_first_stderr_line() {
        let err = run_driver_call(
            sh("printf '\\nno devices attached\\nretry later\\n' >&2; exit 3"),
            None,
            Duration::from_secs(5),
            1024,
        )
        .expect_err("exit 3");
        assert_eq!(
            err,
            DeviceError::Transport("driver exited with Some(3): no devices attached".to_string())
        );
    }

    #[test]
    fn missing_program_is_a_transport_error() {
        let err = run_driver_call(
            Command::new("/nonexistent/qa-driver"),
            None,
            Duration::from_secs(1),
            1024,
        )
        .expect_err("spawn");
        assert!(
            matches!(err, DeviceError::Transport(ref detail) if detail.starts_with("spawn driver"))
        );
    }
}
