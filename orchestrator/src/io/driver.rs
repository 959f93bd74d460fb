//! Device surface backed by an external driver command.
//!
//! The driver is invoked once per call:
//!
//! - `<program> reset` prints the initial [`UiState`] as JSON on stdout.
//! - `<program> step` reads a [`StepRequest`] JSON document on stdin and prints
//!   the resulting [`UiState`] as JSON on stdout.
//!
//! A non-zero exit is a transport failure; unparseable stdout is a protocol
//! failure. The per-call timeout is enforced by killing the child.

use std::process::Command;
use std::time::Duration;

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::core::types::{GroundedAction, UiState};
use crate::io::device::{DeviceCapabilities, DeviceError, DeviceKind, DeviceSurface};
use crate::io::process::run_driver_call;

/// Payload written to the driver's stdin for `step`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRequest {
    pub action: GroundedAction,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone)]
pub struct CommandDevice {
    program: Vec<String>,
    output_limit_bytes: usize,
    reset_timeout: Duration,
}

impl CommandDevice {
    /// `program` is the driver argv; `reset`/`step` are appended per call.
    pub fn new(
        program: Vec<String>,
        output_limit_bytes: usize,
        reset_timeout: Duration,
    ) -> Result<Self> {
        if program.first().is_none_or(|bin| bin.trim().is_empty()) {
            bail!("driver command must not be empty");
        }
        Ok(Self {
            program,
            output_limit_bytes,
            reset_timeout,
        })
    }

    fn command(&self, verb: &str) -> Command {
        let mut cmd = Command::new(&self.program[0]);
        cmd.args(&self.program[1..]).arg(verb);
        cmd
    }

    #[instrument(skip_all, fields(verb = verb))]
    fn call(
        &self,
        verb: &str,
        stdin: Option<&[u8]>,
        timeout: Duration,
    ) -> Result<UiState, DeviceError> {
        let reply = run_driver_call(self.command(verb), stdin, timeout, self.output_limit_bytes)?;
        parse_state(&reply)
    }
}

fn parse_state(reply: &[u8]) -> Result<UiState, DeviceError> {
    let state: UiState = serde_json::from_slice(reply)
        .map_err(|err| DeviceError::Protocol(format!("parse driver state: {err}")))?;
    debug!(modal = %state.modal, elements = state.elements.len(), "driver state");
    Ok(state)
}

impl DeviceSurface for CommandDevice {
    fn capabilities(&self) -> DeviceCapabilities {
        DeviceCapabilities {
            kind: DeviceKind::Driver,
            enforces_timeout: true,
        }
    }

    fn reset(&mut self) -> Result<UiState, DeviceError> {
        self.call("reset", None, self.reset_timeout)
    }

    fn step(
        &mut self,
        action: &GroundedAction,
        timeout: Duration,
    ) -> Result<UiState, DeviceError> {
        let request = StepRequest {
            action: action.clone(),
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        };
        let payload = serde_json::to_vec(&request)
            .map_err(|err| DeviceError::Protocol(format!("encode step request: {err}")))?;
        self.call("step", Some(&payload), timeout)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::core::types::ActionKind;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;

    fn script(dir: &Path, body: &str) -> String {
        let path = dir.join("driver.sh");
        fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write script");
        let mut perms = fs::metadata(&path).expect("metadata").permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&path, perms).expect("chmod");
        path.display().to_string()
    }

    fn device(program: String) -> CommandDevice {
        CommandDevice::new(vec![program], 64 * 1024, Duration::from_secs(5)).expect("device")
    }

    #[test]
    fn reset_and_step_parse_driver_json() {
        let temp = tempfile::tempdir().expect("tempdir");
        let program = script(
            temp.path(),
            r#"case "$1" in
  reset) echo '{"modal":"home_screen","elements":[]}' ;;
  step) cat > /dev/null; echo '{"modal":"settings_app","elements":[]}' ;;
esac"#,
        );
        let mut device = device(program);
        assert_eq!(device.reset().expect("reset").modal, "home_screen");
        let after = device
            .step(
                &GroundedAction::untargeted(ActionKind::Back),
                Duration::from_secs(5),
            )
            .expect("step");
        assert_eq!(after.modal, "settings_app");
    }

    #[test]
    fn failures_map_to_device_errors() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut crashing = device(script(temp.path(), "echo 'adb offline' >&2; exit 2"));
        let err = crashing.reset().expect_err("transport");
        assert!(
            matches!(err, DeviceError::Transport(ref detail) if detail.contains("adb offline"))
        );

        let garbled_dir = tempfile::tempdir().expect("tempdir");
        let mut garbled = device(script(garbled_dir.path(), "echo not-json"));
        assert!(matches!(garbled.reset(), Err(DeviceError::Protocol(_))));

        let slow_dir = tempfile::tempdir().expect("tempdir");
        let mut slow = device(script(slow_dir.path(), "exec sleep 5"));
        let timeout = Duration::from_millis(100);
        assert_eq!(
            slow.step(&GroundedAction::untargeted(ActionKind::Scroll), timeout),
            Err(DeviceError::Timeout { after: timeout })
        );
    }

    #[test]
    fn empty_program_is_rejected() {
        assert!(CommandDevice::new(Vec::new(), 1024, Duration::from_secs(1)).is_err());
    }
}
