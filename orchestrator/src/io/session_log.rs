//! Session artifacts: `report.json`, `plan.json` and `trace.jsonl`.
//!
//! Artifacts are product output and are written regardless of `RUST_LOG`.

use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

use crate::session::SessionOutcome;

#[derive(Debug, Clone)]
pub struct SessionPaths {
    pub dir: PathBuf,
    pub report_path: PathBuf,
    pub plan_path: PathBuf,
    pub trace_path: PathBuf,
}

impl SessionPaths {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
            report_path: dir.join("report.json"),
            plan_path: dir.join("plan.json"),
            trace_path: dir.join("trace.jsonl"),
        }
    }
}

pub fn write_session(dir: &Path, outcome: &SessionOutcome) -> Result<SessionPaths> {
    let paths = SessionPaths::new(dir);
    fs::create_dir_all(&paths.dir)
        .with_context(|| format!("create session dir {}", paths.dir.display()))?;

    write_json(&paths.report_path, &outcome.report)?;
    write_json(&paths.plan_path, &outcome.plan)?;
    write_trace(&paths.trace_path, outcome)?;
    Ok(paths)
}

/// One JSON object per frame, in sequence order.
fn write_trace(path: &Path, outcome: &SessionOutcome) -> Result<()> {
    let file = fs::File::create(path).with_context(|| format!("create {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    for frame in &outcome.trace {
        serde_json::to_writer(&mut writer, frame)
            .with_context(|| format!("serialize frame {}", frame.sequence))?;
        writer
            .write_all(b"\n")
            .with_context(|| format!("write {}", path.display()))?;
    }
    writer
        .flush()
        .with_context(|| format!("flush {}", path.display()))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(value)?;
    buf.push('\n');
    fs::write(path, buf).with_context(|| format!("write {}", path.display()))
}
