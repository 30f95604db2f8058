//! Trace of MCP tool calls and the envelopes they returned.
//!
//! Enabled by `--debug` or `SAP_DEBUG`. Each line goes to `tracing` at debug
//! level and to `/tmp/sap_odata_mcp_trace_<timestamp>.log`, with configured
//! secrets redacted and long payloads truncated.

use chrono::Local;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use serde_json::Value;

use crate::sanitize::{truncate_chars, Redactor};

/// Longest JSON excerpt written per trace line.
const MAX_TRACE_CHARS: usize = 1000;

/// Tool-call trace. A disabled logger does nothing.
pub struct DebugLogger {
    enabled: bool,
    redactor: Redactor,
    trace_file: Option<Mutex<File>>,
    trace_path: Option<PathBuf>,
}

impl DebugLogger {
    pub fn new(enabled: bool, redactor: Redactor) -> Self {
        let (trace_file, trace_path) = if enabled {
            open_trace_file()
        } else {
            (None, None)
        };

        Self {
            enabled,
            redactor,
            trace_file,
            trace_path,
        }
    }

    /// Where the trace is written, if a file could be created.
    pub fn trace_path(&self) -> Option<&PathBuf> {
        self.trace_path.as_ref()
    }

    /// Record a free-form line.
    pub fn log(&self, message: &str) {
        if !self.enabled {
            return;
        }

        let message = self.redactor.redact(message);
        tracing::debug!("{}", message);

        if let Some(ref file) = self.trace_file {
            if let Ok(mut f) = file.lock() {
                let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
                let _ = writeln!(f, "[{}] {}", timestamp, message);
                let _ = f.flush();
            }
        }
    }

    /// Record the arguments a tool was invoked with.
    pub fn log_tool_call(&self, tool_name: &str, params: &Value) {
        if self.enabled {
            self.log(&format!("TOOL CALL: {} | params: {}", tool_name, excerpt(params)));
        }
    }

    /// Record the envelope a tool returned.
    pub fn log_tool_result(&self, tool_name: &str, result: &Value) {
        if !self.enabled {
            return;
        }

        let outcome = match result.get("success").and_then(Value::as_bool) {
            Some(true) => "ok",
            Some(false) => "failed",
            None => "-",
        };
        self.log(&format!(
            "TOOL RESULT: {} [{}] | result: {}",
            tool_name,
            outcome,
            excerpt(result)
        ));
    }
}

impl std::fmt::Debug for DebugLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DebugLogger")
            .field("enabled", &self.enabled)
            .field("trace_path", &self.trace_path)
            .finish()
    }
}

fn open_trace_file() -> (Option<Mutex<File>>, Option<PathBuf>) {
    let timestamp = Local::now().format("%Y%m%d_%H%M%S%.3f");
    let path = PathBuf::from(format!("/tmp/sap_odata_mcp_trace_{}.log", timestamp));
    match OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&path)
    {
        Ok(file) => (Some(Mutex::new(file)), Some(path)),
        Err(e) => {
            tracing::warn!(error = %e, path = %path.display(), "Failed to create trace file");
            (None, None)
        }
    }
}

fn excerpt(value: &Value) -> String {
    truncate_chars(&value.to_string(), MAX_TRACE_CHARS)
}
