//! Shared output layer: pretty for terminals, tab-separated text for pipes
//! and agents, stable JSON for scripts.
//!
//! The mode itself is resolved by `sprintlog_core::config` (`--json`, then
//! `SPRINTLOG_FORMAT`, then the user config, then TTY detection). Command
//! handlers build one serializable value and hand it to [`render_mode`] with
//! a text and a pretty renderer.

use serde::Serialize;
use sprintlog_core::config::OutputMode;
use sprintlog_core::timestamp::format_us;
use std::io::{self, Write};

/// Shared width for pretty separators.
pub const PRETTY_RULE_WIDTH: usize = 72;

pub fn pretty_rule(w: &mut dyn Write) -> io::Result<()> {
    writeln!(w, "{:-<width$}", "", width = PRETTY_RULE_WIDTH)
}

/// Section heading followed by a separator.
pub fn pretty_section(w: &mut dyn Write, heading: &str) -> io::Result<()> {
    writeln!(w, "{heading}")?;
    pretty_rule(w)
}

/// Left-aligned key/value line.
pub fn pretty_kv(w: &mut dyn Write, key: &str, value: impl AsRef<str>) -> io::Result<()> {
    writeln!(w, "{:<14} {}", format!("{key}:"), value.as_ref())
}

/// `-` for absent optional values.
pub fn or_dash(value: Option<&str>) -> &str {
    value.filter(|v| !v.is_empty()).unwrap_or("-")
}

/// RFC 3339 form of an optional timestamp.
pub fn when(us: Option<i64>) -> String {
    us.map_or_else(|| "-".to_string(), format_us)
}

/// Render `value` to stdout: JSON directly, otherwise through the renderer
/// for the mode.
pub fn render_mode<T: Serialize + ?Sized>(
    mode: OutputMode,
    value: &T,
    text_fn: impl FnOnce(&T, &mut dyn Write) -> io::Result<()>,
    pretty_fn: impl FnOnce(&T, &mut dyn Write) -> io::Result<()>,
) -> anyhow::Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    match mode {
        OutputMode::Json => {
            serde_json::to_writer_pretty(&mut out, value)?;
            writeln!(out)?;
        }
        OutputMode::Text => text_fn(value, &mut out)?,
        OutputMode::Pretty => pretty_fn(value, &mut out)?,
    }
    Ok(())
}

/// A structured error with optional hint and error code.
#[derive(Debug, Serialize)]
pub struct CliError {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    /// Machine-readable `E####` code.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
}

impl CliError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            hint: None,
            error_code: None,
        }
    }
}

impl From<&anyhow::Error> for CliError {
    /// Engine errors keep their code and hint; anything else is a bare
    /// message with the full context chain.
    fn from(err: &anyhow::Error) -> Self {
        let message = format!("{err:#}");
        match err.downcast_ref::<sprintlog_core::Error>() {
            Some(core) => {
                let code = core.code();
                Self {
                    message,
                    hint: code.hint().map(str::to_string),
                    error_code: Some(code.code().to_string()),
                }
            }
            None => Self::new(message),
        }
    }
}

/// Render an error to stderr in the requested format.
pub fn render_error(mode: OutputMode, error: &CliError) -> anyhow::Result<()> {
    let stderr = io::stderr();
    let mut out = stderr.lock();
    match mode {
        OutputMode::Json => {
            let wrapper = serde_json::json!({ "error": error });
            serde_json::to_writer_pretty(&mut out, &wrapper)?;
            writeln!(out)?;
        }
        OutputMode::Pretty | OutputMode::Text => {
            match &error.error_code {
                Some(code) => writeln!(out, "error[{code}]: {}", error.message)?,
                None => writeln!(out, "error: {}", error.message)?,
            }
            if let Some(hint) = &error.hint {
                writeln!(out, "  hint: {hint}")?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sprintlog_core::error::EntityKind;

    #[test]
    fn engine_errors_keep_code_and_hint() {
        let err = anyhow::Error::new(sprintlog_core::Error::NotFound {
            kind: EntityKind::Task,
            id: "#9".into(),
        });
        let cli = CliError::from(&err);
        assert_eq!(cli.error_code.as_deref(), Some("E2001"));
        assert!(cli.message.contains("#9"));
    }

    #[test]
    fn context_is_kept_in_message() {
        let err = anyhow::anyhow!("socket closed").context("talking to GitHub");
        let cli = CliError::from(&err);
        assert_eq!(cli.message, "talking to GitHub: socket closed");
        assert!(cli.error_code.is_none());
    }

    #[test]
    fn or_dash_handles_blank() {
        assert_eq!(or_dash(None), "-");
        assert_eq!(or_dash(Some("")), "-");
        assert_eq!(or_dash(Some("ana")), "ana");
    }

    #[test]
    fn pretty_kv_pads_keys() {
        let mut buf = Vec::new();
        pretty_kv(&mut buf, "Status", "todo").expect("write");
        assert_eq!(String::from_utf8(buf).expect("utf8"), "Status:        todo\n");
    }
}
