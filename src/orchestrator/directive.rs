//! Detach directive parser.
//!
//! An agent asks for a background job by replying with a sentinel line
//! followed by a single-line JSON object:
//!
//! ```text
//! TG_COURIER_TOOL: DETACH
//! {"title":"build","cmd":"make","cwd":"."}
//! ```
//!
//! Text around the pair is kept as the directive's remainder.

use serde_json::{Map, Value};

/// Sentinel line, matched case-insensitively after trimming.
pub const DETACH_SENTINEL: &str = "TG_COURIER_TOOL: DETACH";

/// Title used when the directive does not provide one.
pub const DEFAULT_TITLE: &str = "Detached job";

/// Diagnostic for a directive whose `cmd` is missing or invalid.
pub const MISSING_CMD: &str = "Bad DETACH directive: missing cmd (string or string list).";

/// Diagnostic for a sentinel that is not followed by a JSON object.
pub const MISSING_OBJECT: &str =
    "Bad DETACH directive: expected a JSON object on the line after the sentinel.";

/// Command requested by a directive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetachCommand {
    /// Shell-interpreted command line.
    Shell(String),
    /// Explicit argv.
    Argv(Vec<String>),
}

/// Well-formed directive fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetachSpec {
    /// Human label.
    pub title: String,
    /// What to run.
    pub cmd: DetachCommand,
    /// Requested working directory, unresolved.
    pub cwd: Option<String>,
}

/// Outcome of scanning an agent reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetachParse {
    /// No sentinel line present.
    Absent,
    /// Sentinel with a valid JSON object.
    Directive {
        /// Parsed fields.
        spec: DetachSpec,
        /// Reply text with the sentinel and JSON lines removed, trimmed.
        remainder: String,
    },
    /// Sentinel present but the payload is unusable.
    Malformed(String),
}

/// Scan `reply` for a detach directive.
#[must_use]
pub fn parse_detach(reply: &str) -> DetachParse {
    let lines: Vec<&str> = reply.lines().collect();

    let Some(sentinel_at) = lines
        .iter()
        .position(|line| line.trim().eq_ignore_ascii_case(DETACH_SENTINEL))
    else {
        return DetachParse::Absent;
    };

    let Some(json_at) = (sentinel_at + 1..lines.len()).find(|&i| !lines[i].trim().is_empty())
    else {
        return DetachParse::Malformed(MISSING_OBJECT.to_owned());
    };

    let object = match serde_json::from_str::<Value>(lines[json_at].trim()) {
        Ok(Value::Object(object)) => object,
        _ => return DetachParse::Malformed(MISSING_OBJECT.to_owned()),
    };

    let Some(cmd) = command_from(&object) else {
        return DetachParse::Malformed(MISSING_CMD.to_owned());
    };

    let title = object
        .get("title")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|title| !title.is_empty())
        .unwrap_or(DEFAULT_TITLE)
        .to_owned();

    let cwd = object
        .get("cwd")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|cwd| !cwd.is_empty())
        .map(str::to_owned);

    let remainder = lines[..sentinel_at]
        .iter()
        .chain(&lines[json_at + 1..])
        .copied()
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_owned();

    DetachParse::Directive {
        spec: DetachSpec { title, cmd, cwd },
        remainder,
    }
}

fn command_from(object: &Map<String, Value>) -> Option<DetachCommand> {
    match object.get("cmd")? {
        Value::String(line) if !line.trim().is_empty() => {
            Some(DetachCommand::Shell(line.trim().to_owned()))
        }
        Value::Array(items) if !items.is_empty() => items
            .iter()
            .map(|item| {
                item.as_str()
                    .filter(|arg| !arg.trim().is_empty())
                    .map(str::to_owned)
            })
            .collect::<Option<Vec<_>>>()
            .map(DetachCommand::Argv),
        _ => None,
    }
}
