use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("`{program}` not found; is it installed and on PATH?")]
    NotFound { program: String },

    #[error("failed to run `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    /// Non-zero exit. `code` is `None` when the process was killed by a signal.
    #[error("`{command}` failed (exit {}): {stderr}", exit_label(.code))]
    Failed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("`{command}` produced non-UTF-8 output")]
    InvalidUtf8 { command: String },

    #[error("malformed inspect output for {id}: {source}")]
    MalformedJson {
        id: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("inspect returned no data for {id}")]
    EmptyInspect { id: String },

    #[error("inspect output for {id} has no `{field}`")]
    MissingField { id: String, field: String },

    #[error("no IPv4 address found on {interface}")]
    NoBridgeIp { interface: String },
}

fn exit_label(code: &Option<i32>) -> String {
    code.map_or_else(|| "signal".to_string(), |c| c.to_string())
}

pub type Result<T, E = DriverError> = std::result::Result<T, E>;
