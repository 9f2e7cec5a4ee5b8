use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProbeError {
    /// The vendor tool is not installed; the backend has nothing to report.
    #[error("{0} not found")]
    ToolMissing(String),
    #[error("{tool} timed out after {secs}s")]
    Timeout { tool: String, secs: u64 },
    #[error("{tool} exited with {code:?}: {stderr}")]
    Failed {
        tool: String,
        code: Option<i32>,
        stderr: String,
    },
    #[error("{tool}: io error: {msg}")]
    Io { tool: String, msg: String },
    #[error("unparsable {tool} output: {msg}")]
    Parse { tool: String, msg: String },
}

impl ProbeError {
    #[inline]
    pub fn is_tool_missing(&self) -> bool {
        matches!(self, ProbeError::ToolMissing(_))
    }
}
