use thiserror::Error;

#[derive(Error, Debug)]
pub enum HushError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Format error in {source_name} line {line}: {message}")]
    Format {
        source_name: String,
        line: usize,
        message: String,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to start {binary}: {message}")]
    Spawn { binary: String, message: String },

    #[error("{description} exited with code {code}")]
    Process {
        description: String,
        code: i32,
        output: String,
    },

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("{phase} phase failed: {source}")]
    Phase {
        phase: &'static str,
        #[source]
        source: Box<HushError>,
    },
}

impl HushError {
    pub fn format<S, M>(source_name: S, line: usize, message: M) -> Self
    where
        S: Into<String>,
        M: Into<String>,
    {
        HushError::Format {
            source_name: source_name.into(),
            line,
            message: message.into(),
        }
    }

    /// Attach the pipeline phase the error surfaced in
    pub fn in_phase(self, phase: &'static str) -> Self {
        match self {
            already @ HushError::Phase { .. } => already,
            other => HushError::Phase {
                phase,
                source: Box::new(other),
            },
        }
    }

    /// Coarse classification used in user-facing messages: bad input, tool
    /// failure, or environment/configuration trouble.
    pub fn category(&self) -> &'static str {
        match self {
            HushError::Format { .. } | HushError::FileNotFound(_) | HushError::Json(_) => "input",
            HushError::Process { .. } => "tool",
            HushError::Config(_)
            | HushError::Spawn { .. }
            | HushError::Io(_) => "environment",
            HushError::Phase { source, .. } => source.category(),
        }
    }

    /// Captured tool output, when the error came from the external tool
    pub fn tool_output(&self) -> Option<&str> {
        match self {
            HushError::Process { output, .. } => Some(output),
            HushError::Phase { source, .. } => source.tool_output(),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, HushError>;
