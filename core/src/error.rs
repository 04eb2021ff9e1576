use thiserror::Error;

#[derive(Debug, Error)]
pub enum InterpreterError {
    #[error("failed to spawn interpreter: {program}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("interpreter failed to initialize: {0}")]
    InitFailed(String),

    #[error("interpreter did not become ready within {0}ms")]
    InitTimeout(u64),

    #[error("interpreter channel failed while {stage}")]
    Transport {
        stage: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed interpreter message: {0}")]
    Protocol(#[from] serde_json::Error),
}

impl InterpreterError {
    /// Shorthand for an unexpected end of the interpreter's output stream.
    pub fn closed(stage: &'static str) -> Self {
        InterpreterError::Transport {
            stage,
            source: std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "interpreter closed its output",
            ),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {path}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Error)]
pub enum ExplainError {
    #[error("explain request field `{field}` exceeds limit of {limit}")]
    Validation { field: &'static str, limit: usize },

    #[error("explainer is disabled")]
    Disabled,

    #[error("explainer http error: {0}")]
    Http(String),

    #[error("explainer returned an unusable response: {0}")]
    BadResponse(String),
}
