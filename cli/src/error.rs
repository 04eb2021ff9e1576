use codebox_core::api::ConfigError;

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to read {path}")]
    ReadSource {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to set up logging: {0}")]
    Logging(String),

    #[error("{0}")]
    Command(String),

    #[error("http server error: {0}")]
    Server(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
