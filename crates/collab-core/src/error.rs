use thiserror::Error;

#[derive(Debug, Error)]
pub enum CollabError {
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    #[error("invalid {kind} '{value}': must be alphanumeric with '-' or '_'")]
    InvalidName { kind: &'static str, value: String },

    #[error("dependency cycle between: {}", .0.join(", "))]
    DependencyCycle(Vec<String>),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CollabError>;
