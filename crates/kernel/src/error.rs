use cellfield_stream::FetchError;

/// Errors from loading or validating a `FieldConfig`.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Errors surfaced by the cell field. Only world loads and configuration
/// fail; the per-tick path degrades instead.
#[derive(Debug, thiserror::Error)]
pub enum FieldError {
    #[error("world load failed: {0}")]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}
