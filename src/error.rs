//! Error type shared by the store, its collaborators and the file loaders

use thiserror::Error;

#[derive(Error, Debug)]
pub enum MoonError {
    /// Reading or writing the Moon snapshot failed
    #[error("Repository error: {0}")]
    Repository(String),

    /// The proxy engine rejected the translated configuration
    #[error("Engine error: {0}")]
    Engine(String),

    /// The engine accepted the new configuration but persisting the raw
    /// snapshot failed. The two backends disagree until the next successful
    /// mutation; nothing is rolled back.
    #[error("Engine applied but snapshot was not persisted: {message}")]
    Diverged { message: String },

    /// Fetching a subscription group failed
    #[error("Subscription error: {0}")]
    Subscription(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

impl MoonError {
    /// Whether the error comes from caller input rather than a collaborator.
    ///
    /// Expected errors are logged at `warn`, the rest at `error`.
    #[must_use]
    pub fn is_expected(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::NotFound(_))
    }
}

pub type MoonResult<T> = std::result::Result<T, MoonError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_expected() {
        assert!(MoonError::Validation("bad".to_string()).is_expected());
        assert!(MoonError::NotFound("x".to_string()).is_expected());
        assert!(!MoonError::Engine("down".to_string()).is_expected());
        assert!(!MoonError::Diverged { message: "disk full".to_string() }.is_expected());
    }

    #[test]
    fn test_diverged_message() {
        let err = MoonError::Diverged { message: "disk full".to_string() };
        assert_eq!(err.to_string(), "Engine applied but snapshot was not persisted: disk full");
    }
}
