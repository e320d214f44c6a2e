use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Embedding index has not been loaded")]
    NotLoaded,

    #[error("Lexical retriever has not been built")]
    NotBuilt,

    #[error("Dependency unavailable: {0}")]
    DependencyUnavailable(String),

    #[error("Failed to load index from {location}: {reason}")]
    Load { location: String, reason: String },

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Search failed: {0}")]
    Search(String),
}

impl Error {
    /// True for the "initialize first" family that callers must see rather
    /// than have converted into an empty result.
    pub fn is_dependency(&self) -> bool {
        matches!(self, Error::NotLoaded | Error::NotBuilt | Error::DependencyUnavailable(_))
    }

    pub fn load(location: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Error::Load { location: location.into(), reason: reason.to_string() }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
