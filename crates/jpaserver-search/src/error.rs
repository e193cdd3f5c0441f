use jpaserver_core::CoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SearchError {
    /// Unknown parameter type, or a modifier/chain the parameter cannot take.
    #[error("Unsupported search parameter: {0}")]
    UnsupportedParameter(String),

    #[error("Unknown search parameter '{name}' for resource type {resource_type}")]
    UnknownParameter { resource_type: String, name: String },

    #[error("Unknown resource type: {0}")]
    UnknownResourceType(String),

    #[error("Invalid search value: {0}")]
    InvalidSearchValue(String),

    /// A query root was used after it was finalized.
    #[error("Invalid query state: {0}")]
    InvalidState(String),

    #[error("Query too complex: {0}")]
    QueryTooComplex(String),

    #[error(transparent)]
    Core(#[from] CoreError),
}

impl SearchError {
    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::UnsupportedParameter(message.into())
    }

    pub fn invalid_value(message: impl Into<String>) -> Self {
        Self::InvalidSearchValue(message.into())
    }

    pub fn unknown_parameter(resource_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self::UnknownParameter {
            resource_type: resource_type.into(),
            name: name.into(),
        }
    }

    /// Errors the search caller caused, reported as 4xx.
    pub fn is_client_error(&self) -> bool {
        match self {
            Self::UnsupportedParameter(_)
            | Self::UnknownParameter { .. }
            | Self::UnknownResourceType(_)
            | Self::InvalidSearchValue(_)
            | Self::QueryTooComplex(_) => true,
            Self::InvalidState(_) => false,
            Self::Core(e) => e.is_client_error(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SearchError>;
