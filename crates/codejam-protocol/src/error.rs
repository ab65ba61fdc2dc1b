use thiserror::Error;

/// Boundary validation failures for inbound client messages
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Field {field} exceeds limit of {limit}")]
    TooLarge { field: &'static str, limit: usize },

    #[error("Invalid peer transition: {0}")]
    InvalidTransition(String),
}
