//! Error types shared across the resolution layer.

use std::sync::Arc;

use thiserror::Error;

use crate::data::IntoValuesError;
use crate::port::PortError;

/// Why a loader couldn't produce a value.
///
/// A failed batch fails every caller waiting on it with the same error, so
/// this type is cheap to clone.
#[derive(Debug, Clone, Error)]
pub enum LoadError {
    /// The batch function's bulk read failed.
    #[error(transparent)]
    Port(Arc<PortError>),

    /// The bulk result couldn't be paired with the requested keys.
    #[error(transparent)]
    Values(#[from] IntoValuesError),

    /// A different kind of loader is already registered for this site.
    #[error("loader registered at {site} has a different type")]
    SiteTypeMismatch { site: String },
}

impl From<PortError> for LoadError {
    fn from(err: PortError) -> Self {
        LoadError::Port(Arc::new(err))
    }
}

/// An error raised while resolving one field. It's attached to the response
/// at the field's path; sibling fields keep resolving.
#[derive(Debug, Clone, Error)]
pub enum FieldError {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error("{0}")]
    Port(Arc<PortError>),

    /// An argument was missing or couldn't be coerced to its input type.
    #[error("invalid value for argument \"{name}\": {message}")]
    Argument { name: String, message: String },

    /// A non-null field resolved to null.
    #[error("cannot return null for non-nullable field {type_name}.{field}")]
    NullViolation { type_name: String, field: String },

    /// A field the schema declares but no resolver handles for this parent.
    #[error("no resolver for {type_name}.{field}")]
    Unresolvable { type_name: String, field: String },
}

impl From<PortError> for FieldError {
    fn from(err: PortError) -> Self {
        FieldError::Port(Arc::new(err))
    }
}

/// Errors that prevent the service from starting or running at all.
#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {message}")]
    Config { message: String },

    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration file: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
