//! Crate-wide error types.

use thiserror::Error;

use crate::StoreError;

pub type ProfileResult<T> = Result<T, ProfileError>;

#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("{op}: {source}")]
    Store {
        op: &'static str,
        #[source]
        source: StoreError,
    },

    #[error("none of the queries in the selected time range contain {search:?}")]
    NoMatch { search: String },

    #[error(
        "no query classes for selected instance and time range; \
         check that the MySQL settings match the recommended"
    )]
    EmptyRange,

    #[error("invalid time window: {0}")]
    InvalidWindow(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{op}: request cancelled")]
    Cancelled { op: &'static str },

    #[error("{op}: request deadline exceeded")]
    DeadlineExceeded { op: &'static str },

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl ProfileError {
    pub fn store(op: &'static str) -> impl FnOnce(StoreError) -> Self {
        move |source| Self::Store { op, source }
    }

    /// Business conditions the caller renders as an empty state rather than a fault.
    pub fn is_user_facing(&self) -> bool {
        matches!(self, Self::NoMatch { .. } | Self::EmptyRange)
    }
}
