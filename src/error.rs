//! Crate-wide error type.
//!
//! Event handlers never let an error escape the dispatch boundary — the
//! runtime logs and discards. `ParleyError` exists for the places where a
//! failure is worth naming (config loading, adapter construction) and for
//! `anyhow` interop at the adapter seams.

use crate::SessionKey;

#[derive(Debug, thiserror::Error)]
pub enum ParleyError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("a session already exists for {key}")]
    SessionExists { key: SessionKey },

    #[error("model backend error: {0}")]
    Model(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, ParleyError>;
