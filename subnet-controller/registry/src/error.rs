use ovs_subnet_controller_core::Revision;
use std::time::Duration;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{0} not found")]
    NotFound(String),

    #[error("{0} already exists")]
    AlreadyExists(String),

    #[error("history starting at revision {0} has been compacted")]
    Compacted(Revision),

    #[error("registry unavailable: {0}")]
    Unavailable(String),

    #[error("registry request failed")]
    Transport(#[from] reqwest::Error),

    #[error("invalid registry URL")]
    Url(#[from] url::ParseError),

    #[error("failed to decode {key}")]
    Decode {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode {key}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: String, value: String },

    #[error("{key} is already set to {existing:?}; refusing to change it to {requested:?}")]
    ConfigMismatch {
        key: String,
        existing: String,
        requested: String,
    },

    #[error("registry did not respond within {0:?}")]
    NotAlive(Duration),

    #[error("watch did not become ready within {0:?}")]
    WatchNotReady(Duration),

    #[error("watch stopped before it became ready")]
    WatchStopped,
}

// === impl Error ===

impl Error {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists(_))
    }

    /// Indicates whether the operation may succeed if retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Transport(_))
    }
}
