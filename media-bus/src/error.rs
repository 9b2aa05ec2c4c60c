use thiserror::Error;

use crate::bus::State;

#[derive(Error, Debug)]
pub enum Error {
    #[error("failed to create node '{name}' from factory '{factory}'")]
    InstantiationFailure { factory: String, name: String },

    #[error("pipeline construction failed: {0}")]
    ConstructionFailure(String),

    #[error("state change to {target} rejected by '{node}': {reason}")]
    TransitionRejected {
        node: String,
        target: State,
        reason: String,
    },

    #[error("port request '{template}' on '{node}' rejected: {reason}")]
    RequestRejected {
        node: String,
        template: String,
        reason: String,
    },

    #[error("dynamic link failed: {0}")]
    DynamicLinkFailure(String),

    #[error("no port '{port}' on node '{node}'")]
    PortNotFound { node: String, port: String },

    #[error("node not found: {0}")]
    NodeNotFound(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
