//! Error types for audio-graph operations

use thiserror::Error;

use crate::graph::{NodeId, ParamKind};

/// Audio graph errors
#[derive(Debug, Error)]
pub enum GraphError {
    /// The backend could not create a node
    #[error("Failed to create {kind} node: {reason}")]
    NodeCreation {
        /// Node kind that was requested
        kind: &'static str,
        /// Backend-provided reason
        reason: String,
    },

    /// A handle does not refer to a live node
    #[error("Unknown node: {0:?}")]
    UnknownNode(NodeId),

    /// The node has no such parameter
    #[error("Node {node:?} has no parameter {param:?}")]
    UnsupportedParam {
        /// Target node
        node: NodeId,
        /// Requested parameter
        param: ParamKind,
    },

    /// No effect with this id is tracked
    #[error("Unknown effect: {0}")]
    UnknownEffect(String),

    /// An update targeted an effect of a different type
    #[error("Effect {id} is a {expected}, update was a {actual}")]
    KindMismatch {
        /// Effect id
        id: String,
        /// Type currently built for the id
        expected: &'static str,
        /// Type carried by the update
        actual: &'static str,
    },

    /// `update_effect` cannot switch an effect on or off
    #[error("Effect {0} must be enabled or disabled through apply_effects")]
    EnabledChange(String),

    /// Wet/dry ramps are only meaningful for effects with a wet/dry split
    #[error("Effect {0} has no wet/dry controls")]
    NoWetDry(String),

    /// The audio context could not be started or resumed
    #[error("Audio context unavailable: {0}")]
    ContextUnavailable(String),

    /// The processor has been disposed
    #[error("Effects processor disposed")]
    Disposed,
}

/// Result type for graph operations
pub type Result<T> = std::result::Result<T, GraphError>;
