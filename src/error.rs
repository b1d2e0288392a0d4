//! Error types for mediaflow.
//!
//! Routine dataflow conditions ([`FlowError`]) and link failures
//! ([`LinkError`]) are plain values the caller inspects. The crate-wide
//! [`Error`] wraps them together with construction-time failures.

use thiserror::Error;

/// Result type alias using mediaflow's Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Why two pads (or two elements) could not be linked.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkError {
    /// One of the pads already has a peer.
    #[error("pad is already linked")]
    AlreadyLinked,

    /// The pads' capabilities do not intersect.
    #[error("pads have no common format")]
    NoCommonFormat,

    /// Both pads have the same direction.
    #[error("pads have the same direction")]
    WrongDirection,

    /// The pads' elements do not share a parent.
    #[error("pads belong to elements in different bins")]
    WrongHierarchy,

    /// No pair of unlinked pads could be found between two elements.
    #[error("no compatible pads found")]
    NoCompatiblePads,
}

/// Non-OK result of a `push` or `pull_range` call.
///
/// Only [`FlowError::Error`] and [`FlowError::NotNegotiated`] indicate a fault;
/// the other variants are control flow an element handles locally.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlowError {
    /// The pad has no peer.
    #[error("not linked")]
    NotLinked,

    /// The pad (or its peer) is flushing.
    #[error("flushing")]
    Flushing,

    /// End of stream was reached.
    #[error("end of stream")]
    Eos,

    /// No common format could be fixed for the link.
    #[error("not negotiated")]
    NotNegotiated,

    /// Fatal dataflow error.
    #[error("flow error")]
    Error,
}

/// Successful result of a `push` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FlowSuccess {
    /// The buffer was accepted.
    #[default]
    Ok,
}

/// Result of pushing a buffer or pulling a range.
pub type FlowResult = std::result::Result<FlowSuccess, FlowError>;

/// A state transition could not be performed.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[error("state change failed")]
pub struct StateChangeError;

/// Main error type for mediaflow operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Pad or element linking failed.
    #[error("link failed: {0}")]
    Link(#[from] LinkError),

    /// A state change failed.
    #[error(transparent)]
    StateChange(#[from] StateChangeError),

    /// No factory is registered under this type name.
    #[error("unknown element type: {0}")]
    UnknownType(String),

    /// A factory with this type name is already registered.
    #[error("element type already registered: {0}")]
    AlreadyRegistered(String),

    /// A child or pad with this name already exists in the container.
    #[error("name '{name}' is already used in '{parent}'")]
    NameInUse {
        /// Parent element or bin name.
        parent: String,
        /// Conflicting name.
        name: String,
    },

    /// The object is already owned by another element or bin.
    #[error("'{0}' already has a parent")]
    AlreadyHasParent(String),

    /// A container operation was used on an element that is not a bin.
    #[error("'{0}' is not a bin")]
    NotABin(String),

    /// The object is not owned by the given element or bin.
    #[error("'{child}' is not a child of '{parent}'")]
    NotAChild {
        /// Parent element or bin name.
        parent: String,
        /// Child element or pad name.
        child: String,
    },

    /// No pad with this name exists or can be requested.
    #[error("element '{element}' has no pad '{pad}'")]
    PadNotFound {
        /// Element name.
        element: String,
        /// Pad name.
        pad: String,
    },

    /// The element has no property with this name.
    #[error("element '{element}' has no property '{property}'")]
    UnknownProperty {
        /// Element name.
        element: String,
        /// Property name.
        property: String,
    },

    /// The property value has the wrong type or range.
    #[error("invalid value for property '{property}': {reason}")]
    InvalidProperty {
        /// Property name.
        property: String,
        /// Why the value was rejected.
        reason: String,
    },

    /// Caps could not be set on a pad.
    #[error("caps rejected: {0}")]
    CapsRejected(String),

    /// A caps string could not be parsed.
    #[error("caps parse error: {0}")]
    CapsParse(String),

    /// A launch description could not be parsed or built.
    #[error("pipeline description error: {0}")]
    Parse(String),

    /// A streaming thread could not be spawned.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_error_converts() {
        let err: Error = LinkError::NoCommonFormat.into();
        assert!(matches!(err, Error::Link(LinkError::NoCommonFormat)));
        assert_eq!(err.to_string(), "link failed: pads have no common format");
    }

    #[test]
    fn test_flow_result_is_result() {
        let ok: FlowResult = Ok(FlowSuccess::Ok);
        let err: FlowResult = Err(FlowError::Flushing);
        assert!(ok.is_ok());
        assert_eq!(err.unwrap_err().to_string(), "flushing");
    }
}
