//! Error types for the update controller
//!
//! Every failure aborts the current `update_to_version` call. Errors carry the
//! component or object they refer to so a failed call can be diagnosed from a
//! single log line; retrying is left to whoever drives the controller.

use thiserror::Error;

use crate::component::ComponentKind;

/// Main error type for update controller operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// A cache was read before its watch delivered the initial listing
    #[error("{kind} cache has not completed its initial sync")]
    CacheNotSynced {
        /// Name of the cached kind, e.g. `pods`
        kind: String,
    },

    /// One or more caches could not be listed, so no catalog was built
    #[error("failed to build component catalog: {message}")]
    CatalogBuild {
        /// Every failed listing, joined
        message: String,
    },

    /// A version string is not a valid semantic version
    #[error("invalid version {value:?}: {reason}")]
    InvalidVersion {
        /// The string that failed to parse
        value: String,
        /// Why parsing failed
        reason: String,
    },

    /// A component's version-bearing field is missing or unreadable
    #[error("unable to determine version of {component}: {reason}")]
    VersionUnavailable {
        /// Name of the component
        component: String,
        /// What was missing
        reason: String,
    },

    /// No managed components exist, so there is no cluster version
    #[error("no managed components found; unable to determine highest cluster version")]
    NoComponents,

    /// Updating a single component failed
    #[error("failed update of {kind} {name}: {source}")]
    ComponentUpdate {
        /// Name of the component
        name: String,
        /// Kind of the component
        kind: ComponentKind,
        /// The underlying failure
        #[source]
        source: Box<Error>,
    },

    /// Driver configuration or desired-version record problem
    #[error("configuration error: {message}")]
    Config {
        /// Description of what is wrong
        message: String,
    },
}

impl Error {
    /// Create a catalog build error with the given message
    pub fn catalog_build(msg: impl Into<String>) -> Self {
        Self::CatalogBuild {
            message: msg.into(),
        }
    }

    /// Create a cache-not-synced error for the named kind
    pub fn cache_not_synced(kind: impl Into<String>) -> Self {
        Self::CacheNotSynced { kind: kind.into() }
    }

    /// Create an invalid version error
    pub fn invalid_version(value: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidVersion {
            value: value.into(),
            reason: reason.into(),
        }
    }

    /// Create a version unavailable error for the named component
    pub fn version_unavailable(component: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::VersionUnavailable {
            component: component.into(),
            reason: reason.into(),
        }
    }

    /// Wrap an error raised while updating a component
    pub fn component_update(name: impl Into<String>, kind: ComponentKind, source: Error) -> Self {
        Self::ComponentUpdate {
            name: name.into(),
            kind,
            source: Box::new(source),
        }
    }

    /// Create a configuration error with the given message
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Whether this error means a version could not be read or parsed
    pub fn is_version_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidVersion { .. } | Self::VersionUnavailable { .. }
        )
    }
}
