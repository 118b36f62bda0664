//! Error types for the denoiser binding layer
//!
//! Every failure in this crate is fatal for the current frame or pass: the
//! dispatch graph is regenerated from scratch every frame, so a malformed
//! graph points at a configuration defect rather than a transient condition.

use crate::library::{LibraryError, ResourceType};
use std::fmt;
use thiserror::Error;

/// The stage in which a failure was detected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Abstract-to-concrete translation (formats, capabilities, properties)
    Translation,
    /// Method-instance construction (library instance, pools, pipelines)
    InstanceCreation,
    /// Per-frame dispatch-graph computation and recording
    Dispatch,
    /// Resolving and binding resources into a binding set
    Binding,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Translation => write!(f, "translation"),
            Self::InstanceCreation => write!(f, "instance creation"),
            Self::Dispatch => write!(f, "dispatch"),
            Self::Binding => write!(f, "binding"),
        }
    }
}

/// Errors raised while binding the library's dispatch graph to a backend
#[derive(Debug, Error)]
pub enum DenoiseError {
    /// Unsupported abstract format, missing backend capability or bad configuration value
    #[error("configuration error during {stage}: {message}")]
    Configuration { stage: Stage, message: String },

    /// A call into the filtering library returned a non-success result
    #[error("filtering library call `{call}` failed during {stage}: {source}")]
    LibraryCall {
        stage: Stage,
        call: &'static str,
        #[source]
        source: LibraryError,
    },

    /// The resources consumed while binding do not match the declared count
    #[error("layout mismatch in dispatch '{dispatch}': {detail}")]
    LayoutMismatch { dispatch: String, detail: String },

    /// A semantic resource role has no concrete texture behind it
    #[error("resource role {role:?} (pool index {index}) in dispatch '{dispatch}' does not resolve to a texture")]
    UnresolvedRole { dispatch: String, role: ResourceType, index: u16 },

    /// The backend rejected an operation
    #[error("backend error during {stage}: {message}")]
    Backend { stage: Stage, message: String },
}

impl DenoiseError {
    /// Creates a configuration error for the given stage
    pub fn configuration(stage: Stage, message: impl Into<String>) -> Self {
        Self::Configuration { stage, message: message.into() }
    }

    /// Creates a backend error for the given stage
    pub fn backend(stage: Stage, message: impl Into<String>) -> Self {
        Self::Backend { stage, message: message.into() }
    }

    /// Wraps a failed library call
    pub fn library(stage: Stage, call: &'static str, source: LibraryError) -> Self {
        Self::LibraryCall { stage, call, source }
    }

    /// Re-tags the error with the stage it surfaced in
    ///
    /// Binding errors keep their stage.
    pub fn at_stage(self, stage: Stage) -> Self {
        match self {
            Self::Configuration { message, .. } => Self::Configuration { stage, message },
            Self::Backend { message, .. } => Self::Backend { stage, message },
            Self::LibraryCall { call, source, .. } => Self::LibraryCall { stage, call, source },
            other => other,
        }
    }

    /// Returns the stage that failed, for diagnostics
    pub fn stage(&self) -> Stage {
        match self {
            Self::Configuration { stage, .. } | Self::LibraryCall { stage, .. } | Self::Backend { stage, .. } => *stage,
            Self::LayoutMismatch { .. } | Self::UnresolvedRole { .. } => Stage::Binding,
        }
    }
}

/// Result alias used throughout the crate
pub type Result<T, E = DenoiseError> = std::result::Result<T, E>;
