//! Error types for the linker passes

use thiserror::Error;

/// Fatal errors aborting a compilation unit. No partial buffer is ever
/// handed to a backend after one of these.
#[derive(Error, Debug)]
pub enum MixerError {
    /// The buffer violates a structural rule of the merge (direct load/store
    /// on a merged uniform-block variable, unresolved composition slot,
    /// inconsistent legalization state).
    #[error("Structural violation: {0}")]
    StructuralViolation(String),

    /// A combinator the merge rules do not model, e.g. a bool nested below
    /// the top level of a uniform block.
    #[error("Unsupported pattern: {0}")]
    UnsupportedPattern(String),

    /// The external loader could not provide a fragment.
    #[error("Unknown shader: {0}")]
    UnknownShader(String),
}

/// Result type alias for linker operations
pub type Result<T> = std::result::Result<T, MixerError>;
