/*!
 * Error Types
 * Centralized error handling with thiserror and miette
 */

use miette::Diagnostic;
use thiserror::Error;

// Re-export subsystem errors
pub use crate::memory::baseline::BaselineError;
pub use crate::memory::virtual_memory::VirtualMemoryError;

/// Common result type for configuration and lookup operations
pub type NmtResult<T> = Result<T, NmtError>;

/// Errors caused by invalid external input
///
/// These are always reported to the caller and never fatal.
#[derive(Error, Debug, Clone, PartialEq, Eq, Diagnostic)]
pub enum NmtError {
    #[error("Invalid tracking level: '{0}'")]
    #[diagnostic(
        code(nmt::invalid_level),
        help("Use one of: off, summary, detail.")
    )]
    InvalidTrackingLevel(String),

    #[error("Unknown memory tag: '{0}'")]
    #[diagnostic(
        code(nmt::unknown_tag),
        help("Tag names are case-insensitive, e.g. 'Internal', 'GC', 'Thread Stack'.")
    )]
    UnknownMemoryTag(String),

    #[error("Unknown scale: '{0}'")]
    #[diagnostic(code(nmt::unknown_scale), help("Use one of: B, KB, MB, GB."))]
    UnknownScale(String),
}

/// Unified error type with miette diagnostics
#[derive(Error, Debug, Diagnostic)]
pub enum TrackerError {
    #[error("Tracking error: {0}")]
    #[diagnostic(transparent)]
    Nmt(#[from] NmtError),

    #[error("Virtual memory error: {0}")]
    #[diagnostic(transparent)]
    VirtualMemory(#[from] VirtualMemoryError),

    #[error("Baseline error: {0}")]
    #[diagnostic(transparent)]
    Baseline(#[from] BaselineError),
}
