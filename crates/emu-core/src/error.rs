//! Setup and runtime error types.

use thiserror::Error;

/// Errors from bus mapping operations.
///
/// These are configuration errors: a failed call leaves the page table
/// unchanged, and the emulator is expected to refuse to start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MapError {
    /// The requested range intersects pages already claimed by a region or
    /// a device window.
    #[error("address range overlaps an existing mapping")]
    Overlap,
    /// Base or size is not a positive multiple of the page size, or the
    /// range runs past the end of the 32-bit address space.
    #[error("address range is not page-aligned")]
    Misaligned,
    /// All mapping slots of the requested kind are in use.
    #[error("no free mapping slots")]
    TooMany,
    /// No region is mapped at the given base address.
    #[error("no region mapped at the given base")]
    NotFound,
    /// The source address is not the base of a mapped region.
    #[error("address is not the base of a mapped region")]
    NotBase,
}

/// Failure reported by a device from a scheduled callback.
///
/// Callback failures are never swallowed: the system surfaces them as a
/// fatal stop.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct DeviceFault(pub String);

impl DeviceFault {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Why the emulator loop exited.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// The guest requested shutdown through the native-features hook.
    ShutdownRequested,
    /// The embedding process requested a stop.
    UserBreak,
    /// An internal inconsistency or unrecoverable device failure.
    Fatal(String),
}
