/// Errors returned by [`crate::Engine::enable`].
///
/// Mirrors the plain-enum, no-`Display` style used for error reporting
/// elsewhere in this tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnableError {
    /// Another configuration is already active.
    Busy,
    /// Allocating the per-region candidate indices or the staging batch failed.
    OutOfMemory,
    /// The requested `min_order` is smaller than the allocator's own minimum.
    MinOrderTooSmall,
}
