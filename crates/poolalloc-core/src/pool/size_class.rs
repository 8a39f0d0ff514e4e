//! Size classes for small allocations.
//!
//! Class `i` serves byte sizes in `(i * ALIGN, (i + 1) * ALIGN]`. Requests
//! are rounded up to the stride before they are associated with a class,
//! so two sizes that round to the same value always share a class.

/// Alignment stride and size-class granularity (bytes).
pub const ALIGN: usize = 8;

/// Default small-object ceiling (bytes). Above this, use the large tier.
pub const DEFAULT_MAX_SMALL_BYTES: usize = 128;

/// Largest ceiling a configuration may ask for.
pub const MAX_SMALL_BYTES_LIMIT: usize = 4096;

/// Rounds `bytes` up to the next multiple of [`ALIGN`].
///
/// Callers pass small-object sizes or a sixteenth of the arena size, so the
/// addition cannot overflow.
#[inline]
pub const fn round_up(bytes: usize) -> usize {
    (bytes + ALIGN - 1) & !(ALIGN - 1)
}

/// Free-list index for a request of `bytes` (treated as at least one byte).
#[inline]
pub const fn class_index(bytes: usize) -> usize {
    let bytes = if bytes == 0 { 1 } else { bytes };
    bytes.div_ceil(ALIGN) - 1
}

/// Block size served by class `index`.
#[inline]
pub const fn class_size(index: usize) -> usize {
    (index + 1) * ALIGN
}

/// Number of free lists needed for a given ceiling.
#[inline]
pub const fn class_count(max_small_bytes: usize) -> usize {
    max_small_bytes / ALIGN
}
