//! Error types for allocation and configuration.

use thiserror::Error;

use crate::pool::size_class::ALIGN;

/// Errors returned by allocation entry points.
///
/// Allocation failure is a recoverable condition: nothing in this crate
/// aborts or panics when memory runs out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AllocError {
    /// The platform allocator could not supply memory and no recovery
    /// handler was installed (or the handler gave up).
    #[error("out of memory: platform allocator could not supply {size} bytes")]
    Exhausted { size: usize },
    /// `count * elem_size` does not fit the address space.
    #[error("allocation of {count} elements of {elem_size} bytes overflows the address space")]
    LengthOverflow { count: usize, elem_size: usize },
    /// The element type needs a stricter alignment than the block stride.
    #[error("alignment {align} exceeds the {ALIGN}-byte block boundary")]
    UnsupportedAlignment { align: usize },
}

impl AllocError {
    /// True for the out-of-memory case.
    #[must_use]
    pub const fn is_exhausted(&self) -> bool {
        matches!(self, Self::Exhausted { .. })
    }
}

/// Errors raised while validating a [`crate::PoolConfig`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("max_small_bytes {value} must be a non-zero multiple of {ALIGN} no larger than {max}")]
    InvalidMaxSmall { value: usize, max: usize },
    #[error("refill_batch {value} must be between 1 and {max}")]
    InvalidRefillBatch { value: usize, max: usize },
    #[error("could not parse {var}={raw:?}")]
    Unparseable { var: &'static str, raw: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages_are_distinct() {
        let oom = AllocError::Exhausted { size: 4096 };
        let len = AllocError::LengthOverflow {
            count: usize::MAX,
            elem_size: 8,
        };
        assert!(oom.to_string().contains("4096"));
        assert!(len.to_string().contains("overflows"));
        assert!(oom.is_exhausted());
        assert!(!len.is_exhausted());
    }

    #[test]
    fn alignment_message_names_stride() {
        let err = AllocError::UnsupportedAlignment { align: 64 };
        assert_eq!(
            err.to_string(),
            format!("alignment 64 exceeds the {ALIGN}-byte block boundary")
        );
    }
}
