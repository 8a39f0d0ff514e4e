//! # poolalloc-core
//!
//! A two-tier memory allocator for fixed-size object pools.
//!
//! - Small requests (at or below the configured ceiling, 128 bytes by
//!   default) are served from per-size-class free lists, refilled in batches
//!   from a growable pool arena.
//! - Larger requests go straight to the platform allocator through the
//!   large-block tier, which runs an out-of-memory recovery protocol driven
//!   by a user-installable handler.
//!
//! The allocator is single-threaded. Wrap it in [`SharedPool`] (or keep one
//! instance per thread) when more than one thread needs it.
//!
//! Raw memory is only touched inside `platform`, `pool`, `raw`, `shared`,
//! `typed` and `uninit`; configuration, errors and logging are safe Rust.

#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod log;
#[allow(unsafe_code)]
pub mod platform;
#[allow(unsafe_code)]
pub mod pool;
#[allow(unsafe_code)]
pub mod raw;
#[allow(unsafe_code)]
pub mod shared;
#[allow(unsafe_code)]
pub mod typed;
#[allow(unsafe_code)]
pub mod uninit;

pub use config::{LogLevelSetting, PoolConfig};
pub use error::{AllocError, ConfigError};
pub use log::{AllocatorLogLevel, AllocatorLogRecord};
pub use platform::{Budgeted, PlatformAlloc, SystemPlatform};
pub use pool::allocator::{PoolAllocator, PoolStats};
pub use pool::arena::ArenaStats;
pub use pool::large::{LargeBlockAllocator, LargeStats, RecoveryHandler, RecoveryStatus};
pub use pool::size_class::{ALIGN, DEFAULT_MAX_SMALL_BYTES};
pub use raw::RawAllocator;
pub use shared::SharedPool;
pub use typed::TypedAllocator;
pub use uninit::{
    destroy, uninitialized_copy, uninitialized_copy_n, uninitialized_default_construct,
    uninitialized_default_construct_n, uninitialized_fill, uninitialized_fill_n,
    uninitialized_move, uninitialized_move_n,
};
