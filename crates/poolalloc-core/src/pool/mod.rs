//! Two-tier pool allocator.
//!
//! Requests at or below the small-object ceiling are served from per-class
//! free lists ([`free_list`]) refilled from the pool arena ([`arena`]);
//! everything else goes to the large-block tier ([`large`]). [`allocator`]
//! ties the tiers together.

pub mod allocator;
pub mod arena;
pub(crate) mod free_list;
pub mod large;
pub mod size_class;
