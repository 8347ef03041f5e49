#![cfg_attr(feature = "no_std", no_std)]

//! Free-page reporting engine: a background subsystem embedded in a page
//! allocator that opportunistically finds large free blocks and hands
//! them, in batches, to an external consumer that may reclaim their
//! physical backing (e.g. a hypervisor balloon driver).
//!
//! The allocator itself, the reporting transport, and statistics surfaces
//! are all external collaborators; see [`collaborator`] for the traits an
//! allocator implements to plug into this engine, and [`config::ReportSink`]
//! for the external consumer side.
//!
//! Built with the same `no_std`-behind-a-feature-flag shape used by
//! `atomic_unique_refcell` in this workspace: by default this crate links
//! `std` so its own test suite can run against an in-memory mock
//! allocator; a kernel binary enables the `no_std` feature the same way
//! it already does for `atomic_unique_refcell`.

extern crate alloc;

mod candidate_index;
mod config;
mod error;
mod lifecycle;
#[cfg(test)]
mod mock;
mod publication;
mod scanner;
mod scheduler;

pub mod collaborator;

pub use config::{Config, ReportSink};
pub use error::EnableError;
pub use lifecycle::{ConfigToken, Enabled, Engine, DEFAULT_DEBOUNCE};
