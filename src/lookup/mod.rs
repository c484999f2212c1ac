//! Chunk location lookup.
//!
//! The authoritative mapping from chunk id to owning/backup peers lives on the
//! superpeer overlay, reached through the [`LocationResolver`] trait. Peers
//! wrap the resolver in a [`CachedResolver`] so repeated lookups stay local;
//! every ownership mutation invalidates the cache before it becomes visible.

mod cache;
mod resolver;

pub use cache::CachedResolver;
pub use resolver::{InMemoryResolver, LocationResolver};
