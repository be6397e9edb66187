//! Ephemeral ordered-set storage
//!
//! In-process ordered sets backing the vote state and ranking views.
//! Nothing here survives a restart; durable copies are produced by the
//! reconciliation pipeline.

pub mod sorted_set;

pub use sorted_set::{rank_descending, SortedSet};
