//! Working memory for the ruleweave inference engine.
//!
//! A [`FactStore`] maps [`FactId`]s to typed [`Fact`]s and keeps a
//! generation counter that advances on every effective mutation. Readers
//! that need a stable view (for example parallel rule matching) take a
//! [`FactSnapshot`], which shares storage with the store until the next
//! write.

pub mod error;
pub mod fact;
pub mod store;
pub mod value;

pub use error::FactError;
pub use fact::{Fact, FactId};
pub use store::{FactSnapshot, FactSource, FactStore};
pub use value::Value;
