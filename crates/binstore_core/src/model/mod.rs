//! Record model shared by every persisted domain type.
//!
//! # Responsibility
//! - Define the wire value vocabulary and the type-coercion codec.
//! - Define the change-tracking `Record` and the `Entity` capability.
//!
//! # Invariants
//! - Domain values cross into a `Record` only through the codec.
//! - Domain types expose their key bin through `EntityDescriptor`, never
//!   through introspection.

pub mod entity;
pub mod record;
pub mod value;
