//! Core domain types
//!
//! Entities are shared between the persistence layer and the execution
//! engine. Every entity carries an `owner_id`; lookups are always scoped by it.

pub mod atom;
pub mod pipeline;
pub mod task;
pub mod tree;
pub mod worker;
