//! # Storage Module
//!
//! Storage traits used by the domain layer and their SQLite implementation.

pub mod sqlite;
pub mod traits;

pub use traits::*;
