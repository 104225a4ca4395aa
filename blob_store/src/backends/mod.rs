//! Blob store backend implementations.

pub mod local;
pub mod memory;
