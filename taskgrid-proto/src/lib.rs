//! Shared data model and wire shapes for `TaskGrid`.

pub mod codec;
pub mod signature;
pub mod task;
