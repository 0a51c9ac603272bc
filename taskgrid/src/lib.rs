//! `TaskGrid`: task table with a local cache and signature-gated sync.

pub mod cache;
pub mod config;
mod persist;
pub mod remote;
pub mod signature;
pub mod sync;
pub mod views;
