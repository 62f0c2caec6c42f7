//! netvault-cli: Operator entry point for the netvault asset store.
//!
//! Loads store configuration, runs one-shot maintenance commands and the
//! periodic maintenance loop.

pub mod config;
pub mod maintenance;
