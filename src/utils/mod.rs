// src/utils/mod.rs
//! Shared utilities: configuration, errors, identifiers, path checks

pub mod config;
pub mod errors;
pub mod ids;
pub mod paths;
